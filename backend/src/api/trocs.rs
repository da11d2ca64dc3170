//! Troc (barter listing) API endpoints.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};

use super::{
    created, message, reindex, search_term, success, unindex, ApiResult, MessageBody,
    SEARCH_LIMIT,
};
use crate::auth::CurrentUser;
use crate::errors::AppError;
use crate::models::{
    non_empty, AnnonceTroc, RemoveImageRequest, StatusRequest, TextSearchQuery, TrocImages,
    TrocRequest, TrocStats, TrocStatut,
};
use crate::search::ListingKind;
use crate::AppState;

async fn load(state: &AppState, id: i64) -> Result<AnnonceTroc, AppError> {
    state
        .repo
        .get_troc(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Annonce non trouvée".to_string()))
}

async fn load_owned(
    state: &AppState,
    current: &CurrentUser,
    id: i64,
) -> Result<AnnonceTroc, AppError> {
    let troc = load(state, id).await?;
    if troc.utilisateur_id != current.id() {
        return Err(AppError::Forbidden(
            "Vous n'êtes pas l'auteur de cette annonce".to_string(),
        ));
    }
    Ok(troc)
}

/// POST /api/trocs - Publish a listing in the author's quartier.
pub async fn create_troc(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<TrocRequest>,
) -> ApiResult<AnnonceTroc> {
    let quartier_id = current.require_quartier()?;
    if non_empty(request.titre.as_deref()).is_none() {
        return Err(AppError::Validation("Le titre est requis".to_string()));
    }

    let troc = state
        .repo
        .create_troc(current.id(), quartier_id, &request)
        .await?;

    reindex(&state, &troc).await;
    tracing::info!(troc_id = troc.id, quartier_id, "Troc created");
    created(troc)
}

/// GET /api/trocs - Active listings of the user's quartier.
pub async fn list_trocs(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Vec<AnnonceTroc>> {
    let quartier_id = current.require_quartier()?;
    success(state.repo.trocs_by_quartier(quartier_id).await?)
}

/// GET /api/trocs/my-trocs - The user's own listings.
pub async fn my_trocs(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Vec<AnnonceTroc>> {
    success(state.repo.trocs_by_user(current.id()).await?)
}

/// GET /api/trocs/search?q= - Full-text search within the user's quartier.
pub async fn search_trocs(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<TextSearchQuery>,
) -> ApiResult<Vec<AnnonceTroc>> {
    let quartier_id = current.require_quartier()?;
    let term = search_term(query.q.as_deref())?;

    let ids = state
        .search
        .search(ListingKind::Troc, term, Some(quartier_id), SEARCH_LIMIT, 0)?;

    let mut trocs = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(troc) = state.repo.get_troc(id).await? {
            if troc.statut == TrocStatut::Active {
                trocs.push(troc);
            }
        }
    }
    success(trocs)
}

/// GET /api/trocs/{id} - Get a single listing.
pub async fn get_troc(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<AnnonceTroc> {
    success(load(&state, id).await?)
}

/// PUT /api/trocs/{id} - Update a listing (owner).
pub async fn update_troc(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(request): Json<TrocRequest>,
) -> ApiResult<AnnonceTroc> {
    load_owned(&state, &current, id).await?;

    let troc = state.repo.update_troc(id, &request).await?;
    reindex(&state, &troc).await;
    success(troc)
}

/// DELETE /api/trocs/{id} - Delete a listing (owner).
pub async fn delete_troc(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<MessageBody> {
    load_owned(&state, &current, id).await?;

    state.repo.delete_troc(id).await?;
    unindex(&state, ListingKind::Troc, id).await;
    message("Annonce supprimée")
}

/// DELETE /api/trocs/{id}/image - Remove one image, or all of them.
pub async fn remove_troc_image(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    body: Option<Json<RemoveImageRequest>>,
) -> ApiResult<TrocImages> {
    let troc = load_owned(&state, &current, id).await?;

    let target = body.and_then(|Json(request)| request.image_url);
    let images: Vec<String> = match non_empty(target.as_deref()) {
        Some(url) => troc.images.into_iter().filter(|i| i != url).collect(),
        None => Vec::new(),
    };

    state.repo.set_troc_images(id, &images).await?;
    success(TrocImages { images })
}

/// GET /api/trocs/admin/all - Every listing (admin).
pub async fn admin_list_trocs(State(state): State<AppState>) -> ApiResult<Vec<AnnonceTroc>> {
    success(state.repo.list_all_trocs().await?)
}

/// PATCH /api/trocs/admin/{id}/status - Activate or deactivate a listing (admin).
pub async fn admin_set_troc_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<AnnonceTroc> {
    let statut = TrocStatut::from_str(request.statut.trim()).ok_or_else(|| {
        AppError::BadRequest("Statut invalide (active ou inactive)".to_string())
    })?;

    if !state.repo.set_troc_status(id, statut).await? {
        return Err(AppError::NotFound("Annonce non trouvée".to_string()));
    }
    success(load(&state, id).await?)
}

/// GET /api/trocs/admin/stats - Counts by status, category and type (admin).
pub async fn admin_troc_stats(State(state): State<AppState>) -> ApiResult<TrocStats> {
    success(state.repo.troc_stats().await?)
}
