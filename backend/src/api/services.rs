//! Local service API endpoints.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};

use super::{created, message, reindex, success, unindex, ApiResult, MessageBody, SEARCH_LIMIT};
use crate::auth::CurrentUser;
use crate::db::ServiceFilters;
use crate::errors::AppError;
use crate::models::{
    non_empty, timestamp_field, Service, ServiceRequest, ServiceSearchQuery, ServiceStats,
    ServiceStatut, StatusRequest,
};
use crate::search::ListingKind;
use crate::AppState;

async fn load(state: &AppState, id: i64) -> Result<Service, AppError> {
    state
        .repo
        .get_service(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Service non trouvé".to_string()))
}

async fn load_owned(state: &AppState, current: &CurrentUser, id: i64) -> Result<Service, AppError> {
    let service = load(state, id).await?;
    if service.utilisateur_id != current.id() {
        return Err(AppError::Forbidden(
            "Vous n'êtes pas l'auteur de ce service".to_string(),
        ));
    }
    Ok(service)
}

/// Normalize both dates and check their order.
fn normalize_dates(request: &mut ServiceRequest) -> Result<(), AppError> {
    request.date_debut = timestamp_field("date_debut", request.date_debut.as_deref())?;
    request.date_fin = timestamp_field("date_fin", request.date_fin.as_deref())?;

    if let (Some(debut), Some(fin)) = (&request.date_debut, &request.date_fin) {
        if fin < debut {
            return Err(AppError::Validation(
                "La date de fin ne peut pas être antérieure à la date de début".to_string(),
            ));
        }
    }
    Ok(())
}

/// POST /api/services - Publish a service in the author's quartier.
pub async fn create_service(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(mut request): Json<ServiceRequest>,
) -> ApiResult<Service> {
    let quartier_id = current.require_quartier()?;

    if non_empty(request.titre.as_deref()).is_none()
        || non_empty(request.description.as_deref()).is_none()
        || non_empty(request.categorie.as_deref()).is_none()
        || request.type_service.is_none()
    {
        return Err(AppError::Validation(
            "Titre, description, type de service et catégorie sont requis".to_string(),
        ));
    }
    normalize_dates(&mut request)?;

    let service = state
        .repo
        .create_service(current.id(), quartier_id, &request)
        .await?;

    reindex(&state, &service).await;
    tracing::info!(service_id = service.id, quartier_id, "Service created");
    created(service)
}

/// GET /api/services - Active services of the user's quartier.
pub async fn list_services(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Vec<Service>> {
    let quartier_id = current.require_quartier()?;
    success(state.repo.services_by_quartier(quartier_id).await?)
}

/// GET /api/services/search - Structured filters, optionally intersected with a text query.
pub async fn search_services(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<ServiceSearchQuery>,
) -> ApiResult<Vec<Service>> {
    let quartier_id = current.require_quartier()?;

    let filters = ServiceFilters {
        type_service: query.type_service,
        categorie: non_empty(query.categorie.as_deref()).map(str::to_string),
        prix_max: query.prix_max,
        date_debut: timestamp_field("date_debut", query.date_debut.as_deref())?,
        urgence: query.urgence,
    };
    let filtered = state.repo.search_services(quartier_id, &filters).await?;

    let Some(term) = non_empty(query.q.as_deref()) else {
        return success(filtered);
    };

    // Keep relevance order from the index
    let ids = state
        .search
        .search(ListingKind::Service, term, Some(quartier_id), SEARCH_LIMIT, 0)?;
    let mut by_id: HashMap<i64, Service> = filtered.into_iter().map(|s| (s.id, s)).collect();
    success(ids.into_iter().filter_map(|id| by_id.remove(&id)).collect())
}

/// GET /api/services/my-services - The user's own services.
pub async fn my_services(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Vec<Service>> {
    success(state.repo.services_by_user(current.id()).await?)
}

/// GET /api/services/{id} - Get a service of the user's quartier.
pub async fn get_service(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Service> {
    let service = load(&state, id).await?;

    let same_quartier = current.0.quartier_id == Some(service.quartier_id);
    if !same_quartier && service.utilisateur_id != current.id() && !current.is_admin() {
        return Err(AppError::Forbidden(
            "Ce service n'appartient pas à votre quartier".to_string(),
        ));
    }
    success(service)
}

/// PUT /api/services/{id} - Update a service (owner).
pub async fn update_service(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(mut request): Json<ServiceRequest>,
) -> ApiResult<Service> {
    load_owned(&state, &current, id).await?;
    normalize_dates(&mut request)?;

    let service = state.repo.update_service(id, &request).await?;
    reindex(&state, &service).await;
    success(service)
}

/// DELETE /api/services/{id} - Delete a service (owner).
pub async fn delete_service(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<MessageBody> {
    load_owned(&state, &current, id).await?;

    state.repo.delete_service(id).await?;
    unindex(&state, ListingKind::Service, id).await;
    message("Service supprimé")
}

/// GET /api/services/admin/all - Every service (admin).
pub async fn admin_list_services(State(state): State<AppState>) -> ApiResult<Vec<Service>> {
    success(state.repo.list_all_services().await?)
}

/// PATCH /api/services/admin/{id}/status - Change a service status (admin).
pub async fn admin_set_service_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<Service> {
    let statut = ServiceStatut::from_str(request.statut.trim()).ok_or_else(|| {
        AppError::BadRequest("Statut invalide (active, inactive ou complete)".to_string())
    })?;

    if !state.repo.set_service_status(id, statut).await? {
        return Err(AppError::NotFound("Service non trouvé".to_string()));
    }
    success(load(&state, id).await?)
}

/// GET /api/services/admin/stats - Counts by status, category and type (admin).
pub async fn admin_service_stats(State(state): State<AppState>) -> ApiResult<ServiceStats> {
    success(state.repo.service_stats().await?)
}
