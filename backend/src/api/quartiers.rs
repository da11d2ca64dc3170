//! Quartier API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{created, message, search_term, success, ApiResult, MessageBody};
use crate::db::QuartierData;
use crate::errors::AppError;
use crate::geo::{self, Geometry};
use crate::models::{
    non_empty, LocateQuery, Quartier, QuartierMember, QuartierRequest, QuartierSearchQuery,
};
use crate::AppState;

/// GET /api/quartiers - List all quartiers.
pub async fn list_quartiers(State(state): State<AppState>) -> ApiResult<Vec<Quartier>> {
    success(state.repo.list_quartiers().await?)
}

/// GET /api/quartiers/{id} - Get a single quartier.
pub async fn get_quartier(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Quartier> {
    match state.repo.get_quartier(id).await? {
        Some(quartier) => success(quartier),
        None => Err(AppError::NotFound(format!("Quartier {} non trouvé", id))),
    }
}

/// GET /api/quartiers/ville/{ville} - Quartiers of a city, case-insensitive.
pub async fn quartiers_by_ville(
    State(state): State<AppState>,
    Path(ville): Path<String>,
) -> ApiResult<Vec<Quartier>> {
    success(state.repo.quartiers_by_ville(&ville).await?)
}

/// GET /api/quartiers/search?q= - Substring match on name, city or postal code.
pub async fn search_quartiers(
    State(state): State<AppState>,
    Query(query): Query<QuartierSearchQuery>,
) -> ApiResult<Vec<Quartier>> {
    let term = search_term(query.q.as_deref())?;
    success(state.repo.search_quartiers(term).await?)
}

/// GET /api/quartiers/locate?lon=&lat= - The quartier containing a point.
pub async fn locate_quartier(
    State(state): State<AppState>,
    Query(query): Query<LocateQuery>,
) -> ApiResult<Quartier> {
    let quartiers = state.repo.list_quartiers().await?;

    match geo::locate(&quartiers, query.lon, query.lat) {
        Some(quartier) => success(quartier.clone()),
        None => Err(AppError::NotFound(
            "Aucun quartier ne contient ce point".to_string(),
        )),
    }
}

/// GET /api/quartiers/{id}/users - Active members of a quartier.
pub async fn quartier_members(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<QuartierMember>> {
    if state.repo.get_quartier(id).await?.is_none() {
        return Err(AppError::NotFound(format!("Quartier {} non trouvé", id)));
    }
    success(state.repo.quartier_members(id).await?)
}

/// POST /api/quartiers - Create a quartier (admin).
pub async fn create_quartier(
    State(state): State<AppState>,
    Json(request): Json<QuartierRequest>,
) -> ApiResult<Quartier> {
    let data = QuartierData {
        nom_quartier: required_name(request.nom_quartier.as_deref())?,
        ville: request.ville,
        code_postal: request.code_postal,
        description: request.description,
        geom: parse_geometry(request.geom)?,
    };

    let quartier = state.repo.create_quartier(&data).await?;
    tracing::info!(quartier_id = quartier.id, "Quartier created");
    created(quartier)
}

/// PUT /api/quartiers/{id} - Update a quartier (admin). Absent fields are kept.
pub async fn update_quartier(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<QuartierRequest>,
) -> ApiResult<Quartier> {
    let existing = state
        .repo
        .get_quartier(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Quartier {} non trouvé", id)))?;

    let nom_quartier = match request.nom_quartier.as_deref() {
        Some(nom) => required_name(Some(nom))?,
        None => existing.nom_quartier,
    };
    let geom = match request.geom {
        Some(value) => parse_geometry(Some(value))?,
        None => existing.geom,
    };

    let data = QuartierData {
        nom_quartier,
        ville: request.ville.or(existing.ville),
        code_postal: request.code_postal.or(existing.code_postal),
        description: request.description.or(existing.description),
        geom,
    };

    success(state.repo.update_quartier(id, &data).await?)
}

/// DELETE /api/quartiers/{id} - Delete a quartier (admin).
pub async fn delete_quartier(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<MessageBody> {
    if !state.repo.delete_quartier(id).await? {
        return Err(AppError::NotFound(format!("Quartier {} non trouvé", id)));
    }

    tracing::info!(quartier_id = id, "Quartier deleted");
    message("Quartier supprimé")
}

fn required_name(nom: Option<&str>) -> Result<String, AppError> {
    non_empty(nom)
        .map(|n| n.trim().to_string())
        .ok_or_else(|| AppError::Validation("Le nom du quartier est requis".to_string()))
}

/// `null` clears the boundary.
fn parse_geometry(value: Option<serde_json::Value>) -> Result<Option<Geometry>, AppError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => Geometry::from_value(value).map(Some),
    }
}
