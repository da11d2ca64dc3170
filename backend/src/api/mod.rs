//! REST API module.
//!
//! Handlers for every route, plus the JSON success envelope shared by all of them.

mod auth;
mod evenements;
mod journal;
mod memberships;
mod messaging;
mod quartiers;
mod services;
mod trocs;
mod users;

pub use auth::*;
pub use evenements::*;
pub use journal::*;
pub use memberships::*;
pub use messaging::*;
pub use quartiers::*;
pub use services::*;
pub use trocs::*;
pub use users::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::search::Listing;
use crate::AppState;

/// Success response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    #[serde(skip)]
    status: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            status: StatusCode::OK,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppError>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(ApiResponse::new(data))
}

/// Create a 201 response for a newly created resource.
pub fn created<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(ApiResponse {
        status: StatusCode::CREATED,
        ..ApiResponse::new(data)
    })
}

/// Message-only payload for operations without a resource to return.
#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: &'static str,
}

pub fn message(message: &'static str) -> ApiResult<MessageBody> {
    success(MessageBody { message })
}

/// Required, trimmed, non-empty query string parameter.
fn search_term(q: Option<&str>) -> Result<&str, AppError> {
    q.map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::BadRequest("Le terme de recherche est requis".to_string()))
}

/// 404 unless the quartier exists.
async fn ensure_quartier(state: &AppState, quartier_id: i64) -> Result<(), AppError> {
    match state.repo.get_quartier(quartier_id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound("Quartier non trouvé".to_string())),
    }
}

/// Index a listing; a failure is logged and does not fail the request.
async fn reindex(state: &AppState, listing: impl Into<Listing>) {
    if let Err(e) = state.search.index(listing).await {
        tracing::warn!("Failed to index listing: {}", e);
    }
}

/// Remove a listing from the index; a failure is logged.
async fn unindex(state: &AppState, kind: crate::search::ListingKind, id: i64) {
    if let Err(e) = state.search.remove(kind, id).await {
        tracing::warn!("Failed to remove listing from index: {}", e);
    }
}

/// Upper bound on full-text hits hydrated per request.
const SEARCH_LIMIT: usize = 100;

/// Health check endpoint.
pub async fn health_check() -> &'static str {
    "OK"
}
