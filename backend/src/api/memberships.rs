//! User/quartier membership endpoints.

use axum::{
    extract::{Path, State},
    Extension, Json,
};

use super::{created, message, success, ApiResult, MessageBody};
use crate::auth::CurrentUser;
use crate::errors::AppError;
use crate::models::{AddMembershipRequest, CreatedId, Membership};
use crate::AppState;

/// Self or admin, on an existing user.
async fn ensure_target(
    state: &AppState,
    current: &CurrentUser,
    user_id: i64,
) -> Result<(), AppError> {
    current.ensure_self_or_admin(user_id)?;
    if state.repo.get_user(user_id).await?.is_none() {
        return Err(AppError::NotFound("Utilisateur non trouvé".to_string()));
    }
    Ok(())
}

/// GET /api/users/{user_id}/quartiers - Active memberships, principal first.
pub async fn list_memberships(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(user_id): Path<i64>,
) -> ApiResult<Vec<Membership>> {
    ensure_target(&state, &current, user_id).await?;
    success(state.repo.list_memberships(user_id).await?)
}

/// GET /api/users/{user_id}/quartier-principal - The principal membership.
pub async fn get_principal_membership(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(user_id): Path<i64>,
) -> ApiResult<Membership> {
    ensure_target(&state, &current, user_id).await?;

    match state.repo.principal_membership(user_id).await? {
        Some(membership) => success(membership),
        None => Err(AppError::NotFound(
            "Aucun quartier principal".to_string(),
        )),
    }
}

/// POST /api/users/{user_id}/quartiers - Join a quartier.
pub async fn add_membership(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(user_id): Path<i64>,
    Json(request): Json<AddMembershipRequest>,
) -> ApiResult<CreatedId> {
    ensure_target(&state, &current, user_id).await?;

    if state.repo.get_quartier(request.quartier_id).await?.is_none() {
        return Err(AppError::NotFound("Quartier non trouvé".to_string()));
    }

    let id = state
        .repo
        .add_membership(user_id, request.quartier_id, request.est_principal)
        .await?;

    tracing::info!(
        user_id,
        quartier_id = request.quartier_id,
        principal = request.est_principal,
        "Membership added"
    );
    created(CreatedId { id })
}

/// PUT /api/users/{user_id}/quartiers/{quartier_id}/principal - Switch the principal quartier.
pub async fn set_principal_membership(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path((user_id, quartier_id)): Path<(i64, i64)>,
) -> ApiResult<MessageBody> {
    ensure_target(&state, &current, user_id).await?;

    if state.repo.get_quartier(quartier_id).await?.is_none() {
        return Err(AppError::NotFound("Quartier non trouvé".to_string()));
    }

    state
        .repo
        .set_principal_membership(user_id, quartier_id)
        .await?;
    message("Quartier principal mis à jour")
}

/// DELETE /api/users/{user_id}/quartiers/{relation_id} - Leave a secondary quartier.
pub async fn remove_membership(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path((user_id, relation_id)): Path<(i64, i64)>,
) -> ApiResult<MessageBody> {
    ensure_target(&state, &current, user_id).await?;

    state.repo.remove_membership(user_id, relation_id).await?;
    message("Quartier retiré")
}
