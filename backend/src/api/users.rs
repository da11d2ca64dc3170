//! User API endpoints.

use axum::{
    extract::{Path, State},
    Extension, Json,
};

use super::{ensure_quartier, message, success, ApiResult, MessageBody};
use crate::auth::password::{check_password_policy, hash_password};
use crate::auth::CurrentUser;
use crate::db::UserChanges;
use crate::errors::AppError;
use crate::models::{UpdateUserRequest, User, UserWithQuartier};
use crate::AppState;

/// GET /api/users - List all users (admin).
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    success(state.repo.list_users().await?)
}

/// GET /api/users/with-quartier - Users with their principal quartier (admin).
pub async fn list_users_with_quartier(
    State(state): State<AppState>,
) -> ApiResult<Vec<UserWithQuartier>> {
    success(state.repo.list_users_with_quartier().await?)
}

/// GET /api/users/{id} - Get a user.
pub async fn get_user(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<User> {
    current.ensure_self_or_admin(id)?;

    match state.repo.get_user(id).await? {
        Some(user) => success(user),
        None => Err(AppError::NotFound("Utilisateur non trouvé".to_string())),
    }
}

/// PUT /api/users/{id} - Partially update a user.
pub async fn update_user(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateUserRequest>,
) -> ApiResult<User> {
    current.ensure_self_or_admin(id)?;
    request.validate()?;

    if request.role.is_some() && !current.is_admin() {
        return Err(AppError::Forbidden(
            "Seul un administrateur peut modifier le rôle".to_string(),
        ));
    }

    if let Some(quartier_id) = request.quartier_id {
        ensure_quartier(&state, quartier_id).await?;
    }

    let password_hash = match request.password.as_deref() {
        Some(password) => {
            check_password_policy(password)?;
            Some(hash_password(password)?)
        }
        None => None,
    };

    let changes = UserChanges {
        nom: request.nom,
        prenom: request.prenom,
        email: request.email,
        password_hash,
        adresse: request.adresse,
        date_naissance: request.date_naissance,
        telephone: request.telephone,
        quartier_id: request.quartier_id,
        role: request.role,
    };

    let user = state.repo.update_user(id, &changes).await?;
    tracing::info!(user_id = id, by = current.id(), "User updated");
    success(user)
}

/// DELETE /api/users/{id} - Delete a user and revoke their sessions.
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<MessageBody> {
    current.ensure_self_or_admin(id)?;

    if !state.repo.delete_user(id).await? {
        return Err(AppError::NotFound("Utilisateur non trouvé".to_string()));
    }

    tracing::info!(user_id = id, by = current.id(), "User deleted");
    message("Utilisateur supprimé")
}
