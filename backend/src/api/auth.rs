//! Authentication API endpoints.

use axum::{extract::State, Extension, Json};

use super::{created, message, success, ApiResult, MessageBody};
use crate::auth::password::{check_password_policy, hash_password, verify_password};
use crate::auth::token::peek_claims;
use crate::auth::{constant_time_compare, CurrentUser};
use crate::errors::AppError;
use crate::models::{
    AccessTokenPayload, AuthPayload, LoginRequest, NewUser, RefreshTokenRequest,
    RegisterRequest, Role, User,
};
use crate::{geo, AppState};

const INVALID_CREDENTIALS: &str = "Email ou mot de passe incorrect";
const INVALID_REFRESH_TOKEN: &str = "Refresh token invalide ou expiré";

/// POST /api/auth/register - Create an account and open a session.
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<AuthPayload> {
    request.validate()?;
    check_password_policy(&request.password)?;

    let email = request.email.trim().to_lowercase();
    if state.repo.email_in_use(&email, None).await? {
        return Err(AppError::Conflict("Cet email est déjà utilisé".to_string()));
    }

    let quartier_id = match request.quartier_id {
        Some(id) => {
            if state.repo.get_quartier(id).await?.is_none() {
                return Err(AppError::NotFound("Quartier non trouvé".to_string()));
            }
            Some(id)
        }
        None => match (request.longitude, request.latitude) {
            (Some(lon), Some(lat)) => {
                let quartiers = state.repo.list_quartiers().await?;
                geo::locate(&quartiers, lon, lat).map(|q| q.id)
            }
            _ => None,
        },
    };

    let is_bootstrap_admin = state
        .config
        .bootstrap_admin_email
        .as_deref()
        .is_some_and(|admin| admin.eq_ignore_ascii_case(&email));

    let user = state
        .repo
        .create_user(&NewUser {
            nom: request.nom.clone(),
            prenom: request.prenom.clone(),
            email,
            password_hash: hash_password(&request.password)?,
            adresse: Some(request.adresse.clone()),
            date_naissance: request.date_naissance.clone(),
            telephone: request.telephone.clone(),
            quartier_id,
            role: if is_bootstrap_admin { Role::Admin } else { Role::User },
        })
        .await?;

    tracing::info!(user_id = user.id, quartier_id = ?user.quartier_id, "User registered");

    created(open_session(&state, user).await?)
}

/// POST /api/auth/login - Exchange credentials for a token pair.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<AuthPayload> {
    let email = request.email.trim().to_lowercase();
    if email.is_empty() || request.password.is_empty() {
        return Err(AppError::Validation(
            "Email et mot de passe requis".to_string(),
        ));
    }

    let credentials = state
        .repo
        .find_credentials(&email)
        .await?
        .ok_or_else(|| AppError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

    if !verify_password(&request.password, &credentials.password_hash) {
        tracing::info!(user_id = credentials.user.id, "Rejected login attempt");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    }

    success(open_session(&state, credentials.user).await?)
}

/// POST /api/auth/refresh-token - Issue a new access token.
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(request): Json<RefreshTokenRequest>,
) -> ApiResult<AccessTokenPayload> {
    let token = request
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Refresh token requis".to_string()))?;

    let invalid = || AppError::Forbidden(INVALID_REFRESH_TOKEN.to_string());

    let claims = peek_claims(&token).ok_or_else(invalid)?;
    let stored = state
        .repo
        .find_refresh_token(&claims.jti)
        .await?
        .ok_or_else(invalid)?;

    if stored.revoked || !constant_time_compare(&stored.token, &token) {
        return Err(invalid());
    }

    // Expired or tampered tokens are burned
    let verified = match state.tokens.verify_refresh(&token) {
        Ok(verified) => verified,
        Err(e) => {
            tracing::info!(jti = %stored.jti, "Revoking refresh token: {}", e);
            state.repo.revoke_refresh_token(&stored.jti).await?;
            return Err(invalid());
        }
    };

    if verified.user_id != stored.user_id || state.repo.get_user(stored.user_id).await?.is_none() {
        state.repo.revoke_refresh_token(&stored.jti).await?;
        return Err(AppError::NotFound("Utilisateur non trouvé".to_string()));
    }

    let access = state.tokens.issue_access(stored.user_id)?;
    success(AccessTokenPayload {
        access_token: access.token,
    })
}

/// POST /api/auth/logout - Revoke a refresh token.
pub async fn logout(
    State(state): State<AppState>,
    Json(request): Json<RefreshTokenRequest>,
) -> ApiResult<MessageBody> {
    let token = request
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Refresh token requis".to_string()))?;

    if let Some(claims) = peek_claims(&token) {
        state.repo.revoke_refresh_token(&claims.jti).await?;
    }

    message("Déconnexion réussie")
}

/// GET /api/auth/me - The authenticated user.
pub async fn me(Extension(current): Extension<CurrentUser>) -> ApiResult<User> {
    success(current.0)
}

async fn open_session(state: &AppState, user: User) -> Result<AuthPayload, AppError> {
    let access = state.tokens.issue_access(user.id)?;
    let refresh = state.tokens.issue_refresh(user.id)?;

    state
        .repo
        .store_refresh_token(
            user.id,
            &refresh.jti,
            &refresh.token,
            &refresh.expires_at_timestamp(),
        )
        .await?;

    tracing::debug!(user_id = user.id, "Session opened");

    Ok(AuthPayload {
        access_token: access.token,
        refresh_token: refresh.token,
        user,
    })
}
