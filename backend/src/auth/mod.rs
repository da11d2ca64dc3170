//! Bearer-token authentication.
//!
//! `require_auth` resolves the access token to a user and stores it as a
//! [`CurrentUser`] request extension. Refresh tokens are compared against the
//! stored copy in constant time.

pub mod password;
pub mod token;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::models::User;
use crate::AppState;

/// The authenticated user of a request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn id(&self) -> i64 {
        self.0.id
    }

    pub fn is_admin(&self) -> bool {
        self.0.is_admin()
    }

    pub fn ensure_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "Accès réservé aux administrateurs".to_string(),
            ))
        }
    }

    /// Allow the user acting on their own resource, or an admin.
    pub fn ensure_self_or_admin(&self, user_id: i64) -> Result<(), AppError> {
        if self.id() == user_id || self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Accès non autorisé".to_string()))
        }
    }

    /// The principal quartier, required by quartier-scoped operations.
    pub fn require_quartier(&self) -> Result<i64, AppError> {
        self.0.quartier_id.ok_or_else(|| {
            AppError::BadRequest("Vous devez appartenir à un quartier".to_string())
        })
    }
}

/// Authentication middleware for protected routes.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| AppError::Unauthorized("Token d'authentification requis".to_string()))?;

    let user = authenticate(&state, &token).await?;
    request.extensions_mut().insert(CurrentUser(user));

    Ok(next.run(request).await)
}

/// Admin gate; must run inside `require_auth`.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    let current = request
        .extensions()
        .get::<CurrentUser>()
        .ok_or_else(|| AppError::Unauthorized("Token d'authentification requis".to_string()))?;
    current.ensure_admin()?;

    Ok(next.run(request).await)
}

/// Resolve an access token to its user.
pub async fn authenticate(state: &AppState, token: &str) -> Result<User, AppError> {
    let claims = state.tokens.verify_access(token)?;

    state
        .repo
        .get_user(claims.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Utilisateur non trouvé".to_string()))
}

/// Extract the bearer token, treating the SPA's `null`/`undefined` placeholders as absent.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();

    match token {
        "" | "null" | "undefined" => None,
        _ => Some(token.to_string()),
    }
}

/// Perform constant-time string comparison.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc.def")), Some("abc.def".to_string()));
        assert_eq!(bearer_token(&headers("Bearer null")), None);
        assert_eq!(bearer_token(&headers("Bearer undefined")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("token-123", "token-123"));
        assert!(!constant_time_compare("token-123", "token-124"));
        assert!(!constant_time_compare("short", "much-longer-token"));
        assert!(constant_time_compare("", ""));
    }
}
