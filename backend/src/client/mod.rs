//! Typed HTTP client for the NextDoorBuddy API.
//!
//! Keeps the session tokens, attaches the access token to every request,
//! and refreshes it once when the server answers 401 or when it is about to
//! expire.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::auth::token::peek_claims;
use crate::errors::ErrorResponse;
use crate::models::{AccessTokenPayload, AuthPayload, User};

/// Remaining lifetime under which the access token is refreshed.
pub const REFRESH_THRESHOLD_SECS: i64 = 120;

/// Default period of the background refresh loop.
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(60);

/// Client-side error.
#[derive(Debug)]
pub enum ClientError {
    /// The server answered with an error status
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },
    /// The operation needs a session
    NotLoggedIn,
    /// Transport failure
    Http(reqwest::Error),
    /// Body could not be encoded or decoded
    Json(serde_json::Error),
}

impl ClientError {
    /// HTTP status of an API error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status(),
            _ => None,
        }
    }

    async fn from_response(response: Response) -> Self {
        let status = response.status();
        match response.json::<ErrorResponse>().await {
            Ok(body) => ClientError::Api {
                status,
                code: body.error.code,
                message: body.error.message,
            },
            Err(_) => ClientError::Api {
                status,
                code: String::new(),
                message: status.canonical_reason().unwrap_or("Erreur").to_string(),
            },
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Api {
                status, message, ..
            } => write!(f, "{}: {}", status, message),
            ClientError::NotLoggedIn => write!(f, "not logged in"),
            ClientError::Http(e) => write!(f, "HTTP error: {}", e),
            ClientError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Http(err)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Json(err)
    }
}

/// Tokens and profile of the logged-in user.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// API client holding an optional session.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: RwLock<Option<Session>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), base_url)
    }

    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session: RwLock::new(None),
        }
    }

    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn current_user(&self) -> Option<User> {
        self.session.read().await.as_ref().map(|s| s.user.clone())
    }

    // ==================== SESSION ====================

    /// POST /api/auth/login and keep the returned session.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ClientError> {
        let body = json!({ "email": email, "password": password });
        let payload: AuthPayload = self.send_anonymous(Method::POST, "/api/auth/login", &body).await?;
        Ok(self.open_session(payload).await)
    }

    /// POST /api/auth/register and keep the returned session.
    pub async fn register<B: Serialize>(&self, request: &B) -> Result<User, ClientError> {
        let body = serde_json::to_value(request)?;
        let payload: AuthPayload = self
            .send_anonymous(Method::POST, "/api/auth/register", &body)
            .await?;
        Ok(self.open_session(payload).await)
    }

    /// Revoke the refresh token server-side. The local session is cleared
    /// even when the server call fails.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };

        let body = json!({ "refreshToken": session.refresh_token });
        let _: Value = self
            .send_anonymous(Method::POST, "/api/auth/logout", &body)
            .await?;
        Ok(())
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Any failure ends the session.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let refresh_token = match self.session.read().await.as_ref() {
            Some(session) => session.refresh_token.clone(),
            None => return Err(ClientError::NotLoggedIn),
        };

        let body = json!({ "refreshToken": refresh_token });
        let result: Result<AccessTokenPayload, ClientError> = self
            .send_anonymous(Method::POST, "/api/auth/refresh-token", &body)
            .await;

        let mut session = self.session.write().await;
        match result {
            Ok(payload) => {
                if let Some(session) = session.as_mut() {
                    session.access_token = payload.access_token;
                }
                tracing::debug!("Access token refreshed");
                Ok(())
            }
            Err(e) => {
                tracing::info!("Token refresh failed, logging out: {}", e);
                *session = None;
                Err(e)
            }
        }
    }

    /// Refresh the access token when it expires within two minutes.
    ///
    /// Returns whether a refresh happened.
    pub async fn refresh_if_expiring(&self, now: DateTime<Utc>) -> Result<bool, ClientError> {
        let access_token = match self.session.read().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => return Ok(false),
        };

        let remaining = peek_claims(&access_token)
            .map(|claims| claims.exp - now.timestamp())
            .unwrap_or(0);
        if remaining >= REFRESH_THRESHOLD_SECS {
            return Ok(false);
        }

        self.refresh().await?;
        Ok(true)
    }

    /// Run `refresh_if_expiring` every `period` until the session ends.
    ///
    /// Callers usually pass [`DEFAULT_REFRESH_PERIOD`].
    pub fn spawn_refresh_loop(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if !client.is_logged_in().await {
                    break;
                }
                if let Err(e) = client.refresh_if_expiring(Utc::now()).await {
                    tracing::warn!("Scheduled token refresh failed: {}", e);
                }
            }
        })
    }

    async fn open_session(&self, payload: AuthPayload) -> User {
        let user = payload.user.clone();
        *self.session.write().await = Some(Session {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            user: payload.user,
        });
        user
    }

    // ==================== REQUESTS ====================

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.request(Method::POST, path, Some(serde_json::to_value(body)?))
            .await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.request(Method::PUT, path, Some(serde_json::to_value(body)?))
            .await
    }

    pub async fn patch<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.request(Method::PATCH, path, Some(serde_json::to_value(body)?))
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request(Method::DELETE, path, None).await
    }

    /// Send with the current access token; on 401, refresh once and retry.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ClientError> {
        let token = self.access_token().await;
        let response = self
            .dispatch(method.clone(), path, body.as_ref(), token.as_deref())
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED || token.is_none() {
            return read_envelope(response).await;
        }

        if self.refresh().await.is_err() {
            return Err(ClientError::from_response(response).await);
        }

        let token = self.access_token().await;
        let retried = self
            .dispatch(method, path, body.as_ref(), token.as_deref())
            .await?;
        read_envelope(retried).await
    }

    async fn send_anonymous<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &Value,
    ) -> Result<T, ClientError> {
        let response = self.dispatch(method, path, Some(body), None).await?;
        read_envelope(response).await
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Response, ClientError> {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    async fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }
}

async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    if !response.status().is_success() {
        return Err(ClientError::from_response(response).await);
    }
    let envelope: Envelope<T> = response.json().await?;
    Ok(envelope.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refresh_without_session() {
        let client = ApiClient::new("http://127.0.0.1:9");
        assert!(matches!(
            client.refresh().await,
            Err(ClientError::NotLoggedIn)
        ));
        assert!(!client.refresh_if_expiring(Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_logout_without_session_is_noop() {
        let client = ApiClient::new("http://127.0.0.1:9/");
        client.logout().await.unwrap();
        assert!(client.session().await.is_none());
    }

    #[test]
    fn test_api_error_status() {
        let err = ClientError::Api {
            status: StatusCode::FORBIDDEN,
            code: "FORBIDDEN".to_string(),
            message: "Accès refusé".to_string(),
        };
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
        assert_eq!(err.to_string(), "403 Forbidden: Accès refusé");
        assert_eq!(ClientError::NotLoggedIn.status(), None);
    }
}
