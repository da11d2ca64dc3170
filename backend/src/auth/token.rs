//! JWT access and refresh tokens.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::errors::AppError;

/// Claims carried by both token kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

impl IssuedToken {
    /// Expiry in the stored timestamp format.
    pub fn expires_at_timestamp(&self) -> String {
        self.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

/// Signs and verifies access and refresh tokens with separate secrets.
pub struct TokenService {
    access: KeyPair,
    refresh: KeyPair,
}

impl TokenService {
    pub fn new(config: &Config) -> Self {
        Self {
            access: KeyPair {
                encoding: EncodingKey::from_secret(config.jwt_access_secret.as_bytes()),
                decoding: DecodingKey::from_secret(config.jwt_access_secret.as_bytes()),
                ttl: config.access_token_ttl,
            },
            refresh: KeyPair {
                encoding: EncodingKey::from_secret(config.jwt_refresh_secret.as_bytes()),
                decoding: DecodingKey::from_secret(config.jwt_refresh_secret.as_bytes()),
                ttl: config.refresh_token_ttl,
            },
        }
    }

    pub fn issue_access(&self, user_id: i64) -> Result<IssuedToken, AppError> {
        issue(&self.access, user_id)
    }

    pub fn issue_refresh(&self, user_id: i64) -> Result<IssuedToken, AppError> {
        issue(&self.refresh, user_id)
    }

    /// Verify signature and expiry of an access token.
    pub fn verify_access(&self, token: &str) -> Result<Claims, AppError> {
        Ok(decode::<Claims>(token, &self.access.decoding, &strict_validation())?.claims)
    }

    /// Verify signature and expiry of a refresh token.
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AppError> {
        Ok(decode::<Claims>(token, &self.refresh.decoding, &strict_validation())?.claims)
    }
}

/// Read the claims of a token without checking signature or expiry.
pub fn peek_claims(token: &str) -> Option<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims)
}

fn strict_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation
}

fn issue(keys: &KeyPair, user_id: i64) -> Result<IssuedToken, AppError> {
    let now = Utc::now();
    let ttl = chrono::Duration::from_std(keys.ttl)
        .map_err(|e| AppError::Config(format!("Token lifetime out of range: {}", e)))?;
    let expires_at = now
        .checked_add_signed(ttl)
        .ok_or_else(|| AppError::Config("Token lifetime out of range".to_string()))?;
    let claims = Claims {
        user_id,
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
        jti: uuid::Uuid::new_v4().to_string(),
    };

    let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)?;

    Ok(IssuedToken {
        token,
        jti: claims.jti,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn service() -> TokenService {
        TokenService::new(&Config::for_data_dir(Path::new("/tmp")))
    }

    #[test]
    fn test_access_round_trip() {
        let tokens = service();
        let issued = tokens.issue_access(42).unwrap();
        let claims = tokens.verify_access(&issued.token).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.jti, issued.jti);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_secrets_are_not_interchangeable() {
        let tokens = service();
        let refresh = tokens.issue_refresh(7).unwrap();
        assert!(tokens.verify_access(&refresh.token).is_err());
        assert!(tokens.verify_refresh(&refresh.token).is_ok());
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut config = Config::for_data_dir(Path::new("/tmp"));
        config.access_token_ttl = Duration::from_secs(0);
        let tokens = TokenService::new(&config);
        let issued = tokens.issue_access(1).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));

        let err = tokens.verify_access(&issued.token).unwrap_err();
        assert_eq!(err.error_code(), "TOKEN_INVALID");
    }

    #[test]
    fn test_peek_claims_ignores_signature() {
        let tokens = service();
        let issued = tokens.issue_refresh(9).unwrap();
        let claims = peek_claims(&issued.token).unwrap();
        assert_eq!(claims.user_id, 9);
        assert!(peek_claims("not-a-jwt").is_none());
    }
}
