//! User and authentication models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::non_empty;
use crate::errors::AppError;

/// Role of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// A registered user. The password hash never leaves the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub nom: String,
    pub prenom: String,
    pub email: String,
    pub adresse: Option<String>,
    pub date_naissance: Option<String>,
    pub telephone: Option<String>,
    pub quartier_id: Option<i64>,
    pub role: Role,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.prenom, self.nom)
    }
}

/// User joined with the name of their principal quartier.
#[derive(Debug, Clone, Serialize)]
pub struct UserWithQuartier {
    #[serde(flatten)]
    pub user: User,
    pub nom_quartier: Option<String>,
    pub ville: Option<String>,
}

/// Request body for `POST /api/auth/register`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub nom: String,
    #[serde(default)]
    pub prenom: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub adresse: String,
    #[serde(default)]
    pub date_naissance: Option<String>,
    #[serde(default)]
    pub telephone: Option<String>,
    #[serde(default)]
    pub quartier_id: Option<i64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub latitude: Option<f64>,
}

impl RegisterRequest {
    /// Check every field except the password, which has its own policy.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.nom.trim().is_empty() {
            return Err(AppError::Validation("Le nom est requis".to_string()));
        }
        if self.prenom.trim().is_empty() {
            return Err(AppError::Validation("Le prénom est requis".to_string()));
        }
        if !is_valid_email(&self.email) {
            return Err(AppError::Validation("Email invalide".to_string()));
        }
        if self.adresse.trim().is_empty() {
            return Err(AppError::Validation("L'adresse est requise".to_string()));
        }
        validate_telephone(self.telephone.as_deref())?;
        validate_birth_date(self.date_naissance.as_deref())?;
        Ok(())
    }
}

/// A user record with its stored password hash.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

/// Fields needed to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub nom: String,
    pub prenom: String,
    pub email: String,
    pub password_hash: String,
    pub adresse: Option<String>,
    pub date_naissance: Option<String>,
    pub telephone: Option<String>,
    pub quartier_id: Option<i64>,
    pub role: Role,
}

/// Request body for `POST /api/auth/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Request body carrying a refresh token.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Tokens and profile returned by login and register.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

/// Fresh access token returned by the refresh endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenPayload {
    pub access_token: String,
}

/// Request body for `PUT /api/users/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub nom: Option<String>,
    #[serde(default)]
    pub prenom: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub adresse: Option<String>,
    #[serde(default)]
    pub date_naissance: Option<String>,
    #[serde(default)]
    pub telephone: Option<String>,
    #[serde(default)]
    pub quartier_id: Option<i64>,
    #[serde(default)]
    pub role: Option<Role>,
}

impl UpdateUserRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(email) = &self.email {
            if !is_valid_email(email) {
                return Err(AppError::Validation("Email invalide".to_string()));
            }
        }
        if matches!(self.nom.as_deref(), Some(n) if n.trim().is_empty()) {
            return Err(AppError::Validation("Le nom est requis".to_string()));
        }
        if matches!(self.prenom.as_deref(), Some(p) if p.trim().is_empty()) {
            return Err(AppError::Validation("Le prénom est requis".to_string()));
        }
        validate_telephone(self.telephone.as_deref())?;
        validate_birth_date(self.date_naissance.as_deref())?;
        Ok(())
    }
}

/// A persisted refresh token.
#[derive(Debug, Clone)]
pub struct StoredRefreshToken {
    pub id: i64,
    pub user_id: i64,
    pub jti: String,
    pub token: String,
    pub expires_at: String,
    pub revoked: bool,
}

/// Minimal email shape check: one `@`, non-empty local part, dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

fn validate_telephone(telephone: Option<&str>) -> Result<(), AppError> {
    if let Some(tel) = non_empty(telephone) {
        if tel.len() != 10 || !tel.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::Validation(
                "Le téléphone doit contenir 10 chiffres".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_birth_date(date: Option<&str>) -> Result<(), AppError> {
    if let Some(date) = non_empty(date) {
        NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
            AppError::Validation("Date de naissance invalide (AAAA-MM-JJ)".to_string())
        })?;
    }
    Ok(())
}
