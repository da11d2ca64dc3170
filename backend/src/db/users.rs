//! Users, refresh tokens and account lifecycle.

use sqlx::{sqlite::SqliteRow, Row};

use super::quartiers::make_principal;
use super::repository::{clean, flag, Repository};
use crate::errors::AppError;
use crate::models::{
    now_timestamp, NewUser, Role, StoredRefreshToken, User, UserCredentials, UserWithQuartier,
};

const USER_COLUMNS: &str = "u.id, u.nom, u.prenom, u.email, u.adresse, u.date_naissance, \
     u.telephone, u.quartier_id, u.role, u.created_at, u.updated_at";

/// Validated changes to a user. `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub nom: Option<String>,
    pub prenom: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub adresse: Option<String>,
    pub date_naissance: Option<String>,
    pub telephone: Option<String>,
    pub quartier_id: Option<i64>,
    pub role: Option<Role>,
}

impl Repository {
    // ==================== USER OPERATIONS ====================

    /// Insert a user. A quartier, when given, becomes the principal membership.
    pub async fn create_user(&self, new_user: &NewUser) -> Result<User, AppError> {
        if self.email_in_use(&new_user.email, None).await? {
            return Err(AppError::Conflict("Cet email est déjà utilisé".to_string()));
        }

        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO users (nom, prenom, email, password_hash, adresse, date_naissance, telephone, quartier_id, role, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)"
        )
        .bind(new_user.nom.trim())
        .bind(new_user.prenom.trim())
        .bind(new_user.email.trim().to_lowercase())
        .bind(&new_user.password_hash)
        .bind(clean(new_user.adresse.as_ref()))
        .bind(clean(new_user.date_naissance.as_ref()))
        .bind(clean(new_user.telephone.as_ref()))
        .bind(new_user.role.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let user_id = result.last_insert_rowid();

        if let Some(quartier_id) = new_user.quartier_id {
            sqlx::query(
                "INSERT INTO user_quartiers (utilisateur_id, quartier_id, est_principal, statut, date_ajout) VALUES (?, ?, 0, 'actif', ?)"
            )
            .bind(user_id)
            .bind(quartier_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            make_principal(&mut tx, user_id, quartier_id).await?;
        }

        tx.commit().await?;

        self.get_user(user_id)
            .await?
            .ok_or_else(|| AppError::Internal("User vanished after insert".to_string()))
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: i64) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM users u WHERE u.id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    /// Get a user and their password hash by email.
    pub async fn find_credentials(&self, email: &str) -> Result<Option<UserCredentials>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {}, u.password_hash FROM users u WHERE u.email = ?",
            USER_COLUMNS
        ))
        .bind(email.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| UserCredentials {
            user: user_from_row(&row),
            password_hash: row.get("password_hash"),
        }))
    }

    /// Whether the email belongs to a user other than `exclude_id`.
    pub async fn email_in_use(&self, email: &str, exclude_id: Option<i64>) -> Result<bool, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM users WHERE email = ? AND (? IS NULL OR id != ?)",
        )
        .bind(email.trim().to_lowercase())
        .bind(exclude_id)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("count") > 0)
    }

    /// List all users.
    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users u ORDER BY u.nom, u.prenom, u.id",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(user_from_row).collect())
    }

    /// List all users with the name of their principal quartier.
    pub async fn list_users_with_quartier(&self) -> Result<Vec<UserWithQuartier>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {}, q.nom_quartier, q.ville FROM users u LEFT JOIN quartiers q ON q.id = u.quartier_id ORDER BY u.nom, u.prenom, u.id",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| UserWithQuartier {
                user: user_from_row(row),
                nom_quartier: row.get("nom_quartier"),
                ville: row.get("ville"),
            })
            .collect())
    }

    /// Apply changes to a user. A new quartier becomes the principal membership.
    pub async fn update_user(&self, id: i64, changes: &UserChanges) -> Result<User, AppError> {
        let existing = self
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Utilisateur non trouvé".to_string()))?;

        if let Some(email) = &changes.email {
            if self.email_in_use(email, Some(id)).await? {
                return Err(AppError::Conflict("Cet email est déjà utilisé".to_string()));
            }
        }

        if let Some(quartier_id) = changes.quartier_id {
            if self.get_quartier(quartier_id).await?.is_none() {
                return Err(AppError::NotFound("Quartier non trouvé".to_string()));
            }
        }

        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE users SET nom = ?, prenom = ?, email = ?, password_hash = COALESCE(?, password_hash), adresse = ?, date_naissance = ?, telephone = ?, role = ?, updated_at = ? WHERE id = ?"
        )
        .bind(changes.nom.as_deref().map(str::trim).unwrap_or(&existing.nom))
        .bind(changes.prenom.as_deref().map(str::trim).unwrap_or(&existing.prenom))
        .bind(
            changes
                .email
                .as_ref()
                .map(|e| e.trim().to_lowercase())
                .unwrap_or(existing.email),
        )
        .bind(&changes.password_hash)
        .bind(changes.adresse.as_ref().map_or(existing.adresse, |a| clean(Some(a))))
        .bind(
            changes
                .date_naissance
                .as_ref()
                .map_or(existing.date_naissance, |d| clean(Some(d))),
        )
        .bind(
            changes
                .telephone
                .as_ref()
                .map_or(existing.telephone, |t| clean(Some(t))),
        )
        .bind(changes.role.unwrap_or(existing.role).as_str())
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if let Some(quartier_id) = changes.quartier_id {
            if existing.quartier_id != Some(quartier_id) {
                sqlx::query(
                    "INSERT INTO user_quartiers (utilisateur_id, quartier_id, est_principal, statut, date_ajout) VALUES (?, ?, 0, 'actif', ?) ON CONFLICT (utilisateur_id, quartier_id) DO UPDATE SET statut = 'actif'"
                )
                .bind(id)
                .bind(quartier_id)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                make_principal(&mut tx, id, quartier_id).await?;
            }
        }

        tx.commit().await?;

        self.get_user(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Utilisateur non trouvé".to_string()))
    }

    /// Change a user's role. Test fixtures use it to create administrators.
    #[cfg(test)]
    pub async fn set_user_role(&self, id: i64, role: Role) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Revoke every session of a user, then delete the account.
    pub async fn delete_user(&self, id: i64) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== REFRESH TOKEN OPERATIONS ====================

    /// Persist an issued refresh token.
    pub async fn store_refresh_token(
        &self,
        user_id: i64,
        jti: &str,
        token: &str,
        expires_at: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (user_id, jti, token, expires_at, revoked, created_at) VALUES (?, ?, ?, ?, 0, ?)"
        )
        .bind(user_id)
        .bind(jti)
        .bind(token)
        .bind(expires_at)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Find a refresh token by its `jti` claim.
    pub async fn find_refresh_token(&self, jti: &str) -> Result<Option<StoredRefreshToken>, AppError> {
        let row = sqlx::query(
            "SELECT id, user_id, jti, token, expires_at, revoked FROM refresh_tokens WHERE jti = ?",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| StoredRefreshToken {
            id: row.get("id"),
            user_id: row.get("user_id"),
            jti: row.get("jti"),
            token: row.get("token"),
            expires_at: row.get("expires_at"),
            revoked: flag(row.get("revoked")),
        }))
    }

    /// Revoke a single refresh token.
    pub async fn revoke_refresh_token(&self, jti: &str) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE jti = ?")
            .bind(jti)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete expired and revoked refresh tokens. Returns the number removed.
    pub async fn purge_refresh_tokens(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE revoked = 1 OR expires_at < ?")
            .bind(now_timestamp())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

pub(super) fn user_from_row(row: &SqliteRow) -> User {
    let role: String = row.get("role");
    User {
        id: row.get("id"),
        nom: row.get("nom"),
        prenom: row.get("prenom"),
        email: row.get("email"),
        adresse: row.get("adresse"),
        date_naissance: row.get("date_naissance"),
        telephone: row.get("telephone"),
        quartier_id: row.get("quartier_id"),
        role: Role::from_str(&role).unwrap_or(Role::User),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
