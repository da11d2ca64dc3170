//! Quartiers and user memberships.

use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use super::repository::{clean, flag, Repository};
use crate::errors::AppError;
use crate::geo::Geometry;
use crate::models::{now_timestamp, Membership, MembershipStatus, Quartier, QuartierMember};

const QUARTIER_COLUMNS: &str =
    "id, nom_quartier, ville, code_postal, description, geom, created_at, updated_at";

const MEMBERSHIP_SELECT: &str = "SELECT uq.id, uq.utilisateur_id, uq.quartier_id, uq.est_principal, uq.statut, uq.date_ajout, q.nom_quartier, q.ville, q.code_postal FROM user_quartiers uq JOIN quartiers q ON q.id = uq.quartier_id";

/// Validated quartier fields.
#[derive(Debug, Clone, Default)]
pub struct QuartierData {
    pub nom_quartier: String,
    pub ville: Option<String>,
    pub code_postal: Option<String>,
    pub description: Option<String>,
    pub geom: Option<Geometry>,
}

/// Make `quartier_id` the user's only principal membership and mirror it on the user row.
pub(super) async fn make_principal(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    quartier_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE user_quartiers SET est_principal = 0 WHERE utilisateur_id = ?")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        "UPDATE user_quartiers SET est_principal = 1, statut = 'actif' WHERE utilisateur_id = ? AND quartier_id = ?",
    )
    .bind(user_id)
    .bind(quartier_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query("UPDATE users SET quartier_id = ?, updated_at = ? WHERE id = ?")
        .bind(quartier_id)
        .bind(now_timestamp())
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

impl Repository {
    // ==================== QUARTIER OPERATIONS ====================

    /// List all quartiers.
    pub async fn list_quartiers(&self) -> Result<Vec<Quartier>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM quartiers ORDER BY ville, nom_quartier, id",
            QUARTIER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(quartier_from_row).collect())
    }

    /// Get a quartier by ID.
    pub async fn get_quartier(&self, id: i64) -> Result<Option<Quartier>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM quartiers WHERE id = ?",
            QUARTIER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(quartier_from_row))
    }

    /// Quartiers of a city, case-insensitive.
    pub async fn quartiers_by_ville(&self, ville: &str) -> Result<Vec<Quartier>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM quartiers WHERE LOWER(ville) = LOWER(?) ORDER BY nom_quartier, id",
            QUARTIER_COLUMNS
        ))
        .bind(ville.trim())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(quartier_from_row).collect())
    }

    /// Quartiers whose name, city or postal code contains `term`.
    pub async fn search_quartiers(&self, term: &str) -> Result<Vec<Quartier>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM quartiers WHERE instr(LOWER(nom_quartier), LOWER(?1)) > 0 OR instr(LOWER(COALESCE(ville, '')), LOWER(?1)) > 0 OR instr(COALESCE(code_postal, ''), ?1) > 0 ORDER BY ville, nom_quartier, id",
            QUARTIER_COLUMNS
        ))
        .bind(term.trim())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(quartier_from_row).collect())
    }

    /// Create a new quartier.
    pub async fn create_quartier(&self, data: &QuartierData) -> Result<Quartier, AppError> {
        let now = now_timestamp();
        let geom_json = data.geom.as_ref().map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            "INSERT INTO quartiers (nom_quartier, ville, code_postal, description, geom, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(data.nom_quartier.trim())
        .bind(clean(data.ville.as_ref()))
        .bind(clean(data.code_postal.as_ref()))
        .bind(clean(data.description.as_ref()))
        .bind(&geom_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(Quartier {
            id: result.last_insert_rowid(),
            nom_quartier: data.nom_quartier.trim().to_string(),
            ville: clean(data.ville.as_ref()),
            code_postal: clean(data.code_postal.as_ref()),
            description: clean(data.description.as_ref()),
            geom: data.geom.clone(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Replace the fields of a quartier.
    pub async fn update_quartier(&self, id: i64, data: &QuartierData) -> Result<Quartier, AppError> {
        let geom_json = data.geom.as_ref().map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            "UPDATE quartiers SET nom_quartier = ?, ville = ?, code_postal = ?, description = ?, geom = ?, updated_at = ? WHERE id = ?"
        )
        .bind(data.nom_quartier.trim())
        .bind(clean(data.ville.as_ref()))
        .bind(clean(data.code_postal.as_ref()))
        .bind(clean(data.description.as_ref()))
        .bind(&geom_json)
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Quartier {} non trouvé", id)));
        }

        self.get_quartier(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Quartier {} non trouvé", id)))
    }

    /// Delete a quartier.
    pub async fn delete_quartier(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM quartiers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Active members of a quartier.
    pub async fn quartier_members(&self, quartier_id: i64) -> Result<Vec<QuartierMember>, AppError> {
        let rows = sqlx::query(
            "SELECT u.id, u.nom, u.prenom, uq.est_principal, uq.date_ajout FROM user_quartiers uq JOIN users u ON u.id = uq.utilisateur_id WHERE uq.quartier_id = ? AND uq.statut = 'actif' ORDER BY u.nom, u.prenom, u.id"
        )
        .bind(quartier_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| QuartierMember {
                id: row.get("id"),
                nom: row.get("nom"),
                prenom: row.get("prenom"),
                est_principal: flag(row.get("est_principal")),
                date_ajout: row.get("date_ajout"),
            })
            .collect())
    }

    // ==================== MEMBERSHIP OPERATIONS ====================

    /// Active memberships of a user, principal first.
    pub async fn list_memberships(&self, user_id: i64) -> Result<Vec<Membership>, AppError> {
        let rows = sqlx::query(&format!(
            "{} WHERE uq.utilisateur_id = ? AND uq.statut = 'actif' ORDER BY uq.est_principal DESC, q.ville, q.nom_quartier",
            MEMBERSHIP_SELECT
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(membership_from_row).collect())
    }

    /// The principal membership of a user, if any.
    pub async fn principal_membership(&self, user_id: i64) -> Result<Option<Membership>, AppError> {
        let row = sqlx::query(&format!(
            "{} WHERE uq.utilisateur_id = ? AND uq.est_principal = 1",
            MEMBERSHIP_SELECT
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(membership_from_row))
    }

    /// Add (or reactivate) a membership. Returns the relation id.
    pub async fn add_membership(
        &self,
        user_id: i64,
        quartier_id: i64,
        principal: bool,
    ) -> Result<i64, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO user_quartiers (utilisateur_id, quartier_id, est_principal, statut, date_ajout) VALUES (?, ?, 0, 'actif', ?) ON CONFLICT (utilisateur_id, quartier_id) DO UPDATE SET statut = 'actif'"
        )
        .bind(user_id)
        .bind(quartier_id)
        .bind(now_timestamp())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            "SELECT id FROM user_quartiers WHERE utilisateur_id = ? AND quartier_id = ?",
        )
        .bind(user_id)
        .bind(quartier_id)
        .fetch_one(&mut *tx)
        .await?;

        if principal {
            make_principal(&mut tx, user_id, quartier_id).await?;
        }

        tx.commit().await?;

        Ok(row.get("id"))
    }

    /// Switch the principal membership to an existing relation.
    pub async fn set_principal_membership(
        &self,
        user_id: i64,
        quartier_id: i64,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query(
            "SELECT id FROM user_quartiers WHERE utilisateur_id = ? AND quartier_id = ?",
        )
        .bind(user_id)
        .bind(quartier_id)
        .fetch_optional(&mut *tx)
        .await?;

        if exists.is_none() {
            return Err(AppError::NotFound(
                "Relation utilisateur-quartier non trouvée".to_string(),
            ));
        }

        make_principal(&mut tx, user_id, quartier_id).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Remove a non-principal membership owned by the user.
    pub async fn remove_membership(&self, user_id: i64, relation_id: i64) -> Result<(), AppError> {
        let row = sqlx::query(
            "SELECT est_principal FROM user_quartiers WHERE id = ? AND utilisateur_id = ?",
        )
        .bind(relation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Relation utilisateur-quartier non trouvée".to_string()))?;

        if flag(row.get("est_principal")) {
            return Err(AppError::BadRequest(
                "Impossible de supprimer le quartier principal".to_string(),
            ));
        }

        sqlx::query("DELETE FROM user_quartiers WHERE id = ?")
            .bind(relation_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn quartier_from_row(row: &SqliteRow) -> Quartier {
    let geom: Option<String> = row.get("geom");
    Quartier {
        id: row.get("id"),
        nom_quartier: row.get("nom_quartier"),
        ville: row.get("ville"),
        code_postal: row.get("code_postal"),
        description: row.get("description"),
        geom: geom.and_then(|g| serde_json::from_str(&g).ok()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn membership_from_row(row: &SqliteRow) -> Membership {
    let statut: String = row.get("statut");
    Membership {
        id: row.get("id"),
        utilisateur_id: row.get("utilisateur_id"),
        quartier_id: row.get("quartier_id"),
        est_principal: flag(row.get("est_principal")),
        statut: MembershipStatus::from_str(&statut).unwrap_or(MembershipStatus::Actif),
        date_ajout: row.get("date_ajout"),
        nom_quartier: row.get("nom_quartier"),
        ville: row.get("ville"),
        code_postal: row.get("code_postal"),
    }
}
