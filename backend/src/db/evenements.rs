//! Events and participations.

use sqlx::{sqlite::SqliteRow, Row};

use super::repository::{clean, Repository};
use crate::errors::AppError;
use crate::models::{now_timestamp, Evenement, Participant, UpdateEvenementRequest};

const EVENT_SELECT: &str = "SELECT e.id, e.organisateur_id, u.nom AS organisateur_nom, u.prenom AS organisateur_prenom, e.nom, e.description, e.date_evenement, e.lieu, e.type_evenement, e.photo_url, e.quartier_id, e.created_at, e.updated_at, (SELECT COUNT(*) FROM participations p WHERE p.evenement_id = e.id) AS participant_count FROM evenements e LEFT JOIN users u ON u.id = e.organisateur_id";

/// Validated fields of a new event.
#[derive(Debug, Clone)]
pub struct NewEvenement {
    pub organisateur_id: i64,
    pub nom: String,
    pub description: Option<String>,
    pub date_evenement: String,
    pub lieu: String,
    pub type_evenement: Option<String>,
    pub photo_url: Option<String>,
    pub quartier_id: Option<i64>,
}

impl Repository {
    // ==================== EVENT OPERATIONS ====================

    /// All events, latest date first.
    pub async fn list_evenements(&self) -> Result<Vec<Evenement>, AppError> {
        let rows = sqlx::query(&format!(
            "{} ORDER BY e.date_evenement DESC, e.id DESC",
            EVENT_SELECT
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(evenement_from_row).collect())
    }

    /// Events on or after `now`, soonest first, optionally within a quartier.
    pub async fn upcoming_evenements(
        &self,
        now: &str,
        quartier_id: Option<i64>,
    ) -> Result<Vec<Evenement>, AppError> {
        let rows = sqlx::query(&format!(
            "{} WHERE e.date_evenement >= ? AND (? IS NULL OR e.quartier_id = ?) ORDER BY e.date_evenement ASC, e.id ASC",
            EVENT_SELECT
        ))
        .bind(now)
        .bind(quartier_id)
        .bind(quartier_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(evenement_from_row).collect())
    }

    /// Events before `now`, most recent first, optionally within a quartier.
    pub async fn past_evenements(
        &self,
        now: &str,
        quartier_id: Option<i64>,
    ) -> Result<Vec<Evenement>, AppError> {
        let rows = sqlx::query(&format!(
            "{} WHERE e.date_evenement < ? AND (? IS NULL OR e.quartier_id = ?) ORDER BY e.date_evenement DESC, e.id DESC",
            EVENT_SELECT
        ))
        .bind(now)
        .bind(quartier_id)
        .bind(quartier_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(evenement_from_row).collect())
    }

    /// Events of a quartier, latest date first.
    pub async fn evenements_by_quartier(&self, quartier_id: i64) -> Result<Vec<Evenement>, AppError> {
        let rows = sqlx::query(&format!(
            "{} WHERE e.quartier_id = ? ORDER BY e.date_evenement DESC, e.id DESC",
            EVENT_SELECT
        ))
        .bind(quartier_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(evenement_from_row).collect())
    }

    /// Events organized by a user, latest date first.
    pub async fn evenements_by_organisateur(
        &self,
        organisateur_id: i64,
    ) -> Result<Vec<Evenement>, AppError> {
        let rows = sqlx::query(&format!(
            "{} WHERE e.organisateur_id = ? ORDER BY e.date_evenement DESC, e.id DESC",
            EVENT_SELECT
        ))
        .bind(organisateur_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(evenement_from_row).collect())
    }

    /// Get an event by ID.
    pub async fn get_evenement(&self, id: i64) -> Result<Option<Evenement>, AppError> {
        let row = sqlx::query(&format!("{} WHERE e.id = ?", EVENT_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(evenement_from_row))
    }

    /// Create a new event.
    pub async fn create_evenement(&self, new_event: &NewEvenement) -> Result<Evenement, AppError> {
        let now = now_timestamp();

        let result = sqlx::query(
            "INSERT INTO evenements (organisateur_id, nom, description, date_evenement, lieu, type_evenement, photo_url, quartier_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(new_event.organisateur_id)
        .bind(new_event.nom.trim())
        .bind(clean(new_event.description.as_ref()))
        .bind(&new_event.date_evenement)
        .bind(new_event.lieu.trim())
        .bind(clean(new_event.type_evenement.as_ref()))
        .bind(clean(new_event.photo_url.as_ref()))
        .bind(new_event.quartier_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_evenement(id)
            .await?
            .ok_or_else(|| AppError::Internal("Event vanished after insert".to_string()))
    }

    /// Update an event. Expects `date_evenement` already normalized.
    pub async fn update_evenement(
        &self,
        id: i64,
        request: &UpdateEvenementRequest,
    ) -> Result<Evenement, AppError> {
        let existing = self
            .get_evenement(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Événement {} non trouvé", id)))?;

        let nom = request.nom.as_deref().map(str::trim).unwrap_or(&existing.nom);
        let lieu = request.lieu.as_deref().map(str::trim).unwrap_or(&existing.lieu);
        if nom.is_empty() || lieu.is_empty() {
            return Err(AppError::Validation(
                "Le nom et le lieu sont requis".to_string(),
            ));
        }

        sqlx::query(
            "UPDATE evenements SET nom = ?, description = ?, date_evenement = ?, lieu = ?, type_evenement = ?, photo_url = ?, quartier_id = ?, updated_at = ? WHERE id = ?"
        )
        .bind(nom)
        .bind(
            request
                .description
                .as_ref()
                .map_or(existing.description.clone(), |d| clean(Some(d))),
        )
        .bind(
            request
                .date_evenement
                .as_ref()
                .unwrap_or(&existing.date_evenement),
        )
        .bind(lieu)
        .bind(
            request
                .type_evenement
                .as_ref()
                .map_or(existing.type_evenement.clone(), |t| clean(Some(t))),
        )
        .bind(
            request
                .photo_url
                .as_ref()
                .map_or(existing.photo_url.clone(), |p| clean(Some(p))),
        )
        .bind(request.quartier_id.or(existing.quartier_id))
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_evenement(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Événement {} non trouvé", id)))
    }

    /// Delete an event and its participations.
    pub async fn delete_evenement(&self, id: i64) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM participations WHERE evenement_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM evenements WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== PARTICIPATION OPERATIONS ====================

    /// Participants of an event, in registration order.
    pub async fn list_participants(&self, evenement_id: i64) -> Result<Vec<Participant>, AppError> {
        let rows = sqlx::query(
            "SELECT p.utilisateur_id, u.nom, u.prenom, p.date_inscription FROM participations p JOIN users u ON u.id = p.utilisateur_id WHERE p.evenement_id = ? ORDER BY p.date_inscription, p.id"
        )
        .bind(evenement_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Participant {
                utilisateur_id: row.get("utilisateur_id"),
                nom: row.get("nom"),
                prenom: row.get("prenom"),
                date_inscription: row.get("date_inscription"),
            })
            .collect())
    }

    /// Register a participation. Registering twice is a no-op.
    pub async fn add_participation(&self, evenement_id: i64, user_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO participations (evenement_id, utilisateur_id, date_inscription) VALUES (?, ?, ?)"
        )
        .bind(evenement_id)
        .bind(user_id)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Cancel a participation. Returns false when there was none.
    pub async fn remove_participation(&self, evenement_id: i64, user_id: i64) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM participations WHERE evenement_id = ? AND utilisateur_id = ?")
                .bind(evenement_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Whether the user takes part in the event.
    pub async fn is_participant(&self, evenement_id: i64, user_id: i64) -> Result<bool, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM participations WHERE evenement_id = ? AND utilisateur_id = ?",
        )
        .bind(evenement_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("count") > 0)
    }
}

fn evenement_from_row(row: &SqliteRow) -> Evenement {
    Evenement {
        id: row.get("id"),
        organisateur_id: row.get("organisateur_id"),
        organisateur_nom: row.get("organisateur_nom"),
        organisateur_prenom: row.get("organisateur_prenom"),
        nom: row.get("nom"),
        description: row.get("description"),
        date_evenement: row.get("date_evenement"),
        lieu: row.get("lieu"),
        type_evenement: row.get("type_evenement"),
        photo_url: row.get("photo_url"),
        quartier_id: row.get("quartier_id"),
        participant_count: row.get("participant_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
