//! Barter listings.

use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row};

use super::repository::{clean, json_array, parse_json_array, Repository};
use crate::errors::AppError;
use crate::models::{
    now_timestamp, AnnonceTroc, ModeEchange, TrocRequest, TrocStats, TrocStatut, TypeAnnonce,
};

const TROC_SELECT: &str = "SELECT t.*, u.nom, u.prenom FROM trocs t LEFT JOIN users u ON u.id = t.utilisateur_id";

impl Repository {
    // ==================== TROC OPERATIONS ====================

    /// Create a listing in the author's quartier. Expects a non-empty `titre`.
    pub async fn create_troc(
        &self,
        user_id: i64,
        quartier_id: i64,
        request: &TrocRequest,
    ) -> Result<AnnonceTroc, AppError> {
        let now = now_timestamp();
        let titre = request.titre.as_deref().map(str::trim).unwrap_or_default();
        let images = request.images.clone().unwrap_or_default();

        let result = sqlx::query(
            "INSERT INTO trocs (titre, description, objet_propose, objet_recherche, images, date_publication, quartier_id, utilisateur_id, statut, type_annonce, prix, budget_max, etat_produit, categorie, urgence, mode_echange, criteres_specifiques, disponibilite, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(titre)
        .bind(clean(request.description.as_ref()))
        .bind(clean(request.objet_propose.as_ref()))
        .bind(clean(request.objet_recherche.as_ref()))
        .bind(json_array(&images))
        .bind(&now)
        .bind(quartier_id)
        .bind(user_id)
        .bind(request.type_annonce.unwrap_or(TypeAnnonce::Offre).as_str())
        .bind(request.prix)
        .bind(request.budget_max)
        .bind(clean(request.etat_produit.as_ref()))
        .bind(clean(request.categorie.as_ref()))
        .bind(clean(request.urgence.as_ref()))
        .bind(request.mode_echange.unwrap_or(ModeEchange::Vente).as_str())
        .bind(clean(request.criteres_specifiques.as_ref()))
        .bind(clean(request.disponibilite.as_ref()))
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_troc(id)
            .await?
            .ok_or_else(|| AppError::Internal("Troc vanished after insert".to_string()))
    }

    /// Active listings of a quartier, newest first.
    pub async fn trocs_by_quartier(&self, quartier_id: i64) -> Result<Vec<AnnonceTroc>, AppError> {
        let rows = sqlx::query(&format!(
            "{} WHERE t.quartier_id = ? AND t.statut = 'active' ORDER BY t.date_publication DESC, t.id DESC",
            TROC_SELECT
        ))
        .bind(quartier_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(troc_from_row).collect())
    }

    /// Listings of a user, whatever their status.
    pub async fn trocs_by_user(&self, user_id: i64) -> Result<Vec<AnnonceTroc>, AppError> {
        let rows = sqlx::query(&format!(
            "{} WHERE t.utilisateur_id = ? ORDER BY t.date_publication DESC, t.id DESC",
            TROC_SELECT
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(troc_from_row).collect())
    }

    /// All listings, for moderation.
    pub async fn list_all_trocs(&self) -> Result<Vec<AnnonceTroc>, AppError> {
        let rows = sqlx::query(&format!(
            "{} ORDER BY t.date_publication DESC, t.id DESC",
            TROC_SELECT
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(troc_from_row).collect())
    }

    /// Get a listing by ID.
    pub async fn get_troc(&self, id: i64) -> Result<Option<AnnonceTroc>, AppError> {
        let row = sqlx::query(&format!("{} WHERE t.id = ?", TROC_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(troc_from_row))
    }

    /// Update a listing. Absent fields keep their value.
    pub async fn update_troc(&self, id: i64, request: &TrocRequest) -> Result<AnnonceTroc, AppError> {
        let existing = self
            .get_troc(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Annonce non trouvée".to_string()))?;

        let titre = request
            .titre
            .as_deref()
            .map(str::trim)
            .unwrap_or(&existing.titre);
        if titre.is_empty() {
            return Err(AppError::Validation("Le titre est requis".to_string()));
        }
        let images = request.images.as_ref().unwrap_or(&existing.images);

        sqlx::query(
            "UPDATE trocs SET titre = ?, description = ?, objet_propose = ?, objet_recherche = ?, images = ?, type_annonce = ?, prix = ?, budget_max = ?, etat_produit = ?, categorie = ?, urgence = ?, mode_echange = ?, criteres_specifiques = ?, disponibilite = ?, updated_at = ? WHERE id = ?"
        )
        .bind(titre)
        .bind(merge_text(&request.description, &existing.description))
        .bind(merge_text(&request.objet_propose, &existing.objet_propose))
        .bind(merge_text(&request.objet_recherche, &existing.objet_recherche))
        .bind(json_array(images))
        .bind(request.type_annonce.unwrap_or(existing.type_annonce).as_str())
        .bind(request.prix.or(existing.prix))
        .bind(request.budget_max.or(existing.budget_max))
        .bind(merge_text(&request.etat_produit, &existing.etat_produit))
        .bind(merge_text(&request.categorie, &existing.categorie))
        .bind(merge_text(&request.urgence, &existing.urgence))
        .bind(request.mode_echange.unwrap_or(existing.mode_echange).as_str())
        .bind(merge_text(&request.criteres_specifiques, &existing.criteres_specifiques))
        .bind(merge_text(&request.disponibilite, &existing.disponibilite))
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_troc(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Annonce non trouvée".to_string()))
    }

    /// Replace the image list of a listing.
    pub async fn set_troc_images(&self, id: i64, images: &[String]) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE trocs SET images = ?, updated_at = ? WHERE id = ?")
            .bind(json_array(images))
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Change the moderation status of a listing.
    pub async fn set_troc_status(&self, id: i64, statut: TrocStatut) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE trocs SET statut = ?, updated_at = ? WHERE id = ?")
            .bind(statut.as_str())
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a listing.
    pub async fn delete_troc(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM trocs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts by status, category and type.
    pub async fn troc_stats(&self) -> Result<TrocStats, AppError> {
        let by_status = self.group_count("trocs", "statut").await?;

        Ok(TrocStats {
            total: by_status.values().sum(),
            active: by_status.get("active").copied().unwrap_or(0),
            inactive: by_status.get("inactive").copied().unwrap_or(0),
            by_category: self.group_count("trocs", "categorie").await?,
            by_type: self.group_count("trocs", "type_annonce").await?,
        })
    }

    /// `column -> count` over non-null values. Only called with fixed identifiers.
    pub(super) async fn group_count(
        &self,
        table: &str,
        column: &str,
    ) -> Result<BTreeMap<String, i64>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {column} AS key, COUNT(*) AS count FROM {table} WHERE {column} IS NOT NULL GROUP BY {column}"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("key"), row.get("count")))
            .collect())
    }
}

/// New value when provided (blank clears it), else the existing one.
pub(super) fn merge_text(new: &Option<String>, existing: &Option<String>) -> Option<String> {
    match new {
        Some(value) => clean(Some(value)),
        None => existing.clone(),
    }
}

fn troc_from_row(row: &SqliteRow) -> AnnonceTroc {
    let images: String = row.get("images");
    let statut: String = row.get("statut");
    let type_annonce: String = row.get("type_annonce");
    let mode_echange: String = row.get("mode_echange");
    AnnonceTroc {
        id: row.get("id"),
        titre: row.get("titre"),
        description: row.get("description"),
        objet_propose: row.get("objet_propose"),
        objet_recherche: row.get("objet_recherche"),
        images: parse_json_array(&images),
        date_publication: row.get("date_publication"),
        quartier_id: row.get("quartier_id"),
        utilisateur_id: row.get("utilisateur_id"),
        nom: row.get("nom"),
        prenom: row.get("prenom"),
        statut: TrocStatut::from_str(&statut).unwrap_or(TrocStatut::Inactive),
        type_annonce: TypeAnnonce::from_str(&type_annonce).unwrap_or(TypeAnnonce::Offre),
        prix: row.get("prix"),
        budget_max: row.get("budget_max"),
        etat_produit: row.get("etat_produit"),
        categorie: row.get("categorie"),
        urgence: row.get("urgence"),
        mode_echange: ModeEchange::from_str(&mode_echange).unwrap_or(ModeEchange::Vente),
        criteres_specifiques: row.get("criteres_specifiques"),
        disponibilite: row.get("disponibilite"),
        updated_at: row.get("updated_at"),
    }
}
