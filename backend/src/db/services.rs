//! Local services classifieds.

use sqlx::{sqlite::SqliteRow, Row};

use super::repository::{clean, flag, Repository};
use super::trocs::merge_text;
use crate::errors::AppError;
use crate::models::{
    now_timestamp, Recurrence, Service, ServiceRequest, ServiceStats, ServiceStatut, TypeAnnonce,
    Urgence,
};

const SERVICE_SELECT: &str = "SELECT s.*, u.nom, u.prenom FROM services s LEFT JOIN users u ON u.id = s.utilisateur_id";

/// Structured filters of the service search. Dates are normalized.
#[derive(Debug, Clone, Default)]
pub struct ServiceFilters {
    pub type_service: Option<TypeAnnonce>,
    pub categorie: Option<String>,
    pub prix_max: Option<f64>,
    pub date_debut: Option<String>,
    pub urgence: Option<Urgence>,
}

impl Repository {
    // ==================== SERVICE OPERATIONS ====================

    /// Create a service. Expects required fields checked and dates normalized.
    pub async fn create_service(
        &self,
        user_id: i64,
        quartier_id: i64,
        request: &ServiceRequest,
    ) -> Result<Service, AppError> {
        let now = now_timestamp();

        let result = sqlx::query(
            "INSERT INTO services (titre, description, type_service, categorie, date_debut, date_fin, horaires, recurrence, prix, budget_max, lieu, competences_requises, materiel_fourni, experience_requise, age_min, age_max, nombre_personnes, urgence, contact_info, date_publication, quartier_id, utilisateur_id, statut, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)"
        )
        .bind(request.titre.as_deref().map(str::trim).unwrap_or_default())
        .bind(request.description.as_deref().map(str::trim).unwrap_or_default())
        .bind(request.type_service.unwrap_or(TypeAnnonce::Offre).as_str())
        .bind(request.categorie.as_deref().map(str::trim).unwrap_or_default())
        .bind(&request.date_debut)
        .bind(&request.date_fin)
        .bind(clean(request.horaires.as_ref()))
        .bind(request.recurrence.unwrap_or(Recurrence::Ponctuel).as_str())
        .bind(request.prix)
        .bind(request.budget_max)
        .bind(clean(request.lieu.as_ref()))
        .bind(clean(request.competences_requises.as_ref()))
        .bind(request.materiel_fourni.unwrap_or(false) as i64)
        .bind(clean(request.experience_requise.as_ref()))
        .bind(request.age_min)
        .bind(request.age_max)
        .bind(request.nombre_personnes.unwrap_or(1))
        .bind(request.urgence.unwrap_or(Urgence::Normale).as_str())
        .bind(clean(request.contact_info.as_ref()))
        .bind(&now)
        .bind(quartier_id)
        .bind(user_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_service(id)
            .await?
            .ok_or_else(|| AppError::Internal("Service vanished after insert".to_string()))
    }

    /// Active services of a quartier, newest first.
    pub async fn services_by_quartier(&self, quartier_id: i64) -> Result<Vec<Service>, AppError> {
        self.search_services(quartier_id, &ServiceFilters::default())
            .await
    }

    /// Active services of a quartier matching the filters, newest first.
    ///
    /// A service without price or start date passes the price and date filters.
    pub async fn search_services(
        &self,
        quartier_id: i64,
        filters: &ServiceFilters,
    ) -> Result<Vec<Service>, AppError> {
        let rows = sqlx::query(&format!(
            "{} WHERE s.quartier_id = ? AND s.statut = 'active' \
             AND (? IS NULL OR s.type_service = ?) \
             AND (? IS NULL OR s.categorie = ?) \
             AND (? IS NULL OR s.prix IS NULL OR s.prix <= ?) \
             AND (? IS NULL OR s.date_debut IS NULL OR s.date_debut >= ?) \
             AND (? IS NULL OR s.urgence = ?) \
             ORDER BY s.date_publication DESC, s.id DESC",
            SERVICE_SELECT
        ))
        .bind(quartier_id)
        .bind(filters.type_service.map(|t| t.as_str()))
        .bind(filters.type_service.map(|t| t.as_str()))
        .bind(&filters.categorie)
        .bind(&filters.categorie)
        .bind(filters.prix_max)
        .bind(filters.prix_max)
        .bind(&filters.date_debut)
        .bind(&filters.date_debut)
        .bind(filters.urgence.map(|u| u.as_str()))
        .bind(filters.urgence.map(|u| u.as_str()))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(service_from_row).collect())
    }

    /// Services of a user, whatever their status.
    pub async fn services_by_user(&self, user_id: i64) -> Result<Vec<Service>, AppError> {
        let rows = sqlx::query(&format!(
            "{} WHERE s.utilisateur_id = ? ORDER BY s.date_publication DESC, s.id DESC",
            SERVICE_SELECT
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(service_from_row).collect())
    }

    /// All services, for moderation.
    pub async fn list_all_services(&self) -> Result<Vec<Service>, AppError> {
        let rows = sqlx::query(&format!(
            "{} ORDER BY s.date_publication DESC, s.id DESC",
            SERVICE_SELECT
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(service_from_row).collect())
    }

    /// Get a service by ID.
    pub async fn get_service(&self, id: i64) -> Result<Option<Service>, AppError> {
        let row = sqlx::query(&format!("{} WHERE s.id = ?", SERVICE_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(service_from_row))
    }

    /// Update a service. Absent fields keep their value; dates are normalized.
    pub async fn update_service(
        &self,
        id: i64,
        request: &ServiceRequest,
    ) -> Result<Service, AppError> {
        let existing = self
            .get_service(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Service non trouvé".to_string()))?;

        let titre = required(&request.titre, &existing.titre);
        let description = required(&request.description, &existing.description);
        let categorie = required(&request.categorie, &existing.categorie);
        let date_debut = request.date_debut.clone().or(existing.date_debut);
        let date_fin = request.date_fin.clone().or(existing.date_fin);

        if let (Some(debut), Some(fin)) = (&date_debut, &date_fin) {
            if fin < debut {
                return Err(AppError::Validation(
                    "La date de fin ne peut pas être antérieure à la date de début".to_string(),
                ));
            }
        }

        sqlx::query(
            "UPDATE services SET titre = ?, description = ?, type_service = ?, categorie = ?, date_debut = ?, date_fin = ?, horaires = ?, recurrence = ?, prix = ?, budget_max = ?, lieu = ?, competences_requises = ?, materiel_fourni = ?, experience_requise = ?, age_min = ?, age_max = ?, nombre_personnes = ?, urgence = ?, contact_info = ?, updated_at = ? WHERE id = ?"
        )
        .bind(titre)
        .bind(description)
        .bind(request.type_service.unwrap_or(existing.type_service).as_str())
        .bind(categorie)
        .bind(&date_debut)
        .bind(&date_fin)
        .bind(merge_text(&request.horaires, &existing.horaires))
        .bind(request.recurrence.unwrap_or(existing.recurrence).as_str())
        .bind(request.prix.or(existing.prix))
        .bind(request.budget_max.or(existing.budget_max))
        .bind(merge_text(&request.lieu, &existing.lieu))
        .bind(merge_text(&request.competences_requises, &existing.competences_requises))
        .bind(request.materiel_fourni.unwrap_or(existing.materiel_fourni) as i64)
        .bind(merge_text(&request.experience_requise, &existing.experience_requise))
        .bind(request.age_min.or(existing.age_min))
        .bind(request.age_max.or(existing.age_max))
        .bind(request.nombre_personnes.unwrap_or(existing.nombre_personnes))
        .bind(request.urgence.unwrap_or(existing.urgence).as_str())
        .bind(merge_text(&request.contact_info, &existing.contact_info))
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_service(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Service non trouvé".to_string()))
    }

    /// Change the status of a service.
    pub async fn set_service_status(&self, id: i64, statut: ServiceStatut) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE services SET statut = ?, updated_at = ? WHERE id = ?")
            .bind(statut.as_str())
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a service.
    pub async fn delete_service(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts by status, category and type.
    pub async fn service_stats(&self) -> Result<ServiceStats, AppError> {
        let by_status = self.group_count("services", "statut").await?;

        Ok(ServiceStats {
            total: by_status.values().sum(),
            active: by_status.get("active").copied().unwrap_or(0),
            inactive: by_status.get("inactive").copied().unwrap_or(0),
            complete: by_status.get("complete").copied().unwrap_or(0),
            by_category: self.group_count("services", "categorie").await?,
            by_type: self.group_count("services", "type_service").await?,
        })
    }
}

/// Required text field: a blank update keeps the existing value.
fn required(new: &Option<String>, existing: &str) -> String {
    new.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(existing)
        .to_string()
}

fn service_from_row(row: &SqliteRow) -> Service {
    let type_service: String = row.get("type_service");
    let recurrence: String = row.get("recurrence");
    let urgence: String = row.get("urgence");
    let statut: String = row.get("statut");
    Service {
        id: row.get("id"),
        titre: row.get("titre"),
        description: row.get("description"),
        type_service: TypeAnnonce::from_str(&type_service).unwrap_or(TypeAnnonce::Offre),
        categorie: row.get("categorie"),
        date_debut: row.get("date_debut"),
        date_fin: row.get("date_fin"),
        horaires: row.get("horaires"),
        recurrence: Recurrence::from_str(&recurrence).unwrap_or(Recurrence::Ponctuel),
        prix: row.get("prix"),
        budget_max: row.get("budget_max"),
        lieu: row.get("lieu"),
        competences_requises: row.get("competences_requises"),
        materiel_fourni: flag(row.get("materiel_fourni")),
        experience_requise: row.get("experience_requise"),
        age_min: row.get("age_min"),
        age_max: row.get("age_max"),
        nombre_personnes: row.get("nombre_personnes"),
        urgence: Urgence::from_str(&urgence).unwrap_or(Urgence::Normale),
        contact_info: row.get("contact_info"),
        date_publication: row.get("date_publication"),
        quartier_id: row.get("quartier_id"),
        utilisateur_id: row.get("utilisateur_id"),
        nom: row.get("nom"),
        prenom: row.get("prenom"),
        statut: ServiceStatut::from_str(&statut).unwrap_or(ServiceStatut::Inactive),
        updated_at: row.get("updated_at"),
    }
}
