//! Neighborhood event models.

use serde::{Deserialize, Serialize};

/// A neighborhood event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evenement {
    pub id: i64,
    pub organisateur_id: i64,
    pub organisateur_nom: Option<String>,
    pub organisateur_prenom: Option<String>,
    pub nom: String,
    pub description: Option<String>,
    pub date_evenement: String,
    pub lieu: String,
    pub type_evenement: Option<String>,
    pub photo_url: Option<String>,
    pub quartier_id: Option<i64>,
    pub participant_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Request body for creating an event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateEvenementRequest {
    #[serde(default)]
    pub nom: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date_evenement: Option<String>,
    #[serde(default)]
    pub lieu: String,
    #[serde(default)]
    pub type_evenement: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub quartier_id: Option<i64>,
}

/// Request body for updating an event. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEvenementRequest {
    #[serde(default)]
    pub nom: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date_evenement: Option<String>,
    #[serde(default)]
    pub lieu: Option<String>,
    #[serde(default)]
    pub type_evenement: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub quartier_id: Option<i64>,
}

/// Query string for `GET /api/evenements/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct EvenementSearchQuery {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub quartier_id: Option<i64>,
}

/// A participant of an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub utilisateur_id: i64,
    pub nom: String,
    pub prenom: String,
    pub date_inscription: String,
}

/// Response of `GET /api/evenements/{id}/check-participation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipationStatus {
    pub is_participant: bool,
}
