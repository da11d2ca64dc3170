//! Local services classifieds models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::TypeAnnonce;

/// How often a service is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    Ponctuel,
    Hebdomadaire,
    Mensuel,
    Permanent,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::Ponctuel => "ponctuel",
            Recurrence::Hebdomadaire => "hebdomadaire",
            Recurrence::Mensuel => "mensuel",
            Recurrence::Permanent => "permanent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ponctuel" => Some(Recurrence::Ponctuel),
            "hebdomadaire" => Some(Recurrence::Hebdomadaire),
            "mensuel" => Some(Recurrence::Mensuel),
            "permanent" => Some(Recurrence::Permanent),
            _ => None,
        }
    }
}

/// Urgency of a service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgence {
    Faible,
    Normale,
    Elevee,
}

impl Urgence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgence::Faible => "faible",
            Urgence::Normale => "normale",
            Urgence::Elevee => "elevee",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "faible" => Some(Urgence::Faible),
            "normale" => Some(Urgence::Normale),
            "elevee" => Some(Urgence::Elevee),
            _ => None,
        }
    }
}

/// Lifecycle status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatut {
    Active,
    Inactive,
    Complete,
}

impl ServiceStatut {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatut::Active => "active",
            ServiceStatut::Inactive => "inactive",
            ServiceStatut::Complete => "complete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ServiceStatut::Active),
            "inactive" => Some(ServiceStatut::Inactive),
            "complete" => Some(ServiceStatut::Complete),
            _ => None,
        }
    }
}

/// A service offer or request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub titre: String,
    pub description: String,
    pub type_service: TypeAnnonce,
    pub categorie: String,
    pub date_debut: Option<String>,
    pub date_fin: Option<String>,
    pub horaires: Option<String>,
    pub recurrence: Recurrence,
    pub prix: Option<f64>,
    pub budget_max: Option<f64>,
    pub lieu: Option<String>,
    pub competences_requises: Option<String>,
    pub materiel_fourni: bool,
    pub experience_requise: Option<String>,
    pub age_min: Option<i64>,
    pub age_max: Option<i64>,
    pub nombre_personnes: i64,
    pub urgence: Urgence,
    pub contact_info: Option<String>,
    pub date_publication: String,
    pub quartier_id: i64,
    pub utilisateur_id: i64,
    pub nom: Option<String>,
    pub prenom: Option<String>,
    pub statut: ServiceStatut,
    pub updated_at: String,
}

/// Request body for creating or updating a service.
///
/// On update, absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceRequest {
    #[serde(default)]
    pub titre: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub type_service: Option<TypeAnnonce>,
    #[serde(default)]
    pub categorie: Option<String>,
    #[serde(default)]
    pub date_debut: Option<String>,
    #[serde(default)]
    pub date_fin: Option<String>,
    #[serde(default)]
    pub horaires: Option<String>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
    #[serde(default)]
    pub prix: Option<f64>,
    #[serde(default)]
    pub budget_max: Option<f64>,
    #[serde(default)]
    pub lieu: Option<String>,
    #[serde(default)]
    pub competences_requises: Option<String>,
    #[serde(default)]
    pub materiel_fourni: Option<bool>,
    #[serde(default)]
    pub experience_requise: Option<String>,
    #[serde(default)]
    pub age_min: Option<i64>,
    #[serde(default)]
    pub age_max: Option<i64>,
    #[serde(default)]
    pub nombre_personnes: Option<i64>,
    #[serde(default)]
    pub urgence: Option<Urgence>,
    #[serde(default)]
    pub contact_info: Option<String>,
}

/// Query string for `GET /api/services/search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceSearchQuery {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub type_service: Option<TypeAnnonce>,
    #[serde(default)]
    pub categorie: Option<String>,
    #[serde(default)]
    pub prix_max: Option<f64>,
    #[serde(default)]
    pub date_debut: Option<String>,
    #[serde(default)]
    pub urgence: Option<Urgence>,
}

/// Aggregate counts over all services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub complete: i64,
    pub by_category: BTreeMap<String, i64>,
    pub by_type: BTreeMap<String, i64>,
}
