//! Quartier (neighborhood) and membership models.

use serde::{Deserialize, Serialize};

use crate::geo::Geometry;

/// A geographic neighborhood.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quartier {
    pub id: i64,
    pub nom_quartier: String,
    pub ville: Option<String>,
    pub code_postal: Option<String>,
    pub description: Option<String>,
    pub geom: Option<Geometry>,
    pub created_at: String,
    pub updated_at: String,
}

/// Request body for creating or updating a quartier.
///
/// The geometry is kept as raw JSON so an invalid shape becomes a validation
/// error instead of a body rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuartierRequest {
    #[serde(default)]
    pub nom_quartier: Option<String>,
    #[serde(default)]
    pub ville: Option<String>,
    #[serde(default)]
    pub code_postal: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub geom: Option<serde_json::Value>,
}

/// Query string for `GET /api/quartiers/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct QuartierSearchQuery {
    #[serde(default)]
    pub q: Option<String>,
}

/// Query string for `GET /api/quartiers/locate`.
#[derive(Debug, Clone, Deserialize)]
pub struct LocateQuery {
    pub lon: f64,
    pub lat: f64,
}

/// Membership status of a user in a quartier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Actif,
    Inactif,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Actif => "actif",
            MembershipStatus::Inactif => "inactif",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "actif" => Some(MembershipStatus::Actif),
            "inactif" => Some(MembershipStatus::Inactif),
            _ => None,
        }
    }
}

/// A user's membership in a quartier, joined with the quartier's labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: i64,
    pub utilisateur_id: i64,
    pub quartier_id: i64,
    pub est_principal: bool,
    pub statut: MembershipStatus,
    pub date_ajout: String,
    pub nom_quartier: String,
    pub ville: Option<String>,
    pub code_postal: Option<String>,
}

/// Request body for `POST /api/users/{user_id}/quartiers`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddMembershipRequest {
    pub quartier_id: i64,
    #[serde(default)]
    pub est_principal: bool,
}

/// Identifier of a newly created row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedId {
    pub id: i64,
}

/// An active member of a quartier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuartierMember {
    pub id: i64,
    pub nom: String,
    pub prenom: String,
    pub est_principal: bool,
    pub date_ajout: String,
}
