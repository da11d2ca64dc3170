//! Barter and exchange listing models.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Whether a listing offers or requests something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeAnnonce {
    Offre,
    Demande,
}

impl TypeAnnonce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeAnnonce::Offre => "offre",
            TypeAnnonce::Demande => "demande",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "offre" => Some(TypeAnnonce::Offre),
            "demande" => Some(TypeAnnonce::Demande),
            _ => None,
        }
    }
}

/// How the object changes hands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeEchange {
    Vente,
    Troc,
    Don,
}

impl ModeEchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModeEchange::Vente => "vente",
            ModeEchange::Troc => "troc",
            ModeEchange::Don => "don",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "vente" => Some(ModeEchange::Vente),
            "troc" => Some(ModeEchange::Troc),
            "don" => Some(ModeEchange::Don),
            _ => None,
        }
    }
}

/// Moderation status of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrocStatut {
    Active,
    Inactive,
}

impl TrocStatut {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrocStatut::Active => "active",
            TrocStatut::Inactive => "inactive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TrocStatut::Active),
            "inactive" => Some(TrocStatut::Inactive),
            _ => None,
        }
    }
}

/// A barter/exchange listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnonceTroc {
    pub id: i64,
    pub titre: String,
    pub description: Option<String>,
    pub objet_propose: Option<String>,
    pub objet_recherche: Option<String>,
    pub images: Vec<String>,
    pub date_publication: String,
    pub quartier_id: i64,
    pub utilisateur_id: i64,
    pub nom: Option<String>,
    pub prenom: Option<String>,
    pub statut: TrocStatut,
    pub type_annonce: TypeAnnonce,
    pub prix: Option<f64>,
    pub budget_max: Option<f64>,
    pub etat_produit: Option<String>,
    pub categorie: Option<String>,
    pub urgence: Option<String>,
    pub mode_echange: ModeEchange,
    pub criteres_specifiques: Option<String>,
    pub disponibilite: Option<String>,
    pub updated_at: String,
}

/// Request body for creating or updating a listing.
///
/// On update, absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrocRequest {
    #[serde(default)]
    pub titre: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub objet_propose: Option<String>,
    #[serde(default)]
    pub objet_recherche: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub type_annonce: Option<TypeAnnonce>,
    #[serde(default)]
    pub prix: Option<f64>,
    #[serde(default)]
    pub budget_max: Option<f64>,
    #[serde(default)]
    pub etat_produit: Option<String>,
    #[serde(default)]
    pub categorie: Option<String>,
    #[serde(default)]
    pub urgence: Option<String>,
    #[serde(default)]
    pub mode_echange: Option<ModeEchange>,
    #[serde(default)]
    pub criteres_specifiques: Option<String>,
    #[serde(default)]
    pub disponibilite: Option<String>,
}

/// Request body for `DELETE /api/trocs/{id}/image`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoveImageRequest {
    #[serde(default, alias = "imageUrl")]
    pub image_url: Option<String>,
}

/// Remaining images after a removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrocImages {
    pub images: Vec<String>,
}

/// Request body for admin status changes.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    pub statut: String,
}

/// Query string carrying a full-text query.
#[derive(Debug, Clone, Deserialize)]
pub struct TextSearchQuery {
    #[serde(default)]
    pub q: Option<String>,
}

/// Aggregate counts over all listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrocStats {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub by_category: BTreeMap<String, i64>,
    pub by_type: BTreeMap<String, i64>,
}

/// Accept either a single URL or a list of URLs.
fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(
        Option::<OneOrMany>::deserialize(deserializer)?.map(|v| match v {
            OneOrMany::One(url) => vec![url],
            OneOrMany::Many(urls) => urls,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_images_accept_single_url() {
        let req: TrocRequest =
            serde_json::from_str(r#"{"titre": "Vélo", "images": "/img/a.png"}"#).unwrap();
        assert_eq!(req.images, Some(vec!["/img/a.png".to_string()]));

        let req: TrocRequest =
            serde_json::from_str(r#"{"images": ["/img/a.png", "/img/b.png"]}"#).unwrap();
        assert_eq!(req.images.map(|i| i.len()), Some(2));

        let req: TrocRequest = serde_json::from_str(r#"{"titre": "Vélo"}"#).unwrap();
        assert!(req.images.is_none());
    }

    #[test]
    fn test_mode_echange_rejects_unknown() {
        let res: Result<TrocRequest, _> = serde_json::from_str(r#"{"mode_echange": "loan"}"#);
        assert!(res.is_err());
        assert_eq!(ModeEchange::from_str("don"), Some(ModeEchange::Don));
    }
}
