//! Community journal models: articles and editions.

use serde::{Deserialize, Serialize};

/// Default category of a new article.
pub const DEFAULT_CATEGORY: &str = "Actualités";

/// Workflow status of an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Brouillon,
    AValider,
    Valide,
    Refuse,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Brouillon => "brouillon",
            ArticleStatus::AValider => "a_valider",
            ArticleStatus::Valide => "valide",
            ArticleStatus::Refuse => "refuse",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "brouillon" => Some(ArticleStatus::Brouillon),
            "a_valider" => Some(ArticleStatus::AValider),
            "valide" => Some(ArticleStatus::Valide),
            "refuse" => Some(ArticleStatus::Refuse),
            _ => None,
        }
    }

    /// An author may submit drafts and rejected articles for review.
    pub fn can_submit(&self) -> bool {
        matches!(self, ArticleStatus::Brouillon | ArticleStatus::Refuse)
    }

    /// Draft and review swap places; other statuses cannot be toggled.
    pub fn toggled(&self) -> Option<ArticleStatus> {
        match self {
            ArticleStatus::Brouillon => Some(ArticleStatus::AValider),
            ArticleStatus::AValider => Some(ArticleStatus::Brouillon),
            ArticleStatus::Valide | ArticleStatus::Refuse => None,
        }
    }

    /// Status after an author edits the article, or `None` when the edit is refused.
    pub fn after_author_edit(&self) -> Option<ArticleStatus> {
        match self {
            ArticleStatus::Brouillon => Some(ArticleStatus::Brouillon),
            ArticleStatus::AValider => None,
            ArticleStatus::Valide | ArticleStatus::Refuse => Some(ArticleStatus::Brouillon),
        }
    }
}

/// A journal article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author_id: i64,
    pub author_name: String,
    pub date: String,
    pub status: ArticleStatus,
    pub quartier_id: i64,
    pub quartier_name: String,
    pub category: String,
    pub image_url: Option<String>,
    pub images: Vec<String>,
    pub edition_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Request body for creating an article.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateArticleRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub quartier_id: Option<i64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
}

/// Request body for updating an article. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateArticleRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
}

/// Counts of articles by status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleStats {
    pub total: i64,
    pub brouillon: i64,
    pub a_valider: i64,
    pub valide: i64,
    pub refuse: i64,
}

/// A published journal issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edition {
    pub uuid: String,
    pub title: String,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Request body for `POST /api/journal/create-journal`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateEditionRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "articleIds")]
    pub article_ids: Vec<String>,
}

/// Result of creating an edition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditionCreated {
    pub edition: Edition,
    pub articles: Vec<Article>,
    pub total_articles: usize,
}
