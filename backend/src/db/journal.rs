//! Journal articles and editions.

use sqlx::{sqlite::SqliteRow, Row};

use super::repository::{clean, json_array, parse_json_array, Repository};
use crate::errors::AppError;
use crate::models::{
    now_timestamp, Article, ArticleStats, ArticleStatus, Edition, UpdateArticleRequest,
};

const ARTICLE_COLUMNS: &str = "id, title, content, author_id, author_name, date, status, quartier_id, quartier_name, category, image_url, images, edition_id, created_at, updated_at";

/// Fields of a new article.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    pub author_id: i64,
    pub author_name: String,
    pub quartier_id: i64,
    pub quartier_name: String,
    pub category: String,
    pub image_url: Option<String>,
    pub images: Vec<String>,
}

impl Repository {
    // ==================== ARTICLE OPERATIONS ====================

    /// Create an article as a draft.
    pub async fn create_article(&self, new_article: &NewArticle) -> Result<Article, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();

        sqlx::query(
            "INSERT INTO articles (id, title, content, author_id, author_name, date, status, quartier_id, quartier_name, category, image_url, images, edition_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, 'brouillon', ?, ?, ?, ?, ?, NULL, ?, ?)"
        )
        .bind(&id)
        .bind(new_article.title.trim())
        .bind(new_article.content.trim())
        .bind(new_article.author_id)
        .bind(&new_article.author_name)
        .bind(&now)
        .bind(new_article.quartier_id)
        .bind(&new_article.quartier_name)
        .bind(&new_article.category)
        .bind(clean(new_article.image_url.as_ref()))
        .bind(json_array(&new_article.images))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_article(&id)
            .await?
            .ok_or_else(|| AppError::Internal("Article vanished after insert".to_string()))
    }

    /// Get an article by ID.
    pub async fn get_article(&self, id: &str) -> Result<Option<Article>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM articles WHERE id = ?",
            ARTICLE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(article_from_row))
    }

    /// Articles, newest first, optionally filtered by status and quartier.
    pub async fn list_articles(
        &self,
        status: Option<ArticleStatus>,
        quartier_id: Option<i64>,
    ) -> Result<Vec<Article>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM articles WHERE (? IS NULL OR status = ?) AND (? IS NULL OR quartier_id = ?) ORDER BY date DESC, created_at DESC",
            ARTICLE_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(status.map(|s| s.as_str()))
        .bind(quartier_id)
        .bind(quartier_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(article_from_row).collect())
    }

    /// Validated articles not yet attached to an edition.
    pub async fn validated_articles_without_edition(&self) -> Result<Vec<Article>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM articles WHERE status = 'valide' AND edition_id IS NULL ORDER BY date DESC, created_at DESC",
            ARTICLE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(article_from_row).collect())
    }

    /// Articles written by a user, newest first.
    pub async fn articles_by_author(&self, author_id: i64) -> Result<Vec<Article>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM articles WHERE author_id = ? ORDER BY date DESC, created_at DESC",
            ARTICLE_COLUMNS
        ))
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(article_from_row).collect())
    }

    /// Update the content of an article and set its status.
    pub async fn update_article(
        &self,
        id: &str,
        request: &UpdateArticleRequest,
        expected: ArticleStatus,
        status: ArticleStatus,
    ) -> Result<Article, AppError> {
        let existing = self
            .get_article(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Article non trouvé".to_string()))?;

        let title = request
            .title
            .as_deref()
            .map(str::trim)
            .unwrap_or(&existing.title);
        let content = request
            .content
            .as_deref()
            .map(str::trim)
            .unwrap_or(&existing.content);
        if title.is_empty() || content.is_empty() {
            return Err(AppError::Validation(
                "Le titre et le contenu sont requis".to_string(),
            ));
        }
        let category = request
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&existing.category);
        let image_url = match &request.image_url {
            Some(url) => clean(Some(url)),
            None => existing.image_url.clone(),
        };
        let images = request.images.as_ref().unwrap_or(&existing.images);

        let result = sqlx::query(
            "UPDATE articles SET title = ?, content = ?, category = ?, image_url = ?, images = ?, status = ?, updated_at = ? WHERE id = ? AND status = ?"
        )
        .bind(title)
        .bind(content)
        .bind(category)
        .bind(&image_url)
        .bind(json_array(images))
        .bind(status.as_str())
        .bind(now_timestamp())
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(
                "L'article a changé de statut entre-temps".to_string(),
            ));
        }

        self.get_article(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Article non trouvé".to_string()))
    }

    /// Move an article to `to` only if it is currently `from`.
    ///
    /// Returns false when the article is in another state.
    pub async fn transition_article(
        &self,
        id: &str,
        from: &[ArticleStatus],
        to: ArticleStatus,
    ) -> Result<bool, AppError> {
        let allowed: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let current = self
            .get_article(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Article non trouvé".to_string()))?;

        if !allowed.contains(&current.status.as_str()) {
            return Ok(false);
        }

        // Compare-and-set on the observed status
        let result = sqlx::query(
            "UPDATE articles SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(now_timestamp())
        .bind(id)
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete an article.
    pub async fn delete_article(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM articles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts by status, over all articles or one author's.
    pub async fn article_stats(&self, author_id: Option<i64>) -> Result<ArticleStats, AppError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM articles WHERE (? IS NULL OR author_id = ?) GROUP BY status",
        )
        .bind(author_id)
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = ArticleStats::default();
        for row in &rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            stats.total += count;
            match ArticleStatus::from_str(&status) {
                Some(ArticleStatus::Brouillon) => stats.brouillon = count,
                Some(ArticleStatus::AValider) => stats.a_valider = count,
                Some(ArticleStatus::Valide) => stats.valide = count,
                Some(ArticleStatus::Refuse) => stats.refuse = count,
                None => {}
            }
        }

        Ok(stats)
    }

    // ==================== EDITION OPERATIONS ====================

    /// Create an edition and attach the listed validated articles to it.
    ///
    /// Rejected when none of the ids is a validated article.
    pub async fn create_edition(
        &self,
        title: &str,
        description: &str,
        article_ids: &[String],
    ) -> Result<(Edition, Vec<Article>), AppError> {
        let edition = Edition {
            uuid: uuid::Uuid::new_v4().to_string(),
            title: title.trim().to_string(),
            description: description.trim().to_string(),
            created_at: now_timestamp(),
            updated_at: now_timestamp(),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO editions (uuid, title, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&edition.uuid)
        .bind(&edition.title)
        .bind(&edition.description)
        .bind(&edition.created_at)
        .bind(&edition.updated_at)
        .execute(&mut *tx)
        .await?;

        let mut attached = 0;
        for article_id in article_ids {
            attached += sqlx::query(
                "UPDATE articles SET edition_id = ?, updated_at = ? WHERE id = ? AND status = 'valide'",
            )
            .bind(&edition.uuid)
            .bind(&edition.updated_at)
            .bind(article_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        if attached == 0 {
            tx.rollback().await?;
            return Err(AppError::BadRequest(
                "Aucun article validé parmi les articles fournis".to_string(),
            ));
        }

        tx.commit().await?;

        let articles = self.articles_by_edition(&edition.uuid).await?;
        Ok((edition, articles))
    }

    /// All editions, newest first.
    pub async fn list_editions(&self) -> Result<Vec<Edition>, AppError> {
        let rows = sqlx::query(
            "SELECT uuid, title, description, created_at, updated_at FROM editions ORDER BY created_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(edition_from_row).collect())
    }

    /// Get an edition by UUID.
    pub async fn get_edition(&self, uuid: &str) -> Result<Option<Edition>, AppError> {
        let row = sqlx::query(
            "SELECT uuid, title, description, created_at, updated_at FROM editions WHERE uuid = ?",
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(edition_from_row))
    }

    /// Articles attached to an edition.
    pub async fn articles_by_edition(&self, uuid: &str) -> Result<Vec<Article>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM articles WHERE edition_id = ? ORDER BY date DESC, created_at DESC",
            ARTICLE_COLUMNS
        ))
        .bind(uuid)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(article_from_row).collect())
    }
}

fn article_from_row(row: &SqliteRow) -> Article {
    let status: String = row.get("status");
    let images: String = row.get("images");
    Article {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        author_id: row.get("author_id"),
        author_name: row.get("author_name"),
        date: row.get("date"),
        status: ArticleStatus::from_str(&status).unwrap_or(ArticleStatus::Brouillon),
        quartier_id: row.get("quartier_id"),
        quartier_name: row.get("quartier_name"),
        category: row.get("category"),
        image_url: row.get("image_url"),
        images: parse_json_array(&images),
        edition_id: row.get("edition_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn edition_from_row(row: &SqliteRow) -> Edition {
    Edition {
        uuid: row.get("uuid"),
        title: row.get("title"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
