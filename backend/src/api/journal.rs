//! Community journal API endpoints.
//!
//! Articles move `brouillon → a_valider → valide | refuse`, and a refused
//! article can be resubmitted. Moderation is scoped to the admin's quartier.

use axum::{
    extract::{Path, State},
    Extension, Json,
};

use super::{created, message, success, ApiResult, MessageBody};
use crate::auth::CurrentUser;
use crate::db::NewArticle;
use crate::errors::AppError;
use crate::models::{
    non_empty, Article, ArticleStats, ArticleStatus, CreateArticleRequest, CreateEditionRequest,
    Edition, EditionCreated, UpdateArticleRequest, DEFAULT_CATEGORY,
};
use crate::AppState;

async fn load(state: &AppState, id: &str) -> Result<Article, AppError> {
    state
        .repo
        .get_article(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Article non trouvé".to_string()))
}

fn ensure_author_or_admin(current: &CurrentUser, article: &Article) -> Result<(), AppError> {
    if article.author_id == current.id() || current.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Vous n'êtes pas l'auteur de cet article".to_string(),
        ))
    }
}

/// The admin's quartier; moderation needs one.
fn moderation_quartier(current: &CurrentUser) -> Result<i64, AppError> {
    current.0.quartier_id.ok_or_else(|| {
        AppError::Forbidden("Aucun quartier associé à cet administrateur".to_string())
    })
}

async fn load_moderated(
    state: &AppState,
    current: &CurrentUser,
    id: &str,
) -> Result<Article, AppError> {
    let quartier_id = moderation_quartier(current)?;
    let article = load(state, id).await?;
    if article.quartier_id != quartier_id {
        return Err(AppError::Forbidden(
            "Cet article n'appartient pas à votre quartier".to_string(),
        ));
    }
    Ok(article)
}

// ==================== PUBLIC ====================

/// GET /api/journal - Validated articles, newest first.
pub async fn list_published_articles(State(state): State<AppState>) -> ApiResult<Vec<Article>> {
    success(
        state
            .repo
            .list_articles(Some(ArticleStatus::Valide), None)
            .await?,
    )
}

/// GET /api/journal/stats - Counts by status over all articles.
pub async fn journal_stats(State(state): State<AppState>) -> ApiResult<ArticleStats> {
    success(state.repo.article_stats(None).await?)
}

/// GET /api/journal/{id} - A validated article.
pub async fn get_published_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Article> {
    let article = load(&state, &id).await?;
    if article.status != ArticleStatus::Valide {
        return Err(AppError::NotFound("Article non trouvé".to_string()));
    }
    success(article)
}

// ==================== AUTHENTICATED ====================

/// GET /api/journal/validated
pub async fn list_validated_articles(State(state): State<AppState>) -> ApiResult<Vec<Article>> {
    list_published_articles(State(state)).await
}

/// GET /api/journal/validated-without-edition
pub async fn list_unpublished_validated_articles(
    State(state): State<AppState>,
) -> ApiResult<Vec<Article>> {
    success(state.repo.validated_articles_without_edition().await?)
}

/// GET /api/journal/editions
pub async fn list_editions(State(state): State<AppState>) -> ApiResult<Vec<Edition>> {
    success(state.repo.list_editions().await?)
}

/// GET /api/journal/edition/{uuid}
pub async fn get_edition(State(state): State<AppState>, Path(uuid): Path<String>) -> ApiResult<Edition> {
    match state.repo.get_edition(&uuid).await? {
        Some(edition) => success(edition),
        None => Err(AppError::NotFound("Édition non trouvée".to_string())),
    }
}

/// GET /api/journal/edition/{uuid}/articles
pub async fn edition_articles(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> ApiResult<Vec<Article>> {
    if state.repo.get_edition(&uuid).await?.is_none() {
        return Err(AppError::NotFound("Édition non trouvée".to_string()));
    }
    success(state.repo.articles_by_edition(&uuid).await?)
}

// ==================== AUTHOR ====================

/// GET /api/journal/user/my-articles
pub async fn my_articles(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Vec<Article>> {
    success(state.repo.articles_by_author(current.id()).await?)
}

/// GET /api/journal/user/stats
pub async fn my_article_stats(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<ArticleStats> {
    success(state.repo.article_stats(Some(current.id())).await?)
}

/// POST /api/journal/user/create - Write a draft.
pub async fn create_article(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<CreateArticleRequest>,
) -> ApiResult<Article> {
    let title = non_empty(Some(request.title.as_str()));
    let content = non_empty(Some(request.content.as_str()));
    let (Some(title), Some(content)) = (title, content) else {
        return Err(AppError::Validation(
            "Le titre et le contenu sont requis".to_string(),
        ));
    };

    let quartier_id = request
        .quartier_id
        .or(current.0.quartier_id)
        .ok_or_else(|| AppError::BadRequest("Un quartier est requis".to_string()))?;
    let quartier = state
        .repo
        .get_quartier(quartier_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Quartier non trouvé".to_string()))?;

    let article = state
        .repo
        .create_article(&NewArticle {
            title: title.to_string(),
            content: content.to_string(),
            author_id: current.id(),
            author_name: current.0.display_name(),
            quartier_id,
            quartier_name: quartier.nom_quartier,
            category: non_empty(request.category.as_deref())
                .unwrap_or(DEFAULT_CATEGORY)
                .to_string(),
            image_url: request.image_url.clone(),
            images: request.images.clone().unwrap_or_default(),
        })
        .await?;

    tracing::info!(article_id = %article.id, author_id = current.id(), "Article drafted");
    created(article)
}

/// GET /api/journal/user/{id} - An article of the author (or any, for admins).
pub async fn get_my_article(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Article> {
    let article = load(&state, &id).await?;
    ensure_author_or_admin(&current, &article)?;
    success(article)
}

/// PUT /api/journal/user/{id} - Edit an article.
///
/// An author edit sends a validated or refused article back to draft. Articles
/// under review are frozen for authors.
pub async fn update_article(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<UpdateArticleRequest>,
) -> ApiResult<Article> {
    let article = load(&state, &id).await?;
    ensure_author_or_admin(&current, &article)?;

    let status = if current.is_admin() {
        article.status
    } else {
        article.status.after_author_edit().ok_or_else(|| {
            AppError::Conflict("Article en cours de validation".to_string())
        })?
    };

    success(
        state
            .repo
            .update_article(&id, &request, article.status, status)
            .await?,
    )
}

/// DELETE /api/journal/user/{id}
pub async fn delete_article(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<MessageBody> {
    let article = load(&state, &id).await?;
    ensure_author_or_admin(&current, &article)?;

    state.repo.delete_article(&id).await?;
    tracing::info!(article_id = %id, by = current.id(), "Article deleted");
    message("Article supprimé")
}

/// PATCH /api/journal/user/{id}/submit - Send a draft or refused article for review.
pub async fn submit_article(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Article> {
    let article = load(&state, &id).await?;
    if article.author_id != current.id() {
        return Err(AppError::Forbidden(
            "Vous n'êtes pas l'auteur de cet article".to_string(),
        ));
    }

    let moved = article.status.can_submit()
        && state
            .repo
            .transition_article(
                &id,
                &[ArticleStatus::Brouillon, ArticleStatus::Refuse],
                ArticleStatus::AValider,
            )
            .await?;
    if !moved {
        return Err(AppError::Conflict(
            "Seul un brouillon ou un article refusé peut être soumis".to_string(),
        ));
    }

    success(load(&state, &id).await?)
}

/// PATCH /api/journal/user/{id}/toggle-visibility - Submit a draft or withdraw it from review.
pub async fn toggle_article_visibility(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Article> {
    let article = load(&state, &id).await?;
    ensure_author_or_admin(&current, &article)?;

    let target = article.status.toggled().ok_or_else(|| {
        AppError::BadRequest("Impossible de modifier le statut de cet article".to_string())
    })?;
    if !state
        .repo
        .transition_article(&id, &[article.status], target)
        .await?
    {
        return Err(AppError::Conflict(
            "L'article a changé de statut entre-temps".to_string(),
        ));
    }

    tracing::info!(article_id = %id, status = target.as_str(), by = current.id(), "Article visibility toggled");
    success(load(&state, &id).await?)
}

// ==================== ADMIN ====================

/// GET /api/journal/admin/all - Articles of the admin's quartier.
pub async fn admin_list_articles(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Vec<Article>> {
    let quartier_id = moderation_quartier(&current)?;
    success(state.repo.list_articles(None, Some(quartier_id)).await?)
}

/// GET /api/journal/admin/pending - Articles awaiting review in the admin's quartier.
pub async fn admin_pending_articles(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Vec<Article>> {
    let quartier_id = moderation_quartier(&current)?;
    success(
        state
            .repo
            .list_articles(Some(ArticleStatus::AValider), Some(quartier_id))
            .await?,
    )
}

/// GET /api/journal/admin/{id}
pub async fn admin_get_article(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Article> {
    success(load_moderated(&state, &current, &id).await?)
}

/// PATCH /api/journal/admin/{id}/validate
pub async fn validate_article(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Article> {
    review_article(&state, &current, &id, ArticleStatus::Valide).await
}

/// PATCH /api/journal/admin/{id}/reject
pub async fn reject_article(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Article> {
    review_article(&state, &current, &id, ArticleStatus::Refuse).await
}

async fn review_article(
    state: &AppState,
    current: &CurrentUser,
    id: &str,
    decision: ArticleStatus,
) -> ApiResult<Article> {
    load_moderated(state, current, id).await?;

    let moved = state
        .repo
        .transition_article(id, &[ArticleStatus::AValider], decision)
        .await?;
    if !moved {
        return Err(AppError::Conflict(
            "Seul un article en attente de validation peut être modéré".to_string(),
        ));
    }

    tracing::info!(article_id = %id, decision = decision.as_str(), by = current.id(), "Article reviewed");
    success(load(state, id).await?)
}

/// POST /api/journal/create-journal - Publish an edition of validated articles (admin).
pub async fn create_edition(
    State(state): State<AppState>,
    Json(request): Json<CreateEditionRequest>,
) -> ApiResult<EditionCreated> {
    let title = non_empty(Some(request.title.as_str()))
        .ok_or_else(|| AppError::BadRequest("Le titre est requis".to_string()))?;
    if request.article_ids.is_empty() {
        return Err(AppError::BadRequest(
            "Au moins un article est requis".to_string(),
        ));
    }

    let (edition, articles) = state
        .repo
        .create_edition(
            title,
            request.description.as_deref().unwrap_or_default(),
            &request.article_ids,
        )
        .await?;

    tracing::info!(edition = %edition.uuid, articles = articles.len(), "Edition created");
    created(EditionCreated {
        total_articles: articles.len(),
        edition,
        articles,
    })
}
