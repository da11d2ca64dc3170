//! NextDoorBuddy backend
//!
//! REST backend of the NextDoorBuddy neighborhood platform with SQLite
//! persistence, Tantivy full-text search and WebSocket messaging, plus a
//! typed API client.

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod geo;
pub mod messaging;
pub mod models;
pub mod search;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::token::TokenService;
use config::Config;
use db::Repository;
use errors::AppError;
use messaging::MessagingHub;
use search::{Listing, ListingIndex};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub search: Arc<ListingIndex>,
    pub hub: Arc<MessagingHub>,
    pub tokens: Arc<TokenService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(repo: Repository, search: ListingIndex, config: Config) -> Self {
        Self {
            repo: Arc::new(repo),
            search: Arc::new(search),
            hub: Arc::new(MessagingHub::new()),
            tokens: Arc::new(TokenService::new(&config)),
            config: Arc::new(config),
        }
    }
}

/// Rebuild the search index from every event, troc and service.
pub async fn rebuild_search_index(state: &AppState) -> Result<usize, AppError> {
    let mut listings: Vec<Listing> = Vec::new();
    listings.extend(state.repo.list_evenements().await?.iter().map(Listing::from));
    listings.extend(state.repo.list_all_trocs().await?.iter().map(Listing::from));
    listings.extend(state.repo.list_all_services().await?.iter().map(Listing::from));

    state.search.rebuild(&listings).await?;
    Ok(listings.len())
}

/// Periodically delete expired and revoked refresh tokens.
pub fn spawn_token_purge(repo: Arc<Repository>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match repo.purge_refresh_tokens().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!("Purged {} refresh tokens", purged),
                Err(e) => tracing::warn!("Failed to purge refresh tokens: {}", e),
            }
        }
    })
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public_routes = Router::new()
        // Auth
        .route("/auth/register", post(api::register))
        .route("/auth/login", post(api::login))
        .route("/auth/refresh-token", post(api::refresh_token))
        .route("/auth/logout", post(api::logout))
        // Quartiers
        .route("/quartiers", get(api::list_quartiers))
        .route("/quartiers/search", get(api::search_quartiers))
        .route("/quartiers/locate", get(api::locate_quartier))
        .route("/quartiers/ville/{ville}", get(api::quartiers_by_ville))
        .route("/quartiers/{id}", get(api::get_quartier))
        // Events
        .route("/evenements", get(api::list_evenements))
        .route("/evenements/upcoming", get(api::upcoming_evenements))
        .route(
            "/evenements/upcoming/{quartier_id}",
            get(api::upcoming_evenements_by_quartier),
        )
        .route("/evenements/past", get(api::past_evenements))
        .route(
            "/evenements/past/{quartier_id}",
            get(api::past_evenements_by_quartier),
        )
        .route(
            "/evenements/quartier/{quartier_id}",
            get(api::evenements_by_quartier),
        )
        .route("/evenements/search", get(api::search_evenements))
        .route("/evenements/{id}", get(api::get_evenement))
        // Journal
        .route("/journal", get(api::list_published_articles))
        .route("/journal/stats", get(api::journal_stats))
        .route("/journal/{id}", get(api::get_published_article))
        // WebSocket authenticates with its query token
        .route("/messaging/ws", get(api::messaging_socket));

    let protected_routes = Router::new()
        .route("/auth/me", get(api::me))
        // Users
        .route(
            "/users/{id}",
            get(api::get_user)
                .put(api::update_user)
                .delete(api::delete_user),
        )
        .route(
            "/users/{id}/quartiers",
            get(api::list_memberships).post(api::add_membership),
        )
        .route(
            "/users/{id}/quartier-principal",
            get(api::get_principal_membership),
        )
        .route(
            "/users/{id}/quartiers/{target_id}/principal",
            put(api::set_principal_membership),
        )
        .route(
            "/users/{id}/quartiers/{target_id}",
            delete(api::remove_membership),
        )
        // Quartiers
        .route("/quartiers/{id}/users", get(api::quartier_members))
        // Events
        .route("/evenements", post(api::create_evenement))
        .route(
            "/evenements/organisateur/{id}",
            get(api::evenements_by_organisateur),
        )
        .route(
            "/evenements/{id}",
            put(api::update_evenement).delete(api::delete_evenement),
        )
        .route("/evenements/{id}/participants", get(api::list_participants))
        .route(
            "/evenements/{id}/participate",
            post(api::participate).delete(api::cancel_participation),
        )
        .route(
            "/evenements/{id}/check-participation",
            get(api::check_participation),
        )
        // Trocs
        .route("/trocs", get(api::list_trocs).post(api::create_troc))
        .route("/trocs/my-trocs", get(api::my_trocs))
        .route("/trocs/search", get(api::search_trocs))
        .route(
            "/trocs/{id}",
            get(api::get_troc)
                .put(api::update_troc)
                .delete(api::delete_troc),
        )
        .route("/trocs/{id}/image", delete(api::remove_troc_image))
        // Services
        .route("/services", get(api::list_services).post(api::create_service))
        .route("/services/search", get(api::search_services))
        .route("/services/my-services", get(api::my_services))
        .route(
            "/services/{id}",
            get(api::get_service)
                .put(api::update_service)
                .delete(api::delete_service),
        )
        // Journal
        .route("/journal/validated", get(api::list_validated_articles))
        .route(
            "/journal/validated-without-edition",
            get(api::list_unpublished_validated_articles),
        )
        .route("/journal/editions", get(api::list_editions))
        .route("/journal/edition/{uuid}", get(api::get_edition))
        .route(
            "/journal/edition/{uuid}/articles",
            get(api::edition_articles),
        )
        .route("/journal/user/my-articles", get(api::my_articles))
        .route("/journal/user/stats", get(api::my_article_stats))
        .route("/journal/user/create", post(api::create_article))
        .route(
            "/journal/user/{id}",
            get(api::get_my_article)
                .put(api::update_article)
                .delete(api::delete_article),
        )
        .route("/journal/user/{id}/submit", patch(api::submit_article))
        .route(
            "/journal/user/{id}/toggle-visibility",
            patch(api::toggle_article_visibility),
        )
        // Messaging
        .route(
            "/messaging/rooms",
            get(api::list_rooms).post(api::create_room),
        )
        .route("/messaging/rooms/available", get(api::available_rooms))
        .route("/messaging/rooms/{id}", get(api::get_room))
        .route("/messaging/rooms/{id}/join", post(api::join_room))
        .route("/messaging/rooms/{id}/leave", post(api::leave_room))
        .route(
            "/messaging/rooms/{id}/messages",
            get(api::list_messages).post(api::send_message),
        )
        .route("/messaging/rooms/{id}/members", get(api::room_members))
        .route(
            "/messaging/rooms/{id}/unread-count",
            get(api::unread_count),
        )
        .route("/messaging/rooms/{id}/mark-read", post(api::mark_read))
        .route(
            "/messaging/messages/{id}",
            put(api::edit_message).delete(api::delete_message),
        )
        .route("/messaging/users/online", get(api::online_users))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let admin_routes = Router::new()
        .route("/users", get(api::list_users))
        .route("/users/with-quartier", get(api::list_users_with_quartier))
        .route("/quartiers", post(api::create_quartier))
        .route(
            "/quartiers/{id}",
            put(api::update_quartier).delete(api::delete_quartier),
        )
        .route("/trocs/admin/all", get(api::admin_list_trocs))
        .route(
            "/trocs/admin/{id}/status",
            patch(api::admin_set_troc_status),
        )
        .route("/trocs/admin/stats", get(api::admin_troc_stats))
        .route("/services/admin/all", get(api::admin_list_services))
        .route(
            "/services/admin/{id}/status",
            patch(api::admin_set_service_status),
        )
        .route("/services/admin/stats", get(api::admin_service_stats))
        .route("/journal/admin/all", get(api::admin_list_articles))
        .route("/journal/admin/pending", get(api::admin_pending_articles))
        .route("/journal/admin/{id}", get(api::admin_get_article))
        .route("/journal/admin/{id}/validate", patch(api::validate_article))
        .route("/journal/admin/{id}/reject", patch(api::reject_article))
        .route("/journal/create-journal", post(api::create_edition))
        // Admin check runs after authentication
        .route_layer(middleware::from_fn(auth::require_admin))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let api_routes = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes);

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(api::health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests;
