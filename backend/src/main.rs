//! NextDoorBuddy backend server.

use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nextdoorbuddy::config::Config;
use nextdoorbuddy::db::{self, Repository};
use nextdoorbuddy::search::ListingIndex;
use nextdoorbuddy::{create_router, rebuild_search_index, spawn_token_purge, AppState};

const TOKEN_PURGE_PERIOD: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging before configuration so its warnings are emitted
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Config::log_level_from_env()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting NextDoorBuddy backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.bootstrap_admin_email.is_some() {
        tracing::info!("Bootstrap admin email configured (NDB_BOOTSTRAP_ADMIN_EMAIL)");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Repository::new(pool);

    // Initialize search index
    let search = ListingIndex::open(&config.index_path)?;

    let bind_addr = config.bind_addr;
    let state = AppState::new(repo, search, config);

    // Build initial search index from database
    tracing::info!("Building search index...");
    let indexed = rebuild_search_index(&state).await?;
    tracing::info!("Search index built with {} listings", indexed);

    spawn_token_purge(state.repo.clone(), TOKEN_PURGE_PERIOD);

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
