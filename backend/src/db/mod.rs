//! Database module for SQLite persistence.
//!
//! SQLite is the source of truth for all application data, including the
//! community journal.

mod evenements;
mod journal;
mod messaging;
mod quartiers;
mod repository;
mod services;
mod trocs;
mod users;

pub use evenements::NewEvenement;
pub use journal::NewArticle;
pub use messaging::{MessageWindow, NewRoom};
pub use quartiers::QuartierData;
pub use repository::*;
pub use services::ServiceFilters;
pub use users::UserChanges;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quartiers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nom_quartier TEXT NOT NULL,
            ville TEXT,
            code_postal TEXT,
            description TEXT,
            geom TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nom TEXT NOT NULL,
            prenom TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            adresse TEXT,
            date_naissance TEXT,
            telephone TEXT,
            quartier_id INTEGER REFERENCES quartiers(id) ON DELETE SET NULL,
            role TEXT NOT NULL DEFAULT 'user',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refresh_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            jti TEXT NOT NULL UNIQUE,
            token TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            revoked INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_quartiers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            utilisateur_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            quartier_id INTEGER NOT NULL REFERENCES quartiers(id) ON DELETE CASCADE,
            est_principal INTEGER NOT NULL DEFAULT 0,
            statut TEXT NOT NULL DEFAULT 'actif',
            date_ajout TEXT NOT NULL,
            UNIQUE (utilisateur_id, quartier_id)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS evenements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organisateur_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            nom TEXT NOT NULL,
            description TEXT,
            date_evenement TEXT NOT NULL,
            lieu TEXT NOT NULL,
            type_evenement TEXT,
            photo_url TEXT,
            quartier_id INTEGER REFERENCES quartiers(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS participations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            evenement_id INTEGER NOT NULL REFERENCES evenements(id) ON DELETE CASCADE,
            utilisateur_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            date_inscription TEXT NOT NULL,
            UNIQUE (evenement_id, utilisateur_id)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trocs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            titre TEXT NOT NULL,
            description TEXT,
            objet_propose TEXT,
            objet_recherche TEXT,
            images TEXT NOT NULL DEFAULT '[]',
            date_publication TEXT NOT NULL,
            quartier_id INTEGER NOT NULL REFERENCES quartiers(id) ON DELETE CASCADE,
            utilisateur_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            statut TEXT NOT NULL DEFAULT 'active',
            type_annonce TEXT NOT NULL DEFAULT 'offre',
            prix REAL,
            budget_max REAL,
            etat_produit TEXT,
            categorie TEXT,
            urgence TEXT,
            mode_echange TEXT NOT NULL DEFAULT 'vente',
            criteres_specifiques TEXT,
            disponibilite TEXT,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS services (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            titre TEXT NOT NULL,
            description TEXT NOT NULL,
            type_service TEXT NOT NULL,
            categorie TEXT NOT NULL,
            date_debut TEXT,
            date_fin TEXT,
            horaires TEXT,
            recurrence TEXT NOT NULL DEFAULT 'ponctuel',
            prix REAL,
            budget_max REAL,
            lieu TEXT,
            competences_requises TEXT,
            materiel_fourni INTEGER NOT NULL DEFAULT 0,
            experience_requise TEXT,
            age_min INTEGER,
            age_max INTEGER,
            nombre_personnes INTEGER NOT NULL DEFAULT 1,
            urgence TEXT NOT NULL DEFAULT 'normale',
            contact_info TEXT,
            date_publication TEXT NOT NULL,
            quartier_id INTEGER NOT NULL REFERENCES quartiers(id) ON DELETE CASCADE,
            utilisateur_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            statut TEXT NOT NULL DEFAULT 'active',
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS editions (
            uuid TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS articles (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            author_id INTEGER NOT NULL,
            author_name TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'brouillon',
            quartier_id INTEGER NOT NULL,
            quartier_name TEXT NOT NULL,
            category TEXT NOT NULL,
            image_url TEXT,
            images TEXT NOT NULL DEFAULT '[]',
            edition_id TEXT REFERENCES editions(uuid) ON DELETE SET NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_rooms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            quartier_id INTEGER NOT NULL REFERENCES quartiers(id) ON DELETE CASCADE,
            room_type TEXT NOT NULL DEFAULT 'group',
            created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_room_members (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_room_id INTEGER NOT NULL REFERENCES chat_rooms(id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            role TEXT NOT NULL DEFAULT 'member',
            joined_at TEXT NOT NULL,
            last_read_at TEXT NOT NULL,
            last_read_message_id INTEGER NOT NULL DEFAULT 0,
            is_muted INTEGER NOT NULL DEFAULT 0,
            UNIQUE (chat_room_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_room_id INTEGER NOT NULL REFERENCES chat_rooms(id) ON DELETE CASCADE,
            sender_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            content TEXT NOT NULL,
            message_type TEXT NOT NULL DEFAULT 'text',
            reply_to_id INTEGER REFERENCES messages(id) ON DELETE SET NULL,
            is_edited INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_users_quartier ON users(quartier_id);
        CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user ON refresh_tokens(user_id);
        CREATE INDEX IF NOT EXISTS idx_user_quartiers_user ON user_quartiers(utilisateur_id);
        CREATE INDEX IF NOT EXISTS idx_evenements_date ON evenements(date_evenement);
        CREATE INDEX IF NOT EXISTS idx_evenements_quartier ON evenements(quartier_id);
        CREATE INDEX IF NOT EXISTS idx_trocs_quartier ON trocs(quartier_id, statut);
        CREATE INDEX IF NOT EXISTS idx_services_quartier ON services(quartier_id, statut);
        CREATE INDEX IF NOT EXISTS idx_articles_status ON articles(status);
        CREATE INDEX IF NOT EXISTS idx_articles_author ON articles(author_id);
        CREATE INDEX IF NOT EXISTS idx_chat_room_members_user ON chat_room_members(user_id);
        CREATE INDEX IF NOT EXISTS idx_messages_room ON messages(chat_room_id, created_at);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
