//! Configuration module for the NextDoorBuddy backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::AppError;

const DEV_ACCESS_SECRET: &str = "nextdoorbuddy_dev_access_secret";
const DEV_REFRESH_SECRET: &str = "nextdoorbuddy_dev_refresh_secret";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy search index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Secret used to sign access tokens
    pub jwt_access_secret: String,
    /// Secret used to sign refresh tokens
    pub jwt_refresh_secret: String,
    /// Lifetime of an access token
    pub access_token_ttl: Duration,
    /// Lifetime of a refresh token
    pub refresh_token_ttl: Duration,
    /// Accounts registered with this email become administrators
    pub bootstrap_admin_email: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let db_path = env::var("NDB_DB_PATH")
            .unwrap_or_else(|_| "./data/nextdoorbuddy.sqlite".to_string())
            .into();

        let index_path = env::var("NDB_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let bind_addr_raw =
            env::var("NDB_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
        let bind_addr = bind_addr_raw.parse().map_err(|e| {
            AppError::Config(format!("Invalid NDB_BIND_ADDR {:?}: {}", bind_addr_raw, e))
        })?;

        let log_level = Self::log_level_from_env();

        let jwt_access_secret = secret_from_env("NDB_JWT_ACCESS_SECRET", DEV_ACCESS_SECRET);
        let jwt_refresh_secret = secret_from_env("NDB_JWT_REFRESH_SECRET", DEV_REFRESH_SECRET);

        let access_token_ttl = parse_ttl(
            &env::var("NDB_JWT_ACCESS_EXPIRES_IN").unwrap_or_else(|_| "1h".to_string()),
        );
        let refresh_token_ttl = parse_ttl(
            &env::var("NDB_JWT_REFRESH_EXPIRES_IN").unwrap_or_else(|_| "7d".to_string()),
        );

        let bootstrap_admin_email = env::var("NDB_BOOTSTRAP_ADMIN_EMAIL")
            .ok()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());

        Ok(Self {
            db_path,
            index_path,
            bind_addr,
            log_level,
            jwt_access_secret,
            jwt_refresh_secret,
            access_token_ttl,
            refresh_token_ttl,
            bootstrap_admin_email,
        })
    }

    /// `NDB_LOG_LEVEL`, readable before the rest of the configuration so that
    /// logging is up while `from_env` runs.
    pub fn log_level_from_env() -> String {
        dotenvy::dotenv().ok();
        env::var("NDB_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    }

    /// Configuration for tests and embedded use, rooted in `data_dir`.
    pub fn for_data_dir(data_dir: &std::path::Path) -> Self {
        Self {
            db_path: data_dir.join("nextdoorbuddy.sqlite"),
            index_path: data_dir.join("index"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_level: "warn".to_string(),
            jwt_access_secret: DEV_ACCESS_SECRET.to_string(),
            jwt_refresh_secret: DEV_REFRESH_SECRET.to_string(),
            access_token_ttl: Duration::from_secs(3600),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 3600),
            bootstrap_admin_email: None,
        }
    }
}

/// A signing secret, or the development one with a warning.
fn secret_from_env(var: &str, dev_secret: &str) -> String {
    env::var(var).unwrap_or_else(|_| {
        tracing::warn!("{} not set, using development secret", var);
        dev_secret.to_string()
    })
}

/// Parse a token lifetime such as `15m`, `1h` or `7d`.
///
/// A bare number is read as seconds. Unknown units fall back to seven days.
pub fn parse_ttl(raw: &str) -> Duration {
    const FALLBACK: Duration = Duration::from_secs(7 * 24 * 3600);

    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Duration::from_secs(secs);
    }

    let Some(unit) = raw.chars().last() else {
        return FALLBACK;
    };
    let Ok(value) = raw[..raw.len() - unit.len_utf8()].parse::<u64>() else {
        return FALLBACK;
    };

    let unit_secs: u64 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 24 * 3600,
        _ => return FALLBACK,
    };
    match value.checked_mul(unit_secs) {
        Some(secs) => Duration::from_secs(secs),
        None => {
            tracing::warn!("Token lifetime {:?} is out of range, using default", raw);
            FALLBACK
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        // Clear any existing env vars
        env::remove_var("NDB_DB_PATH");
        env::remove_var("NDB_INDEX_PATH");
        env::remove_var("NDB_BIND_ADDR");
        env::remove_var("NDB_LOG_LEVEL");
        env::remove_var("NDB_JWT_ACCESS_EXPIRES_IN");
        env::remove_var("NDB_JWT_REFRESH_EXPIRES_IN");
        env::remove_var("NDB_BOOTSTRAP_ADMIN_EMAIL");

        let config = Config::from_env().unwrap();

        assert_eq!(config.db_path, PathBuf::from("./data/nextdoorbuddy.sqlite"));
        assert_eq!(config.index_path, PathBuf::from("./data/index"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:3000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.access_token_ttl, Duration::from_secs(3600));
        assert_eq!(config.refresh_token_ttl, Duration::from_secs(604_800));
        assert!(config.bootstrap_admin_email.is_none());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[test]
    fn test_missing_secret_warns() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        env::set_var("NDB_TEST_PRESENT_SECRET", "s3cr3t");
        let (missing, present) = tracing::subscriber::with_default(subscriber, || {
            (
                secret_from_env("NDB_TEST_MISSING_SECRET", DEV_ACCESS_SECRET),
                secret_from_env("NDB_TEST_PRESENT_SECRET", DEV_ACCESS_SECRET),
            )
        });

        assert_eq!(missing, DEV_ACCESS_SECRET);
        assert_eq!(present, "s3cr3t");
        let text = logs.text();
        assert!(text.contains("WARN"));
        assert!(text.contains("NDB_TEST_MISSING_SECRET not set, using development secret"));
        assert!(!text.contains("NDB_TEST_PRESENT_SECRET"));
    }

    #[test]
    fn test_parse_ttl_units() {
        assert_eq!(parse_ttl("30s"), Duration::from_secs(30));
        assert_eq!(parse_ttl("15m"), Duration::from_secs(900));
        assert_eq!(parse_ttl("2h"), Duration::from_secs(7200));
        assert_eq!(parse_ttl("7d"), Duration::from_secs(604_800));
        assert_eq!(parse_ttl("120"), Duration::from_secs(120));
    }

    #[test]
    fn test_parse_ttl_fallback() {
        assert_eq!(parse_ttl("3w"), Duration::from_secs(604_800));
        assert_eq!(parse_ttl(""), Duration::from_secs(604_800));
        assert_eq!(parse_ttl("abc"), Duration::from_secs(604_800));
        assert_eq!(parse_ttl("999999999999999999d"), Duration::from_secs(604_800));
        assert_eq!(parse_ttl("18446744073709551615m"), Duration::from_secs(604_800));
    }
}
