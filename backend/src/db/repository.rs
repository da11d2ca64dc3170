//! Database repository for CRUD operations.
//!
//! The `Repository` methods are split by domain across the sibling modules;
//! this file holds the shared handle and row conversion helpers.

use sqlx::SqlitePool;

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pub(super) pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// Helper functions shared by the row converters

pub(super) fn parse_json_array(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

pub(super) fn json_array(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

pub(super) fn flag(value: i64) -> bool {
    value != 0
}

/// Trim text input, mapping blank strings to `None`.
pub(super) fn clean(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_array_helpers() {
        let images = vec!["/a.png".to_string(), "/b.png".to_string()];
        assert_eq!(parse_json_array(&json_array(&images)), images);
        assert!(parse_json_array("not json").is_empty());
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean(Some(&"  x ".to_string())), Some("x".to_string()));
        assert_eq!(clean(Some(&"   ".to_string())), None);
        assert_eq!(clean(None), None);
    }
}
