//! Data models for the NextDoorBuddy platform.
//!
//! Field names follow the JSON contract of the single-page frontend (snake_case,
//! French domain vocabulary).

mod evenement;
mod journal;
mod messaging;
mod quartier;
mod service;
mod troc;
mod user;

pub use evenement::*;
pub use journal::*;
pub use messaging::*;
pub use quartier::*;
pub use service::*;
pub use troc::*;
pub use user::*;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

use crate::errors::AppError;

/// Current time as an RFC 3339 UTC timestamp with second precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Normalize a client supplied date or date-time to the stored timestamp form.
///
/// Accepts RFC 3339, `datetime-local` style values and plain dates.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true));
        }
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(
        date.and_hms_opt(0, 0, 0)?
            .and_utc()
            .to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

/// Normalize an optional timestamp field, rejecting values that do not parse.
pub fn timestamp_field(name: &str, raw: Option<&str>) -> Result<Option<String>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(value) => normalize_timestamp(value)
            .map(Some)
            .ok_or_else(|| AppError::Validation(format!("Invalid date for {}: {}", name, value))),
    }
}

/// Trimmed, non-empty value of an optional text field.
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_timestamp_formats() {
        assert_eq!(
            normalize_timestamp("2030-05-01T10:30:00+02:00").as_deref(),
            Some("2030-05-01T08:30:00Z")
        );
        assert_eq!(
            normalize_timestamp("2030-05-01T10:30").as_deref(),
            Some("2030-05-01T10:30:00Z")
        );
        assert_eq!(
            normalize_timestamp("2030-05-01").as_deref(),
            Some("2030-05-01T00:00:00Z")
        );
        assert!(normalize_timestamp("next tuesday").is_none());
    }

    #[test]
    fn test_timestamp_field() {
        assert_eq!(timestamp_field("date", None).unwrap(), None);
        assert_eq!(timestamp_field("date", Some("  ")).unwrap(), None);
        assert!(timestamp_field("date", Some("bogus")).is_err());
    }
}
