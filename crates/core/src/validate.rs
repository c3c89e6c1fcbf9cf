//! Request validation, run before anything is written.

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::ValidationError;

/// Accept only 13-digit epoch-millisecond timestamps.
pub fn validate_timestamp_millis(timestamp: i64) -> Result<(), ValidationError> {
    let digits = timestamp.checked_abs().map(|t| t.to_string().len());
    if timestamp <= 0 || digits != Some(13) {
        return Err(ValidationError::InvalidTimestamp { timestamp });
    }
    to_datetime(timestamp).map(|_| ())
}

pub fn validate_range(start: Option<i64>, end: Option<i64>) -> Result<(), ValidationError> {
    match (start, end) {
        (Some(start), Some(end)) if start > end => {
            Err(ValidationError::InvalidRange { start, end })
        }
        _ => Ok(()),
    }
}

pub fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn to_datetime(timestamp: i64) -> Result<OffsetDateTime, ValidationError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp) * 1_000_000)
        .map_err(|_| ValidationError::InvalidTimestamp { timestamp })
}

/// Render an epoch-millisecond timestamp as RFC 3339, for display.
pub fn format_timestamp(timestamp: i64) -> String {
    to_datetime(timestamp)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| timestamp.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millisecond_timestamps_accepted() {
        assert!(validate_timestamp_millis(1_700_000_000_000).is_ok());
    }

    #[test]
    fn second_and_microsecond_timestamps_rejected() {
        assert_eq!(
            validate_timestamp_millis(1_700_000_000),
            Err(ValidationError::InvalidTimestamp {
                timestamp: 1_700_000_000
            })
        );
        assert!(validate_timestamp_millis(1_700_000_000_000_000).is_err());
        assert!(validate_timestamp_millis(-1_700_000_000_000).is_err());
    }

    #[test]
    fn inverted_range_rejected() {
        assert!(validate_range(Some(10), Some(5)).is_err());
        assert!(validate_range(None, Some(5)).is_ok());
        assert!(validate_range(Some(5), Some(5)).is_ok());
    }

    #[test]
    fn blank_required_field_rejected() {
        assert!(require("fqn", "  ").is_err());
        assert!(require("fqn", "db.t").is_ok());
    }

    #[test]
    fn formats_rfc3339() {
        assert_eq!(format_timestamp(1_700_000_000_000), "2023-11-14T22:13:20Z");
    }
}
