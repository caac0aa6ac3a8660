//! Duration literal grammar shared by route configuration and runtime signals.
//!
//! Accepted forms: `<int>ms`, `<int>µs` / `<int>us`, `<int>m`, `<int>s` and a bare
//! `<int>` which is read as seconds. An empty literal is a zero duration.
use std::time::Duration;

/// Errors produced while parsing a duration literal.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DurationError {
    #[error("invalid duration [{literal}]: {reason}")]
    Invalid { literal: String, reason: String },

    #[error("invalid duration [{0}]: value is negative")]
    Negative(String),
}

/// Parse a duration literal such as `500ms`, `2s`, `1m` or `30`.
pub fn parse_duration(literal: &str) -> Result<Duration, DurationError> {
    let s = literal.trim();
    if s.is_empty() {
        return Ok(Duration::ZERO);
    }

    let (digits, scale_micros) = if let Some(v) = s.strip_suffix("ms") {
        (v, 1_000)
    } else if let Some(v) = s.strip_suffix("µs").or_else(|| s.strip_suffix("us")) {
        (v, 1)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60_000_000)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1_000_000)
    } else {
        (s, 1_000_000)
    };

    let value: i64 = digits.trim().parse().map_err(|e: std::num::ParseIntError| {
        DurationError::Invalid {
            literal: literal.to_string(),
            reason: e.to_string(),
        }
    })?;
    if value < 0 {
        return Err(DurationError::Negative(literal.to_string()));
    }
    Ok(Duration::from_micros((value as u64).saturating_mul(scale_micros)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration("1500ms").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("250us").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_duration("250µs").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1000").unwrap(), Duration::from_secs(1000));
    }

    #[test]
    fn test_parse_empty_is_zero() {
        assert_eq!(parse_duration("").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("  ").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_duration("12as"),
            Err(DurationError::Invalid { .. })
        ));
        assert!(parse_duration("1.5s").is_err());
        assert!(parse_duration("ms").is_err());
    }

    #[test]
    fn test_parse_rejects_negative() {
        assert_eq!(
            parse_duration("-5s"),
            Err(DurationError::Negative("-5s".to_string()))
        );
    }
}
