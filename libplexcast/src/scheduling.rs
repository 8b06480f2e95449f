//! Parsing of human-readable schedule times
//!
//! Used by the CLI to turn `--at` arguments into a draft's `scheduled_at`.

use chrono::{DateTime, Duration, Utc};

use crate::error::{PlexcastError, Result};

/// Parse a schedule string relative to `now`
///
/// Supports:
/// - Relative durations: "1h", "30m", "2d", "1 hour"
/// - Natural language: "tomorrow", "next monday 10am", "in 3 hours"
/// - Absolute times: "2025-11-20 15:00"
///
/// # Errors
///
/// Returns a validation error for empty or unparsable input and for times
/// that are not in the future.
pub fn parse_schedule(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(PlexcastError::Validation(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    let scheduled = match parse_duration(input) {
        Some(duration) => now + duration,
        None => parse_natural_language(input, now)?,
    };

    if scheduled <= now {
        return Err(PlexcastError::Validation(format!(
            "Schedule '{}' resolves to {}, which is not in the future",
            input, scheduled
        )));
    }

    Ok(scheduled)
}

fn parse_duration(input: &str) -> Option<Duration> {
    let std_duration = humantime::parse_duration(input).ok()?;
    Duration::try_seconds(std_duration.as_secs() as i64)
}

fn parse_natural_language(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us).map_err(|e| {
        PlexcastError::Validation(format!("Could not parse schedule '{}': {}", input, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_duration_minutes() {
        let scheduled = parse_schedule("30m", now()).unwrap();
        assert_eq!(scheduled - now(), Duration::minutes(30));
    }

    #[test]
    fn test_parse_duration_with_space() {
        let scheduled = parse_schedule("1 hour", now()).unwrap();
        assert_eq!(scheduled - now(), Duration::hours(1));
    }

    #[test]
    fn test_parse_duration_days() {
        let scheduled = parse_schedule("2d", now()).unwrap();
        assert_eq!(scheduled - now(), Duration::days(2));
    }

    #[test]
    fn test_parse_tomorrow() {
        let scheduled = parse_schedule("tomorrow", now()).unwrap();
        let diff = (scheduled - now()).num_hours();
        assert!((10..=36).contains(&diff), "Expected about a day, got {}h", diff);
    }

    #[test]
    fn test_parse_absolute_time() {
        let scheduled = parse_schedule("2025-03-11 15:00", now()).unwrap();
        assert!(scheduled > now());
        assert!(scheduled - now() < Duration::days(2));
    }

    #[test]
    fn test_parse_empty_string() {
        assert!(matches!(
            parse_schedule("   ", now()),
            Err(PlexcastError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_invalid_format() {
        assert!(parse_schedule("not a time", now()).is_err());
    }

    #[test]
    fn test_past_time_rejected() {
        let result = parse_schedule("2020-01-01 09:00", now());
        match result {
            Err(PlexcastError::Validation(msg)) => assert!(msg.contains("not in the future")),
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_duration_rejected() {
        assert!(parse_schedule("0s", now()).is_err());
    }
}
