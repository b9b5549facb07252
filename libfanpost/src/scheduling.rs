//! Schedule time parsing
//!
//! Turns the human-readable `when` argument of the queue tools into a Unix
//! timestamp.

use crate::{FanpostError, Result};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;

const MIN_RANDOM_SECONDS: i64 = 30;
const MAX_RANDOM_SECONDS: i64 = 30 * 24 * 3600;

/// Parse a schedule string relative to `now`
///
/// Accepted forms, tried in order:
/// - `now`
/// - RFC 3339 timestamps: `2025-11-20T15:00:00Z`
/// - Relative durations: `2h`, `+30m`, `in 1 day`
/// - Random offsets: `random:10m-20m`
/// - Natural language: `tomorrow`, `next monday 10am`
pub fn parse_schedule(input: &str, now: DateTime<Utc>) -> Result<i64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(FanpostError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if input.eq_ignore_ascii_case("now") {
        return Ok(now.timestamp());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc).timestamp());
    }

    if let Some(range) = input.strip_prefix("random:") {
        return parse_random_offset(range).map(|offset| (now + offset).timestamp());
    }

    let relative = input
        .strip_prefix('+')
        .or_else(|| input.strip_prefix("in "))
        .unwrap_or(input);
    if let Ok(duration) = parse_duration(relative) {
        return Ok((now + duration).timestamp());
    }

    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us)
        .map(|dt| dt.timestamp())
        .map_err(|_| {
            FanpostError::InvalidInput(format!("Could not parse schedule string: {}", input))
        })
}

fn parse_duration(input: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(input.trim())
        .map_err(|e| FanpostError::InvalidInput(format!("Could not parse duration: {}", e)))?;
    Duration::try_seconds(std_duration.as_secs() as i64)
        .ok_or_else(|| FanpostError::InvalidInput("Duration out of range".to_string()))
}

/// Parse `MIN-MAX` and pick a uniformly random offset inside it
fn parse_random_offset(range: &str) -> Result<Duration> {
    let (min_str, max_str) = range.split_once('-').ok_or_else(|| {
        FanpostError::InvalidInput("Random format must be random:MIN-MAX".to_string())
    })?;
    let min_secs = parse_duration(min_str)?.num_seconds();
    let max_secs = parse_duration(max_str)?.num_seconds();

    if min_secs < MIN_RANDOM_SECONDS {
        return Err(FanpostError::InvalidInput(format!(
            "Minimum random interval must be at least {} seconds",
            MIN_RANDOM_SECONDS
        )));
    }
    if max_secs > MAX_RANDOM_SECONDS {
        return Err(FanpostError::InvalidInput(format!(
            "Maximum random interval must be less than {} days",
            MAX_RANDOM_SECONDS / (24 * 3600)
        )));
    }
    if min_secs >= max_secs {
        return Err(FanpostError::InvalidInput(
            "Minimum must be less than maximum".to_string(),
        ));
    }

    let secs = rand::thread_rng().gen_range(min_secs..=max_secs);
    Ok(Duration::seconds(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_now() {
        assert_eq!(parse_schedule("now", fixed_now()).unwrap(), fixed_now().timestamp());
    }

    #[test]
    fn test_parse_rfc3339() {
        let ts = parse_schedule("2025-06-02T08:30:00Z", fixed_now()).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 6, 2, 8, 30, 0).unwrap().timestamp());
    }

    #[test]
    fn test_parse_relative_durations() {
        let now = fixed_now();
        assert_eq!(parse_schedule("2h", now).unwrap(), now.timestamp() + 7200);
        assert_eq!(parse_schedule("+30m", now).unwrap(), now.timestamp() + 1800);
        assert_eq!(parse_schedule("in 1day", now).unwrap(), now.timestamp() + 86400);
    }

    #[test]
    fn test_parse_natural_language() {
        let ts = parse_schedule("tomorrow", fixed_now()).unwrap();
        let diff = ts - fixed_now().timestamp();
        assert!(diff > 0 && diff <= 2 * 86400, "unexpected offset {}", diff);
    }

    #[test]
    fn test_parse_random_within_bounds() {
        let now = fixed_now();
        for _ in 0..20 {
            let ts = parse_schedule("random:10m-20m", now).unwrap();
            let diff = ts - now.timestamp();
            assert!((600..=1200).contains(&diff), "offset {} out of range", diff);
        }
    }

    #[test]
    fn test_parse_random_rejects_bad_ranges() {
        assert!(parse_schedule("random:2h-1h", fixed_now()).is_err());
        assert!(parse_schedule("random:1s-10s", fixed_now()).is_err());
        assert!(parse_schedule("random:1d-40d", fixed_now()).is_err());
        assert!(parse_schedule("random:soon", fixed_now()).is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_schedule("", fixed_now()).is_err());
        assert!(parse_schedule("whenever you like", fixed_now()).is_err());
    }
}
