//! Duration values such as `500ms`, `30s`, `10m` or `1h`.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

use crate::{ConfigError, ConfigResult};

static DURATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*(ms|s|m|h)\s*$").expect("valid regex"));

/// Parse a duration with a unit suffix. `field` names the setting in errors.
pub fn parse_duration(field: &str, input: &str) -> ConfigResult<Duration> {
    let invalid = |message: String| ConfigError::InvalidValue {
        field: field.to_string(),
        message,
    };

    let caps = DURATION_PATTERN
        .captures(input)
        .ok_or_else(|| invalid(format!("expected a duration like \"30s\", got \"{}\"", input)))?;

    let amount: u64 = caps[1]
        .parse()
        .map_err(|_| invalid(format!("duration out of range: {}", input)))?;

    let duration = match &caps[2] {
        "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.saturating_mul(60)),
        "h" => Duration::from_secs(amount.saturating_mul(3600)),
        unit => return Err(invalid(format!("unknown unit: {}", unit))),
    };
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(
            parse_duration("t", "500ms").unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(parse_duration("t", "30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("t", "10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("t", " 1h ").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_rejects_missing_unit() {
        let err = parse_duration("poll-interval", "30").unwrap_err();
        match err {
            ConfigError::InvalidValue { field, .. } => assert_eq!(field, "poll-interval"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_duration("t", "soon").is_err());
        assert!(parse_duration("t", "-5s").is_err());
        assert!(parse_duration("t", "1.5s").is_err());
    }
}
