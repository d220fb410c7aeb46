use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ConfigError;

static DURATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\s*(s|m|h)$").unwrap());
static SIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?i)(\d+)\s*(b|kb|mb|gb)$").unwrap());
static ENV_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Parse a duration string (`"30s"`, `"1m"`, `"1h"`) into milliseconds.
pub fn parse_duration_ms(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    let caps = DURATION_RE
        .captures(value.trim())
        .ok_or_else(|| ConfigError::InvalidDuration {
            field,
            value: value.to_string(),
        })?;
    let n: u64 = caps[1].parse().map_err(|_| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })?;
    let ms = match &caps[2] {
        "s" => n.saturating_mul(1_000),
        "m" => n.saturating_mul(60_000),
        "h" => n.saturating_mul(3_600_000),
        _ => unreachable!(),
    };
    Ok(ms)
}

/// Parse a size string (`"10mb"`, `"512kb"`, case-insensitive) into bytes.
pub fn parse_size_bytes(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    let caps = SIZE_RE
        .captures(value.trim())
        .ok_or_else(|| ConfigError::InvalidSize {
            field,
            value: value.to_string(),
        })?;
    let n: u64 = caps[1].parse().map_err(|_| ConfigError::InvalidSize {
        field,
        value: value.to_string(),
    })?;
    let bytes = match caps[2].to_ascii_lowercase().as_str() {
        "b" => n,
        "kb" => n.saturating_mul(1 << 10),
        "mb" => n.saturating_mul(1 << 20),
        "gb" => n.saturating_mul(1 << 30),
        _ => unreachable!(),
    };
    Ok(bytes)
}

/// Expand `${VAR}` references using `lookup`. Unset variables expand to the
/// empty string.
pub fn expand_env<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_REF_RE
        .replace_all(value, |caps: &regex::Captures<'_>| {
            lookup(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration_ms("timeout", "30s").unwrap(), 30_000);
        assert_eq!(parse_duration_ms("ttl", "1m").unwrap(), 60_000);
        assert_eq!(parse_duration_ms("ttl", "2h").unwrap(), 7_200_000);
        assert!(parse_duration_ms("timeout", "30").is_err());
        assert!(parse_duration_ms("timeout", "ten seconds").is_err());
        assert!(parse_duration_ms("timeout", "-5s").is_err());
    }

    #[test]
    fn sizes() {
        assert_eq!(parse_size_bytes("maxBodySize", "128b").unwrap(), 128);
        assert_eq!(parse_size_bytes("maxBodySize", "10kb").unwrap(), 10_240);
        assert_eq!(
            parse_size_bytes("maxBodySize", "10mb").unwrap(),
            10 * 1024 * 1024
        );
        assert_eq!(parse_size_bytes("maxBodySize", "1GB").unwrap(), 1 << 30);
        assert!(parse_size_bytes("maxBodySize", "10 megs").is_err());
    }

    #[test]
    fn env_expansion() {
        let lookup = |name: &str| match name {
            "HOME" => Some("/home/app".to_string()),
            _ => None,
        };
        assert_eq!(expand_env("${HOME}/data", lookup), "/home/app/data");
        assert_eq!(expand_env("${MISSING}", lookup), "");
        assert_eq!(expand_env("no refs", lookup), "no refs");
        assert_eq!(expand_env("$HOME", lookup), "$HOME");
    }
}
