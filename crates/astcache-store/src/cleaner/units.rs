//! Human-friendly duration and size strings.

use std::sync::OnceLock;

use regex_lite::Regex;
use thiserror::Error;

/// Errors from unit parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("invalid duration '{0}' (expected e.g. 30m, 2h, 7d)")]
    InvalidDuration(String),

    #[error("invalid size '{0}' (expected e.g. 500MB, 1GB)")]
    InvalidSize(String),
}

fn quantity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*([A-Za-z]*)\s*$").expect("static pattern")
    })
}

fn split_quantity(s: &str) -> Option<(f64, String)> {
    let caps = quantity_regex().captures(s)?;
    let value = caps.get(1)?.as_str().parse::<f64>().ok()?;
    let unit = caps.get(2).map_or("", |m| m.as_str()).to_ascii_lowercase();
    Some((value, unit))
}

/// Parse `"<n><unit>"` into milliseconds.
///
/// Units: `ms`, `s`, `m`, `h`, `d`, `w` (case-insensitive). A bare number is
/// milliseconds.
pub fn parse_cache_max_age(s: &str) -> Result<u64, UnitError> {
    let invalid = || UnitError::InvalidDuration(s.to_string());
    let (value, unit) = split_quantity(s).ok_or_else(invalid)?;

    let factor: f64 = match unit.as_str() {
        "" | "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        "d" => 86_400_000.0,
        "w" => 604_800_000.0,
        _ => return Err(invalid()),
    };

    Ok((value * factor).round() as u64)
}

/// Parse `"<n><unit>"` into bytes. Binary units: KB = 1024.
pub fn parse_cache_max_size(s: &str) -> Result<u64, UnitError> {
    let invalid = || UnitError::InvalidSize(s.to_string());
    let (value, unit) = split_quantity(s).ok_or_else(invalid)?;

    let factor: f64 = match unit.as_str() {
        "" | "b" => 1.0,
        "k" | "kb" => 1024.0,
        "m" | "mb" => 1024.0 * 1024.0,
        "g" | "gb" => 1024.0 * 1024.0 * 1024.0,
        "t" | "tb" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return Err(invalid()),
    };

    Ok((value * factor).round() as u64)
}

/// Render a byte count, e.g. `0 B`, `1.0 KB`, `1.5 GB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_max_age() {
        assert_eq!(parse_cache_max_age("2h").unwrap(), 7_200_000);
        assert_eq!(parse_cache_max_age("30m").unwrap(), 1_800_000);
        assert_eq!(parse_cache_max_age("7d").unwrap(), 604_800_000);
        assert_eq!(parse_cache_max_age("1w").unwrap(), 604_800_000);
        assert_eq!(parse_cache_max_age("45s").unwrap(), 45_000);
        assert_eq!(parse_cache_max_age("250ms").unwrap(), 250);
        assert_eq!(parse_cache_max_age("1500").unwrap(), 1500);
        assert_eq!(parse_cache_max_age("1.5h").unwrap(), 5_400_000);
        assert_eq!(parse_cache_max_age(" 2H ").unwrap(), 7_200_000);
    }

    #[test]
    fn test_parse_max_age_rejects() {
        for bad in ["", "h", "2 fortnights", "-1d", "abc", "2h30m"] {
            assert!(
                matches!(parse_cache_max_age(bad), Err(UnitError::InvalidDuration(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_max_size() {
        assert_eq!(parse_cache_max_size("1GB").unwrap(), 1_073_741_824);
        assert_eq!(parse_cache_max_size("100MB").unwrap(), 104_857_600);
        assert_eq!(parse_cache_max_size("1KB").unwrap(), 1024);
        assert_eq!(parse_cache_max_size("2k").unwrap(), 2048);
        assert_eq!(parse_cache_max_size("512").unwrap(), 512);
        assert_eq!(parse_cache_max_size("512B").unwrap(), 512);
        assert_eq!(parse_cache_max_size("0.5GB").unwrap(), 536_870_912);
        assert_eq!(parse_cache_max_size("1tb").unwrap(), 1_099_511_627_776);
    }

    #[test]
    fn test_parse_max_size_rejects() {
        for bad in ["", "GB", "1PB", "-5MB", "ten MB"] {
            assert!(
                matches!(parse_cache_max_size(bad), Err(UnitError::InvalidSize(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1_048_576), "1.0 MB");
        assert_eq!(format_bytes(1_073_741_824), "1.0 GB");
        assert_eq!(format_bytes(1_099_511_627_776 * 2048), "2048.0 TB");
    }
}
