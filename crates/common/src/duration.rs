//! Parsing utilities for human-friendly durations and absolute timestamps.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Parse a human-friendly duration string.
///
/// Supported suffixes: `ms`, `s`, `m`, `h`, `d`.
/// Examples: `"250ms"`, `"30s"`, `"5m"`, `"2h"`, `"1d"`.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_duration(input, "empty duration string"));
    }

    let (num_str, suffix) = match trimmed.find(|c: char| c.is_alphabetic()) {
        Some(i) => (&trimmed[..i], &trimmed[i..]),
        None => {
            return Err(Error::invalid_duration(
                input,
                "missing unit suffix (ms/s/m/h/d)",
            ));
        },
    };

    let value: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| Error::invalid_duration(input, format!("invalid number '{num_str}'")))?;

    if value == 0 {
        return Err(Error::invalid_duration(input, "duration must be > 0"));
    }

    let duration = match suffix {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3_600),
        "d" => Duration::from_secs(value * 86_400),
        _ => {
            return Err(Error::invalid_duration(
                input,
                format!("unknown suffix '{suffix}' (expected ms/s/m/h/d)"),
            ));
        },
    };

    Ok(duration)
}

/// Render a duration in the largest unit that divides it evenly.
///
/// The output is accepted by [`parse_duration`] for any non-zero input.
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms == 0 {
        return "0ms".into();
    }
    if ms % 1_000 != 0 {
        return format!("{ms}ms");
    }
    let secs = duration.as_secs();
    match secs {
        s if s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s % 3_600 == 0 => format!("{}h", s / 3_600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{s}s"),
    }
}

/// Parse an ISO 8601 timestamp into a UTC instant.
///
/// Accepts formats like `"2026-01-12T18:00:00Z"` or with timezone offset.
pub fn parse_instant(input: &str) -> Result<DateTime<Utc>> {
    input
        .trim()
        .parse::<DateTime<Utc>>()
        .map_err(|source| Error::InvalidTimestamp {
            input: input.to_string(),
            source,
        })
}
