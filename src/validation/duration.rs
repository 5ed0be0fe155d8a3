//! # Duration Validation
//!
//! Parses relative durations such as `end_date_relative = "240h"`.

use crate::error::{ProviderError, ProviderResult};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Whole string must be a sequence of `<number><unit>` segments
static WHOLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+(?:ms|[smhd]))+$")
        .expect("Failed to compile WHOLE regex - this should never happen")
});

static SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<number>\d+)(?P<unit>ms|[smhd])")
        .expect("Failed to compile SEGMENT regex - this should never happen")
});

/// Parse a duration made of one or more `<number><unit>` segments
///
/// Supported units: `ms`, `s`, `m`, `h`, `d`. Segments may be combined, e.g.
/// `"1h30m"` or `"90d"`. The total must be greater than zero.
///
/// # Errors
///
/// Returns [`ProviderError::Validation`] naming `attr` when the string is empty,
/// malformed, overflows, or adds up to zero.
pub fn parse_relative_duration(attr: &str, duration_str: &str) -> ProviderResult<Duration> {
    let duration_trimmed = duration_str.trim();

    if duration_trimmed.is_empty() {
        return Err(ProviderError::validation(attr, "duration cannot be empty"));
    }

    let lower = duration_trimmed.to_lowercase();
    if !WHOLE.is_match(&lower) {
        return Err(ProviderError::validation(
            attr,
            format!(
                "invalid duration '{duration_trimmed}', expected <number><unit> segments (e.g. '240h', '1h30m', '90d')"
            ),
        ));
    }

    let mut total_ms: u64 = 0;
    for captures in SEGMENT.captures_iter(&lower) {
        let (Some(number), Some(unit)) = (captures.name("number"), captures.name("unit")) else {
            continue;
        };

        let number: u64 = number.as_str().parse().map_err(|e| {
            ProviderError::validation(
                attr,
                format!("invalid duration number in '{duration_trimmed}': {e}"),
            )
        })?;

        let unit_ms: u64 = match unit.as_str() {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            other => {
                return Err(ProviderError::validation(
                    attr,
                    format!("invalid unit '{other}' in duration '{duration_trimmed}'"),
                ));
            }
        };

        total_ms = number
            .checked_mul(unit_ms)
            .and_then(|segment| total_ms.checked_add(segment))
            .ok_or_else(|| {
                ProviderError::validation(
                    attr,
                    format!("duration '{duration_trimmed}' is too large"),
                )
            })?;
    }

    if total_ms == 0 {
        return Err(ProviderError::validation(
            attr,
            format!("duration must be greater than 0, got '{duration_trimmed}'"),
        ));
    }

    Ok(Duration::from_millis(total_ms))
}
