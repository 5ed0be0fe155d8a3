//! Validity window shared by certificate and password credentials

use crate::error::{ProviderError, ProviderResult};
use crate::validation::{parse_relative_duration, values};
use chrono::{DateTime, SecondsFormat, Utc};

/// Resolved `startDateTime` / `endDateTime`; `None` lets the directory pick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Check the date attributes without resolving them against the clock
///
/// # Errors
///
/// [`ProviderError::Validation`] when a date is malformed or both end forms are set
pub fn validate(
    start_date: Option<&str>,
    end_date: Option<&str>,
    end_date_relative: Option<&str>,
) -> ProviderResult<()> {
    if end_date.is_some() && end_date_relative.is_some() {
        return Err(ProviderError::validation(
            "end_date",
            "only one of end_date and end_date_relative can be specified",
        ));
    }
    if let Some(start) = start_date {
        values::rfc3339("start_date", start)?;
    }
    if let Some(end) = end_date {
        values::rfc3339("end_date", end)?;
    }
    if let Some(relative) = end_date_relative {
        parse_relative_duration("end_date_relative", relative)?;
    }
    Ok(())
}

/// Resolve the window, anchoring a relative end on the start date or `now`
///
/// # Errors
///
/// [`ProviderError::Validation`] for malformed input or an end not after the start
pub fn resolve(
    start_date: Option<&str>,
    end_date: Option<&str>,
    end_date_relative: Option<&str>,
    now: DateTime<Utc>,
) -> ProviderResult<CredentialWindow> {
    validate(start_date, end_date, end_date_relative)?;

    let start = start_date
        .map(|s| values::rfc3339("start_date", s))
        .transpose()?;

    let end = match (end_date, end_date_relative) {
        (Some(end), _) => Some(values::rfc3339("end_date", end)?),
        (None, Some(relative)) => {
            let duration = parse_relative_duration("end_date_relative", relative)?;
            let duration = chrono::Duration::from_std(duration).map_err(|e| {
                ProviderError::validation(
                    "end_date_relative",
                    format!("duration out of range: {e}"),
                )
            })?;
            let anchor = start.unwrap_or(now);
            Some(anchor.checked_add_signed(duration).ok_or_else(|| {
                ProviderError::validation("end_date_relative", "end date out of range")
            })?)
        }
        (None, None) => None,
    };

    if let (Some(start), Some(end)) = (start, end) {
        if end <= start {
            return Err(ProviderError::validation(
                "end_date",
                format!(
                    "end date {} must be after start date {}",
                    format_date(end),
                    format_date(start)
                ),
            ));
        }
    }

    Ok(CredentialWindow { start, end })
}

/// RFC3339 with second precision, the form recorded in state
#[must_use]
pub fn format_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_relative_end_anchors_on_start() {
        let window = resolve(Some("2030-06-01T00:00:00Z"), None, Some("240h"), now()).unwrap();
        assert_eq!(format_date(window.end.unwrap()), "2030-06-11T00:00:00Z");
    }

    #[test]
    fn test_relative_end_anchors_on_now() {
        let window = resolve(None, None, Some("1d"), now()).unwrap();
        assert!(window.start.is_none());
        assert_eq!(format_date(window.end.unwrap()), "2030-01-02T00:00:00Z");
    }

    #[test]
    fn test_both_end_forms_rejected() {
        let err = resolve(None, Some("2031-01-01T00:00:00Z"), Some("1d"), now()).unwrap_err();
        assert!(matches!(err, ProviderError::Validation { ref attr, .. } if attr == "end_date"));
    }

    #[test]
    fn test_end_before_start_rejected() {
        assert!(resolve(
            Some("2031-01-01T00:00:00Z"),
            Some("2030-01-01T00:00:00Z"),
            None,
            now()
        )
        .is_err());
    }

    #[test]
    fn test_no_dates() {
        let window = resolve(None, None, None, now()).unwrap();
        assert_eq!(window, CredentialWindow { start: None, end: None });
    }
}
