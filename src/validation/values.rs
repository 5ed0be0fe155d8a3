//! # Value Validation
//!
//! Field-level checks run while decoding resource configuration, before any
//! network call.

use crate::constants::MAX_CLAIM_VALUE_LEN;
use crate::error::{ProviderError, ProviderResult};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
        .expect("Failed to compile EMAIL regex - this should never happen")
});

pub fn non_empty(attr: &str, value: &str) -> ProviderResult<()> {
    if value.trim().is_empty() {
        return Err(ProviderError::validation(attr, "value must not be empty"));
    }
    Ok(())
}

pub fn non_empty_each<'a, I>(attr: &str, values: I) -> ProviderResult<()>
where
    I: IntoIterator<Item = &'a String>,
{
    values.into_iter().try_for_each(|v| non_empty(attr, v))
}

pub fn uuid(attr: &str, value: &str) -> ProviderResult<()> {
    uuid::Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|e| ProviderError::validation(attr, format!("{value:?} is not a valid UUID: {e}")))
}

pub fn uuid_each<'a, I>(attr: &str, values: I) -> ProviderResult<()>
where
    I: IntoIterator<Item = &'a String>,
{
    values.into_iter().try_for_each(|v| uuid(attr, v))
}

pub fn length_between(attr: &str, value: &str, min: usize, max: usize) -> ProviderResult<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ProviderError::validation(
            attr,
            format!("length must be between {min} and {max} characters, got {len}"),
        ));
    }
    Ok(())
}

/// Value of an app role or OAuth2 permission scope as it appears in token claims.
///
/// At most 120 printable ASCII characters, no spaces, quotes or backslashes,
/// and no leading dot.
pub fn claim_value(attr: &str, value: &str) -> ProviderResult<()> {
    if value.is_empty() {
        return Err(ProviderError::validation(attr, "value must not be empty"));
    }
    if value.len() > MAX_CLAIM_VALUE_LEN {
        return Err(ProviderError::validation(
            attr,
            format!("value must be at most {MAX_CLAIM_VALUE_LEN} characters"),
        ));
    }
    if value.starts_with('.') {
        return Err(ProviderError::validation(attr, "value cannot begin with a dot"));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !c.is_ascii_graphic() || matches!(c, '"' | '\\'))
    {
        return Err(ProviderError::validation(
            attr,
            format!("value contains the disallowed character {c:?}"),
        ));
    }
    Ok(())
}

/// http or https URL with a host
pub fn http_url(attr: &str, value: &str) -> ProviderResult<()> {
    let url = reqwest::Url::parse(value)
        .map_err(|e| {
            ProviderError::validation(attr, format!("{value:?} is not a valid URL: {e}"))
        })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProviderError::validation(
            attr,
            format!("{value:?} must use the http or https scheme"),
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ProviderError::validation(attr, format!("{value:?} has no host")));
    }
    Ok(())
}

/// Application identifier URI (`api://`, `https://`, `urn:` and friends)
pub fn app_uri(attr: &str, value: &str) -> ProviderResult<()> {
    let url = reqwest::Url::parse(value).map_err(|e| {
        ProviderError::validation(attr, format!("{value:?} is not a valid URI: {e}"))
    })?;
    if !matches!(url.scheme(), "http" | "https" | "api" | "urn" | "ms-appx") {
        return Err(ProviderError::validation(
            attr,
            format!("{value:?} must use one of the schemes http, https, api, urn or ms-appx"),
        ));
    }
    let rest = &value[url.scheme().len() + 1..];
    if rest.trim_start_matches('/').is_empty() {
        return Err(ProviderError::validation(attr, format!("{value:?} is incomplete")));
    }
    Ok(())
}

pub fn email(attr: &str, value: &str) -> ProviderResult<()> {
    if !EMAIL.is_match(value) {
        return Err(ProviderError::validation(
            attr,
            format!("{value:?} is not a valid email address"),
        ));
    }
    Ok(())
}

pub fn one_of(attr: &str, value: &str, allowed: &[&str]) -> ProviderResult<()> {
    if allowed.contains(&value) {
        return Ok(());
    }
    Err(ProviderError::validation(
        attr,
        format!("{value:?} must be one of: {}", allowed.join(", ")),
    ))
}

pub fn rfc3339(attr: &str, value: &str) -> ProviderResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            ProviderError::validation(attr, format!("{value:?} is not an RFC3339 timestamp: {e}"))
        })
}

/// Role and scope values share one claim namespace on an application
pub fn unique_claim_values<'a, I>(attr: &str, values: I) -> ProviderResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for value in values.into_iter().filter(|v| !v.is_empty()) {
        if !seen.insert(value) {
            return Err(ProviderError::validation(
                attr,
                format!("duplicate app role / oauth2 permission scope value found: {value:?}"),
            ));
        }
    }
    Ok(())
}
