//! # Validation
//!
//! Decode-time checks for resource configuration. Everything here runs before
//! a single request is sent to Microsoft Graph.
//!
//! - `duration`: relative durations (`240h`, `1h30m`)
//! - `values`: UUIDs, URLs, claim values, email addresses, timestamps

pub mod duration;
pub mod values;

pub use duration::parse_relative_duration;
