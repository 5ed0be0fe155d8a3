//! # Configuration
//!
//! - `provider`: provider settings from the environment
//! - `manifest`: desired resources read from a YAML manifest

pub mod manifest;
pub mod provider;

pub use manifest::{Manifest, ManifestEntry};
pub use provider::{CloudEnvironment, ProviderConfig};
