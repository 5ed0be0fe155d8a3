//! # State File
//!
//! JSON record of the resources applied from a manifest, keyed by address.
//! Written atomically: a temporary file in the same directory is persisted over
//! the previous state.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    #[serde(default)]
    pub resources: BTreeMap<String, StateEntry>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            resources: BTreeMap::new(),
        }
    }
}

/// One applied resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub kind: String,
    pub id: String,
    /// Configuration as applied, with references resolved
    pub config: Value,
    /// Attributes read back from the directory
    pub attributes: Value,
    /// The object was created but a later step of its creation failed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub incomplete: bool,
}

impl StateFile {
    /// Load state, or start empty when the file does not exist
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No state file at {}, starting empty", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        let state: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file {}", path.display()))?;
        if state.version != STATE_VERSION {
            bail!(
                "state file {} has version {}, expected {STATE_VERSION}",
                path.display(),
                state.version
            );
        }
        Ok(state)
    }

    /// Write state atomically
    ///
    /// # Errors
    ///
    /// Fails when the temporary file cannot be written or renamed into place
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let json = serde_json::to_string_pretty(self).context("Failed to serialize state")?;

        let mut file = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| {
                format!("Failed to create temporary state file in {}", dir.display())
            })?;
        file.write_all(json.as_bytes())
            .context("Failed to write temporary state file")?;
        file.write_all(b"\n")
            .context("Failed to write temporary state file")?;
        file.as_file()
            .sync_all()
            .context("Failed to sync temporary state file")?;
        file.persist(path)
            .with_context(|| format!("Failed to persist state file {}", path.display()))?;
        Ok(())
    }

    /// Object IDs by address, for resolving manifest references
    #[must_use]
    pub fn object_ids(&self) -> BTreeMap<String, String> {
        self.resources
            .iter()
            .map(|(address, entry)| (address.clone(), entry.id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> StateEntry {
        StateEntry {
            kind: "azuread_group".to_string(),
            id: id.to_string(),
            config: serde_json::json!({ "display_name": "platform" }),
            attributes: serde_json::json!({ "object_id": id }),
            incomplete: false,
        }
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::load(&dir.path().join("state.json")).unwrap();
        assert_eq!(state, StateFile::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = StateFile::default();
        state.resources.insert("group.platform".to_string(), entry("g-1"));
        state.save(&path).unwrap();

        // Overwrite keeps a single file
        state.resources.insert("group.ops".to_string(), entry("g-2"));
        state.save(&path).unwrap();

        let loaded = StateFile::load(&path).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.object_ids().get("group.ops").map(String::as_str), Some("g-2"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_incomplete_flag_only_written_when_set() {
        let complete = serde_json::to_value(entry("g-1")).unwrap();
        assert!(complete.get("incomplete").is_none());

        let partial = StateEntry {
            incomplete: true,
            ..entry("g-1")
        };
        let value = serde_json::to_value(&partial).unwrap();
        assert_eq!(value["incomplete"], serde_json::json!(true));
        let back: StateEntry = serde_json::from_value(complete).unwrap();
        assert!(!back.incomplete);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"version": 99, "resources": {}}"#).unwrap();
        assert!(StateFile::load(&path).is_err());
    }
}
