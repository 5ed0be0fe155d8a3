//! # Manifest
//!
//! A YAML document listing the desired resources:
//!
//! ```yaml
//! resources:
//!   - address: app.billing
//!     kind: azuread_application
//!     config:
//!       display_name: billing
//!   - address: role.reader
//!     kind: azuread_application_app_role
//!     config:
//!       application_object_id: "@app.billing"
//!       value: Reader
//! ```
//!
//! A string `"@<address>"` in `application_object_id`, `members` or `owners`
//! refers to another entry and resolves to that entry's object ID once it has
//! been applied.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Fields whose values may reference other manifest entries
const REFERENCE_FIELDS: &[&str] = &["application_object_id", "members", "owners"];

const REFERENCE_PREFIX: char = '@';

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub resources: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestEntry {
    /// Unique name of the entry within the manifest and the state file
    pub address: String,
    pub kind: String,
    #[serde(default = "empty_object")]
    pub config: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Manifest {
    /// Read and check a manifest file
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, is not valid YAML, or has
    /// duplicate addresses or dangling references
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid manifest {}", path.display()))
    }

    /// Parse and check manifest YAML
    ///
    /// # Errors
    ///
    /// See [`Manifest::load`]
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(content).context("Failed to parse manifest YAML")?;
        manifest.check()?;
        Ok(manifest)
    }

    fn check(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for entry in &self.resources {
            if entry.address.trim().is_empty() {
                bail!("manifest entry of kind {} has an empty address", entry.kind);
            }
            if !seen.insert(entry.address.as_str()) {
                bail!("duplicate address {}", entry.address);
            }
            if !entry.config.is_object() {
                bail!("config of {} must be a mapping", entry.address);
            }
        }
        for entry in &self.resources {
            for reference in entry.references() {
                if reference == entry.address {
                    bail!("{} refers to itself", entry.address);
                }
                if !seen.contains(reference.as_str()) {
                    bail!("{} refers to unknown address @{reference}", entry.address);
                }
            }
        }
        self.layers().map(|_| ())
    }

    #[must_use]
    pub fn get(&self, address: &str) -> Option<&ManifestEntry> {
        self.resources.iter().find(|e| e.address == address)
    }

    /// Group entries so that every entry comes after the entries it refers to.
    ///
    /// Entries within one layer are independent of each other.
    ///
    /// # Errors
    ///
    /// Fails on a reference cycle
    pub fn layers(&self) -> Result<Vec<Vec<&ManifestEntry>>> {
        let mut placed: BTreeSet<&str> = BTreeSet::new();
        let mut remaining: Vec<&ManifestEntry> = self.resources.iter().collect();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) = remaining
                .into_iter()
                .partition(|e| e.references().iter().all(|r| placed.contains(r.as_str())));
            if ready.is_empty() {
                let addresses: Vec<&str> = blocked.iter().map(|e| e.address.as_str()).collect();
                bail!("reference cycle between {}", addresses.join(", "));
            }
            placed.extend(ready.iter().map(|e| e.address.as_str()));
            layers.push(ready);
            remaining = blocked;
        }
        Ok(layers)
    }
}

impl ManifestEntry {
    /// Addresses this entry refers to, without the `@` prefix
    #[must_use]
    pub fn references(&self) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        for field in REFERENCE_FIELDS {
            match self.config.get(field) {
                Some(Value::String(s)) => found.extend(reference(s).map(str::to_string)),
                Some(Value::Array(items)) => {
                    found.extend(
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .filter_map(reference)
                            .map(str::to_string),
                    );
                }
                _ => {}
            }
        }
        found
    }

    /// Config with every reference replaced by the object ID `ids` maps it to
    ///
    /// # Errors
    ///
    /// Fails when a referenced address has no object ID yet
    pub fn resolved_config(&self, ids: &BTreeMap<String, String>) -> Result<Value> {
        let mut config = self.config.clone();
        let Some(object) = config.as_object_mut() else {
            return Ok(config);
        };
        for field in REFERENCE_FIELDS {
            match object.get_mut(*field) {
                Some(Value::String(s)) => {
                    if let Some(resolved) = self.lookup(s, ids)? {
                        *s = resolved;
                    }
                }
                Some(Value::Array(items)) => {
                    for item in items.iter_mut() {
                        if let Value::String(s) = item {
                            if let Some(resolved) = self.lookup(s, ids)? {
                                *s = resolved;
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(config)
    }

    fn lookup(&self, value: &str, ids: &BTreeMap<String, String>) -> Result<Option<String>> {
        let Some(address) = reference(value) else {
            return Ok(None);
        };
        match ids.get(address) {
            Some(id) => Ok(Some(id.clone())),
            None => bail!("{} refers to @{address}, which has not been applied", self.address),
        }
    }
}

fn reference(value: &str) -> Option<&str> {
    value.strip_prefix(REFERENCE_PREFIX).filter(|a| !a.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
resources:
  - address: role.reader
    kind: azuread_application_app_role
    config:
      application_object_id: "@app.billing"
      value: Reader
  - address: app.billing
    kind: azuread_application
    config:
      display_name: billing
      owners: ["@user.alice"]
  - address: user.alice
    kind: azuread_user
    config:
      user_principal_name: alice@example.com
"#;

    #[test]
    fn test_layers_follow_references() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let layers: Vec<Vec<&str>> = manifest
            .layers()
            .unwrap()
            .iter()
            .map(|layer| layer.iter().map(|e| e.address.as_str()).collect())
            .collect();
        assert_eq!(layers, vec![vec!["user.alice"], vec!["app.billing"], vec!["role.reader"]]);
    }

    #[test]
    fn test_resolved_config_replaces_references() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let ids = BTreeMap::from([("user.alice".to_string(), "u-1".to_string())]);
        let config = manifest.get("app.billing").unwrap().resolved_config(&ids).unwrap();
        assert_eq!(config["owners"], serde_json::json!(["u-1"]));
        assert_eq!(config["display_name"], "billing");

        let role = manifest.get("role.reader").unwrap();
        assert!(role.resolved_config(&ids).is_err());
    }

    #[test]
    fn test_rejects_dangling_reference_and_duplicates() {
        let dangling = "resources:\n  - address: a\n    kind: azuread_group\n    config:\n      members: [\"@b\"]\n";
        assert!(Manifest::parse(dangling).is_err());

        let duplicate = "resources:\n  - address: a\n    kind: azuread_group\n  - address: a\n    kind: azuread_user\n";
        assert!(Manifest::parse(duplicate).is_err());
    }

    #[test]
    fn test_rejects_cycle() {
        let cycle = r#"
resources:
  - address: a
    kind: azuread_group
    config:
      members: ["@b"]
  - address: b
    kind: azuread_group
    config:
      members: ["@a"]
"#;
        let err = Manifest::parse(cycle).unwrap_err();
        assert!(format!("{err:#}").contains("reference cycle"));
    }
}
