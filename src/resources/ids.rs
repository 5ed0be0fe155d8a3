//! Composite identifiers for sub-resources
//!
//! - app role: `<objectId>/<roleId>` (also `<objectId>/role/<roleId>`)
//! - permission scope: `<objectId>/<scopeId>` (also `<objectId>/scope/<scopeId>`)
//! - credentials: `<objectId>/certificate/<keyId>`, `<objectId>/password/<keyId>`

use crate::error::{ProviderError, ProviderResult};
use crate::validation::values;
use std::fmt;
use std::str::FromStr;

/// Split `<objectId>/<subId>` or `<objectId>/<segment>/<subId>`
fn parse_object_sub_id<'a>(
    attr: &str,
    value: &'a str,
    segment: &str,
) -> ProviderResult<(&'a str, &'a str)> {
    let parts: Vec<&str> = value.split('/').collect();
    let (object_id, sub_id) = match parts.as_slice() {
        [object_id, sub_id] => (*object_id, *sub_id),
        [object_id, kind, sub_id] if *kind == segment => (*object_id, *sub_id),
        [_, kind, _] => {
            return Err(ProviderError::validation(
                attr,
                format!("{value:?}: expected type segment {segment:?}, got {kind:?}"),
            ));
        }
        _ => {
            return Err(ProviderError::validation(
                attr,
                format!("{value:?}: expected <objectId>/<{segment}Id>"),
            ));
        }
    };
    values::uuid(attr, object_id)?;
    values::uuid(attr, sub_id)?;
    Ok((object_id, sub_id))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppRoleId {
    pub object_id: String,
    pub role_id: String,
}

impl AppRoleId {
    pub fn new(object_id: impl Into<String>, role_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            role_id: role_id.into(),
        }
    }
}

impl fmt::Display for AppRoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.object_id, self.role_id)
    }
}

impl FromStr for AppRoleId {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (object_id, role_id) = parse_object_sub_id("id", s, "role")?;
        Ok(Self::new(object_id, role_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeId {
    pub object_id: String,
    pub scope_id: String,
}

impl ScopeId {
    pub fn new(object_id: impl Into<String>, scope_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            scope_id: scope_id.into(),
        }
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.object_id, self.scope_id)
    }
}

impl FromStr for ScopeId {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (object_id, scope_id) = parse_object_sub_id("id", s, "scope")?;
        Ok(Self::new(object_id, scope_id))
    }
}

/// Which credential collection a key lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    Certificate,
    Password,
}

impl CredentialKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Certificate => "certificate",
            Self::Password => "password",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialId {
    pub object_id: String,
    pub kind: CredentialKind,
    pub key_id: String,
}

impl CredentialId {
    pub fn new(
        object_id: impl Into<String>,
        kind: CredentialKind,
        key_id: impl Into<String>,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            kind,
            key_id: key_id.into(),
        }
    }

    /// Parse and require a specific credential kind
    ///
    /// # Errors
    ///
    /// [`ProviderError::Validation`] when the ID is malformed or of another kind
    pub fn parse_kind(value: &str, kind: CredentialKind) -> ProviderResult<Self> {
        let id: Self = value.parse()?;
        if id.kind != kind {
            return Err(ProviderError::validation(
                "id",
                format!("{value:?}: expected a {} credential ID", kind.as_str()),
            ));
        }
        Ok(id)
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.object_id, self.kind.as_str(), self.key_id)
    }
}

impl FromStr for CredentialId {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        let [object_id, kind, key_id] = parts.as_slice() else {
            return Err(ProviderError::validation(
                "id",
                format!("{s:?}: expected <objectId>/<certificate|password>/<keyId>"),
            ));
        };
        let kind = match *kind {
            "certificate" => CredentialKind::Certificate,
            "password" => CredentialKind::Password,
            other => {
                return Err(ProviderError::validation(
                    "id",
                    format!("{s:?}: unknown credential type {other:?}"),
                ));
            }
        };
        values::uuid("id", object_id)?;
        values::uuid("id", key_id)?;
        Ok(Self::new(*object_id, kind, *key_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OBJECT: &str = "00000000-0000-0000-0000-0000000000aa";
    const SUB: &str = "00000000-0000-0000-0000-0000000000bb";

    #[test]
    fn test_app_role_id_forms() {
        let two: AppRoleId = format!("{OBJECT}/{SUB}").parse().unwrap();
        let three: AppRoleId = format!("{OBJECT}/role/{SUB}").parse().unwrap();
        assert_eq!(two, three);
        assert_eq!(two.to_string(), format!("{OBJECT}/{SUB}"));
    }

    #[test]
    fn test_scope_id_rejects_wrong_segment() {
        assert!(format!("{OBJECT}/role/{SUB}").parse::<ScopeId>().is_err());
        assert!(format!("{OBJECT}/scope/{SUB}").parse::<ScopeId>().is_ok());
    }

    #[test]
    fn test_rejects_malformed_ids() {
        for bad in [
            String::new(),
            OBJECT.to_string(),
            format!("{OBJECT}/not-a-uuid"),
            format!("{OBJECT}/{SUB}/{SUB}/{SUB}"),
        ] {
            assert!(bad.parse::<AppRoleId>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_credential_id() {
        let id: CredentialId = format!("{OBJECT}/certificate/{SUB}").parse().unwrap();
        assert_eq!(id.kind, CredentialKind::Certificate);
        assert_eq!(id.to_string(), format!("{OBJECT}/certificate/{SUB}"));

        assert!(format!("{OBJECT}/secret/{SUB}").parse::<CredentialId>().is_err());
        assert!(format!("{OBJECT}/{SUB}").parse::<CredentialId>().is_err());
        let password_id = format!("{OBJECT}/password/{SUB}");
        assert!(CredentialId::parse_kind(&password_id, CredentialKind::Certificate).is_err());
    }
}
