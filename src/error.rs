//! # Errors
//!
//! Two layers of errors:
//!
//! - [`GraphError`] is what the remote object store returns. HTTP 404 is the
//!   sentinel that separates "not found" from every other failure.
//! - [`ProviderError`] is what resource and data-source operations return. Every
//!   variant names the object identifier and, where relevant, the attempted action.

use thiserror::Error;

/// Result type alias for remote object store calls
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors returned by the remote object store
#[derive(Debug, Error)]
pub enum GraphError {
    /// The Graph API answered with a non-success status and an OData error body
    #[error("Graph API returned HTTP {status}: {code} - {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response payload could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Acquiring an access token failed
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The response parsed but is missing something every caller relies on
    #[error("Unexpected response from Graph API: {0}")]
    BadResponse(String),
}

impl GraphError {
    /// Build a 404 error, used by in-process stores
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Api {
            status: 404,
            code: "Request_ResourceNotFound".to_string(),
            message: message.into(),
        }
    }

    /// HTTP status carried by the error, when there is one
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            Self::Json(_) | Self::Auth(_) | Self::BadResponse(_) => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Throttling and gateway errors worth a transport-level retry
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.status(), Some(429 | 502 | 503 | 504))
    }
}

/// Errors returned by resource and data-source operations
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Parent object or sub-resource is absent where it must exist
    #[error("{resource} with object ID {id:?} was not found")]
    NotFound { resource: &'static str, id: String },

    /// ID collision on create
    #[error(
        "A resource with the ID {id:?} already exists - to be managed via this provider this resource needs to be imported into the state as {resource_type:?}"
    )]
    AlreadyExists {
        resource_type: &'static str,
        id: String,
    },

    /// Name collision when `prevent_duplicate_names` is set
    #[error(
        "existing {resource_type} with object ID {existing_id:?} was found with the display name {display_name:?} - import it into the state or disable prevent_duplicate_names"
    )]
    DuplicateName {
        resource_type: &'static str,
        existing_id: String,
        display_name: String,
    },

    /// Configuration rejected before any network call
    #[error("invalid value for {attr:?}: {message}")]
    Validation { attr: String, message: String },

    /// Any remote failure other than an expected 404
    #[error("{action} (object ID {id:?}): {source}")]
    Api {
        action: String,
        id: String,
        #[source]
        source: GraphError,
    },

    /// One half of a relationship reconciliation succeeded, the other failed
    #[error("{action} (object ID {id:?}) after {completed}; relationship left partially applied: {source}")]
    PartiallyApplied {
        action: String,
        id: String,
        completed: String,
        #[source]
        source: GraphError,
    },

    /// Replication budget exhausted
    #[error("timed out waiting for {resource} with object ID {id:?} to replicate after {attempts} attempts")]
    ReplicationTimeout {
        resource: &'static str,
        id: String,
        attempts: u32,
    },

    /// The object exists remotely but a step after its creation failed
    #[error("{resource} with object ID {id:?} was created but not fully configured: {source}")]
    CreatedWithErrors {
        resource: &'static str,
        id: String,
        #[source]
        source: Box<ProviderError>,
    },

    /// Remote answered successfully but with an unusable payload
    #[error("{action} (object ID {id:?}): bad API response: {message}")]
    BadResponse {
        action: String,
        id: String,
        message: String,
    },
}

impl ProviderError {
    pub fn validation(attr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            attr: attr.into(),
            message: message.into(),
        }
    }

    pub fn api(action: impl Into<String>, id: impl Into<String>, source: GraphError) -> Self {
        Self::Api {
            action: action.into(),
            id: id.into(),
            source,
        }
    }

    pub fn bad_response(
        action: impl Into<String>,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::BadResponse {
            action: action.into(),
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn created_with_errors(
        resource: &'static str,
        id: impl Into<String>,
        source: Self,
    ) -> Self {
        Self::CreatedWithErrors {
            resource,
            id: id.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Object ID of a remote object this failed operation still created
    #[must_use]
    pub fn created_id(&self) -> Option<&str> {
        match self {
            Self::CreatedWithErrors { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Attach the attempted action and object ID to a remote failure
pub trait GraphResultExt<T> {
    /// # Errors
    /// Wraps any [`GraphError`] into [`ProviderError::Api`]
    fn for_action(self, action: impl Into<String>, id: &str) -> ProviderResult<T>;
}

impl<T> GraphResultExt<T> for GraphResult<T> {
    fn for_action(self, action: impl Into<String>, id: &str) -> ProviderResult<T> {
        self.map_err(|source| ProviderError::api(action, id, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_sentinel() {
        let err = GraphError::not_found("Application missing");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn test_server_error_is_not_not_found() {
        let err = GraphError::Api {
            status: 500,
            code: "InternalServerError".to_string(),
            message: "boom".to_string(),
        };
        assert!(!err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_throttling_is_retryable() {
        for status in [429, 502, 503, 504] {
            let err = GraphError::Api {
                status,
                code: "TooManyRequests".to_string(),
                message: String::new(),
            };
            assert!(err.is_retryable(), "{status} should be retryable");
        }
    }

    #[test]
    fn test_api_error_names_action_and_object() {
        let result: GraphResult<()> = Err(GraphError::Auth("token expired".to_string()));
        let err = result
            .for_action("Updating application", "00000000-0000-0000-0000-000000000001")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Updating application"));
        assert!(message.contains("00000000-0000-0000-0000-000000000001"));
        assert!(message.contains("token expired"));
    }

    #[test]
    fn test_created_with_errors_keeps_id_and_cause() {
        let err = ProviderError::created_with_errors(
            "azuread_group",
            "g-1",
            ProviderError::ReplicationTimeout {
                resource: "group",
                id: "g-1".to_string(),
                attempts: 2,
            },
        );
        assert_eq!(err.created_id(), Some("g-1"));
        assert!(err.to_string().contains("timed out waiting for group"));
        assert!(ProviderError::validation("owners", "bad").created_id().is_none());
    }

    #[test]
    fn test_already_exists_has_import_hint() {
        let err = ProviderError::AlreadyExists {
            resource_type: "azuread_application_app_role",
            id: "obj/role".to_string(),
        };
        assert!(err.to_string().contains("imported into the state"));
    }
}
