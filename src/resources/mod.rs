//! # Resources
//!
//! Managed directory objects. Each resource has a typed configuration, decoded
//! and validated before any network call, and a state type holding what was
//! read back from the directory.
//!
//! | Kind | Parent | Module |
//! |---|---|---|
//! | `azuread_application` | - | `application` |
//! | `azuread_application_app_role` | application | `app_role` |
//! | `azuread_application_oauth2_permission_scope` | application | `oauth2_permission_scope` |
//! | `azuread_application_certificate` | application | `certificate` |
//! | `azuread_application_password` | application | `password` |
//! | `azuread_group` | - | `group` |
//! | `azuread_user` | - | `user` |

pub mod app_role;
pub mod application;
pub mod certificate;
pub mod credential_dates;
pub mod group;
pub mod ids;
pub mod oauth2_permission_scope;
pub mod password;
pub mod user;

use crate::config::ProviderConfig;
use crate::error::ProviderResult;
use crate::graph::Directory;
use crate::locks::{self, NamedLocks};
use crate::observability::metrics;
use crate::reconcile::SubResourceReconciler;
use crate::replication::ReplicationPolicy;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Everything an operation needs: the directory, the lock registry and policy knobs
#[derive(Clone)]
pub struct ProviderContext {
    pub directory: Arc<dyn Directory>,
    pub locks: &'static NamedLocks,
    pub replication: ReplicationPolicy,
    pub tenant_id: String,
    pub client_id: String,
    /// Object ID of the authenticated principal, when known
    pub object_id: Option<String>,
}

impl std::fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderContext")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("object_id", &self.object_id)
            .field("replication", &self.replication)
            .finish_non_exhaustive()
    }
}

impl ProviderContext {
    /// Context over `directory` using the process-wide lock registry
    #[must_use]
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            locks: locks::global(),
            replication: ReplicationPolicy::default(),
            tenant_id: String::new(),
            client_id: String::new(),
            object_id: None,
        }
    }

    #[must_use]
    pub fn from_config(directory: Arc<dyn Directory>, config: &ProviderConfig) -> Self {
        Self {
            replication: config.replication.clone(),
            tenant_id: config.tenant_id.clone(),
            client_id: config.client_id.clone(),
            ..Self::new(directory)
        }
    }

    #[must_use]
    pub fn with_replication(mut self, replication: ReplicationPolicy) -> Self {
        self.replication = replication;
        self
    }

    /// Sub-resource reconciler bound to this context
    #[must_use]
    pub fn sub_resources(&self) -> SubResourceReconciler<'_, dyn Directory> {
        SubResourceReconciler::new(&*self.directory, self.locks)
    }
}

/// Decode-time validation of a resource configuration
pub trait Validate {
    /// # Errors
    ///
    /// [`ProviderError::Validation`](crate::error::ProviderError::Validation)
    /// naming the offending attribute
    fn validate(&self) -> ProviderResult<()>;
}

/// Lifecycle of one resource kind
#[async_trait]
pub trait Resource: Send + Sync {
    /// Kind as written in manifests, e.g. `azuread_group`
    const KIND: &'static str;

    type Config: DeserializeOwned + Serialize + JsonSchema + Validate + PartialEq + Send + Sync;
    type State: DeserializeOwned + Serialize + Send + Sync;

    /// Identifier recorded in state
    fn id(state: &Self::State) -> String;

    /// Whether moving from `prior` to `desired` needs destroy-then-create
    fn requires_replacement(_prior: &Self::Config, _desired: &Self::Config) -> bool {
        false
    }

    async fn create(ctx: &ProviderContext, config: &Self::Config) -> ProviderResult<Self::State>;

    /// `Ok(None)` means the object is gone and should be dropped from state
    async fn read(ctx: &ProviderContext, id: &str) -> ProviderResult<Option<Self::State>>;

    /// `Ok(None)` means the object disappeared while updating
    async fn update(
        ctx: &ProviderContext,
        id: &str,
        prior: &Self::Config,
        desired: &Self::Config,
    ) -> ProviderResult<Option<Self::State>>;

    async fn delete(ctx: &ProviderContext, id: &str) -> ProviderResult<()>;
}

/// Count a lifecycle operation
pub(crate) fn record_operation(kind: &str, action: &str) {
    metrics::increment_resource_operations(kind, action);
}

/// Sorted, deduplicated copy of a string set
pub(crate) fn normalized_set(values: &[String]) -> Vec<String> {
    let mut values = values.to_vec();
    values.sort();
    values.dedup();
    values
}
