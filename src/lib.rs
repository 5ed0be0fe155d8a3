//! # Azure AD Provider
//!
//! Resource adapters that manage Azure Active Directory objects through
//! Microsoft Graph: applications with their app roles, OAuth2 permission
//! scopes and credentials, security groups and users, plus read-only data
//! sources.
//!
//! ## Modules
//!
//! - [`graph`]: Graph client, the in-memory directory and wire models
//! - [`locks`]: named mutexes serializing writers of one parent object
//! - [`reconcile`]: read-modify-write of parent arrays and set-diff of relationships
//! - [`replication`]: polling until a new object is visible
//! - [`resources`] / [`data_sources`]: the managed kinds and lookups
//! - [`plan`] / [`state`] / [`cli`]: manifest-driven apply for the binary

pub mod backoff;
pub mod cli;
pub mod config;
pub mod constants;
pub mod data_sources;
pub mod error;
pub mod graph;
pub mod locks;
pub mod observability;
pub mod plan;
pub mod reconcile;
pub mod replication;
pub mod resources;
pub mod state;
pub mod validation;

pub use config::ProviderConfig;
pub use error::{GraphError, ProviderError, ProviderResult};
pub use resources::{ProviderContext, Resource};
