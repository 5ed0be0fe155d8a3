//! # Remote Object Store
//!
//! Traits over the Microsoft Graph directory API and their implementations.
//!
//! - [`client::GraphClient`]: HTTP client against Graph v1.0
//! - [`memory::InMemoryDirectory`]: process-local store for tests and dry runs
//!
//! Every call returns [`GraphError`](crate::error::GraphError); HTTP 404 is the
//! sentinel that callers use to tell "gone" apart from any other failure.

pub mod auth;
pub mod client;
pub mod memory;
pub mod models;

use crate::error::GraphResult;
use async_trait::async_trait;
use models::{Application, Domain, Group, User};

pub use client::GraphClient;
pub use memory::InMemoryDirectory;

/// Applications and their owners
#[async_trait]
pub trait ApplicationsApi: Send + Sync {
    async fn get_application(&self, id: &str) -> GraphResult<Application>;

    async fn create_application(&self, application: &Application) -> GraphResult<Application>;

    /// Merge-PATCH: only fields present in `patch` are written
    async fn update_application(&self, id: &str, patch: &Application) -> GraphResult<()>;

    async fn delete_application(&self, id: &str) -> GraphResult<()>;

    /// List applications, optionally narrowed by an OData `$filter`
    async fn list_applications(&self, filter: Option<&str>) -> GraphResult<Vec<Application>>;

    /// Object IDs of the application's owners
    async fn list_application_owners(&self, id: &str) -> GraphResult<Vec<String>>;

    async fn add_application_owners(&self, id: &str, owner_ids: &[String]) -> GraphResult<()>;

    async fn remove_application_owners(&self, id: &str, owner_ids: &[String]) -> GraphResult<()>;
}

/// Groups, their owners and members
#[async_trait]
pub trait GroupsApi: Send + Sync {
    async fn get_group(&self, id: &str) -> GraphResult<Group>;

    /// Create a group, binding its initial owners and members in the same request
    async fn create_group(
        &self,
        group: &Group,
        owner_ids: &[String],
        member_ids: &[String],
    ) -> GraphResult<Group>;

    async fn update_group(&self, id: &str, patch: &Group) -> GraphResult<()>;

    async fn delete_group(&self, id: &str) -> GraphResult<()>;

    async fn list_groups(&self, filter: Option<&str>) -> GraphResult<Vec<Group>>;

    async fn list_group_owners(&self, id: &str) -> GraphResult<Vec<String>>;

    async fn add_group_owners(&self, id: &str, owner_ids: &[String]) -> GraphResult<()>;

    async fn remove_group_owners(&self, id: &str, owner_ids: &[String]) -> GraphResult<()>;

    async fn list_group_members(&self, id: &str) -> GraphResult<Vec<String>>;

    async fn add_group_members(&self, id: &str, member_ids: &[String]) -> GraphResult<()>;

    async fn remove_group_members(&self, id: &str, member_ids: &[String]) -> GraphResult<()>;
}

#[async_trait]
pub trait UsersApi: Send + Sync {
    async fn get_user(&self, id: &str) -> GraphResult<User>;

    async fn create_user(&self, user: &User) -> GraphResult<User>;

    async fn update_user(&self, id: &str, patch: &User) -> GraphResult<()>;

    async fn delete_user(&self, id: &str) -> GraphResult<()>;

    async fn list_users(&self, filter: Option<&str>) -> GraphResult<Vec<User>>;
}

#[async_trait]
pub trait DomainsApi: Send + Sync {
    async fn list_domains(&self) -> GraphResult<Vec<Domain>>;
}

/// Everything the resources and data sources need from the directory
pub trait Directory: ApplicationsApi + GroupsApi + UsersApi + DomainsApi {}

impl<T> Directory for T where T: ApplicationsApi + GroupsApi + UsersApi + DomainsApi {}

/// Quote a literal for use inside an OData `$filter` string
#[must_use]
pub fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `<field> eq '<value>'`
#[must_use]
pub fn eq_filter(field: &str, value: &str) -> String {
    format!("{field} eq {}", odata_literal(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eq_filter_escapes_quotes() {
        assert_eq!(eq_filter("displayName", "billing"), "displayName eq 'billing'");
        assert_eq!(
            eq_filter("displayName", "O'Brien's app"),
            "displayName eq 'O''Brien''s app'"
        );
    }
}
