//! # Data Sources
//!
//! Read-only lookups against the directory.
//!
//! | Name | Module |
//! |---|---|
//! | `azuread_application` | `application` |
//! | `azuread_client_config` | `client_config` |
//! | `azuread_domains` | `domains` |
//! | `azuread_users` | `users` |

pub mod application;
pub mod client_config;
pub mod domains;
pub mod users;

use crate::error::{ProviderError, ProviderResult};
use crate::resources::{ProviderContext, Validate};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;

/// A read-only lookup
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Name as written in queries, e.g. `azuread_users`
    const NAME: &'static str;

    type Query: DeserializeOwned + JsonSchema + Validate + Send + Sync;
    type Output: Serialize + Send + Sync;

    async fn read(ctx: &ProviderContext, query: &Self::Query) -> ProviderResult<Self::Output>;
}

/// Data sources addressable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceKind {
    Application,
    ClientConfig,
    Domains,
    Users,
}

impl DataSourceKind {
    pub const ALL: [Self; 4] = [Self::Application, Self::ClientConfig, Self::Domains, Self::Users];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Application => application::ApplicationDataSource::NAME,
            Self::ClientConfig => client_config::ClientConfigDataSource::NAME,
            Self::Domains => domains::DomainsDataSource::NAME,
            Self::Users => users::UsersDataSource::NAME,
        }
    }

    /// Decode `query`, run the lookup and return its output as JSON
    ///
    /// # Errors
    ///
    /// [`ProviderError::Validation`] when the query does not decode, otherwise
    /// whatever the lookup returns
    pub async fn query(self, ctx: &ProviderContext, query: Value) -> ProviderResult<Value> {
        match self {
            Self::Application => run::<application::ApplicationDataSource>(ctx, query).await,
            Self::ClientConfig => run::<client_config::ClientConfigDataSource>(ctx, query).await,
            Self::Domains => run::<domains::DomainsDataSource>(ctx, query).await,
            Self::Users => run::<users::UsersDataSource>(ctx, query).await,
        }
    }

    /// JSON Schema of the query arguments
    #[must_use]
    pub fn schema(self) -> Value {
        match self {
            Self::Application => schema_of::<application::ApplicationQuery>(),
            Self::ClientConfig => schema_of::<client_config::ClientConfigQuery>(),
            Self::Domains => schema_of::<domains::DomainsQuery>(),
            Self::Users => schema_of::<users::UsersQuery>(),
        }
    }
}

impl FromStr for DataSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|k| k.name() == s).ok_or_else(|| {
            let names: Vec<&str> = Self::ALL.iter().map(|k| k.name()).collect();
            format!("unknown data source '{s}', expected one of: {}", names.join(", "))
        })
    }
}

async fn run<D: DataSource>(ctx: &ProviderContext, query: Value) -> ProviderResult<Value> {
    let query: D::Query = serde_json::from_value(query)
        .map_err(|e| ProviderError::validation(D::NAME, format!("invalid query: {e}")))?;
    query.validate()?;
    let output = D::read(ctx, &query).await?;
    serde_json::to_value(output)
        .map_err(|e| {
            ProviderError::bad_response("Encoding data source output", D::NAME, e.to_string())
        })
}

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

/// Exactly one of the named lookup attributes must be set
pub(crate) fn exactly_one_of(attrs: &[(&str, bool)]) -> ProviderResult<()> {
    let set = attrs.iter().filter(|(_, present)| *present).count();
    if set == 1 {
        return Ok(());
    }
    let names: Vec<&str> = attrs.iter().map(|(name, _)| *name).collect();
    Err(ProviderError::validation(
        names.first().copied().unwrap_or_default(),
        format!("exactly one of {} must be specified", names.join(", ")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_of() {
        assert!(exactly_one_of(&[("object_id", true), ("display_name", false)]).is_ok());
        assert!(exactly_one_of(&[("object_id", false), ("display_name", false)]).is_err());
        let err = exactly_one_of(&[("object_id", true), ("display_name", true)]).unwrap_err();
        assert!(err.to_string().contains("object_id, display_name"));
    }

    #[test]
    fn test_kind_from_name() {
        assert_eq!("azuread_users".parse::<DataSourceKind>(), Ok(DataSourceKind::Users));
        assert!("azuread_groups".parse::<DataSourceKind>().is_err());
        for kind in DataSourceKind::ALL {
            assert!(kind.schema().is_object());
        }
    }

    #[tokio::test]
    async fn test_query_rejects_unknown_arguments() {
        let ctx = ProviderContext::new(std::sync::Arc::new(crate::graph::InMemoryDirectory::new()));
        let err = DataSourceKind::Domains
            .query(&ctx, serde_json::json!({ "only_primary": true }))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Validation { .. }));
    }
}
