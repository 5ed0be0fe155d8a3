//! `azuread_domains` data source

use crate::data_sources::DataSource;
use crate::error::{GraphResultExt, ProviderError, ProviderResult};
use crate::graph::models::Domain;
use crate::resources::{ProviderContext, Validate};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DomainsQuery {
    #[serde(default)]
    pub include_unverified: bool,
    #[serde(default)]
    pub only_default: bool,
    #[serde(default)]
    pub only_initial: bool,
}

impl Validate for DomainsQuery {
    fn validate(&self) -> ProviderResult<()> {
        let conflict = |a: &str, b: &str| {
            Err(ProviderError::validation(
                a,
                format!("{a} conflicts with {b}"),
            ))
        };
        if self.only_default && self.only_initial {
            return conflict("only_default", "only_initial");
        }
        if self.only_default && self.include_unverified {
            return conflict("only_default", "include_unverified");
        }
        if self.only_initial && self.include_unverified {
            return conflict("only_initial", "include_unverified");
        }
        Ok(())
    }
}

impl DomainsQuery {
    /// Flags the directory leaves unset never exclude a domain
    fn matches(&self, domain: &Domain) -> bool {
        if self.only_default && domain.is_default == Some(false) {
            return false;
        }
        if self.only_initial && domain.is_initial == Some(false) {
            return false;
        }
        if !self.include_unverified && domain.is_verified == Some(false) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEntry {
    pub domain_name: String,
    pub authentication_type: String,
    pub is_default: bool,
    pub is_initial: bool,
    pub is_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainsOutput {
    pub id: String,
    pub domains: Vec<DomainEntry>,
}

#[derive(Debug)]
pub struct DomainsDataSource;

#[async_trait]
impl DataSource for DomainsDataSource {
    const NAME: &'static str = "azuread_domains";

    type Query = DomainsQuery;
    type Output = DomainsOutput;

    async fn read(ctx: &ProviderContext, query: &Self::Query) -> ProviderResult<Self::Output> {
        query.validate()?;
        let id = format!("domains-{}", ctx.tenant_id);

        let domains: Vec<DomainEntry> = ctx
            .directory
            .list_domains()
            .await
            .for_action("Listing domains", &ctx.tenant_id)?
            .iter()
            .filter(|domain| query.matches(domain))
            .map(|domain| DomainEntry {
                domain_name: domain.id.clone().unwrap_or_default(),
                authentication_type: domain.authentication_type.clone().unwrap_or_default(),
                is_default: domain.is_default.unwrap_or(false),
                is_initial: domain.is_initial.unwrap_or(false),
                is_verified: domain.is_verified.unwrap_or(false),
            })
            .collect();

        if domains.is_empty() {
            return Err(ProviderError::NotFound {
                resource: "Domain matching the provided filters",
                id,
            });
        }
        Ok(DomainsOutput { id, domains })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryDirectory;
    use std::sync::Arc;

    fn domain(name: &str, default: bool, initial: bool, verified: bool) -> Domain {
        Domain {
            id: Some(name.to_string()),
            authentication_type: Some("Managed".to_string()),
            is_default: Some(default),
            is_initial: Some(initial),
            is_verified: Some(verified),
        }
    }

    fn context() -> ProviderContext {
        let directory = InMemoryDirectory::with_domains(vec![
            domain("contoso.onmicrosoft.com", false, true, true),
            domain("contoso.com", true, false, true),
            domain("pending.contoso.com", false, false, false),
        ]);
        let mut ctx = ProviderContext::new(Arc::new(directory));
        ctx.tenant_id = "00000000-0000-0000-0000-0000000000t1".to_string();
        ctx
    }

    #[test]
    fn test_conflicting_flags() {
        let query = DomainsQuery {
            only_default: true,
            only_initial: true,
            ..Default::default()
        };
        assert!(query.validate().is_err());
    }

    #[tokio::test]
    async fn test_verified_by_default() {
        let output = DomainsDataSource::read(&context(), &DomainsQuery::default())
            .await
            .unwrap();
        assert_eq!(output.id, "domains-00000000-0000-0000-0000-0000000000t1");
        assert_eq!(output.domains.len(), 2);
    }

    #[tokio::test]
    async fn test_only_default() {
        let query = DomainsQuery {
            only_default: true,
            ..Default::default()
        };
        let output = DomainsDataSource::read(&context(), &query).await.unwrap();
        assert_eq!(output.domains.len(), 1);
        assert_eq!(output.domains[0].domain_name, "contoso.com");
    }

    #[tokio::test]
    async fn test_no_match_is_an_error() {
        let ctx = ProviderContext::new(Arc::new(InMemoryDirectory::new()));
        assert!(DomainsDataSource::read(&ctx, &DomainsQuery::default())
            .await
            .is_err());
    }
}
