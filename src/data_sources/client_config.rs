//! `azuread_client_config` data source: who the provider is authenticated as

use crate::data_sources::DataSource;
use crate::error::ProviderResult;
use crate::resources::{ProviderContext, Validate};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Takes no arguments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[allow(
    clippy::empty_structs_with_brackets,
    reason = "Queries are decoded from a mapping, which a unit struct does not accept"
)]
pub struct ClientConfigQuery {}

impl Validate for ClientConfigQuery {
    fn validate(&self) -> ProviderResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfigOutput {
    pub id: String,
    pub tenant_id: String,
    pub client_id: String,
    /// `oid` claim of the access token
    pub object_id: String,
}

#[derive(Debug)]
pub struct ClientConfigDataSource;

#[async_trait]
impl DataSource for ClientConfigDataSource {
    const NAME: &'static str = "azuread_client_config";

    type Query = ClientConfigQuery;
    type Output = ClientConfigOutput;

    async fn read(ctx: &ProviderContext, _query: &Self::Query) -> ProviderResult<Self::Output> {
        let object_id = ctx.object_id.clone().unwrap_or_default();
        Ok(ClientConfigOutput {
            id: format!("{}-{}-{}", ctx.tenant_id, ctx.client_id, object_id),
            tenant_id: ctx.tenant_id.clone(),
            client_id: ctx.client_id.clone(),
            object_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryDirectory;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_id_joins_identifiers() {
        let mut ctx = ProviderContext::new(Arc::new(InMemoryDirectory::new()));
        ctx.tenant_id = "tenant".to_string();
        ctx.client_id = "client".to_string();
        ctx.object_id = Some("object".to_string());

        let output = ClientConfigDataSource::read(&ctx, &ClientConfigQuery::default())
            .await
            .unwrap();
        assert_eq!(output.id, "tenant-client-object");
        assert_eq!(output.object_id, "object");
    }
}
