//! `azuread_application` data source

use crate::data_sources::{exactly_one_of, DataSource};
use crate::error::{GraphResultExt, ProviderError, ProviderResult};
use crate::graph::eq_filter;
use crate::resources::application::ApplicationState;
use crate::resources::{ProviderContext, Validate};
use crate::validation::values;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Look up one application by exactly one of its identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ApplicationQuery {
    #[serde(default)]
    pub object_id: Option<String>,
    /// Client (application) ID
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Validate for ApplicationQuery {
    fn validate(&self) -> ProviderResult<()> {
        exactly_one_of(&[
            ("object_id", self.object_id.is_some()),
            ("application_id", self.application_id.is_some()),
            ("display_name", self.display_name.is_some()),
        ])?;
        if let Some(object_id) = &self.object_id {
            values::uuid("object_id", object_id)?;
        }
        if let Some(application_id) = &self.application_id {
            values::uuid("application_id", application_id)?;
        }
        if let Some(display_name) = &self.display_name {
            values::non_empty("display_name", display_name)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ApplicationDataSource;

#[async_trait]
impl DataSource for ApplicationDataSource {
    const NAME: &'static str = "azuread_application";

    type Query = ApplicationQuery;
    type Output = ApplicationState;

    async fn read(ctx: &ProviderContext, query: &Self::Query) -> ProviderResult<Self::Output> {
        query.validate()?;

        let application = if let Some(object_id) = &query.object_id {
            match ctx.directory.get_application(object_id).await {
                Ok(application) => application,
                Err(e) if e.is_not_found() => {
                    return Err(ProviderError::NotFound {
                        resource: "Application",
                        id: object_id.clone(),
                    });
                }
                Err(e) => return Err(ProviderError::api("Retrieving application", object_id, e)),
            }
        } else {
            let (field, value) = match (&query.application_id, &query.display_name) {
                (Some(application_id), _) => ("appId", application_id.as_str()),
                (None, Some(display_name)) => ("displayName", display_name.as_str()),
                (None, None) => {
                    return Err(ProviderError::validation(
                        "object_id",
                        "one of object_id, application_id or display_name must be specified",
                    ));
                }
            };
            let filter = eq_filter(field, value);
            debug!("Looking up application with filter {filter}");

            let mut found = ctx
                .directory
                .list_applications(Some(&filter))
                .await
                .for_action("Listing applications", &filter)?;
            if found.len() > 1 {
                return Err(ProviderError::bad_response(
                    "Listing applications",
                    &filter,
                    "found multiple applications matching filter",
                ));
            }
            let Some(application) = found.pop() else {
                return Err(ProviderError::NotFound {
                    resource: "Application",
                    id: filter,
                });
            };

            let returned = match field {
                "appId" => application.app_id.as_deref(),
                _ => application.display_name.as_deref(),
            };
            if returned != Some(value) {
                return Err(ProviderError::bad_response(
                    "Listing applications",
                    &filter,
                    format!("{field} does not match ({returned:?} != {value:?})"),
                ));
            }
            application
        };

        let object_id = application.id.clone().ok_or_else(|| {
            ProviderError::bad_response(
                "Reading application",
                application.display_name.as_deref().unwrap_or_default(),
                "object ID returned for application is nil",
            )
        })?;
        let owners = ctx
            .directory
            .list_application_owners(&object_id)
            .await
            .for_action("Retrieving owners for application", &object_id)?;
        ApplicationState::from_model(&application, owners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::models::Application;
    use crate::graph::InMemoryDirectory;
    use std::sync::Arc;

    fn seeded() -> (Arc<InMemoryDirectory>, String) {
        let directory = Arc::new(InMemoryDirectory::new());
        let id = directory.insert_application(Application {
            display_name: Some("billing".to_string()),
            ..Default::default()
        });
        (directory, id)
    }

    #[test]
    fn test_requires_exactly_one_identifier() {
        assert!(ApplicationQuery::default().validate().is_err());
        let both = ApplicationQuery {
            object_id: Some("00000000-0000-0000-0000-000000000001".to_string()),
            display_name: Some("billing".to_string()),
            ..Default::default()
        };
        assert!(both.validate().is_err());
    }

    #[tokio::test]
    async fn test_lookup_by_display_name() {
        let (directory, id) = seeded();
        let ctx = ProviderContext::new(directory);
        let query = ApplicationQuery {
            display_name: Some("billing".to_string()),
            ..Default::default()
        };

        let state = ApplicationDataSource::read(&ctx, &query).await.unwrap();
        assert_eq!(state.object_id, id);
        assert_eq!(state.display_name, "billing");
    }

    #[tokio::test]
    async fn test_missing_object_id_is_not_found() {
        let (directory, _) = seeded();
        let ctx = ProviderContext::new(directory);
        let query = ApplicationQuery {
            object_id: Some("00000000-0000-0000-0000-0000000000ff".to_string()),
            ..Default::default()
        };

        let err = ApplicationDataSource::read(&ctx, &query).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_case_mismatch_is_bad_response() {
        let (directory, _) = seeded();
        let ctx = ProviderContext::new(directory);
        let query = ApplicationQuery {
            display_name: Some("BILLING".to_string()),
            ..Default::default()
        };

        let err = ApplicationDataSource::read(&ctx, &query).await.unwrap_err();
        assert!(matches!(err, ProviderError::BadResponse { .. }));
    }
}
