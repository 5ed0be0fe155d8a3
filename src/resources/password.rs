//! `azuread_application_password`: a client secret on an application

use crate::constants::MAX_APPLICATION_PASSWORD_LEN;
use crate::error::{ProviderError, ProviderResult};
use crate::graph::models::{PasswordCredential, Sensitive};
use crate::reconcile::DeleteOutcome;
use crate::resources::credential_dates::{self, format_date};
use crate::resources::ids::{CredentialId, CredentialKind};
use crate::resources::{record_operation, ProviderContext, Resource, Validate};
use crate::validation::values;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PasswordConfig {
    pub application_object_id: String,
    /// Generated when omitted
    #[serde(default)]
    pub key_id: Option<String>,
    /// Shown as the credential's display name
    #[serde(default)]
    pub description: Option<String>,
    #[schemars(with = "String")]
    pub value: Sensitive,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub end_date_relative: Option<String>,
}

impl Validate for PasswordConfig {
    fn validate(&self) -> ProviderResult<()> {
        values::uuid("application_object_id", &self.application_object_id)?;
        if let Some(key_id) = &self.key_id {
            values::uuid("key_id", key_id)?;
        }
        if let Some(description) = &self.description {
            values::non_empty("description", description)?;
        }
        values::length_between("value", self.value.expose(), 1, MAX_APPLICATION_PASSWORD_LEN)?;
        credential_dates::validate(
            self.start_date.as_deref(),
            self.end_date.as_deref(),
            self.end_date_relative.as_deref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordState {
    pub id: String,
    pub application_object_id: String,
    pub key_id: String,
    pub description: String,
    pub start_date: String,
    pub end_date: String,
}

impl PasswordState {
    fn from_model(object_id: &str, credential: &PasswordCredential) -> ProviderResult<Self> {
        let key_id = credential.key_id.clone().ok_or_else(|| {
            ProviderError::bad_response(
                "Reading password credential",
                object_id,
                "credential has no key ID",
            )
        })?;
        Ok(Self {
            id: CredentialId::new(object_id, CredentialKind::Password, &key_id).to_string(),
            application_object_id: object_id.to_string(),
            key_id,
            description: credential.display_name.clone().unwrap_or_default(),
            start_date: credential.start_date_time.map(format_date).unwrap_or_default(),
            end_date: credential.end_date_time.map(format_date).unwrap_or_default(),
        })
    }
}

#[derive(Debug)]
pub struct PasswordResource;

#[async_trait]
impl Resource for PasswordResource {
    const KIND: &'static str = "azuread_application_password";

    type Config = PasswordConfig;
    type State = PasswordState;

    fn id(state: &Self::State) -> String {
        state.id.clone()
    }

    fn requires_replacement(prior: &Self::Config, desired: &Self::Config) -> bool {
        prior != desired
    }

    async fn create(ctx: &ProviderContext, config: &Self::Config) -> ProviderResult<Self::State> {
        config.validate()?;
        let window = credential_dates::resolve(
            config.start_date.as_deref(),
            config.end_date.as_deref(),
            config.end_date_relative.as_deref(),
            chrono::Utc::now(),
        )?;

        let credential = PasswordCredential {
            key_id: config.key_id.clone(),
            display_name: config.description.clone(),
            start_date_time: window.start,
            end_date_time: window.end,
            hint: None,
            secret_text: Some(config.value.clone()),
        };

        let object_id = &config.application_object_id;
        let created = ctx.sub_resources().create(object_id, credential).await?;
        record_operation(Self::KIND, "create");
        PasswordState::from_model(object_id, &created)
    }

    async fn read(ctx: &ProviderContext, id: &str) -> ProviderResult<Option<Self::State>> {
        let id = CredentialId::parse_kind(id, CredentialKind::Password)?;
        let credential: Option<PasswordCredential> =
            ctx.sub_resources().read(&id.object_id, &id.key_id).await?;
        match credential {
            Some(credential) => Ok(Some(PasswordState::from_model(&id.object_id, &credential)?)),
            None => {
                info!("Password credential {id} was not found, removing from state");
                Ok(None)
            }
        }
    }

    async fn update(
        ctx: &ProviderContext,
        id: &str,
        _prior: &Self::Config,
        _desired: &Self::Config,
    ) -> ProviderResult<Option<Self::State>> {
        Self::read(ctx, id).await
    }

    async fn delete(ctx: &ProviderContext, id: &str) -> ProviderResult<()> {
        let id = CredentialId::parse_kind(id, CredentialKind::Password)?;
        let outcome = ctx
            .sub_resources()
            .delete::<PasswordCredential>(&id.object_id, &id.key_id)
            .await?;
        if outcome == DeleteOutcome::Gone {
            info!("Password credential {id} was already gone");
        }
        record_operation(Self::KIND, "delete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(value: &str) -> PasswordConfig {
        PasswordConfig {
            application_object_id: "00000000-0000-0000-0000-0000000000aa".to_string(),
            key_id: None,
            description: Some("ci".to_string()),
            value: Sensitive::new(value),
            start_date: None,
            end_date: Some("2031-01-01T00:00:00Z".to_string()),
            end_date_relative: None,
        }
    }

    #[test]
    fn test_value_length_bounds() {
        assert!(config("s3cret").validate().is_ok());
        assert!(config("").validate().is_err());
        assert!(config(&"x".repeat(MAX_APPLICATION_PASSWORD_LEN + 1))
            .validate()
            .is_err());
    }

    #[test]
    fn test_debug_redacts_value() {
        assert!(!format!("{:?}", config("s3cret")).contains("s3cret"));
    }
}
