//! `azuread_application_oauth2_permission_scope`: one delegated permission
//! exposed by an application

use crate::error::{ProviderError, ProviderResult};
use crate::graph::models::PermissionScope;
use crate::reconcile::DeleteOutcome;
use crate::resources::ids::ScopeId;
use crate::resources::{record_operation, ProviderContext, Resource, Validate};
use crate::validation::values;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

const SCOPE_TYPES: &[&str] = &["Admin", "User"];

fn default_true() -> bool {
    true
}

fn default_scope_type() -> String {
    "User".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PermissionScopeConfig {
    pub application_object_id: String,
    pub admin_consent_description: String,
    pub admin_consent_display_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Generated when omitted
    #[serde(default)]
    pub scope_id: Option<String>,
    /// `Admin` or `User`
    #[serde(default = "default_scope_type", rename = "type")]
    pub scope_type: String,
    #[serde(default)]
    pub user_consent_description: Option<String>,
    #[serde(default)]
    pub user_consent_display_name: Option<String>,
    /// Value of the `scp` claim
    pub value: String,
}

impl Validate for PermissionScopeConfig {
    fn validate(&self) -> ProviderResult<()> {
        values::uuid("application_object_id", &self.application_object_id)?;
        values::non_empty("admin_consent_description", &self.admin_consent_description)?;
        values::non_empty("admin_consent_display_name", &self.admin_consent_display_name)?;
        values::one_of("type", &self.scope_type, SCOPE_TYPES)?;
        if let Some(scope_id) = &self.scope_id {
            values::uuid("scope_id", scope_id)?;
        }
        if let Some(description) = &self.user_consent_description {
            values::non_empty("user_consent_description", description)?;
        }
        if let Some(display_name) = &self.user_consent_display_name {
            values::non_empty("user_consent_display_name", display_name)?;
        }
        values::claim_value("value", &self.value)
    }
}

impl PermissionScopeConfig {
    fn to_model(&self, scope_id: Option<String>) -> PermissionScope {
        PermissionScope {
            id: scope_id,
            admin_consent_description: Some(self.admin_consent_description.clone()),
            admin_consent_display_name: Some(self.admin_consent_display_name.clone()),
            is_enabled: Some(self.enabled),
            scope_type: Some(self.scope_type.clone()),
            user_consent_description: self.user_consent_description.clone(),
            user_consent_display_name: self.user_consent_display_name.clone(),
            value: Some(self.value.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionScopeState {
    pub id: String,
    pub application_object_id: String,
    pub scope_id: String,
    pub admin_consent_description: String,
    pub admin_consent_display_name: String,
    pub enabled: bool,
    #[serde(rename = "type")]
    pub scope_type: String,
    pub user_consent_description: String,
    pub user_consent_display_name: String,
    pub value: String,
}

impl PermissionScopeState {
    fn from_model(object_id: &str, scope: &PermissionScope) -> ProviderResult<Self> {
        let scope_id = scope.id.clone().ok_or_else(|| {
            ProviderError::bad_response(
                "Reading OAuth2 permission scope",
                object_id,
                "scope has no ID",
            )
        })?;
        Ok(Self {
            id: ScopeId::new(object_id, &scope_id).to_string(),
            application_object_id: object_id.to_string(),
            scope_id,
            admin_consent_description: scope
                .admin_consent_description
                .clone()
                .unwrap_or_default(),
            admin_consent_display_name: scope
                .admin_consent_display_name
                .clone()
                .unwrap_or_default(),
            enabled: scope.is_enabled.unwrap_or(false),
            scope_type: scope.scope_type.clone().unwrap_or_default(),
            user_consent_description: scope.user_consent_description.clone().unwrap_or_default(),
            user_consent_display_name: scope.user_consent_display_name.clone().unwrap_or_default(),
            value: scope.value.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug)]
pub struct PermissionScopeResource;

#[async_trait]
impl Resource for PermissionScopeResource {
    const KIND: &'static str = "azuread_application_oauth2_permission_scope";

    type Config = PermissionScopeConfig;
    type State = PermissionScopeState;

    fn id(state: &Self::State) -> String {
        state.id.clone()
    }

    fn requires_replacement(prior: &Self::Config, desired: &Self::Config) -> bool {
        prior.application_object_id != desired.application_object_id
            || (desired.scope_id.is_some() && prior.scope_id != desired.scope_id)
    }

    async fn create(ctx: &ProviderContext, config: &Self::Config) -> ProviderResult<Self::State> {
        config.validate()?;
        let object_id = &config.application_object_id;
        let created = ctx
            .sub_resources()
            .create(object_id, config.to_model(config.scope_id.clone()))
            .await?;
        record_operation(Self::KIND, "create");
        PermissionScopeState::from_model(object_id, &created)
    }

    async fn read(ctx: &ProviderContext, id: &str) -> ProviderResult<Option<Self::State>> {
        let id: ScopeId = id.parse()?;
        let scope: Option<PermissionScope> =
            ctx.sub_resources().read(&id.object_id, &id.scope_id).await?;
        match scope {
            Some(scope) => Ok(Some(PermissionScopeState::from_model(&id.object_id, &scope)?)),
            None => {
                info!("OAuth2 permission scope {id} was not found, removing from state");
                Ok(None)
            }
        }
    }

    async fn update(
        ctx: &ProviderContext,
        id: &str,
        _prior: &Self::Config,
        desired: &Self::Config,
    ) -> ProviderResult<Option<Self::State>> {
        desired.validate()?;
        let id: ScopeId = id.parse()?;
        let updated = ctx
            .sub_resources()
            .update(&id.object_id, desired.to_model(Some(id.scope_id.clone())))
            .await?;
        record_operation(Self::KIND, "update");
        updated
            .map(|scope| PermissionScopeState::from_model(&id.object_id, &scope))
            .transpose()
    }

    async fn delete(ctx: &ProviderContext, id: &str) -> ProviderResult<()> {
        let id: ScopeId = id.parse()?;
        let outcome = ctx
            .sub_resources()
            .delete::<PermissionScope>(&id.object_id, &id.scope_id)
            .await?;
        if outcome == DeleteOutcome::Gone {
            info!("OAuth2 permission scope {id} was already gone");
        }
        record_operation(Self::KIND, "delete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_and_validate() {
        let yaml = r#"
application_object_id: 00000000-0000-0000-0000-0000000000aa
admin_consent_description: Allow the app to read files
admin_consent_display_name: Read files
type: Admin
value: "Files.Read"
"#;
        let config: PermissionScopeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.scope_type, "Admin");
        assert!(config.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_type() {
        let yaml = r"
application_object_id: 00000000-0000-0000-0000-0000000000aa
admin_consent_description: d
admin_consent_display_name: n
type: Everyone
value: read
";
        let config: PermissionScopeConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ProviderError::Validation { ref attr, .. }) if attr == "type"
        ));
    }

    #[test]
    fn test_value_is_required() {
        let yaml = r"
application_object_id: 00000000-0000-0000-0000-0000000000aa
admin_consent_description: d
admin_consent_display_name: n
";
        assert!(serde_yaml::from_str::<PermissionScopeConfig>(yaml).is_err());
    }
}
