//! `azuread_application_app_role`: one app role on an application

use crate::error::{ProviderError, ProviderResult};
use crate::graph::models::AppRole;
use crate::reconcile::DeleteOutcome;
use crate::resources::ids::AppRoleId;
use crate::resources::{normalized_set, record_operation, ProviderContext, Resource, Validate};
use crate::validation::values;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

const ALLOWED_MEMBER_TYPES: &[&str] = &["User", "Application"];

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AppRoleConfig {
    /// Object ID of the application the role belongs to
    pub application_object_id: String,
    /// `User`, `Application` or both
    pub allowed_member_types: Vec<String>,
    pub description: String,
    pub display_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Generated when omitted
    #[serde(default)]
    pub role_id: Option<String>,
    /// Value of the `roles` claim
    #[serde(default)]
    pub value: Option<String>,
}

impl Validate for AppRoleConfig {
    fn validate(&self) -> ProviderResult<()> {
        values::uuid("application_object_id", &self.application_object_id)?;
        if self.allowed_member_types.is_empty() {
            return Err(ProviderError::validation(
                "allowed_member_types",
                "at least one member type is required",
            ));
        }
        for member_type in &self.allowed_member_types {
            values::one_of("allowed_member_types", member_type, ALLOWED_MEMBER_TYPES)?;
        }
        values::non_empty("description", &self.description)?;
        values::non_empty("display_name", &self.display_name)?;
        if let Some(role_id) = &self.role_id {
            values::uuid("role_id", role_id)?;
        }
        if let Some(value) = &self.value {
            values::claim_value("value", value)?;
        }
        Ok(())
    }
}

impl AppRoleConfig {
    fn to_model(&self, role_id: Option<String>) -> AppRole {
        AppRole {
            id: role_id,
            allowed_member_types: Some(normalized_set(&self.allowed_member_types)),
            description: Some(self.description.clone()),
            display_name: Some(self.display_name.clone()),
            is_enabled: Some(self.enabled),
            value: self.value.clone().filter(|v| !v.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRoleState {
    pub id: String,
    pub application_object_id: String,
    pub role_id: String,
    pub allowed_member_types: Vec<String>,
    pub description: String,
    pub display_name: String,
    pub enabled: bool,
    pub value: String,
}

impl AppRoleState {
    fn from_model(object_id: &str, role: &AppRole) -> ProviderResult<Self> {
        let role_id = role
            .id
            .clone()
            .ok_or_else(|| {
                ProviderError::bad_response("Reading app role", object_id, "app role has no ID")
            })?;
        Ok(Self {
            id: AppRoleId::new(object_id, &role_id).to_string(),
            application_object_id: object_id.to_string(),
            role_id,
            allowed_member_types: normalized_set(
                role.allowed_member_types.as_deref().unwrap_or_default(),
            ),
            description: role.description.clone().unwrap_or_default(),
            display_name: role.display_name.clone().unwrap_or_default(),
            enabled: role.is_enabled.unwrap_or(false),
            value: role.value.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug)]
pub struct AppRoleResource;

#[async_trait]
impl Resource for AppRoleResource {
    const KIND: &'static str = "azuread_application_app_role";

    type Config = AppRoleConfig;
    type State = AppRoleState;

    fn id(state: &Self::State) -> String {
        state.id.clone()
    }

    fn requires_replacement(prior: &Self::Config, desired: &Self::Config) -> bool {
        prior.application_object_id != desired.application_object_id
            || (desired.role_id.is_some() && prior.role_id != desired.role_id)
    }

    async fn create(ctx: &ProviderContext, config: &Self::Config) -> ProviderResult<Self::State> {
        config.validate()?;
        let object_id = &config.application_object_id;
        let created = ctx
            .sub_resources()
            .create(object_id, config.to_model(config.role_id.clone()))
            .await?;
        record_operation(Self::KIND, "create");
        AppRoleState::from_model(object_id, &created)
    }

    async fn read(ctx: &ProviderContext, id: &str) -> ProviderResult<Option<Self::State>> {
        let id: AppRoleId = id.parse()?;
        let role: Option<AppRole> = ctx.sub_resources().read(&id.object_id, &id.role_id).await?;
        match role {
            Some(role) => Ok(Some(AppRoleState::from_model(&id.object_id, &role)?)),
            None => {
                info!("App role {id} was not found, removing from state");
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
        let id: AppRoleId = id.parse()?;
        let updated = ctx
            .sub_resources()
            .update(&id.object_id, desired.to_model(Some(id.role_id.clone())))
            .await?;
        record_operation(Self::KIND, "update");
        updated
            .map(|role| AppRoleState::from_model(&id.object_id, &role))
            .transpose()
    }

    async fn delete(ctx: &ProviderContext, id: &str) -> ProviderResult<()> {
        let id: AppRoleId = id.parse()?;
        let outcome = ctx
            .sub_resources()
            .delete::<AppRole>(&id.object_id, &id.role_id)
            .await?;
        if outcome == DeleteOutcome::Gone {
            info!("App role {id} was already gone");
        }
        record_operation(Self::KIND, "delete");
        Ok(())
    }
}
