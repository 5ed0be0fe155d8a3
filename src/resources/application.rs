//! `azuread_application`: an application registration
//!
//! App roles and OAuth2 permission scopes can be managed inline here or as
//! separate sub-resources. Inline blocks replace the whole collection under the
//! application lock, so the two styles should not be mixed on one application.

use crate::error::{GraphResultExt, ProviderError, ProviderResult};
use crate::graph::models::{
    AppRole, Application, ApplicationApi, ApplicationWeb, ImplicitGrantSettings, OptionalClaim,
    OptionalClaims, PermissionScope, RequiredResourceAccess, ResourceAccess,
};
use crate::graph::{eq_filter, Directory};
use crate::reconcile::{reconcile_relationship, ApplicationOwners, ApplyOrder};
use crate::resources::{normalized_set, record_operation, ProviderContext, Resource, Validate};
use crate::validation::values;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, Instrument};

const GROUP_MEMBERSHIP_CLAIMS: &[&str] = &[
    "All",
    "None",
    "ApplicationGroup",
    "DirectoryRole",
    "SecurityGroup",
];
const SIGN_IN_AUDIENCES: &[&str] = &["AzureADMyOrg", "AzureADMultipleOrgs"];
const ALLOWED_MEMBER_TYPES: &[&str] = &["User", "Application"];
const SCOPE_TYPES: &[&str] = &["Admin", "User"];
const RESOURCE_ACCESS_TYPES: &[&str] = &["Role", "Scope"];
const CLAIM_SOURCES: &[&str] = &["user"];
const CLAIM_ADDITIONAL_PROPERTIES: &[&str] = &[
    "dns_domain_and_sam_account_name",
    "emit_as_roles",
    "netbios_domain_and_sam_account_name",
    "sam_account_name",
];

fn default_true() -> bool {
    true
}

fn default_scope_type() -> String {
    "User".to_string()
}

fn default_sign_in_audience() -> String {
    "AzureADMyOrg".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    #[serde(default)]
    pub oauth2_permission_scope: Vec<ScopeBlock>,
}

/// Inline OAuth2 permission scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScopeBlock {
    #[serde(default)]
    pub id: Option<String>,
    pub admin_consent_description: String,
    pub admin_consent_display_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_scope_type", rename = "type")]
    pub scope_type: String,
    #[serde(default)]
    pub user_consent_description: Option<String>,
    #[serde(default)]
    pub user_consent_display_name: Option<String>,
    pub value: String,
}

/// Inline app role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AppRoleBlock {
    #[serde(default)]
    pub id: Option<String>,
    pub allowed_member_types: Vec<String>,
    pub description: String,
    pub display_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OptionalClaimsConfig {
    #[serde(default)]
    pub access_token: Vec<OptionalClaimBlock>,
    #[serde(default)]
    pub id_token: Vec<OptionalClaimBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OptionalClaimBlock {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub essential: bool,
    #[serde(default)]
    pub additional_properties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RequiredResourceAccessBlock {
    pub resource_app_id: String,
    pub resource_access: Vec<ResourceAccessBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ResourceAccessBlock {
    pub id: String,
    /// `Role` or `Scope`
    #[serde(rename = "type")]
    pub access_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WebConfig {
    #[serde(default)]
    pub homepage_url: Option<String>,
    #[serde(default)]
    pub logout_url: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub implicit_grant: Option<ImplicitGrantConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ImplicitGrantConfig {
    #[serde(default)]
    pub access_token_issuance_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ApplicationConfig {
    pub display_name: String,
    #[serde(default)]
    pub api: Option<ApiConfig>,
    #[serde(default)]
    pub app_role: Vec<AppRoleBlock>,
    #[serde(default)]
    pub fallback_public_client_enabled: bool,
    /// `All`, `None`, `ApplicationGroup`, `DirectoryRole` or `SecurityGroup`
    #[serde(default)]
    pub group_membership_claims: Option<String>,
    #[serde(default)]
    pub identifier_uris: Vec<String>,
    #[serde(default)]
    pub optional_claims: Option<OptionalClaimsConfig>,
    /// Object IDs of the owners
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub required_resource_access: Vec<RequiredResourceAccessBlock>,
    #[serde(default = "default_sign_in_audience")]
    pub sign_in_audience: String,
    #[serde(default)]
    pub web: Option<WebConfig>,
    /// Fail instead of creating a second application with the same display name
    #[serde(default)]
    pub prevent_duplicate_names: bool,
}

impl ApplicationConfig {
    fn scopes(&self) -> &[ScopeBlock] {
        self.api
            .as_ref()
            .map(|api| api.oauth2_permission_scope.as_slice())
            .unwrap_or_default()
    }

    fn app_roles_model(&self) -> Vec<AppRole> {
        self.app_role
            .iter()
            .map(|role| AppRole {
                id: role.id.clone(),
                allowed_member_types: Some(normalized_set(&role.allowed_member_types)),
                description: Some(role.description.clone()),
                display_name: Some(role.display_name.clone()),
                is_enabled: Some(role.enabled),
                value: role.value.clone().filter(|v| !v.is_empty()),
            })
            .collect()
    }

    fn scopes_model(&self) -> Vec<PermissionScope> {
        self.scopes()
            .iter()
            .map(|scope| PermissionScope {
                id: scope.id.clone(),
                admin_consent_description: Some(scope.admin_consent_description.clone()),
                admin_consent_display_name: Some(scope.admin_consent_display_name.clone()),
                is_enabled: Some(scope.enabled),
                scope_type: Some(scope.scope_type.clone()),
                user_consent_description: scope.user_consent_description.clone(),
                user_consent_display_name: scope.user_consent_display_name.clone(),
                value: Some(scope.value.clone()),
            })
            .collect()
    }

    fn optional_claims_model(&self) -> OptionalClaims {
        let expand = |claims: &[OptionalClaimBlock]| {
            claims
                .iter()
                .map(|claim| OptionalClaim {
                    name: Some(claim.name.clone()),
                    essential: Some(claim.essential),
                    source: claim.source.clone(),
                    additional_properties: Some(claim.additional_properties.clone()),
                })
                .collect::<Vec<_>>()
        };
        let config = self.optional_claims.clone().unwrap_or_default();
        OptionalClaims {
            access_token: Some(expand(&config.access_token)),
            id_token: Some(expand(&config.id_token)),
        }
    }

    fn required_resource_access_model(&self) -> Vec<RequiredResourceAccess> {
        self.required_resource_access
            .iter()
            .map(|block| RequiredResourceAccess {
                resource_app_id: Some(block.resource_app_id.clone()),
                resource_access: Some(
                    block
                        .resource_access
                        .iter()
                        .map(|access| ResourceAccess {
                            id: Some(access.id.clone()),
                            access_type: Some(access.access_type.clone()),
                        })
                        .collect(),
                ),
            })
            .collect()
    }

    fn web_model(&self) -> ApplicationWeb {
        let web = self.web.clone().unwrap_or_default();
        ApplicationWeb {
            home_page_url: web.homepage_url,
            logout_url: web.logout_url,
            redirect_uris: Some(normalized_set(&web.redirect_uris)),
            implicit_grant_settings: Some(ImplicitGrantSettings {
                enable_access_token_issuance: Some(
                    web.implicit_grant
                        .is_some_and(|grant| grant.access_token_issuance_enabled),
                ),
            }),
        }
    }

    /// Every field except the role and scope collections
    fn scalar_model(&self) -> Application {
        Application {
            display_name: Some(self.display_name.clone()),
            group_membership_claims: Some(
                self.group_membership_claims
                    .clone()
                    .unwrap_or_else(|| "None".to_string()),
            ),
            identifier_uris: Some(self.identifier_uris.clone()),
            is_fallback_public_client: Some(self.fallback_public_client_enabled),
            optional_claims: Some(self.optional_claims_model()),
            required_resource_access: Some(self.required_resource_access_model()),
            sign_in_audience: Some(self.sign_in_audience.clone()),
            web: Some(self.web_model()),
            ..Default::default()
        }
    }

    /// Body for the initial POST, with generated role and scope IDs
    fn create_model(&self) -> Application {
        let with_id = |id: Option<String>| id.or_else(|| Some(uuid::Uuid::new_v4().to_string()));
        let app_roles = self
            .app_roles_model()
            .into_iter()
            .map(|role| AppRole {
                id: with_id(role.id.clone()),
                ..role
            })
            .collect();
        let scopes = self
            .scopes_model()
            .into_iter()
            .map(|scope| PermissionScope {
                id: with_id(scope.id.clone()),
                ..scope
            })
            .collect();
        Application {
            app_roles: Some(app_roles),
            api: Some(ApplicationApi {
                oauth2_permission_scopes: Some(scopes),
            }),
            group_membership_claims: self.group_membership_claims.clone(),
            ..self.scalar_model()
        }
    }
}

impl Validate for ApplicationConfig {
    fn validate(&self) -> ProviderResult<()> {
        values::non_empty("display_name", &self.display_name)?;

        for role in &self.app_role {
            if role.allowed_member_types.is_empty() {
                return Err(ProviderError::validation(
                    "app_role.allowed_member_types",
                    "at least one member type is required",
                ));
            }
            for member_type in &role.allowed_member_types {
                values::one_of("app_role.allowed_member_types", member_type, ALLOWED_MEMBER_TYPES)?;
            }
            values::non_empty("app_role.description", &role.description)?;
            values::non_empty("app_role.display_name", &role.display_name)?;
            if let Some(id) = &role.id {
                values::uuid("app_role.id", id)?;
            }
            if let Some(value) = &role.value {
                values::claim_value("app_role.value", value)?;
            }
        }

        for scope in self.scopes() {
            if let Some(id) = &scope.id {
                values::uuid("api.oauth2_permission_scope.id", id)?;
            }
            values::non_empty(
                "api.oauth2_permission_scope.admin_consent_description",
                &scope.admin_consent_description,
            )?;
            values::non_empty(
                "api.oauth2_permission_scope.admin_consent_display_name",
                &scope.admin_consent_display_name,
            )?;
            values::one_of("api.oauth2_permission_scope.type", &scope.scope_type, SCOPE_TYPES)?;
            values::claim_value("api.oauth2_permission_scope.value", &scope.value)?;
        }

        let role_values = self.app_role.iter().filter_map(|r| r.value.as_deref());
        let scope_values = self.scopes().iter().map(|s| s.value.as_str());
        values::unique_claim_values("app_role", role_values.chain(scope_values))?;

        if let Some(claims) = &self.group_membership_claims {
            values::one_of("group_membership_claims", claims, GROUP_MEMBERSHIP_CLAIMS)?;
        }
        for uri in &self.identifier_uris {
            values::app_uri("identifier_uris", uri)?;
        }
        if let Some(claims) = &self.optional_claims {
            for claim in claims.access_token.iter().chain(&claims.id_token) {
                values::non_empty("optional_claims.name", &claim.name)?;
                if let Some(source) = &claim.source {
                    values::one_of("optional_claims.source", source, CLAIM_SOURCES)?;
                }
                for property in &claim.additional_properties {
                    values::one_of(
                        "optional_claims.additional_properties",
                        property,
                        CLAIM_ADDITIONAL_PROPERTIES,
                    )?;
                }
            }
        }
        values::non_empty_each("owners", &self.owners)?;
        for block in &self.required_resource_access {
            values::non_empty("required_resource_access.resource_app_id", &block.resource_app_id)?;
            for access in &block.resource_access {
                values::uuid("required_resource_access.resource_access.id", &access.id)?;
                values::one_of(
                    "required_resource_access.resource_access.type",
                    &access.access_type,
                    RESOURCE_ACCESS_TYPES,
                )?;
            }
        }
        values::one_of("sign_in_audience", &self.sign_in_audience, SIGN_IN_AUDIENCES)?;
        if let Some(web) = &self.web {
            if let Some(url) = &web.homepage_url {
                values::http_url("web.homepage_url", url)?;
            }
            if let Some(url) = &web.logout_url {
                values::http_url("web.logout_url", url)?;
            }
            values::non_empty_each("web.redirect_uris", &web.redirect_uris)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationState {
    pub id: String,
    pub object_id: String,
    pub application_id: String,
    pub display_name: String,
    pub api: ApiConfig,
    pub app_role: Vec<AppRoleBlock>,
    pub fallback_public_client_enabled: bool,
    pub group_membership_claims: Option<String>,
    pub identifier_uris: Vec<String>,
    pub optional_claims: OptionalClaimsConfig,
    pub owners: Vec<String>,
    pub required_resource_access: Vec<RequiredResourceAccessBlock>,
    pub sign_in_audience: String,
    pub web: WebConfig,
}

impl ApplicationState {
    /// Flatten an application and its owners into state
    ///
    /// # Errors
    ///
    /// [`ProviderError::BadResponse`] when the application has no object ID
    pub fn from_model(application: &Application, owners: Vec<String>) -> ProviderResult<Self> {
        let object_id = application.id.clone().ok_or_else(|| {
            ProviderError::bad_response(
                "Reading application",
                application.display_name.as_deref().unwrap_or_default(),
                "object ID returned for application is empty",
            )
        })?;

        let app_role = application
            .app_roles()
            .iter()
            .map(|role| AppRoleBlock {
                id: role.id.clone(),
                allowed_member_types: normalized_set(
                    role.allowed_member_types.as_deref().unwrap_or_default(),
                ),
                description: role.description.clone().unwrap_or_default(),
                display_name: role.display_name.clone().unwrap_or_default(),
                enabled: role.is_enabled.unwrap_or(false),
                value: role.value.clone(),
            })
            .collect();

        let oauth2_permission_scope = application
            .oauth2_permission_scopes()
            .iter()
            .map(|scope| ScopeBlock {
                id: scope.id.clone(),
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
                user_consent_description: scope.user_consent_description.clone(),
                user_consent_display_name: scope.user_consent_display_name.clone(),
                value: scope.value.clone().unwrap_or_default(),
            })
            .collect();

        let flatten_claims = |claims: Option<&Vec<OptionalClaim>>| {
            claims
                .map(|claims| {
                    claims
                        .iter()
                        .map(|claim| OptionalClaimBlock {
                            name: claim.name.clone().unwrap_or_default(),
                            source: claim.source.clone(),
                            essential: claim.essential.unwrap_or(false),
                            additional_properties: claim
                                .additional_properties
                                .clone()
                                .unwrap_or_default(),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };
        let optional_claims = application
            .optional_claims
            .as_ref()
            .map(|claims| OptionalClaimsConfig {
                access_token: flatten_claims(claims.access_token.as_ref()),
                id_token: flatten_claims(claims.id_token.as_ref()),
            })
            .unwrap_or_default();

        let required_resource_access = application
            .required_resource_access
            .iter()
            .flatten()
            .map(|block| RequiredResourceAccessBlock {
                resource_app_id: block.resource_app_id.clone().unwrap_or_default(),
                resource_access: block
                    .resource_access
                    .iter()
                    .flatten()
                    .map(|access| ResourceAccessBlock {
                        id: access.id.clone().unwrap_or_default(),
                        access_type: access.access_type.clone().unwrap_or_default(),
                    })
                    .collect(),
            })
            .collect();

        let web = application
            .web
            .as_ref()
            .map(|web| WebConfig {
                homepage_url: web.home_page_url.clone(),
                logout_url: web.logout_url.clone(),
                redirect_uris: normalized_set(web.redirect_uris.as_deref().unwrap_or_default()),
                implicit_grant: Some(ImplicitGrantConfig {
                    access_token_issuance_enabled: web
                        .implicit_grant_settings
                        .as_ref()
                        .and_then(|grant| grant.enable_access_token_issuance)
                        .unwrap_or(false),
                }),
            })
            .unwrap_or_default();

        Ok(Self {
            id: object_id.clone(),
            object_id,
            application_id: application.app_id.clone().unwrap_or_default(),
            display_name: application.display_name.clone().unwrap_or_default(),
            api: ApiConfig {
                oauth2_permission_scope,
            },
            app_role,
            fallback_public_client_enabled: application.is_fallback_public_client.unwrap_or(false),
            group_membership_claims: application
                .group_membership_claims
                .clone()
                .filter(|claims| !claims.is_empty()),
            identifier_uris: application.identifier_uris.clone().unwrap_or_default(),
            optional_claims,
            owners: normalized_set(&owners),
            required_resource_access,
            sign_in_audience: application.sign_in_audience.clone().unwrap_or_default(),
            web,
        })
    }
}

/// Fail with [`ProviderError::DuplicateName`] when another application already uses `display_name`
async fn check_duplicate_name(
    directory: &dyn Directory,
    display_name: &str,
    own_id: Option<&str>,
) -> ProviderResult<()> {
    let existing = directory
        .list_applications(Some(&eq_filter("displayName", display_name)))
        .await
        .for_action("Checking for existing applications", display_name)?;
    for application in existing {
        let Some(id) = application.id else {
            return Err(ProviderError::bad_response(
                "Checking for existing applications",
                display_name,
                "API returned application with nil object ID during duplicate name check",
            ));
        };
        if own_id != Some(id.as_str()) {
            return Err(ProviderError::DuplicateName {
                resource_type: ApplicationResource::KIND,
                existing_id: id,
                display_name: display_name.to_string(),
            });
        }
    }
    Ok(())
}

async fn set_owners(
    ctx: &ProviderContext,
    object_id: &str,
    owners: &[String],
) -> ProviderResult<Vec<String>> {
    let relationship = ApplicationOwners {
        directory: &*ctx.directory,
        application_id: object_id,
    };
    let diff = reconcile_relationship(&relationship, owners, ApplyOrder::AddFirst).await?;
    debug!(
        "Owners of application {object_id}: +{} -{}",
        diff.additions.len(),
        diff.removals.len()
    );
    Ok(normalized_set(owners))
}

#[derive(Debug)]
pub struct ApplicationResource;

#[async_trait]
impl Resource for ApplicationResource {
    const KIND: &'static str = "azuread_application";

    type Config = ApplicationConfig;
    type State = ApplicationState;

    fn id(state: &Self::State) -> String {
        state.id.clone()
    }

    async fn create(ctx: &ProviderContext, config: &Self::Config) -> ProviderResult<Self::State> {
        config.validate()?;
        let span = info_span!("resource.application.create", display_name = %config.display_name);

        async move {
            if config.prevent_duplicate_names {
                check_duplicate_name(&*ctx.directory, &config.display_name, None).await?;
            }

            let created = ctx
                .directory
                .create_application(&config.create_model())
                .await
                .for_action("Creating application", &config.display_name)?;
            let object_id = created.id.clone().filter(|id| !id.is_empty()).ok_or_else(|| {
                ProviderError::bad_response(
                    "Creating application",
                    &config.display_name,
                    "object ID returned for application is nil/empty",
                )
            })?;
            info!("Created application {object_id} ({})", config.display_name);

            let owners = if config.owners.is_empty() {
                Vec::new()
            } else {
                set_owners(ctx, &object_id, &config.owners)
                    .await
                    .map_err(|e| ProviderError::created_with_errors(Self::KIND, &object_id, e))?
            };

            record_operation(Self::KIND, "create");
            ApplicationState::from_model(&created, owners)
        }
        .instrument(span)
        .await
    }

    async fn read(ctx: &ProviderContext, id: &str) -> ProviderResult<Option<Self::State>> {
        let application = match ctx.directory.get_application(id).await {
            Ok(application) => application,
            Err(e) if e.is_not_found() => {
                info!("Application with object ID {id} was not found, removing from state");
                return Ok(None);
            }
            Err(e) => return Err(ProviderError::api("Retrieving application", id, e)),
        };
        let owners = ctx
            .directory
            .list_application_owners(id)
            .await
            .for_action("Retrieving owners for application", id)?;
        Ok(Some(ApplicationState::from_model(&application, owners)?))
    }

    async fn update(
        ctx: &ProviderContext,
        id: &str,
        prior: &Self::Config,
        desired: &Self::Config,
    ) -> ProviderResult<Option<Self::State>> {
        desired.validate()?;
        let span = info_span!("resource.application.update", object.id = id);

        async move {
            if desired.prevent_duplicate_names {
                check_duplicate_name(&*ctx.directory, &desired.display_name, Some(id)).await?;
            }

            match ctx.directory.update_application(id, &desired.scalar_model()).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    info!("Application with object ID {id} was not found, removing from state");
                    return Ok(None);
                }
                Err(e) => return Err(ProviderError::api("Updating application", id, e)),
            }

            let reconciler = ctx.sub_resources();
            if desired.app_role != prior.app_role {
                reconciler.replace_all(id, desired.app_roles_model()).await?;
            }
            if desired.scopes() != prior.scopes() {
                reconciler.replace_all(id, desired.scopes_model()).await?;
            }
            set_owners(ctx, id, &desired.owners).await?;

            record_operation(Self::KIND, "update");
            Self::read(ctx, id).await
        }
        .instrument(span)
        .await
    }

    async fn delete(ctx: &ProviderContext, id: &str) -> ProviderResult<()> {
        match ctx.directory.get_application(id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(ProviderError::NotFound {
                    resource: "Application",
                    id: id.to_string(),
                });
            }
            Err(e) => return Err(ProviderError::api("Retrieving application", id, e)),
        }
        ctx.directory
            .delete_application(id)
            .await
            .for_action("Deleting application", id)?;
        info!("Deleted application {id}");
        record_operation(Self::KIND, "delete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryDirectory;
    use crate::replication::ReplicationPolicy;
    use std::sync::Arc;

    const OWNER_A: &str = "00000000-0000-0000-0000-00000000000a";
    const OWNER_B: &str = "00000000-0000-0000-0000-00000000000b";

    fn config(yaml: &str) -> ApplicationConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn context(directory: &Arc<InMemoryDirectory>) -> ProviderContext {
        ProviderContext::new(directory.clone()).with_replication(ReplicationPolicy::immediate(3))
    }

    #[test]
    fn test_duplicate_values_across_roles_and_scopes() {
        let config = config(
            r"
display_name: billing
app_role:
  - allowed_member_types: [User]
    description: d
    display_name: Reader
    value: read
api:
  oauth2_permission_scope:
    - admin_consent_description: d
      admin_consent_display_name: Read
      value: read
",
        );
        assert!(matches!(
            config.validate(),
            Err(ProviderError::Validation { ref attr, .. }) if attr == "app_role"
        ));
    }

    #[test]
    fn test_defaults() {
        let config = config("display_name: billing\n");
        assert_eq!(config.sign_in_audience, "AzureADMyOrg");
        assert!(!config.prevent_duplicate_names);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_homepage() {
        let config = config(
            r"
display_name: billing
web:
  homepage_url: ftp://example.com
",
        );
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_create_sets_owners_and_generates_role_ids() {
        let directory = Arc::new(InMemoryDirectory::new());
        let ctx = context(&directory);
        let config = config(&format!(
            r"
display_name: billing
owners: [{OWNER_A}, {OWNER_B}]
app_role:
  - allowed_member_types: [User]
    description: Readers
    display_name: Reader
    value: read
"
        ));

        let state = ApplicationResource::create(&ctx, &config).await.unwrap();
        assert_eq!(state.owners, vec![OWNER_A.to_string(), OWNER_B.to_string()]);
        assert!(state.app_role[0].id.is_some());
        assert_eq!(directory.owners_of(&state.object_id).len(), 2);
    }

    #[tokio::test]
    async fn test_prevent_duplicate_names() {
        let directory = Arc::new(InMemoryDirectory::new());
        let existing = directory.insert_application(Application {
            display_name: Some("billing".to_string()),
            ..Default::default()
        });
        let ctx = context(&directory);
        let config = config("display_name: billing\nprevent_duplicate_names: true\n");

        let err = ApplicationResource::create(&ctx, &config).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::DuplicateName { ref existing_id, .. } if *existing_id == existing
        ));
        assert_eq!(directory.call_count("create_application"), 0);
    }

    #[tokio::test]
    async fn test_update_replaces_enabled_roles() {
        let directory = Arc::new(InMemoryDirectory::new());
        let ctx = context(&directory);
        let prior = config(
            r"
display_name: billing
app_role:
  - allowed_member_types: [User]
    description: Readers
    display_name: Reader
    value: read
",
        );
        let desired = config(
            r"
display_name: billing-renamed
app_role:
  - allowed_member_types: [Application]
    description: Writers
    display_name: Writer
    value: write
",
        );

        let created = ApplicationResource::create(&ctx, &prior).await.unwrap();
        let updated = ApplicationResource::update(&ctx, &created.id, &prior, &desired)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.display_name, "billing-renamed");
        assert_eq!(updated.app_role.len(), 1);
        assert_eq!(updated.app_role[0].value.as_deref(), Some("write"));
    }

    #[tokio::test]
    async fn test_read_and_delete_missing() {
        let directory = Arc::new(InMemoryDirectory::new());
        let ctx = context(&directory);
        let missing = "00000000-0000-0000-0000-0000000000ff";

        assert!(ApplicationResource::read(&ctx, missing).await.unwrap().is_none());
        let err = ApplicationResource::delete(&ctx, missing).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
