//! `azuread_user`: a member user account

use crate::constants::MAX_USER_PASSWORD_LEN;
use crate::error::{GraphResultExt, ProviderError, ProviderResult};
use crate::graph::models::{PasswordProfile, Sensitive, User};
use crate::replication::wait_for_replication;
use crate::resources::{record_operation, ProviderContext, Resource, Validate};
use crate::validation::values;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Instrument};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    pub user_principal_name: String,
    pub display_name: String,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    /// Defaults to the part of the UPN before `@`
    #[serde(default)]
    pub mail_nickname: Option<String>,
    #[serde(default = "default_true")]
    pub account_enabled: bool,
    #[schemars(with = "String")]
    pub password: Sensitive,
    #[serde(default)]
    pub force_password_change: bool,
    #[serde(default)]
    pub onpremises_immutable_id: Option<String>,
    /// Two-letter country code
    #[serde(default)]
    pub usage_location: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub office_location: Option<String>,
    #[serde(default)]
    pub street_address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub mobile_phone: Option<String>,
}

impl Validate for UserConfig {
    fn validate(&self) -> ProviderResult<()> {
        values::email("user_principal_name", &self.user_principal_name)?;
        values::non_empty("display_name", &self.display_name)?;
        if let Some(nickname) = &self.mail_nickname {
            values::non_empty("mail_nickname", nickname)?;
        }
        values::length_between("password", self.password.expose(), 1, MAX_USER_PASSWORD_LEN)?;
        if let Some(location) = &self.usage_location {
            if location.len() != 2 || !location.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ProviderError::validation(
                    "usage_location",
                    format!("{location:?} must be a two-letter country code"),
                ));
            }
        }
        Ok(())
    }
}

impl UserConfig {
    fn effective_mail_nickname(&self) -> String {
        self.mail_nickname
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| {
                self.user_principal_name
                    .split('@')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            })
    }

    fn password_profile(&self) -> PasswordProfile {
        PasswordProfile {
            force_change_password_next_sign_in: Some(self.force_password_change),
            password: Some(self.password.clone()),
        }
    }

    fn to_model(&self) -> User {
        let optional = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
        User {
            account_enabled: Some(self.account_enabled),
            display_name: Some(self.display_name.clone()),
            mail_nickname: Some(self.effective_mail_nickname()),
            password_profile: Some(self.password_profile()),
            user_principal_name: Some(self.user_principal_name.clone()),
            given_name: optional(&self.given_name),
            surname: optional(&self.surname),
            usage_location: optional(&self.usage_location),
            on_premises_immutable_id: optional(&self.onpremises_immutable_id),
            job_title: optional(&self.job_title),
            department: optional(&self.department),
            company_name: optional(&self.company_name),
            office_location: optional(&self.office_location),
            street_address: optional(&self.street_address),
            city: optional(&self.city),
            state: optional(&self.state),
            country: optional(&self.country),
            postal_code: optional(&self.postal_code),
            mobile_phone: optional(&self.mobile_phone),
            ..Default::default()
        }
    }

    /// PATCH body carrying only what changed since `prior`
    fn patch_from(&self, prior: &Self) -> User {
        fn changed(prior: &Option<String>, desired: &Option<String>) -> Option<String> {
            (prior != desired).then(|| desired.clone().unwrap_or_default())
        }

        User {
            user_principal_name: (prior.user_principal_name != self.user_principal_name)
                .then(|| self.user_principal_name.clone()),
            display_name: (prior.display_name != self.display_name)
                .then(|| self.display_name.clone()),
            mail_nickname: (prior.effective_mail_nickname() != self.effective_mail_nickname())
                .then(|| self.effective_mail_nickname()),
            account_enabled: (prior.account_enabled != self.account_enabled)
                .then_some(self.account_enabled),
            password_profile: (prior.password != self.password).then(|| self.password_profile()),
            given_name: changed(&prior.given_name, &self.given_name),
            surname: changed(&prior.surname, &self.surname),
            usage_location: changed(&prior.usage_location, &self.usage_location),
            on_premises_immutable_id: changed(
                &prior.onpremises_immutable_id,
                &self.onpremises_immutable_id,
            ),
            job_title: changed(&prior.job_title, &self.job_title),
            department: changed(&prior.department, &self.department),
            company_name: changed(&prior.company_name, &self.company_name),
            office_location: changed(&prior.office_location, &self.office_location),
            street_address: changed(&prior.street_address, &self.street_address),
            city: changed(&prior.city, &self.city),
            state: changed(&prior.state, &self.state),
            country: changed(&prior.country, &self.country),
            postal_code: changed(&prior.postal_code, &self.postal_code),
            mobile_phone: changed(&prior.mobile_phone, &self.mobile_phone),
            ..Default::default()
        }
    }
}

/// What is read back; the password is never returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    pub id: String,
    pub object_id: String,
    pub user_principal_name: String,
    pub display_name: String,
    pub given_name: String,
    pub surname: String,
    pub mail: String,
    pub mail_nickname: String,
    pub account_enabled: bool,
    pub user_type: String,
    pub onpremises_immutable_id: String,
    pub onpremises_sam_account_name: String,
    pub onpremises_user_principal_name: String,
    pub usage_location: String,
    pub job_title: String,
    pub department: String,
    pub company_name: String,
    pub office_location: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub postal_code: String,
    pub mobile_phone: String,
}

impl UserState {
    /// # Errors
    ///
    /// [`ProviderError::BadResponse`] when the user has no object ID
    pub fn from_model(user: &User) -> ProviderResult<Self> {
        let object_id = user.id.clone().filter(|id| !id.is_empty()).ok_or_else(|| {
            ProviderError::bad_response(
                "Reading user",
                user.user_principal_name.as_deref().unwrap_or_default(),
                "API returned user with nil object ID",
            )
        })?;
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        Ok(Self {
            id: object_id.clone(),
            object_id,
            user_principal_name: text(&user.user_principal_name),
            display_name: text(&user.display_name),
            given_name: text(&user.given_name),
            surname: text(&user.surname),
            mail: text(&user.mail),
            mail_nickname: text(&user.mail_nickname),
            account_enabled: user.account_enabled.unwrap_or(false),
            user_type: text(&user.user_type),
            onpremises_immutable_id: text(&user.on_premises_immutable_id),
            onpremises_sam_account_name: text(&user.on_premises_sam_account_name),
            onpremises_user_principal_name: text(&user.on_premises_user_principal_name),
            usage_location: text(&user.usage_location),
            job_title: text(&user.job_title),
            department: text(&user.department),
            company_name: text(&user.company_name),
            office_location: text(&user.office_location),
            street_address: text(&user.street_address),
            city: text(&user.city),
            state: text(&user.state),
            country: text(&user.country),
            postal_code: text(&user.postal_code),
            mobile_phone: text(&user.mobile_phone),
        })
    }
}

#[derive(Debug)]
pub struct UserResource;

#[async_trait]
impl Resource for UserResource {
    const KIND: &'static str = "azuread_user";

    type Config = UserConfig;
    type State = UserState;

    fn id(state: &Self::State) -> String {
        state.id.clone()
    }

    async fn create(ctx: &ProviderContext, config: &Self::Config) -> ProviderResult<Self::State> {
        config.validate()?;
        let upn = config.user_principal_name.as_str();
        let span = info_span!("resource.user.create", user.upn = upn);

        async move {
            let created = ctx
                .directory
                .create_user(&config.to_model())
                .await
                .for_action("Creating user", upn)?;
            let object_id = created.id.clone().filter(|id| !id.is_empty()).ok_or_else(|| {
                ProviderError::bad_response(
                    "Creating user",
                    upn,
                    "API returned user with nil object ID",
                )
            })?;
            info!("Created user {object_id} ({upn})");

            let state = wait_for_replication("user", &object_id, &ctx.replication, || {
                ctx.directory.get_user(&object_id)
            })
            .await
            .and_then(|replicated| UserState::from_model(&replicated))
            .map_err(|e| ProviderError::created_with_errors(Self::KIND, &object_id, e))?;

            record_operation(Self::KIND, "create");
            Ok(state)
        }
        .instrument(span)
        .await
    }

    async fn read(ctx: &ProviderContext, id: &str) -> ProviderResult<Option<Self::State>> {
        match ctx.directory.get_user(id).await {
            Ok(user) => Ok(Some(UserState::from_model(&user)?)),
            Err(e) if e.is_not_found() => {
                info!("User with object ID {id} was not found, removing from state");
                Ok(None)
            }
            Err(e) => Err(ProviderError::api("Retrieving user", id, e)),
        }
    }

    async fn update(
        ctx: &ProviderContext,
        id: &str,
        prior: &Self::Config,
        desired: &Self::Config,
    ) -> ProviderResult<Option<Self::State>> {
        desired.validate()?;
        let patch = desired.patch_from(prior);

        if patch != User::default() {
            match ctx.directory.update_user(id, &patch).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    info!("User with object ID {id} was not found, removing from state");
                    return Ok(None);
                }
                Err(e) => return Err(ProviderError::api("Updating user", id, e)),
            }
            record_operation(Self::KIND, "update");
        }
        Self::read(ctx, id).await
    }

    async fn delete(ctx: &ProviderContext, id: &str) -> ProviderResult<()> {
        match ctx.directory.get_user(id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(ProviderError::NotFound {
                    resource: "User",
                    id: id.to_string(),
                });
            }
            Err(e) => return Err(ProviderError::api("Retrieving user", id, e)),
        }
        ctx.directory
            .delete_user(id)
            .await
            .for_action("Deleting user", id)?;
        info!("Deleted user {id}");
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

    fn config() -> UserConfig {
        serde_yaml::from_str(
            r"
user_principal_name: jdoe@example.com
display_name: J. Doe
password: Sup3rSecret!
",
        )
        .unwrap()
    }

    #[test]
    fn test_mail_nickname_defaults_to_upn_prefix() {
        let config = config();
        assert_eq!(config.to_model().mail_nickname.as_deref(), Some("jdoe"));
        assert_eq!(config.to_model().account_enabled, Some(true));
    }

    #[test]
    fn test_patch_carries_only_changes() {
        let prior = config();
        let mut desired = prior.clone();
        desired.job_title = Some("Engineer".to_string());

        let patch = desired.patch_from(&prior);
        assert_eq!(patch.job_title.as_deref(), Some("Engineer"));
        assert!(patch.password_profile.is_none());
        assert!(patch.display_name.is_none());

        desired.password = Sensitive::new("An0therSecret!");
        assert!(desired.patch_from(&prior).password_profile.is_some());
    }

    #[test]
    fn test_rejects_bad_upn_and_password() {
        let mut bad = config();
        bad.user_principal_name = "jdoe".to_string();
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.password = Sensitive::new("x".repeat(MAX_USER_PASSWORD_LEN + 1));
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.set_replication_lag(1);
        let ctx = ProviderContext::new(directory.clone())
            .with_replication(ReplicationPolicy::immediate(3));

        let state = UserResource::create(&ctx, &config()).await.unwrap();
        assert_eq!(state.mail_nickname, "jdoe");
        assert_eq!(state.user_type, "Member");

        let read = UserResource::read(&ctx, &state.id).await.unwrap().unwrap();
        assert_eq!(read, state);
    }
}
