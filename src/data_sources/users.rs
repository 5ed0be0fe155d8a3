//! `azuread_users` data source

use crate::data_sources::{exactly_one_of, DataSource};
use crate::error::{GraphResultExt, ProviderError, ProviderResult};
use crate::graph::eq_filter;
use crate::graph::models::User;
use crate::resources::{ProviderContext, Validate};
use crate::validation::values;
use async_trait::async_trait;
use base64::Engine;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UsersQuery {
    #[serde(default)]
    pub object_ids: Vec<String>,
    #[serde(default)]
    pub user_principal_names: Vec<String>,
    #[serde(default)]
    pub mail_nicknames: Vec<String>,
    /// Skip lookups that match nothing instead of failing
    #[serde(default)]
    pub ignore_missing: bool,
}

impl Validate for UsersQuery {
    fn validate(&self) -> ProviderResult<()> {
        exactly_one_of(&[
            ("object_ids", !self.object_ids.is_empty()),
            ("user_principal_names", !self.user_principal_names.is_empty()),
            ("mail_nicknames", !self.mail_nicknames.is_empty()),
        ])?;
        values::uuid_each("object_ids", &self.object_ids)?;
        values::non_empty_each("user_principal_names", &self.user_principal_names)?;
        values::non_empty_each("mail_nicknames", &self.mail_nicknames)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub account_enabled: bool,
    pub display_name: String,
    pub mail: String,
    pub mail_nickname: String,
    pub object_id: String,
    pub onpremises_immutable_id: String,
    pub onpremises_sam_account_name: String,
    pub onpremises_user_principal_name: String,
    pub usage_location: String,
    pub user_principal_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersOutput {
    pub id: String,
    pub object_ids: Vec<String>,
    pub user_principal_names: Vec<String>,
    pub mail_nicknames: Vec<String>,
    pub users: Vec<UserEntry>,
}

/// `users#` followed by the URL-safe base64 SHA-256 of the UPNs joined by `-`
#[must_use]
pub fn users_id(upns: &[String]) -> String {
    let digest = Sha256::digest(upns.join("-").as_bytes());
    format!(
        "users#{}",
        base64::engine::general_purpose::URL_SAFE.encode(digest)
    )
}

/// Find the single user matching `field eq value`
async fn find_one(
    ctx: &ProviderContext,
    attr: &str,
    field: &str,
    value: &str,
) -> ProviderResult<Option<User>> {
    let filter = eq_filter(field, value);
    let mut found = ctx
        .directory
        .list_users(Some(&filter))
        .await
        .for_action(format!("Finding user with {field}"), value)?;
    if found.len() > 1 {
        return Err(ProviderError::validation(
            attr,
            format!("more than one user found with {field} {value:?}"),
        ));
    }
    Ok(found.pop())
}

#[derive(Debug)]
pub struct UsersDataSource;

#[async_trait]
impl DataSource for UsersDataSource {
    const NAME: &'static str = "azuread_users";

    type Query = UsersQuery;
    type Output = UsersOutput;

    async fn read(ctx: &ProviderContext, query: &Self::Query) -> ProviderResult<Self::Output> {
        query.validate()?;
        let mut users = Vec::new();

        let expected = if !query.object_ids.is_empty() {
            for object_id in &query.object_ids {
                match ctx.directory.get_user(object_id).await {
                    Ok(user) => users.push(user),
                    Err(e) if e.is_not_found() && query.ignore_missing => {
                        debug!("Ignoring missing user {object_id}");
                    }
                    Err(e) if e.is_not_found() => {
                        return Err(ProviderError::NotFound {
                            resource: "User",
                            id: object_id.clone(),
                        });
                    }
                    Err(e) => return Err(ProviderError::api("Retrieving user", object_id, e)),
                }
            }
            query.object_ids.len()
        } else {
            let (attr, field, lookups) = if query.user_principal_names.is_empty() {
                ("mail_nicknames", "mailNickname", &query.mail_nicknames)
            } else {
                ("user_principal_names", "userPrincipalName", &query.user_principal_names)
            };
            for value in lookups {
                match find_one(ctx, attr, field, value).await? {
                    Some(user) => users.push(user),
                    None if query.ignore_missing => debug!("Ignoring missing user {value}"),
                    None => {
                        return Err(ProviderError::NotFound {
                            resource: "User",
                            id: value.clone(),
                        });
                    }
                }
            }
            lookups.len()
        };

        if !query.ignore_missing && users.len() != expected {
            return Err(ProviderError::bad_response(
                "Listing users",
                "",
                format!(
                    "unexpected number of users returned, expected {expected}, got {}",
                    users.len()
                ),
            ));
        }

        let mut output = UsersOutput {
            id: String::new(),
            object_ids: Vec::with_capacity(users.len()),
            user_principal_names: Vec::with_capacity(users.len()),
            mail_nicknames: Vec::new(),
            users: Vec::with_capacity(users.len()),
        };
        for user in users {
            let (Some(object_id), Some(upn)) = (user.id.clone(), user.user_principal_name.clone())
            else {
                return Err(ProviderError::bad_response(
                    "Listing users",
                    user.id.as_deref().unwrap_or_default(),
                    "API returned user with nil object ID or userPrincipalName",
                ));
            };
            if let Some(nickname) = &user.mail_nickname {
                output.mail_nicknames.push(nickname.clone());
            }
            let text = |value: &Option<String>| value.clone().unwrap_or_default();
            output.users.push(UserEntry {
                account_enabled: user.account_enabled.unwrap_or(false),
                display_name: text(&user.display_name),
                mail: text(&user.mail),
                mail_nickname: text(&user.mail_nickname),
                object_id: object_id.clone(),
                onpremises_immutable_id: text(&user.on_premises_immutable_id),
                onpremises_sam_account_name: text(&user.on_premises_sam_account_name),
                onpremises_user_principal_name: text(&user.on_premises_user_principal_name),
                usage_location: text(&user.usage_location),
                user_principal_name: upn.clone(),
            });
            output.object_ids.push(object_id);
            output.user_principal_names.push(upn);
        }
        output.id = users_id(&output.user_principal_names);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryDirectory;
    use std::sync::Arc;

    fn seeded() -> (ProviderContext, String) {
        let directory = Arc::new(InMemoryDirectory::new());
        let id = directory.insert_user(User {
            user_principal_name: Some("jdoe@example.com".to_string()),
            mail_nickname: Some("jdoe".to_string()),
            display_name: Some("J. Doe".to_string()),
            account_enabled: Some(true),
            ..Default::default()
        });
        directory.insert_user(User {
            user_principal_name: Some("asmith@example.com".to_string()),
            mail_nickname: Some("asmith".to_string()),
            ..Default::default()
        });
        (ProviderContext::new(directory), id)
    }

    #[test]
    fn test_id_is_stable() {
        let upns = vec!["a@example.com".to_string(), "b@example.com".to_string()];
        let id = users_id(&upns);
        assert!(id.starts_with("users#"));
        assert_eq!(id, users_id(&upns));
        assert_ne!(id, users_id(&upns[..1]));
    }

    #[tokio::test]
    async fn test_lookup_by_upn() {
        let (ctx, id) = seeded();
        let query = UsersQuery {
            user_principal_names: vec!["jdoe@example.com".to_string()],
            ..Default::default()
        };
        let output = UsersDataSource::read(&ctx, &query).await.unwrap();
        assert_eq!(output.object_ids, vec![id]);
        assert_eq!(output.mail_nicknames, vec!["jdoe".to_string()]);
        assert_eq!(output.id, users_id(&["jdoe@example.com".to_string()]));
    }

    #[tokio::test]
    async fn test_missing_user() {
        let (ctx, _) = seeded();
        let mut query = UsersQuery {
            mail_nicknames: vec!["jdoe".to_string(), "nobody".to_string()],
            ..Default::default()
        };
        let err = UsersDataSource::read(&ctx, &query).await.unwrap_err();
        assert!(err.is_not_found());

        query.ignore_missing = true;
        let output = UsersDataSource::read(&ctx, &query).await.unwrap();
        assert_eq!(output.users.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_object_id() {
        let (ctx, _) = seeded();
        let query = UsersQuery {
            object_ids: vec!["00000000-0000-0000-0000-0000000000ff".to_string()],
            ..Default::default()
        };
        assert!(UsersDataSource::read(&ctx, &query).await.unwrap_err().is_not_found());
    }
}
