//! `azuread_group`: a security group with its owners and members

use crate::error::{GraphResultExt, ProviderError, ProviderResult};
use crate::graph::models::Group;
use crate::graph::{eq_filter, Directory};
use crate::reconcile::{reconcile_relationship, ApplyOrder, GroupMembers, GroupOwners};
use crate::replication::wait_for_replication;
use crate::resources::{normalized_set, record_operation, ProviderContext, Resource, Validate};
use crate::validation::values;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Object IDs of users, groups or service principals
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub prevent_duplicate_names: bool,
}

impl Validate for GroupConfig {
    fn validate(&self) -> ProviderResult<()> {
        values::non_empty("display_name", &self.display_name)?;
        values::uuid_each("members", &self.members)?;
        values::uuid_each("owners", &self.owners)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupState {
    pub id: String,
    pub object_id: String,
    pub display_name: String,
    pub description: String,
    pub mail_enabled: bool,
    pub security_enabled: bool,
    pub members: Vec<String>,
    pub owners: Vec<String>,
}

impl GroupState {
    fn from_model(id: &str, group: &Group, owners: &[String], members: &[String]) -> Self {
        Self {
            id: id.to_string(),
            object_id: id.to_string(),
            display_name: group.display_name.clone().unwrap_or_default(),
            description: group.description.clone().unwrap_or_default(),
            mail_enabled: group.mail_enabled.unwrap_or(false),
            security_enabled: group.security_enabled.unwrap_or(false),
            members: normalized_set(members),
            owners: normalized_set(owners),
        }
    }
}

async fn check_duplicate_name(
    directory: &dyn Directory,
    display_name: &str,
    own_id: Option<&str>,
) -> ProviderResult<()> {
    let existing = directory
        .list_groups(Some(&eq_filter("displayName", display_name)))
        .await
        .for_action("Checking for existing groups", display_name)?;
    for group in existing {
        let Some(id) = group.id else {
            return Err(ProviderError::bad_response(
                "Checking for existing groups",
                display_name,
                "API returned group with nil object ID during duplicate name check",
            ));
        };
        if own_id != Some(id.as_str()) {
            return Err(ProviderError::DuplicateName {
                resource_type: GroupResource::KIND,
                existing_id: id,
                display_name: display_name.to_string(),
            });
        }
    }
    Ok(())
}

async fn relationships(
    ctx: &ProviderContext,
    id: &str,
) -> ProviderResult<(Vec<String>, Vec<String>)> {
    let owners = ctx
        .directory
        .list_group_owners(id)
        .await
        .for_action("Retrieving owners for group", id)?;
    let members = ctx
        .directory
        .list_group_members(id)
        .await
        .for_action("Retrieving members for group", id)?;
    Ok((owners, members))
}

#[derive(Debug)]
pub struct GroupResource;

#[async_trait]
impl Resource for GroupResource {
    const KIND: &'static str = "azuread_group";

    type Config = GroupConfig;
    type State = GroupState;

    fn id(state: &Self::State) -> String {
        state.id.clone()
    }

    async fn create(ctx: &ProviderContext, config: &Self::Config) -> ProviderResult<Self::State> {
        config.validate()?;
        let span = info_span!("resource.group.create", display_name = %config.display_name);

        async move {
            if config.prevent_duplicate_names {
                check_duplicate_name(&*ctx.directory, &config.display_name, None).await?;
            }

            // Only security groups can be created through the API
            let group = Group {
                display_name: Some(config.display_name.clone()),
                description: config.description.clone().filter(|d| !d.is_empty()),
                mail_nickname: Some(uuid::Uuid::new_v4().to_string()),
                security_enabled: Some(true),
                mail_enabled: Some(false),
                ..Default::default()
            };
            let owners = normalized_set(&config.owners);
            let members = normalized_set(&config.members);

            let created = ctx
                .directory
                .create_group(&group, &owners, &members)
                .await
                .for_action("Creating group", &config.display_name)?;
            let object_id = created.id.clone().filter(|id| !id.is_empty()).ok_or_else(|| {
                ProviderError::bad_response(
                    "Creating group",
                    &config.display_name,
                    "API returned group with nil object ID",
                )
            })?;
            info!("Created group {object_id} ({})", config.display_name);

            let finish = async {
                let replicated = wait_for_replication("group", &object_id, &ctx.replication, || {
                    ctx.directory.get_group(&object_id)
                })
                .await?;
                let (owners, members) = relationships(ctx, &object_id).await?;
                Ok::<_, ProviderError>(GroupState::from_model(
                    &object_id,
                    &replicated,
                    &owners,
                    &members,
                ))
            };
            let state = finish
                .await
                .map_err(|e| ProviderError::created_with_errors(Self::KIND, &object_id, e))?;
            record_operation(Self::KIND, "create");
            Ok(state)
        }
        .instrument(span)
        .await
    }

    async fn read(ctx: &ProviderContext, id: &str) -> ProviderResult<Option<Self::State>> {
        let group = match ctx.directory.get_group(id).await {
            Ok(group) => group,
            Err(e) if e.is_not_found() => {
                info!("Group with object ID {id} was not found, removing from state");
                return Ok(None);
            }
            Err(e) => return Err(ProviderError::api("Retrieving group", id, e)),
        };
        let (owners, members) = relationships(ctx, id).await?;
        Ok(Some(GroupState::from_model(id, &group, &owners, &members)))
    }

    async fn update(
        ctx: &ProviderContext,
        id: &str,
        prior: &Self::Config,
        desired: &Self::Config,
    ) -> ProviderResult<Option<Self::State>> {
        desired.validate()?;
        let span = info_span!("resource.group.update", object.id = id);

        async move {
            let mut patch = Group::default();
            if desired.display_name != prior.display_name {
                if desired.prevent_duplicate_names {
                    check_duplicate_name(&*ctx.directory, &desired.display_name, Some(id)).await?;
                }
                patch.display_name = Some(desired.display_name.clone());
            }
            if desired.description != prior.description {
                patch.description = Some(desired.description.clone().unwrap_or_default());
            }

            if patch != Group::default() {
                match ctx.directory.update_group(id, &patch).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        info!("Group with object ID {id} was not found, removing from state");
                        return Ok(None);
                    }
                    Err(e) => return Err(ProviderError::api("Updating group", id, e)),
                }
            }

            let members = GroupMembers {
                directory: &*ctx.directory,
                group_id: id,
            };
            reconcile_relationship(&members, &desired.members, ApplyOrder::RemoveFirst).await?;

            let owners = GroupOwners {
                directory: &*ctx.directory,
                group_id: id,
            };
            reconcile_relationship(&owners, &desired.owners, ApplyOrder::AddFirst).await?;

            record_operation(Self::KIND, "update");
            Self::read(ctx, id).await
        }
        .instrument(span)
        .await
    }

    async fn delete(ctx: &ProviderContext, id: &str) -> ProviderResult<()> {
        match ctx.directory.get_group(id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(ProviderError::NotFound {
                    resource: "Group",
                    id: id.to_string(),
                });
            }
            Err(e) => return Err(ProviderError::api("Retrieving group", id, e)),
        }
        ctx.directory
            .delete_group(id)
            .await
            .for_action("Deleting group", id)?;
        info!("Deleted group {id}");
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

    const USER_A: &str = "00000000-0000-0000-0000-00000000000a";
    const USER_B: &str = "00000000-0000-0000-0000-00000000000b";
    const USER_C: &str = "00000000-0000-0000-0000-00000000000c";

    fn config(members: &[&str], owners: &[&str]) -> GroupConfig {
        GroupConfig {
            display_name: "platform".to_string(),
            description: None,
            members: members.iter().map(|m| (*m).to_string()).collect(),
            owners: owners.iter().map(|o| (*o).to_string()).collect(),
            prevent_duplicate_names: false,
        }
    }

    #[test]
    fn test_rejects_non_uuid_members() {
        let bad = config(&["not-a-uuid"], &[]);
        assert!(matches!(
            bad.validate(),
            Err(ProviderError::Validation { ref attr, .. }) if attr == "members"
        ));
    }

    #[tokio::test]
    async fn test_create_waits_for_replication() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.set_replication_lag(2);
        let ctx = ProviderContext::new(directory.clone())
            .with_replication(ReplicationPolicy::immediate(5));

        let state = GroupResource::create(&ctx, &config(&[USER_A], &[USER_B]))
            .await
            .unwrap();
        assert!(state.security_enabled);
        assert!(!state.mail_enabled);
        assert_eq!(state.members, vec![USER_A.to_string()]);
        assert_eq!(state.owners, vec![USER_B.to_string()]);
        assert_eq!(directory.call_count("get_group"), 3);
    }

    #[tokio::test]
    async fn test_update_reconciles_members() {
        let directory = Arc::new(InMemoryDirectory::new());
        let ctx = ProviderContext::new(directory.clone())
            .with_replication(ReplicationPolicy::immediate(3));
        let prior = config(&[USER_A, USER_B], &[USER_A]);
        let desired = config(&[USER_B, USER_C], &[USER_C]);

        let created = GroupResource::create(&ctx, &prior).await.unwrap();
        let updated = GroupResource::update(&ctx, &created.id, &prior, &desired)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.members, vec![USER_B.to_string(), USER_C.to_string()]);
        assert_eq!(updated.owners, vec![USER_C.to_string()]);
        // Only relationships changed, so no PATCH on the group itself
        assert_eq!(directory.write_count(&created.id), 0);
    }
}
