//! # In-Memory Directory
//!
//! Process-local implementation of the directory traits, used by the test
//! suite and by `--dry-run`.
//!
//! Behaves like Graph where the reconciliation logic depends on it:
//!
//! - PATCH merges only the fields present in the body
//! - an enabled app role or permission scope cannot be removed (HTTP 400)
//! - adding an existing owner or member reference fails (HTTP 400)
//! - secrets (`key`, `secretText`, `passwordProfile`) are never returned on read
//!
//! It can also simulate replication lag (404 for the first N reads of a newly
//! created group or user) and inject failures per operation.

use crate::error::{GraphError, GraphResult};
use crate::graph::models::{AppRole, Application, Domain, Group, PermissionScope, User};
use crate::graph::{ApplicationsApi, DomainsApi, GroupsApi, UsersApi};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Store {
    applications: HashMap<String, Application>,
    groups: HashMap<String, Group>,
    users: HashMap<String, User>,
    domains: Vec<Domain>,
    owners: HashMap<String, BTreeSet<String>>,
    members: HashMap<String, BTreeSet<String>>,
    /// Remaining 404 reads per freshly created object
    hidden_reads: HashMap<String, u32>,
    replication_lag: u32,
    /// One-shot failures queued per operation name
    queued_failures: HashMap<String, VecDeque<u16>>,
    /// Failures returned on every call of an operation
    persistent_failures: HashMap<String, u16>,
    /// Successful PATCH calls per object ID
    writes: HashMap<String, u32>,
    /// Calls per operation name
    calls: HashMap<String, u32>,
}

/// Directory held in process memory
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    store: Mutex<Store>,
}

fn bad_request(code: &str, message: impl Into<String>) -> GraphError {
    GraphError::Api {
        status: 400,
        code: code.to_string(),
        message: message.into(),
    }
}

fn injected(status: u16, operation: &str) -> GraphError {
    if status == 404 {
        return GraphError::not_found(format!("{operation}: injected 404"));
    }
    GraphError::Api {
        status,
        code: "InjectedFailure".to_string(),
        message: format!("{operation}: injected failure"),
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

macro_rules! merge_fields {
    ($target:expr, $patch:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = &$patch.$field {
                $target.$field = Some(value.clone());
            }
        )+
    };
}

/// Simple `field eq 'value'` matching, enough for the lookups this crate issues
fn matches_filter<T: Serialize>(object: &T, filter: Option<&str>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let Some((field, literal)) = filter.split_once(" eq ") else {
        return false;
    };
    let literal = literal.trim();
    let expected = literal
        .strip_prefix('\'')
        .and_then(|l| l.strip_suffix('\''))
        .map(|l| l.replace("''", "'"));
    let Some(expected) = expected else {
        return false;
    };
    serde_json::to_value(object)
        .ok()
        .and_then(|value| value.get(field.trim()).and_then(|v| v.as_str().map(str::to_string)))
        .is_some_and(|actual| actual.eq_ignore_ascii_case(&expected))
}

/// Entries that are enabled in `current` but absent from `desired`
fn removed_while_enabled<'a, T, F, G>(
    current: &'a [T],
    desired: &[T],
    id: F,
    enabled: G,
) -> Option<&'a T>
where
    F: Fn(&T) -> Option<&str>,
    G: Fn(&T) -> bool,
{
    current.iter().find(|entry| {
        enabled(entry)
            && !desired
                .iter()
                .any(|d| id(d).is_some() && id(d) == id(entry))
    })
}

fn strip_secrets(mut application: Application) -> Application {
    if let Some(keys) = &mut application.key_credentials {
        for key in keys.iter_mut() {
            key.key = None;
        }
    }
    if let Some(passwords) = &mut application.password_credentials {
        for password in passwords.iter_mut() {
            password.secret_text = None;
        }
    }
    application
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory that answers `list_domains` with `domains`
    #[must_use]
    pub fn with_domains(domains: Vec<Domain>) -> Self {
        let directory = Self::default();
        directory.lock().domains = domains;
        directory
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record a call and return any injected failure for it
    fn enter(&self, operation: &str) -> GraphResult<MutexGuard<'_, Store>> {
        let mut store = self.lock();
        *store.calls.entry(operation.to_string()).or_default() += 1;
        if let Some(status) = store.persistent_failures.get(operation).copied() {
            return Err(injected(status, operation));
        }
        if let Some(status) = store
            .queued_failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            return Err(injected(status, operation));
        }
        Ok(store)
    }

    /// Newly created groups and users answer 404 for their first `reads` reads
    pub fn set_replication_lag(&self, reads: u32) {
        self.lock().replication_lag = reads;
    }

    /// Fail the next call of `operation` (e.g. `"update_application"`) with `status`
    pub fn fail_next(&self, operation: &str, status: u16) {
        self.lock()
            .queued_failures
            .entry(operation.to_string())
            .or_default()
            .push_back(status);
    }

    /// Fail every call of `operation` with `status`
    pub fn fail_always(&self, operation: &str, status: u16) {
        self.lock()
            .persistent_failures
            .insert(operation.to_string(), status);
    }

    pub fn clear_failures(&self) {
        let mut store = self.lock();
        store.queued_failures.clear();
        store.persistent_failures.clear();
    }

    /// Successful PATCH calls against object `id`
    #[must_use]
    pub fn write_count(&self, id: &str) -> u32 {
        self.lock().writes.get(id).copied().unwrap_or_default()
    }

    /// Calls made to `operation`, including failed ones
    #[must_use]
    pub fn call_count(&self, operation: &str) -> u32 {
        self.lock().calls.get(operation).copied().unwrap_or_default()
    }

    /// Seed an application and return its object ID
    pub fn insert_application(&self, mut application: Application) -> String {
        let id = application.id.clone().unwrap_or_else(new_id);
        application.id = Some(id.clone());
        application.app_id.get_or_insert_with(new_id);
        self.lock().applications.insert(id.clone(), application);
        id
    }

    /// Seed a group and return its object ID
    pub fn insert_group(&self, mut group: Group) -> String {
        let id = group.id.clone().unwrap_or_else(new_id);
        group.id = Some(id.clone());
        self.lock().groups.insert(id.clone(), group);
        id
    }

    /// Seed a user and return its object ID
    pub fn insert_user(&self, mut user: User) -> String {
        let id = user.id.clone().unwrap_or_else(new_id);
        user.id = Some(id.clone());
        self.lock().users.insert(id.clone(), user);
        id
    }

    /// Stored application, secrets included
    #[must_use]
    pub fn application(&self, id: &str) -> Option<Application> {
        self.lock().applications.get(id).cloned()
    }

    #[must_use]
    pub fn owners_of(&self, id: &str) -> BTreeSet<String> {
        self.lock().owners.get(id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn members_of(&self, id: &str) -> BTreeSet<String> {
        self.lock().members.get(id).cloned().unwrap_or_default()
    }

    fn list_refs(
        &self,
        operation: &str,
        parent_exists: fn(&Store, &str) -> bool,
        relationship: fn(&mut Store) -> &mut HashMap<String, BTreeSet<String>>,
        id: &str,
    ) -> GraphResult<Vec<String>> {
        let mut store = self.enter(operation)?;
        if !parent_exists(&store, id) {
            return Err(GraphError::not_found(format!("{operation}: object {id} not found")));
        }
        Ok(relationship(&mut store)
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn add_refs(
        &self,
        operation: &str,
        parent_exists: fn(&Store, &str) -> bool,
        relationship: fn(&mut Store) -> &mut HashMap<String, BTreeSet<String>>,
        id: &str,
        ids: &[String],
    ) -> GraphResult<()> {
        let mut store = self.enter(operation)?;
        if !parent_exists(&store, id) {
            return Err(GraphError::not_found(format!("{operation}: object {id} not found")));
        }
        let set = relationship(&mut store).entry(id.to_string()).or_default();
        if let Some(existing) = ids.iter().find(|ref_id| set.contains(*ref_id)) {
            return Err(bad_request(
                "Request_BadRequest",
                format!("One or more added object references already exist: {existing}"),
            ));
        }
        set.extend(ids.iter().cloned());
        Ok(())
    }

    fn remove_refs(
        &self,
        operation: &str,
        parent_exists: fn(&Store, &str) -> bool,
        relationship: fn(&mut Store) -> &mut HashMap<String, BTreeSet<String>>,
        id: &str,
        ids: &[String],
    ) -> GraphResult<()> {
        let mut store = self.enter(operation)?;
        if !parent_exists(&store, id) {
            return Err(GraphError::not_found(format!("{operation}: object {id} not found")));
        }
        let set = relationship(&mut store).entry(id.to_string()).or_default();
        for ref_id in ids {
            if !set.remove(ref_id) {
                return Err(GraphError::not_found(format!(
                    "{operation}: reference {ref_id} not found on {id}"
                )));
            }
        }
        Ok(())
    }

    /// Serve a read, honouring any replication lag left on the object
    fn visible(store: &mut Store, id: &str) -> bool {
        match store.hidden_reads.get_mut(id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                false
            }
            _ => true,
        }
    }
}

fn application_exists(store: &Store, id: &str) -> bool {
    store.applications.contains_key(id)
}

fn group_exists(store: &Store, id: &str) -> bool {
    store.groups.contains_key(id)
}

fn owners(store: &mut Store) -> &mut HashMap<String, BTreeSet<String>> {
    &mut store.owners
}

fn members(store: &mut Store) -> &mut HashMap<String, BTreeSet<String>> {
    &mut store.members
}

#[async_trait]
impl ApplicationsApi for InMemoryDirectory {
    async fn get_application(&self, id: &str) -> GraphResult<Application> {
        // Give concurrent callers a chance to interleave between read and write
        tokio::task::yield_now().await;
        let store = self.enter("get_application")?;
        store
            .applications
            .get(id)
            .cloned()
            .map(strip_secrets)
            .ok_or_else(|| GraphError::not_found(format!("Application {id} does not exist")))
    }

    async fn create_application(&self, application: &Application) -> GraphResult<Application> {
        let mut store = self.enter("create_application")?;
        let id = new_id();
        let mut created = application.clone();
        created.id = Some(id.clone());
        created.app_id = Some(new_id());
        created
            .sign_in_audience
            .get_or_insert_with(|| "AzureADMyOrg".to_string());
        store.applications.insert(id, created.clone());
        Ok(strip_secrets(created))
    }

    async fn update_application(&self, id: &str, patch: &Application) -> GraphResult<()> {
        tokio::task::yield_now().await;
        let mut store = self.enter("update_application")?;
        let Some(current) = store.applications.get_mut(id) else {
            return Err(GraphError::not_found(format!("Application {id} does not exist")));
        };

        if let Some(desired) = &patch.app_roles {
            if let Some(role) = removed_while_enabled(
                current.app_roles(),
                desired,
                |r: &AppRole| r.id.as_deref(),
                |r| r.is_enabled.unwrap_or(false),
            ) {
                return Err(bad_request(
                    "CannotDeleteOrUpdateEnabledEntitlement",
                    format!(
                        "Property appRoles.{} is invalid: an enabled app role cannot be removed",
                        role.id.as_deref().unwrap_or_default()
                    ),
                ));
            }
        }
        if let Some(desired) = patch
            .api
            .as_ref()
            .and_then(|api| api.oauth2_permission_scopes.as_ref())
        {
            if let Some(scope) = removed_while_enabled(
                current.oauth2_permission_scopes(),
                desired,
                |s: &PermissionScope| s.id.as_deref(),
                |s| s.is_enabled.unwrap_or(false),
            ) {
                return Err(bad_request(
                    "CannotDeleteOrUpdateEnabledEntitlement",
                    format!(
                        "Property api.oauth2PermissionScopes.{} is invalid: an enabled permission scope cannot be removed",
                        scope.id.as_deref().unwrap_or_default()
                    ),
                ));
            }
        }

        merge_fields!(
            current,
            patch,
            display_name,
            api,
            app_roles,
            group_membership_claims,
            identifier_uris,
            is_fallback_public_client,
            key_credentials,
            password_credentials,
            optional_claims,
            required_resource_access,
            sign_in_audience,
            web,
        );
        *store.writes.entry(id.to_string()).or_default() += 1;
        Ok(())
    }

    async fn delete_application(&self, id: &str) -> GraphResult<()> {
        let mut store = self.enter("delete_application")?;
        if store.applications.remove(id).is_none() {
            return Err(GraphError::not_found(format!("Application {id} does not exist")));
        }
        store.owners.remove(id);
        Ok(())
    }

    async fn list_applications(&self, filter: Option<&str>) -> GraphResult<Vec<Application>> {
        let store = self.enter("list_applications")?;
        let mut applications: Vec<Application> = store
            .applications
            .values()
            .filter(|app| matches_filter(app, filter))
            .cloned()
            .map(strip_secrets)
            .collect();
        applications.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(applications)
    }

    async fn list_application_owners(&self, id: &str) -> GraphResult<Vec<String>> {
        self.list_refs("list_application_owners", application_exists, owners, id)
    }

    async fn add_application_owners(&self, id: &str, owner_ids: &[String]) -> GraphResult<()> {
        self.add_refs("add_application_owners", application_exists, owners, id, owner_ids)
    }

    async fn remove_application_owners(&self, id: &str, owner_ids: &[String]) -> GraphResult<()> {
        self.remove_refs("remove_application_owners", application_exists, owners, id, owner_ids)
    }
}

#[async_trait]
impl GroupsApi for InMemoryDirectory {
    async fn get_group(&self, id: &str) -> GraphResult<Group> {
        tokio::task::yield_now().await;
        let mut store = self.enter("get_group")?;
        if !Self::visible(&mut store, id) {
            return Err(GraphError::not_found(format!("Group {id} does not exist")));
        }
        store
            .groups
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::not_found(format!("Group {id} does not exist")))
    }

    async fn create_group(
        &self,
        group: &Group,
        owner_ids: &[String],
        member_ids: &[String],
    ) -> GraphResult<Group> {
        let mut store = self.enter("create_group")?;
        let id = new_id();
        let mut created = group.clone();
        created.id = Some(id.clone());
        store.groups.insert(id.clone(), created.clone());
        if !owner_ids.is_empty() {
            store
                .owners
                .insert(id.clone(), owner_ids.iter().cloned().collect());
        }
        if !member_ids.is_empty() {
            store
                .members
                .insert(id.clone(), member_ids.iter().cloned().collect());
        }
        let lag = store.replication_lag;
        if lag > 0 {
            store.hidden_reads.insert(id, lag);
        }
        Ok(created)
    }

    async fn update_group(&self, id: &str, patch: &Group) -> GraphResult<()> {
        tokio::task::yield_now().await;
        let mut store = self.enter("update_group")?;
        let Some(current) = store.groups.get_mut(id) else {
            return Err(GraphError::not_found(format!("Group {id} does not exist")));
        };
        merge_fields!(
            current,
            patch,
            display_name,
            description,
            mail_enabled,
            mail_nickname,
            security_enabled,
        );
        *store.writes.entry(id.to_string()).or_default() += 1;
        Ok(())
    }

    async fn delete_group(&self, id: &str) -> GraphResult<()> {
        let mut store = self.enter("delete_group")?;
        if store.groups.remove(id).is_none() {
            return Err(GraphError::not_found(format!("Group {id} does not exist")));
        }
        store.owners.remove(id);
        store.members.remove(id);
        Ok(())
    }

    async fn list_groups(&self, filter: Option<&str>) -> GraphResult<Vec<Group>> {
        let store = self.enter("list_groups")?;
        let mut groups: Vec<Group> = store
            .groups
            .values()
            .filter(|group| matches_filter(group, filter))
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(groups)
    }

    async fn list_group_owners(&self, id: &str) -> GraphResult<Vec<String>> {
        self.list_refs("list_group_owners", group_exists, owners, id)
    }

    async fn add_group_owners(&self, id: &str, owner_ids: &[String]) -> GraphResult<()> {
        self.add_refs("add_group_owners", group_exists, owners, id, owner_ids)
    }

    async fn remove_group_owners(&self, id: &str, owner_ids: &[String]) -> GraphResult<()> {
        self.remove_refs("remove_group_owners", group_exists, owners, id, owner_ids)
    }

    async fn list_group_members(&self, id: &str) -> GraphResult<Vec<String>> {
        self.list_refs("list_group_members", group_exists, members, id)
    }

    async fn add_group_members(&self, id: &str, member_ids: &[String]) -> GraphResult<()> {
        self.add_refs("add_group_members", group_exists, members, id, member_ids)
    }

    async fn remove_group_members(&self, id: &str, member_ids: &[String]) -> GraphResult<()> {
        self.remove_refs("remove_group_members", group_exists, members, id, member_ids)
    }
}

#[async_trait]
impl UsersApi for InMemoryDirectory {
    async fn get_user(&self, id: &str) -> GraphResult<User> {
        tokio::task::yield_now().await;
        let mut store = self.enter("get_user")?;
        if !Self::visible(&mut store, id) {
            return Err(GraphError::not_found(format!("User {id} does not exist")));
        }
        store
            .users
            .get(id)
            .cloned()
            .map(|mut user| {
                user.password_profile = None;
                user
            })
            .ok_or_else(|| GraphError::not_found(format!("User {id} does not exist")))
    }

    async fn create_user(&self, user: &User) -> GraphResult<User> {
        let mut store = self.enter("create_user")?;
        let upn = user.user_principal_name.clone().unwrap_or_default();
        if upn.is_empty() {
            return Err(bad_request("Request_BadRequest", "userPrincipalName is required"));
        }
        if store.users.values().any(|u| {
            u.user_principal_name
                .as_deref()
                .is_some_and(|existing| existing.eq_ignore_ascii_case(&upn))
        }) {
            return Err(bad_request(
                "Request_BadRequest",
                "Another object with the same value for property userPrincipalName already exists.",
            ));
        }
        let id = new_id();
        let mut created = user.clone();
        created.id = Some(id.clone());
        created.user_type.get_or_insert_with(|| "Member".to_string());
        store.users.insert(id.clone(), created.clone());
        let lag = store.replication_lag;
        if lag > 0 {
            store.hidden_reads.insert(id, lag);
        }
        created.password_profile = None;
        Ok(created)
    }

    async fn update_user(&self, id: &str, patch: &User) -> GraphResult<()> {
        tokio::task::yield_now().await;
        let mut store = self.enter("update_user")?;
        let Some(current) = store.users.get_mut(id) else {
            return Err(GraphError::not_found(format!("User {id} does not exist")));
        };
        merge_fields!(
            current,
            patch,
            account_enabled,
            city,
            company_name,
            country,
            department,
            display_name,
            given_name,
            job_title,
            mail,
            mail_nickname,
            mobile_phone,
            office_location,
            on_premises_immutable_id,
            password_profile,
            postal_code,
            state,
            street_address,
            surname,
            usage_location,
            user_principal_name,
        );
        *store.writes.entry(id.to_string()).or_default() += 1;
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> GraphResult<()> {
        let mut store = self.enter("delete_user")?;
        if store.users.remove(id).is_none() {
            return Err(GraphError::not_found(format!("User {id} does not exist")));
        }
        Ok(())
    }

    async fn list_users(&self, filter: Option<&str>) -> GraphResult<Vec<User>> {
        let store = self.enter("list_users")?;
        let mut users: Vec<User> = store
            .users
            .values()
            .filter(|user| matches_filter(user, filter))
            .cloned()
            .map(|mut user| {
                user.password_profile = None;
                user
            })
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }
}

#[async_trait]
impl DomainsApi for InMemoryDirectory {
    async fn list_domains(&self) -> GraphResult<Vec<Domain>> {
        let store = self.enter("list_domains")?;
        Ok(store.domains.clone())
    }
}
