//! # Plan
//!
//! Drives resources from a manifest against the state file.
//!
//! ## Ordering
//!
//! - Entries are applied in layers: an entry runs after every entry it refers
//!   to with `"@address"`. Within a layer, top-level objects run before
//!   sub-resources and each batch runs concurrently up to `max_concurrency`.
//! - Addresses tracked in state but absent from the manifest are destroyed
//!   first, sub-resources before their parents.
//! - One failing resource does not stop its siblings. Failures are collected in
//!   the [`Report`] and everything that succeeded is recorded in state.

use crate::config::{Manifest, ManifestEntry};
use crate::error::{GraphError, ProviderError, ProviderResult};
use crate::resources::app_role::AppRoleResource;
use crate::resources::application::ApplicationResource;
use crate::resources::certificate::CertificateResource;
use crate::resources::group::GroupResource;
use crate::resources::oauth2_permission_scope::PermissionScopeResource;
use crate::resources::password::PasswordResource;
use crate::resources::user::UserResource;
use crate::replication::wait_for_replication;
use crate::resources::{ProviderContext, Resource, Validate};
use crate::state::{StateEntry, StateFile};
use anyhow::{anyhow, Result};
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{info, info_span, warn, Instrument};

/// Resource kinds addressable from a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceKind {
    Application,
    AppRole,
    PermissionScope,
    Certificate,
    Password,
    Group,
    User,
}

impl ResourceKind {
    pub const ALL: [Self; 7] = [
        Self::Application,
        Self::AppRole,
        Self::PermissionScope,
        Self::Certificate,
        Self::Password,
        Self::Group,
        Self::User,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Application => ApplicationResource::KIND,
            Self::AppRole => AppRoleResource::KIND,
            Self::PermissionScope => PermissionScopeResource::KIND,
            Self::Certificate => CertificateResource::KIND,
            Self::Password => PasswordResource::KIND,
            Self::Group => GroupResource::KIND,
            Self::User => UserResource::KIND,
        }
    }

    /// Kinds stored inside an application object rather than on their own
    #[must_use]
    pub fn is_sub_resource(self) -> bool {
        matches!(
            self,
            Self::AppRole | Self::PermissionScope | Self::Certificate | Self::Password
        )
    }

    /// JSON Schema of the kind's configuration
    #[must_use]
    pub fn schema(self) -> Value {
        match self {
            Self::Application => schema_of::<ApplicationResource>(),
            Self::AppRole => schema_of::<AppRoleResource>(),
            Self::PermissionScope => schema_of::<PermissionScopeResource>(),
            Self::Certificate => schema_of::<CertificateResource>(),
            Self::Password => schema_of::<PasswordResource>(),
            Self::Group => schema_of::<GroupResource>(),
            Self::User => schema_of::<UserResource>(),
        }
    }

    async fn apply(
        self,
        ctx: &ProviderContext,
        prior: Option<&StateEntry>,
        config: Value,
    ) -> ProviderResult<(Action, StateEntry)> {
        match self {
            Self::Application => apply_resource::<ApplicationResource>(ctx, prior, config).await,
            Self::AppRole => apply_resource::<AppRoleResource>(ctx, prior, config).await,
            Self::PermissionScope => {
                apply_resource::<PermissionScopeResource>(ctx, prior, config).await
            }
            Self::Certificate => apply_resource::<CertificateResource>(ctx, prior, config).await,
            Self::Password => apply_resource::<PasswordResource>(ctx, prior, config).await,
            Self::Group => apply_resource::<GroupResource>(ctx, prior, config).await,
            Self::User => apply_resource::<UserResource>(ctx, prior, config).await,
        }
    }

    async fn refresh(
        self,
        ctx: &ProviderContext,
        entry: &StateEntry,
    ) -> ProviderResult<Option<StateEntry>> {
        match self {
            Self::Application => refresh_resource::<ApplicationResource>(ctx, entry).await,
            Self::AppRole => refresh_resource::<AppRoleResource>(ctx, entry).await,
            Self::PermissionScope => refresh_resource::<PermissionScopeResource>(ctx, entry).await,
            Self::Certificate => refresh_resource::<CertificateResource>(ctx, entry).await,
            Self::Password => refresh_resource::<PasswordResource>(ctx, entry).await,
            Self::Group => refresh_resource::<GroupResource>(ctx, entry).await,
            Self::User => refresh_resource::<UserResource>(ctx, entry).await,
        }
    }

    async fn destroy(self, ctx: &ProviderContext, id: &str) -> ProviderResult<()> {
        match self {
            Self::Application => destroy_resource::<ApplicationResource>(ctx, id).await,
            Self::AppRole => destroy_resource::<AppRoleResource>(ctx, id).await,
            Self::PermissionScope => destroy_resource::<PermissionScopeResource>(ctx, id).await,
            Self::Certificate => destroy_resource::<CertificateResource>(ctx, id).await,
            Self::Password => destroy_resource::<PasswordResource>(ctx, id).await,
            Self::Group => destroy_resource::<GroupResource>(ctx, id).await,
            Self::User => destroy_resource::<UserResource>(ctx, id).await,
        }
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|k| k.name() == s).ok_or_else(|| {
            let names: Vec<&str> = Self::ALL.iter().map(|k| k.name()).collect();
            format!("unknown resource kind '{s}', expected one of: {}", names.join(", "))
        })
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn schema_of<R: Resource>() -> Value {
    serde_json::to_value(schemars::schema_for!(R::Config)).unwrap_or(Value::Null)
}

/// What happened to one address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Replace,
    Delete,
    Unchanged,
    /// Gone from the directory and dropped from state
    Removed,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Unchanged => "unchanged",
            Self::Removed => "removed",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub address: String,
    pub kind: String,
    pub action: Action,
}

#[derive(Debug)]
pub struct Failure {
    pub address: String,
    pub error: anyhow::Error,
}

/// Outcome of an apply, refresh or destroy run
#[derive(Debug, Default)]
pub struct Report {
    pub changes: Vec<Change>,
    pub failures: Vec<Failure>,
}

impl Report {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Action recorded for `address`, if it succeeded
    #[must_use]
    pub fn action(&self, address: &str) -> Option<Action> {
        self.changes.iter().find(|c| c.address == address).map(|c| c.action)
    }

    fn failed(&mut self, address: &str, error: impl Into<anyhow::Error>) {
        let error = error.into();
        warn!("{address}: {error:#}");
        self.failures.push(Failure {
            address: address.to_string(),
            error,
        });
    }

    fn changed(&mut self, address: &str, kind: &str, action: Action) {
        info!("{address}: {action}");
        self.changes.push(Change {
            address: address.to_string(),
            kind: kind.to_string(),
            action,
        });
    }
}

fn decode<T: DeserializeOwned>(kind: &str, value: Value) -> ProviderResult<T> {
    serde_json::from_value(value).map_err(|e| {
        ProviderError::validation("config", format!("invalid {kind} configuration: {e}"))
    })
}

fn encode<R: Resource>(state: &R::State) -> ProviderResult<Value> {
    serde_json::to_value(state).map_err(|e| {
        ProviderError::bad_response("Recording state", R::id(state), e.to_string())
    })
}

fn state_entry<R: Resource>(config: Value, state: &R::State) -> ProviderResult<StateEntry> {
    Ok(StateEntry {
        kind: R::KIND.to_string(),
        id: R::id(state),
        config,
        attributes: encode::<R>(state)?,
        incomplete: false,
    })
}

async fn create_resource<R: Resource>(
    ctx: &ProviderContext,
    desired: &R::Config,
    config: Value,
) -> ProviderResult<StateEntry> {
    let state = R::create(ctx, desired).await?;
    state_entry::<R>(config, &state)
}

/// Wait until an object left incomplete by an earlier run can be read
async fn await_readable<R: Resource>(ctx: &ProviderContext, id: &str) -> ProviderResult<()> {
    wait_for_replication(R::KIND, id, &ctx.replication, move || async move {
        match R::read(ctx, id).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(GraphError::not_found(format!("{id} is not readable yet"))),
            Err(e) => Err(GraphError::BadResponse(e.to_string())),
        }
    })
    .await
}

/// Bring one address to `config`, given what state recorded for it
async fn apply_resource<R: Resource>(
    ctx: &ProviderContext,
    prior: Option<&StateEntry>,
    config: Value,
) -> ProviderResult<(Action, StateEntry)> {
    let desired: R::Config = decode(R::KIND, config.clone())?;
    desired.validate()?;

    let Some(prior) = prior else {
        let entry = create_resource::<R>(ctx, &desired, config).await?;
        return Ok((Action::Create, entry));
    };
    let prior_config: R::Config = decode(R::KIND, prior.config.clone())?;

    if prior_config == desired && !prior.incomplete {
        return match R::read(ctx, &prior.id).await? {
            Some(state) => Ok((Action::Unchanged, state_entry::<R>(config, &state)?)),
            None => {
                warn!("{} {} disappeared, creating it again", R::KIND, prior.id);
                let entry = create_resource::<R>(ctx, &desired, config).await?;
                Ok((Action::Create, entry))
            }
        };
    }

    if R::requires_replacement(&prior_config, &desired) {
        destroy_resource::<R>(ctx, &prior.id).await?;
        let entry = create_resource::<R>(ctx, &desired, config).await?;
        return Ok((Action::Replace, entry));
    }

    if prior.incomplete {
        info!("{} {} was left incomplete by an earlier run, completing it", R::KIND, prior.id);
        await_readable::<R>(ctx, &prior.id).await?;
    }

    match R::update(ctx, &prior.id, &prior_config, &desired).await? {
        Some(state) => Ok((Action::Update, state_entry::<R>(config, &state)?)),
        None if prior.incomplete => Err(ProviderError::NotFound {
            resource: R::KIND,
            id: prior.id.clone(),
        }),
        None => {
            warn!("{} {} disappeared during update, creating it again", R::KIND, prior.id);
            let entry = create_resource::<R>(ctx, &desired, config).await?;
            Ok((Action::Create, entry))
        }
    }
}

async fn refresh_resource<R: Resource>(
    ctx: &ProviderContext,
    entry: &StateEntry,
) -> ProviderResult<Option<StateEntry>> {
    match R::read(ctx, &entry.id).await? {
        Some(state) => Ok(Some(StateEntry {
            incomplete: entry.incomplete,
            ..state_entry::<R>(entry.config.clone(), &state)?
        })),
        None => Ok(None),
    }
}

/// Delete, treating an object that is already gone as deleted
async fn destroy_resource<R: Resource>(ctx: &ProviderContext, id: &str) -> ProviderResult<()> {
    match R::delete(ctx, id).await {
        Err(e) if e.is_not_found() => {
            info!("{} {id} was already deleted", R::KIND);
            Ok(())
        }
        result => result,
    }
}

/// Object ID of a remote object a failed apply still created
fn created_id(error: &anyhow::Error) -> Option<String> {
    error
        .downcast_ref::<ProviderError>()
        .and_then(ProviderError::created_id)
        .map(str::to_string)
}

/// Runs manifests against a directory
#[derive(Debug, Clone)]
pub struct Executor {
    ctx: ProviderContext,
    max_concurrency: usize,
}

impl Executor {
    #[must_use]
    pub fn new(ctx: ProviderContext, max_concurrency: usize) -> Self {
        Self {
            ctx,
            max_concurrency: max_concurrency.max(1),
        }
    }

    #[must_use]
    pub fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    /// Apply `manifest`, recording results in `state`
    ///
    /// # Errors
    ///
    /// Fails before touching the directory when the manifest names an unknown
    /// kind or its references form a cycle. Per-resource failures are
    /// reported in the returned [`Report`].
    pub async fn apply(&self, manifest: &Manifest, state: &mut StateFile) -> Result<Report> {
        for entry in &manifest.resources {
            entry
                .kind
                .parse::<ResourceKind>()
                .map_err(|e| anyhow!("{}: {e}", entry.address))?;
        }
        let layers = manifest.layers()?;
        let mut report = Report::default();

        let orphans: Vec<String> = state
            .resources
            .keys()
            .filter(|address| manifest.get(address).is_none())
            .cloned()
            .collect();
        if !orphans.is_empty() {
            self.destroy_addresses(&orphans, state, &mut report).await;
        }

        for layer in layers {
            let (parents, children): (Vec<&ManifestEntry>, Vec<&ManifestEntry>) = layer
                .into_iter()
                .partition(|e| e.kind.parse::<ResourceKind>().is_ok_and(|k| !k.is_sub_resource()));
            for batch in [parents, children] {
                if !batch.is_empty() {
                    self.apply_batch(&batch, state, &mut report).await;
                }
            }
        }
        Ok(report)
    }

    async fn apply_batch(
        &self,
        batch: &[&ManifestEntry],
        state: &mut StateFile,
        report: &mut Report,
    ) {
        let ids = state.object_ids();
        let mut jobs = Vec::with_capacity(batch.len());
        for entry in batch {
            match entry.resolved_config(&ids) {
                Ok(config) => {
                    let prior = state.resources.get(&entry.address).cloned();
                    jobs.push((*entry, prior, config));
                }
                Err(e) => report.failed(&entry.address, e),
            }
        }

        let results: Vec<(&ManifestEntry, Value, Result<(Action, StateEntry)>)> = stream::iter(jobs)
            .map(|(entry, prior, config)| {
                let span = info_span!("plan.apply", address = %entry.address, kind = %entry.kind);
                async move {
                    let result = self.apply_entry(entry, prior, config.clone()).await;
                    (entry, config, result)
                }
                .instrument(span)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        for (entry, config, result) in results {
            match result {
                Ok((action, applied)) => {
                    report.changed(&entry.address, &entry.kind, action);
                    state.resources.insert(entry.address.clone(), applied);
                }
                Err(e) => {
                    if let Some(id) = created_id(&e) {
                        warn!("{}: keeping {id} in state to complete it next run", entry.address);
                        state.resources.insert(
                            entry.address.clone(),
                            StateEntry {
                                kind: entry.kind.clone(),
                                attributes: serde_json::json!({ "id": id }),
                                id,
                                config,
                                incomplete: true,
                            },
                        );
                    }
                    report.failed(&entry.address, e);
                }
            }
        }
    }

    async fn apply_entry(
        &self,
        entry: &ManifestEntry,
        prior: Option<StateEntry>,
        config: Value,
    ) -> Result<(Action, StateEntry)> {
        let kind: ResourceKind = entry.kind.parse().map_err(|e: String| anyhow!(e))?;

        // A change of kind at the same address replaces the old object
        if let Some(old) = prior.as_ref().filter(|p| p.kind != entry.kind) {
            let old_kind: ResourceKind = old.kind.parse().map_err(|e: String| anyhow!(e))?;
            old_kind.destroy(&self.ctx, &old.id).await?;
            let (_, applied) = kind.apply(&self.ctx, None, config).await?;
            return Ok((Action::Replace, applied));
        }

        Ok(kind.apply(&self.ctx, prior.as_ref(), config).await?)
    }

    /// Re-read every tracked resource, dropping the ones that are gone
    pub async fn refresh(&self, state: &mut StateFile) -> Report {
        let mut report = Report::default();
        let entries: Vec<(String, StateEntry)> = state
            .resources
            .iter()
            .map(|(address, entry)| (address.clone(), entry.clone()))
            .collect();

        let results: Vec<(String, StateEntry, Result<Option<StateEntry>>)> = stream::iter(entries)
            .map(|(address, entry)| {
                let span = info_span!("plan.refresh", address = %address, kind = %entry.kind);
                async move {
                    let result = match entry.kind.parse::<ResourceKind>() {
                        Ok(kind) => {
                            kind.refresh(&self.ctx, &entry).await.map_err(anyhow::Error::from)
                        }
                        Err(e) => Err(anyhow!(e)),
                    };
                    (address, entry, result)
                }
                .instrument(span)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        for (address, entry, result) in results {
            match result {
                Ok(Some(refreshed)) => {
                    let action = if refreshed == entry {
                        Action::Unchanged
                    } else {
                        Action::Update
                    };
                    report.changed(&address, &entry.kind, action);
                    state.resources.insert(address, refreshed);
                }
                Ok(None) => {
                    report.changed(&address, &entry.kind, Action::Removed);
                    state.resources.remove(&address);
                }
                Err(e) => report.failed(&address, e),
            }
        }
        report
    }

    /// Delete every tracked resource, sub-resources first
    pub async fn destroy(&self, state: &mut StateFile) -> Report {
        let mut report = Report::default();
        let addresses: Vec<String> = state.resources.keys().cloned().collect();
        self.destroy_addresses(&addresses, state, &mut report).await;
        report
    }

    async fn destroy_addresses(
        &self,
        addresses: &[String],
        state: &mut StateFile,
        report: &mut Report,
    ) {
        let mut children = Vec::new();
        let mut parents = Vec::new();
        for address in addresses {
            let Some(entry) = state.resources.get(address) else {
                continue;
            };
            match entry.kind.parse::<ResourceKind>() {
                Ok(kind) if kind.is_sub_resource() => {
                    children.push((address.clone(), kind, entry.id.clone()));
                }
                Ok(kind) => parents.push((address.clone(), kind, entry.id.clone())),
                Err(e) => report.failed(address, anyhow!(e)),
            }
        }

        for batch in [children, parents] {
            let results: Vec<(String, ResourceKind, ProviderResult<()>)> = stream::iter(batch)
                .map(|(address, kind, id)| {
                    let span = info_span!("plan.destroy", address = %address, kind = %kind);
                    async move {
                        let result = kind.destroy(&self.ctx, &id).await;
                        (address, kind, result)
                    }
                    .instrument(span)
                })
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;

            for (address, kind, result) in results {
                match result {
                    Ok(()) => {
                        report.changed(&address, kind.name(), Action::Delete);
                        state.resources.remove(&address);
                    }
                    Err(e) => report.failed(&address, e),
                }
            }
        }
    }
}

/// Addresses in `state` keyed by kind, for summaries
#[must_use]
pub fn count_by_kind(state: &StateFile) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for entry in state.resources.values() {
        *counts.entry(entry.kind.clone()).or_insert(0) += 1;
    }
    counts
}
