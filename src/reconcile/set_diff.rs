//! # Set-Diff Reconciler
//!
//! Owners and members are unordered sets of object IDs. Reconciling one means
//! listing the current set, computing what to add and what to remove, and
//! issuing the two halves as separate bulk calls.
//!
//! There is no rollback: when the second half fails after the first succeeded,
//! the error says which half went through.

use crate::error::{GraphResult, GraphResultExt, ProviderError, ProviderResult};
use crate::graph::{ApplicationsApi, GroupsApi};
use crate::observability::metrics;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info};

/// Additions and removals turning `current` into `desired`
///
/// Both lists are deduplicated, sorted and disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDiff {
    pub additions: Vec<String>,
    pub removals: Vec<String>,
}

impl SetDiff {
    #[must_use]
    pub fn compute<'a, D, C>(desired: D, current: C) -> Self
    where
        D: IntoIterator<Item = &'a String>,
        C: IntoIterator<Item = &'a String>,
    {
        let desired: BTreeSet<&String> = desired.into_iter().collect();
        let current: BTreeSet<&String> = current.into_iter().collect();

        Self {
            additions: desired.difference(&current).map(|s| (*s).clone()).collect(),
            removals: current.difference(&desired).map(|s| (*s).clone()).collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

/// Which half goes first
///
/// Group members are removed before new ones are added; owners are added first
/// so a group never passes through a state with no owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOrder {
    RemoveFirst,
    AddFirst,
}

/// A relationship set on one parent object
#[async_trait]
pub trait RelationshipSet: Send + Sync {
    /// Metric label, e.g. `group_members`
    fn name(&self) -> &'static str;

    /// Plural noun for messages, e.g. `members`
    fn noun(&self) -> &'static str;

    fn parent_id(&self) -> &str;

    async fn list(&self) -> GraphResult<Vec<String>>;

    async fn add(&self, ids: &[String]) -> GraphResult<()>;

    async fn remove(&self, ids: &[String]) -> GraphResult<()>;
}

pub struct GroupMembers<'a, D: ?Sized> {
    pub directory: &'a D,
    pub group_id: &'a str,
}

pub struct GroupOwners<'a, D: ?Sized> {
    pub directory: &'a D,
    pub group_id: &'a str,
}

pub struct ApplicationOwners<'a, D: ?Sized> {
    pub directory: &'a D,
    pub application_id: &'a str,
}

impl<D: ?Sized> fmt::Debug for GroupMembers<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupMembers")
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

impl<D: ?Sized> fmt::Debug for GroupOwners<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupOwners")
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

impl<D: ?Sized> fmt::Debug for ApplicationOwners<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationOwners")
            .field("application_id", &self.application_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<D> RelationshipSet for GroupMembers<'_, D>
where
    D: GroupsApi + ?Sized,
{
    fn name(&self) -> &'static str {
        "group_members"
    }

    fn noun(&self) -> &'static str {
        "members"
    }

    fn parent_id(&self) -> &str {
        self.group_id
    }

    async fn list(&self) -> GraphResult<Vec<String>> {
        self.directory.list_group_members(self.group_id).await
    }

    async fn add(&self, ids: &[String]) -> GraphResult<()> {
        self.directory.add_group_members(self.group_id, ids).await
    }

    async fn remove(&self, ids: &[String]) -> GraphResult<()> {
        self.directory.remove_group_members(self.group_id, ids).await
    }
}

#[async_trait]
impl<D> RelationshipSet for GroupOwners<'_, D>
where
    D: GroupsApi + ?Sized,
{
    fn name(&self) -> &'static str {
        "group_owners"
    }

    fn noun(&self) -> &'static str {
        "owners"
    }

    fn parent_id(&self) -> &str {
        self.group_id
    }

    async fn list(&self) -> GraphResult<Vec<String>> {
        self.directory.list_group_owners(self.group_id).await
    }

    async fn add(&self, ids: &[String]) -> GraphResult<()> {
        self.directory.add_group_owners(self.group_id, ids).await
    }

    async fn remove(&self, ids: &[String]) -> GraphResult<()> {
        self.directory.remove_group_owners(self.group_id, ids).await
    }
}

#[async_trait]
impl<D> RelationshipSet for ApplicationOwners<'_, D>
where
    D: ApplicationsApi + ?Sized,
{
    fn name(&self) -> &'static str {
        "application_owners"
    }

    fn noun(&self) -> &'static str {
        "owners"
    }

    fn parent_id(&self) -> &str {
        self.application_id
    }

    async fn list(&self) -> GraphResult<Vec<String>> {
        self.directory.list_application_owners(self.application_id).await
    }

    async fn add(&self, ids: &[String]) -> GraphResult<()> {
        self.directory
            .add_application_owners(self.application_id, ids)
            .await
    }

    async fn remove(&self, ids: &[String]) -> GraphResult<()> {
        self.directory
            .remove_application_owners(self.application_id, ids)
            .await
    }
}

#[derive(Clone, Copy)]
enum Half {
    Add,
    Remove,
}

impl Half {
    fn verb(self) -> &'static str {
        match self {
            Self::Add => "adding",
            Self::Remove => "removing",
        }
    }
}

async fn apply_half<R: RelationshipSet + ?Sized>(
    relationship: &R,
    half: Half,
    ids: &[String],
) -> GraphResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    debug!(
        "{} {} {} on {}",
        half.verb(),
        ids.len(),
        relationship.noun(),
        relationship.parent_id()
    );
    match half {
        Half::Add => relationship.add(ids).await,
        Half::Remove => relationship.remove(ids).await,
    }
}

fn lowercased(ids: &[String]) -> Vec<String> {
    ids.iter().map(|id| id.to_ascii_lowercase()).collect()
}

/// Bring `relationship` in line with `desired`
///
/// # Errors
///
/// - [`ProviderError::Api`] when listing or the first half fails
/// - [`ProviderError::PartiallyApplied`] when the second half fails after the
///   first one changed something
pub async fn reconcile_relationship<R>(
    relationship: &R,
    desired: &[String],
    order: ApplyOrder,
) -> ProviderResult<SetDiff>
where
    R: RelationshipSet + ?Sized,
{
    let parent_id = relationship.parent_id().to_string();
    let noun = relationship.noun();

    let current = relationship
        .list()
        .await
        .for_action(format!("Retrieving {noun}"), &parent_id)?;
    // Object IDs are GUIDs, compared without regard to case
    let desired = lowercased(desired);
    let current = lowercased(&current);
    let diff = SetDiff::compute(&desired, &current);
    if diff.is_empty() {
        debug!("{noun} of {parent_id} already up to date");
        return Ok(diff);
    }

    let (first, second) = match order {
        ApplyOrder::RemoveFirst => (
            (Half::Remove, diff.removals.as_slice()),
            (Half::Add, diff.additions.as_slice()),
        ),
        ApplyOrder::AddFirst => (
            (Half::Add, diff.additions.as_slice()),
            (Half::Remove, diff.removals.as_slice()),
        ),
    };

    apply_half(relationship, first.0, first.1)
        .await
        .for_action(format!("{} {noun}", capitalize(first.0.verb())), &parent_id)?;

    if let Err(source) = apply_half(relationship, second.0, second.1).await {
        let action = format!("{} {noun}", capitalize(second.0.verb()));
        if first.1.is_empty() {
            return Err(ProviderError::api(action, parent_id, source));
        }
        return Err(ProviderError::PartiallyApplied {
            action,
            id: parent_id,
            completed: format!("{} {} {noun}", first.0.verb(), first.1.len()),
            source,
        });
    }

    metrics::record_relationship_changes(
        relationship.name(),
        diff.additions.len(),
        diff.removals.len(),
    );
    info!(
        "Reconciled {noun} of {parent_id}: +{} -{}",
        diff.additions.len(),
        diff.removals.len()
    );
    Ok(diff)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}
