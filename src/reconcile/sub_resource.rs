//! # Sub-Resource Reconciler
//!
//! App roles, permission scopes and credentials are not addressable objects in
//! Graph: they are entries in collections on an application. Every change is a
//! read-modify-write of the whole collection:
//!
//! 1. lock `application:<objectId>` in the named lock registry
//! 2. GET the application (404 is fatal for writes)
//! 3. locate the entry by ID
//! 4. mutate a copy of the collection
//! 5. PATCH only that collection back
//!
//! App roles and scopes cannot be removed while enabled, so deleting one takes
//! two write-backs: disable, then remove. Credentials are removed in one.

use crate::error::{GraphResultExt, ProviderError, ProviderResult};
use crate::graph::models::{
    AppRole, Application, ApplicationApi, KeyCredential, PasswordCredential, PermissionScope,
};
use crate::graph::ApplicationsApi;
use crate::locks::{self, NamedLocks};
use crate::resources::ids::{AppRoleId, CredentialId, CredentialKind, ScopeId};
use crate::validation::values;
use std::fmt;
use tracing::{debug, info, info_span, Instrument};

/// An entry in one of an application's sub-resource collections
pub trait SubResource: Clone + PartialEq + Send + Sync + 'static {
    /// Resource type named in import hints
    const RESOURCE_TYPE: &'static str;

    /// Human-readable name used in error actions
    const DESCRIPTION: &'static str;

    /// Whether removal needs a disabling write-back first
    const DISABLE_BEFORE_REMOVE: bool;

    fn id(&self) -> Option<&str>;

    fn set_id(&mut self, id: String);

    /// The collection this entry lives in
    fn collection(application: &Application) -> &[Self];

    /// PATCH body carrying only this collection
    fn patch(entries: Vec<Self>) -> Application;

    /// Composite identifier of the entry on `object_id`
    fn composite_id(object_id: &str, id: &str) -> String;

    /// Mark the entry disabled ahead of removal
    fn disable(&mut self) {}

    /// Claim value, used to carry IDs over when a collection is replaced wholesale
    fn claim(&self) -> Option<&str> {
        None
    }

    /// Check the entry against the rest of the application before writing
    ///
    /// # Errors
    ///
    /// [`ProviderError::Validation`] when the entry conflicts with a sibling
    fn check_against(_application: &Application, _entry: &Self) -> ProviderResult<()> {
        Ok(())
    }
}

/// Result of a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The entry was removed
    Deleted,
    /// The entry was already absent, nothing was written
    Gone,
}

/// Read-modify-write driver for sub-resource collections
pub struct SubResourceReconciler<'a, D: ?Sized> {
    directory: &'a D,
    locks: &'a NamedLocks,
}

impl<D: ?Sized> fmt::Debug for SubResourceReconciler<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubResourceReconciler")
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl<'a, D> SubResourceReconciler<'a, D>
where
    D: ApplicationsApi + ?Sized,
{
    pub fn new(directory: &'a D, locks: &'a NamedLocks) -> Self {
        Self { directory, locks }
    }

    /// GET the parent, mapping 404 to [`ProviderError::NotFound`]
    async fn parent(&self, object_id: &str) -> ProviderResult<Application> {
        match self.directory.get_application(object_id).await {
            Ok(application) => Ok(application),
            Err(e) if e.is_not_found() => Err(ProviderError::NotFound {
                resource: "Application",
                id: object_id.to_string(),
            }),
            Err(e) => Err(ProviderError::api("Retrieving application", object_id, e)),
        }
    }

    async fn write_back<S: SubResource>(
        &self,
        object_id: &str,
        action: String,
        entries: Vec<S>,
    ) -> ProviderResult<()> {
        self.directory
            .update_application(object_id, &S::patch(entries))
            .await
            .for_action(action, object_id)
    }

    /// Append `entry` to the collection, generating an ID when it has none
    ///
    /// # Errors
    ///
    /// - [`ProviderError::NotFound`] when the application is gone
    /// - [`ProviderError::AlreadyExists`] when the ID is taken; nothing is written
    pub async fn create<S: SubResource>(&self, object_id: &str, mut entry: S) -> ProviderResult<S> {
        let id = match entry.id() {
            Some(id) => id.to_string(),
            None => {
                let generated = uuid::Uuid::new_v4().to_string();
                entry.set_id(generated.clone());
                generated
            }
        };
        let span = info_span!(
            "reconcile.sub_resource.create",
            resource.type = S::RESOURCE_TYPE,
            object.id = object_id,
            entry.id = %id
        );

        async move {
            let _guard = self.locks.lock(locks::APPLICATION, object_id).await;
            let application = self.parent(object_id).await?;

            let collection = S::collection(&application);
            if collection.iter().any(|existing| existing.id() == Some(id.as_str())) {
                return Err(ProviderError::AlreadyExists {
                    resource_type: S::RESOURCE_TYPE,
                    id: S::composite_id(object_id, &id),
                });
            }
            S::check_against(&application, &entry)?;

            let mut entries = collection.to_vec();
            entries.push(entry.clone());
            self.write_back(object_id, format!("Adding {}", S::DESCRIPTION), entries)
                .await?;

            info!("Added {} {id} to application {object_id}", S::DESCRIPTION);
            Ok(entry)
        }
        .instrument(span)
        .await
    }

    /// Replace the entry with the same ID
    ///
    /// Returns `Ok(None)` when the entry no longer exists on the application, in
    /// which case nothing is written and the caller should drop it from state.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::NotFound`] when the application is gone
    /// - [`ProviderError::Validation`] when `entry` has no ID
    pub async fn update<S: SubResource>(
        &self,
        object_id: &str,
        entry: S,
    ) -> ProviderResult<Option<S>> {
        let Some(id) = entry.id().map(str::to_string) else {
            return Err(ProviderError::validation("id", "an existing entry must carry its ID"));
        };
        let span = info_span!(
            "reconcile.sub_resource.update",
            resource.type = S::RESOURCE_TYPE,
            object.id = object_id,
            entry.id = %id
        );

        async move {
            let _guard = self.locks.lock(locks::APPLICATION, object_id).await;
            let application = self.parent(object_id).await?;

            let mut entries = S::collection(&application).to_vec();
            let Some(position) = entries.iter().position(|e| e.id() == Some(id.as_str())) else {
                debug!("{} {id} no longer exists on application {object_id}", S::DESCRIPTION);
                return Ok(None);
            };
            S::check_against(&application, &entry)?;

            entries[position] = entry.clone();
            self.write_back(object_id, format!("Updating {}", S::DESCRIPTION), entries)
                .await?;

            info!("Updated {} {id} on application {object_id}", S::DESCRIPTION);
            Ok(Some(entry))
        }
        .instrument(span)
        .await
    }

    /// Current value of the entry; `None` when it or its application is gone
    ///
    /// Takes no lock.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Api`] for any remote failure other than 404
    pub async fn read<S: SubResource>(
        &self,
        object_id: &str,
        id: &str,
    ) -> ProviderResult<Option<S>> {
        let application = match self.parent(object_id).await {
            Ok(application) => application,
            Err(ProviderError::NotFound { .. }) => {
                debug!("Application {object_id} for {} {id} was not found", S::DESCRIPTION);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        Ok(S::collection(&application)
            .iter()
            .find(|e| e.id() == Some(id))
            .cloned())
    }

    /// Remove the entry
    ///
    /// # Errors
    ///
    /// - [`ProviderError::NotFound`] when the application is gone
    /// - [`ProviderError::Api`] when a write-back fails; after a failed second
    ///   write the entry is left disabled
    pub async fn delete<S: SubResource>(
        &self,
        object_id: &str,
        id: &str,
    ) -> ProviderResult<DeleteOutcome> {
        let span = info_span!(
            "reconcile.sub_resource.delete",
            resource.type = S::RESOURCE_TYPE,
            object.id = object_id,
            entry.id = id
        );

        async move {
            let _guard = self.locks.lock(locks::APPLICATION, object_id).await;
            let application = self.parent(object_id).await?;

            let mut entries = S::collection(&application).to_vec();
            let Some(position) = entries.iter().position(|e| e.id() == Some(id)) else {
                debug!("{} {id} already absent from application {object_id}", S::DESCRIPTION);
                return Ok(DeleteOutcome::Gone);
            };

            if S::DISABLE_BEFORE_REMOVE {
                entries[position].disable();
                self.write_back(
                    object_id,
                    format!("Disabling {} {id}", S::DESCRIPTION),
                    entries.clone(),
                )
                .await?;
            }

            entries.remove(position);
            self.write_back(object_id, format!("Removing {} {id}", S::DESCRIPTION), entries)
                .await?;

            info!("Removed {} {id} from application {object_id}", S::DESCRIPTION);
            Ok(DeleteOutcome::Deleted)
        }
        .instrument(span)
        .await
    }
    /// Replace the whole collection with `desired`
    ///
    /// Entries without an ID take the ID of the current entry with the same
    /// claim value, or a fresh one. When entries must be disabled before
    /// removal, every current entry is disabled in a first write-back.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::NotFound`] when the application is gone
    /// - [`ProviderError::Api`] when a write-back fails
    pub async fn replace_all<S: SubResource>(
        &self,
        object_id: &str,
        mut desired: Vec<S>,
    ) -> ProviderResult<Vec<S>> {
        let span = info_span!(
            "reconcile.sub_resource.replace_all",
            resource.type = S::RESOURCE_TYPE,
            object.id = object_id,
            entries = desired.len()
        );

        async move {
            let _guard = self.locks.lock(locks::APPLICATION, object_id).await;
            let application = self.parent(object_id).await?;
            let current = S::collection(&application).to_vec();

            for entry in desired.iter_mut().filter(|e| e.id().is_none()) {
                let carried = entry.claim().and_then(|claim| {
                    current
                        .iter()
                        .find(|c| c.claim() == Some(claim))
                        .and_then(|c| c.id().map(str::to_string))
                });
                entry.set_id(carried.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()));
            }

            if S::DISABLE_BEFORE_REMOVE {
                let disabled: Vec<S> = current
                    .iter()
                    .cloned()
                    .map(|mut e| {
                        e.disable();
                        e
                    })
                    .collect();
                if disabled != current {
                    let action = format!("Disabling existing {}s", S::DESCRIPTION);
                    self.write_back(object_id, action, disabled).await?;
                }
            }

            self.write_back(object_id, format!("Setting {}s", S::DESCRIPTION), desired.clone())
                .await?;

            info!(
                "Replaced {} {}s on application {object_id}",
                desired.len(),
                S::DESCRIPTION
            );
            Ok(desired)
        }
        .instrument(span)
        .await
    }
}

/// Role and scope values share one claim namespace; `entry` replaces any sibling with its ID
fn check_claim_value(
    application: &Application,
    entry_id: Option<&str>,
    entry_value: Option<&str>,
    attr: &str,
) -> ProviderResult<()> {
    let Some(value) = entry_value.filter(|v| !v.is_empty()) else {
        return Ok(());
    };
    let roles = application
        .app_roles()
        .iter()
        .filter(|r| r.id.as_deref() != entry_id)
        .filter_map(|r| r.value.as_deref());
    let scopes = application
        .oauth2_permission_scopes()
        .iter()
        .filter(|s| s.id.as_deref() != entry_id)
        .filter_map(|s| s.value.as_deref());
    values::unique_claim_values(attr, roles.chain(scopes).chain(std::iter::once(value)))
}

impl SubResource for AppRole {
    const RESOURCE_TYPE: &'static str = "azuread_application_app_role";
    const DESCRIPTION: &'static str = "app role";
    const DISABLE_BEFORE_REMOVE: bool = true;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn collection(application: &Application) -> &[Self] {
        application.app_roles()
    }

    fn patch(entries: Vec<Self>) -> Application {
        Application {
            app_roles: Some(entries),
            ..Default::default()
        }
    }

    fn composite_id(object_id: &str, id: &str) -> String {
        AppRoleId::new(object_id, id).to_string()
    }

    fn claim(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }

    fn disable(&mut self) {
        self.is_enabled = Some(false);
    }

    fn check_against(application: &Application, entry: &Self) -> ProviderResult<()> {
        check_claim_value(application, entry.id(), entry.value.as_deref(), "value")
    }
}

impl SubResource for PermissionScope {
    const RESOURCE_TYPE: &'static str = "azuread_application_oauth2_permission_scope";
    const DESCRIPTION: &'static str = "OAuth2 permission scope";
    const DISABLE_BEFORE_REMOVE: bool = true;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn collection(application: &Application) -> &[Self] {
        application.oauth2_permission_scopes()
    }

    fn patch(entries: Vec<Self>) -> Application {
        Application {
            api: Some(ApplicationApi {
                oauth2_permission_scopes: Some(entries),
            }),
            ..Default::default()
        }
    }

    fn composite_id(object_id: &str, id: &str) -> String {
        ScopeId::new(object_id, id).to_string()
    }

    fn claim(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }

    fn disable(&mut self) {
        self.is_enabled = Some(false);
    }

    fn check_against(application: &Application, entry: &Self) -> ProviderResult<()> {
        check_claim_value(application, entry.id(), entry.value.as_deref(), "value")
    }
}

impl SubResource for KeyCredential {
    const RESOURCE_TYPE: &'static str = "azuread_application_certificate";
    const DESCRIPTION: &'static str = "certificate credential";
    const DISABLE_BEFORE_REMOVE: bool = false;

    fn id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.key_id = Some(id);
    }

    fn collection(application: &Application) -> &[Self] {
        application.key_credentials()
    }

    fn patch(entries: Vec<Self>) -> Application {
        Application {
            key_credentials: Some(entries),
            ..Default::default()
        }
    }

    fn composite_id(object_id: &str, id: &str) -> String {
        CredentialId::new(object_id, CredentialKind::Certificate, id).to_string()
    }
}

impl SubResource for PasswordCredential {
    const RESOURCE_TYPE: &'static str = "azuread_application_password";
    const DESCRIPTION: &'static str = "password credential";
    const DISABLE_BEFORE_REMOVE: bool = false;

    fn id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.key_id = Some(id);
    }

    fn collection(application: &Application) -> &[Self] {
        application.password_credentials()
    }

    fn patch(entries: Vec<Self>) -> Application {
        Application {
            password_credentials: Some(entries),
            ..Default::default()
        }
    }

    fn composite_id(object_id: &str, id: &str) -> String {
        CredentialId::new(object_id, CredentialKind::Password, id).to_string()
    }
}
