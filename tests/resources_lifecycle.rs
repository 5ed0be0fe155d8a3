//! Create, read, update and delete of every resource kind against the
//! in-memory directory, driven both directly and through a manifest

mod common;

use azuread_provider::config::Manifest;
use azuread_provider::plan::{Action, Executor};
use azuread_provider::resources::application::ApplicationResource;
use azuread_provider::resources::group::GroupResource;
use azuread_provider::resources::user::UserResource;
use azuread_provider::state::StateFile;
use azuread_provider::graph::{ApplicationsApi, GroupsApi};
use azuread_provider::replication::ReplicationPolicy;
use azuread_provider::{ProviderContext, ProviderError, Resource};
use common::{directory, USER_A};

const MISSING: &str = "00000000-0000-0000-0000-0000000000ff";

#[tokio::test]
async fn test_read_of_missing_objects_is_none() {
    let (_directory, ctx) = directory();
    assert!(ApplicationResource::read(&ctx, MISSING).await.unwrap().is_none());
    assert!(GroupResource::read(&ctx, MISSING).await.unwrap().is_none());
    assert!(UserResource::read(&ctx, MISSING).await.unwrap().is_none());
}

#[tokio::test]
async fn test_read_server_error_is_not_swallowed() {
    let (directory, ctx) = directory();
    directory.fail_next("get_group", 500);
    let err = GroupResource::read(&ctx, MISSING).await.unwrap_err();
    assert!(matches!(err, ProviderError::Api { .. }), "{err:?}");

    directory.fail_next("get_application", 403);
    let err = ApplicationResource::read(&ctx, MISSING).await.unwrap_err();
    assert!(!err.is_not_found());
}

#[tokio::test]
async fn test_delete_of_missing_object_is_not_found() {
    let (_directory, ctx) = directory();
    let err = GroupResource::delete(&ctx, MISSING).await.unwrap_err();
    assert!(err.is_not_found());
    let err = UserResource::delete(&ctx, MISSING).await.unwrap_err();
    assert!(err.is_not_found());
}

const MANIFEST: &str = r#"
resources:
  - address: user.alice
    kind: azuread_user
    config:
      user_principal_name: alice@contoso.com
      display_name: Alice
      password: correct-horse-battery-staple
  - address: group.finance
    kind: azuread_group
    config:
      display_name: finance
      members: ["@user.alice"]
  - address: app.billing
    kind: azuread_application
    config:
      display_name: billing
      owners: ["@user.alice"]
  - address: role.reader
    kind: azuread_application_app_role
    config:
      application_object_id: "@app.billing"
      allowed_member_types: [User]
      description: Read invoices
      display_name: Reader
      value: Invoices.Read
  - address: scope.read
    kind: azuread_application_oauth2_permission_scope
    config:
      application_object_id: "@app.billing"
      admin_consent_description: Read invoices
      admin_consent_display_name: Read invoices
      value: invoices.read
  - address: secret.deploy
    kind: azuread_application_password
    config:
      application_object_id: "@app.billing"
      description: deploy
      value: not-a-real-secret
      end_date_relative: 720h
"#;

#[tokio::test]
async fn test_manifest_lifecycle() {
    let (directory, ctx) = directory();
    let executor = Executor::new(ctx, 4);
    let manifest = Manifest::parse(MANIFEST).unwrap();
    let mut state = StateFile::default();

    let report = executor.apply(&manifest, &mut state).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(state.resources.len(), 6);

    let alice = state.resources["user.alice"].id.clone();
    let group = state.resources["group.finance"].id.clone();
    let app = state.resources["app.billing"].id.clone();
    assert!(directory.members_of(&group).contains(&alice));
    assert!(directory.owners_of(&app).contains(&alice));

    let stored = directory.application(&app).unwrap();
    assert_eq!(stored.app_roles().len(), 1);
    assert_eq!(stored.oauth2_permission_scopes().len(), 1);
    assert_eq!(stored.password_credentials().len(), 1);

    // Changing a role description is an in-place update
    let changed = Manifest::parse(&MANIFEST.replace(
        "      description: Read invoices",
        "      description: Reads invoices",
    ))
    .unwrap();
    let report = executor.apply(&changed, &mut state).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(report.action("role.reader"), Some(Action::Update));
    assert_eq!(report.action("app.billing"), Some(Action::Unchanged));

    // Any change to a password replaces it
    let rotated = Manifest::parse(&changed_secret(&changed)).unwrap();
    let report = executor.apply(&rotated, &mut state).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(report.action("secret.deploy"), Some(Action::Replace));
    assert_eq!(directory.application(&app).unwrap().password_credentials().len(), 1);

    let report = executor.destroy(&mut state).await;
    assert!(report.is_success(), "{:?}", report.failures);
    assert!(state.resources.is_empty());
    assert!(directory.application(&app).is_none());
}

fn changed_secret(manifest: &Manifest) -> String {
    let mut manifest = manifest.clone();
    for entry in &mut manifest.resources {
        if entry.address == "secret.deploy" {
            entry.config["value"] = serde_json::json!("rotated-secret");
        }
    }
    serde_yaml::to_string(&manifest).unwrap()
}

#[tokio::test]
async fn test_failure_is_isolated_to_its_resource() {
    let (directory, ctx) = directory();
    let executor = Executor::new(ctx, 2);
    let manifest = Manifest::parse(
        r"
resources:
  - address: group.a
    kind: azuread_group
    config:
      display_name: a
  - address: app.b
    kind: azuread_application
    config:
      display_name: b
",
    )
    .unwrap();
    directory.fail_next("create_group", 500);

    let mut state = StateFile::default();
    let report = executor.apply(&manifest, &mut state).await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].address, "group.a");
    assert_eq!(report.action("app.b"), Some(Action::Create));
    assert!(state.resources.contains_key("app.b"));
    assert!(!state.resources.contains_key("group.a"));
}

#[tokio::test]
async fn test_group_created_before_a_failed_wait_is_completed_not_duplicated() {
    let (directory, _) = directory();
    let ctx = ProviderContext::new(directory.clone())
        .with_replication(ReplicationPolicy::immediate(2));
    let executor = Executor::new(ctx, 2);
    let manifest = Manifest::parse(
        r"
resources:
  - address: group.finance
    kind: azuread_group
    config:
      display_name: finance
",
    )
    .unwrap();

    // Hidden for three reads, the first apply gives up after two
    directory.set_replication_lag(3);
    let mut state = StateFile::default();
    let report = executor.apply(&manifest, &mut state).await.unwrap();

    assert_eq!(report.failures.len(), 1);
    let message = report.failures[0].error.to_string();
    assert!(message.contains("was created but not fully configured"), "{message}");
    let entry = &state.resources["group.finance"];
    assert!(entry.incomplete);
    let created = entry.id.clone();

    directory.set_replication_lag(0);
    let report = executor.apply(&manifest, &mut state).await.unwrap();

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(report.action("group.finance"), Some(Action::Update));
    let groups = directory.list_groups(None).await.unwrap();
    assert_eq!(groups.len(), 1);
    let entry = &state.resources["group.finance"];
    assert_eq!(entry.id, created);
    assert!(!entry.incomplete);
}

#[tokio::test]
async fn test_application_kept_when_setting_owners_fails() {
    let (directory, ctx) = directory();
    let executor = Executor::new(ctx, 2);
    let manifest = Manifest::parse(&format!(
        r"
resources:
  - address: app.billing
    kind: azuread_application
    config:
      display_name: billing
      owners: [{USER_A}]
"
    ))
    .unwrap();
    directory.fail_next("add_application_owners", 500);

    let mut state = StateFile::default();
    let report = executor.apply(&manifest, &mut state).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(state.resources["app.billing"].incomplete);

    let report = executor.apply(&manifest, &mut state).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failures);

    let applications = directory.list_applications(None).await.unwrap();
    assert_eq!(applications.len(), 1);
    let id = &state.resources["app.billing"].id;
    assert_eq!(applications[0].id.as_ref(), Some(id));
    assert!(directory.owners_of(id).contains(USER_A));
}

#[tokio::test]
async fn test_incomplete_entry_whose_object_is_gone_stays_failed() {
    let (directory, _) = directory();
    let ctx = ProviderContext::new(directory.clone())
        .with_replication(ReplicationPolicy::immediate(2));
    let executor = Executor::new(ctx, 2);
    let manifest = Manifest::parse(
        r"
resources:
  - address: group.ops
    kind: azuread_group
    config:
      display_name: ops
",
    )
    .unwrap();

    directory.set_replication_lag(10);
    let mut state = StateFile::default();
    executor.apply(&manifest, &mut state).await.unwrap();
    let id = state.resources["group.ops"].id.clone();
    directory.delete_group(&id).await.unwrap();

    // No second group is created while the first one is still tracked
    let report = executor.apply(&manifest, &mut state).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(directory.list_groups(None).await.unwrap().is_empty());
    assert!(state.resources["group.ops"].incomplete);
}
