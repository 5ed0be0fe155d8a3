//! Read-modify-write of app roles, permission scopes and credentials that
//! share one application object

mod common;

use azuread_provider::graph::models::Sensitive;
use azuread_provider::resources::app_role::{AppRoleConfig, AppRoleResource};
use azuread_provider::resources::oauth2_permission_scope::{
    PermissionScopeConfig, PermissionScopeResource,
};
use azuread_provider::resources::password::{PasswordConfig, PasswordResource};
use azuread_provider::{ProviderError, Resource};
use common::{directory, seed_application};
use futures::future::join_all;

const ROLE_ID: &str = "11111111-1111-1111-1111-111111111111";

fn role(object_id: &str, value: &str) -> AppRoleConfig {
    AppRoleConfig {
        application_object_id: object_id.to_string(),
        allowed_member_types: vec!["User".to_string()],
        description: format!("Grants {value}"),
        display_name: value.to_string(),
        enabled: true,
        role_id: None,
        value: Some(value.to_string()),
    }
}

fn scope(object_id: &str, value: &str) -> PermissionScopeConfig {
    PermissionScopeConfig {
        application_object_id: object_id.to_string(),
        admin_consent_description: format!("Allows {value}"),
        admin_consent_display_name: value.to_string(),
        enabled: true,
        scope_id: None,
        scope_type: "User".to_string(),
        user_consent_description: None,
        user_consent_display_name: None,
        value: value.to_string(),
    }
}

#[tokio::test]
async fn test_concurrent_role_creates_are_all_kept() {
    let (directory, ctx) = directory();
    let app = seed_application(&directory, "billing");

    let configs: Vec<AppRoleConfig> = (0..10).map(|i| role(&app, &format!("Role.{i}"))).collect();
    let results =
        join_all(configs.iter().map(|config| AppRoleResource::create(&ctx, config))).await;

    for result in &results {
        assert!(result.is_ok(), "{result:?}");
    }
    let stored = directory.application(&app).unwrap();
    assert_eq!(stored.app_roles().len(), 10);
    assert_eq!(directory.write_count(&app), 10);
}

#[tokio::test]
async fn test_mixed_sub_resources_on_one_parent() {
    let (directory, ctx) = directory();
    let app = seed_application(&directory, "billing");

    let role_config = role(&app, "Billing.Admin");
    let scope_config = scope(&app, "billing.read");
    let password_config = PasswordConfig {
        application_object_id: app.clone(),
        key_id: None,
        description: Some("deploy".to_string()),
        value: Sensitive::new("s3cret-value"),
        start_date: None,
        end_date: None,
        end_date_relative: Some("24h".to_string()),
    };

    let (role_state, scope_state, password_state) = tokio::join!(
        AppRoleResource::create(&ctx, &role_config),
        PermissionScopeResource::create(&ctx, &scope_config),
        PasswordResource::create(&ctx, &password_config),
    );
    role_state.unwrap();
    scope_state.unwrap();
    password_state.unwrap();

    let stored = directory.application(&app).unwrap();
    assert_eq!(stored.app_roles().len(), 1);
    assert_eq!(stored.oauth2_permission_scopes().len(), 1);
    assert_eq!(stored.password_credentials().len(), 1);
}

#[tokio::test]
async fn test_explicit_duplicate_id_rejected_without_write() {
    let (directory, ctx) = directory();
    let app = seed_application(&directory, "billing");

    let mut first = role(&app, "Reader");
    first.role_id = Some(ROLE_ID.to_string());
    AppRoleResource::create(&ctx, &first).await.unwrap();
    assert_eq!(directory.write_count(&app), 1);

    let mut second = role(&app, "Writer");
    second.role_id = Some(ROLE_ID.to_string());
    let err = AppRoleResource::create(&ctx, &second).await.unwrap_err();

    assert!(matches!(err, ProviderError::AlreadyExists { .. }), "{err:?}");
    assert_eq!(directory.write_count(&app), 1);
    assert_eq!(directory.application(&app).unwrap().app_roles().len(), 1);
}

#[tokio::test]
async fn test_enabled_role_delete_is_two_writes() {
    let (directory, ctx) = directory();
    let app = seed_application(&directory, "billing");

    let keep = AppRoleResource::create(&ctx, &role(&app, "Keep")).await.unwrap();
    let remove = AppRoleResource::create(&ctx, &role(&app, "Remove")).await.unwrap();
    let writes_before = directory.write_count(&app);

    AppRoleResource::delete(&ctx, &remove.id).await.unwrap();

    assert_eq!(directory.write_count(&app) - writes_before, 2);
    let roles = directory.application(&app).unwrap().app_roles().to_vec();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].id.as_deref(), Some(keep.role_id.as_str()));
    assert!(AppRoleResource::read(&ctx, &remove.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_scope_delete_is_two_writes() {
    let (directory, ctx) = directory();
    let app = seed_application(&directory, "billing");

    let created = PermissionScopeResource::create(&ctx, &scope(&app, "billing.read"))
        .await
        .unwrap();
    PermissionScopeResource::delete(&ctx, &created.id).await.unwrap();

    assert_eq!(directory.write_count(&app), 3);
    assert!(directory.application(&app).unwrap().oauth2_permission_scopes().is_empty());
}

#[tokio::test]
async fn test_update_of_deleted_role_reports_gone() {
    let (directory, ctx) = directory();
    let app = seed_application(&directory, "billing");

    let config = role(&app, "Reader");
    let created = AppRoleResource::create(&ctx, &config).await.unwrap();
    AppRoleResource::delete(&ctx, &created.id).await.unwrap();

    let mut desired = config.clone();
    desired.description = "Reads everything".to_string();
    let updated = AppRoleResource::update(&ctx, &created.id, &config, &desired)
        .await
        .unwrap();
    assert!(updated.is_none());
}

#[tokio::test]
async fn test_missing_parent_is_not_found() {
    let (_directory, ctx) = directory();
    let err = AppRoleResource::create(&ctx, &role("00000000-0000-0000-0000-0000000000ff", "Reader"))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "{err:?}");
}
