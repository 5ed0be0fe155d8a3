//! Waiting for newly created objects to become readable

mod common;

use azuread_provider::error::{GraphError, GraphResult};
use azuread_provider::replication::{wait_for_replication, ReplicationPolicy};
use azuread_provider::resources::group::{GroupConfig, GroupResource};
use azuread_provider::resources::user::{UserConfig, UserResource};
use azuread_provider::{ProviderError, Resource};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A probe answering from a script of responses, then succeeding forever
struct ScriptedProbe {
    script: Mutex<VecDeque<GraphResult<&'static str>>>,
    calls: AtomicU32,
}

impl ScriptedProbe {
    fn new(script: Vec<GraphResult<&'static str>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        }
    }

    async fn probe(&self) -> GraphResult<&'static str> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script.lock().unwrap().pop_front().unwrap_or(Ok("visible"))
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

fn not_found() -> GraphResult<&'static str> {
    Err(GraphError::not_found("Request_ResourceNotFound"))
}

#[tokio::test]
async fn test_returns_after_two_misses() {
    let probe = ScriptedProbe::new(vec![not_found(), not_found()]);
    let policy = ReplicationPolicy::immediate(5);
    let value = wait_for_replication("group", "g-1", &policy, || probe.probe())
        .await
        .unwrap();
    assert_eq!(value, "visible");
    assert_eq!(probe.calls(), 3);
}

#[tokio::test]
async fn test_times_out_when_never_visible() {
    let probe = ScriptedProbe::new((0..10).map(|_| not_found()).collect());
    let policy = ReplicationPolicy::immediate(4);
    let err = wait_for_replication("user", "u-1", &policy, || probe.probe())
        .await
        .unwrap_err();

    match err {
        ProviderError::ReplicationTimeout { resource, id, attempts } => {
            assert_eq!(resource, "user");
            assert_eq!(id, "u-1");
            assert_eq!(attempts, 4);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(probe.calls(), 4);
}

#[tokio::test]
async fn test_server_error_stops_waiting() {
    let probe = ScriptedProbe::new(vec![
        not_found(),
        Err(GraphError::Api {
            status: 500,
            code: "InternalServerError".to_string(),
            message: "boom".to_string(),
        }),
    ]);
    let policy = ReplicationPolicy::immediate(5);
    let err = wait_for_replication("group", "g-1", &policy, || probe.probe())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Api { .. }), "{err:?}");
    assert_eq!(probe.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_successes_required() {
    let probe = ScriptedProbe::new(vec![Ok("visible"), not_found(), Ok("visible")]);
    let policy = ReplicationPolicy {
        max_attempts: 10,
        min_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        consecutive_successes: 2,
    };
    wait_for_replication("group", "g-1", &policy, || probe.probe())
        .await
        .unwrap();
    // ok, 404 (resets), ok, ok
    assert_eq!(probe.calls(), 4);
}

#[tokio::test]
async fn test_group_create_times_out_when_lag_exceeds_budget() {
    let (directory, ctx) = common::directory();
    directory.set_replication_lag(10);
    let ctx = ctx.with_replication(ReplicationPolicy::immediate(3));

    let config = GroupConfig {
        display_name: "slow".to_string(),
        description: None,
        members: vec![],
        owners: vec![],
        prevent_duplicate_names: false,
    };
    let err = GroupResource::create(&ctx, &config).await.unwrap_err();
    assert!(matches!(err, ProviderError::ReplicationTimeout { attempts: 3, .. }), "{err:?}");
}

#[tokio::test]
async fn test_user_create_waits_through_lag() {
    let (directory, ctx) = common::directory();
    directory.set_replication_lag(2);

    let config: UserConfig = serde_yaml::from_str(
        r"
user_principal_name: alice@contoso.com
display_name: Alice
password: correct-horse-battery-staple
",
    )
    .unwrap();
    let state = UserResource::create(&ctx, &config).await.unwrap();
    assert_eq!(state.mail_nickname, "alice");
    assert_eq!(directory.call_count("get_user"), 3);
}
