//! Shared fixtures for the integration tests

#![allow(dead_code, reason = "Each test binary uses a different subset of the fixtures")]

use azuread_provider::graph::models::Application;
use azuread_provider::graph::InMemoryDirectory;
use azuread_provider::replication::ReplicationPolicy;
use azuread_provider::ProviderContext;
use std::sync::{Arc, Once};

static RUSTLS_INIT: Once = Once::new();

/// Install the ring crypto provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        // Another test in the binary may have installed one already
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub const USER_A: &str = "00000000-0000-0000-0000-00000000000a";
pub const USER_B: &str = "00000000-0000-0000-0000-00000000000b";
pub const USER_C: &str = "00000000-0000-0000-0000-00000000000c";
pub const USER_D: &str = "00000000-0000-0000-0000-00000000000d";

/// An in-memory directory and a context over it that never sleeps
pub fn directory() -> (Arc<InMemoryDirectory>, ProviderContext) {
    let directory = Arc::new(InMemoryDirectory::new());
    let ctx = ProviderContext::new(directory.clone())
        .with_replication(ReplicationPolicy::immediate(5));
    (directory, ctx)
}

/// Seed an empty application and return its object ID
pub fn seed_application(directory: &InMemoryDirectory, name: &str) -> String {
    directory.insert_application(Application {
        display_name: Some(name.to_string()),
        ..Default::default()
    })
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}
