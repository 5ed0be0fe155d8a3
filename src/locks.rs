//! # Named Locks
//!
//! Process-wide registry of async mutexes keyed by a type-qualified parent
//! identifier such as `application:<objectId>`.
//!
//! Resources that mutate different slices of one parent object (several app
//! roles on one application, a scope and a certificate on the same application)
//! take the parent's lock around their read-modify-write so that no two of them
//! read the same pre-mutation collection.
//!
//! - At most one holder per key; different keys never block each other.
//! - No timeout. Holders keep the lock for one read plus one or two writes.
//! - Entries are created on first use and never removed, so the map grows with
//!   the number of distinct parents touched in this process.
//! - The guard releases on drop, including early `?` returns.

use crate::observability::metrics;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Lock kind for application objects
pub const APPLICATION: &str = "application";

/// Lock kind for group objects
pub const GROUP: &str = "group";

static GLOBAL: LazyLock<NamedLocks> = LazyLock::new(NamedLocks::new);

/// The registry shared by every operation in this process
#[must_use]
pub fn global() -> &'static NamedLocks {
    &GLOBAL
}

/// Keyed lock registry
#[derive(Debug, Default)]
pub struct NamedLocks {
    entries: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held lock for one key. Dropping it releases the key.
#[derive(Debug)]
pub struct NamedLockGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl NamedLockGuard {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl NamedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        // The std mutex only guards map insertion, a panic elsewhere cannot leave it inconsistent
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(entries.entry(key.to_string()).or_default())
    }

    /// Acquire the lock for `<kind>:<id>`, waiting for the current holder if any
    pub async fn lock(&self, kind: &str, id: &str) -> NamedLockGuard {
        let key = format!("{kind}:{id}");
        let mutex = self.entry(&key);

        let start = Instant::now();
        let guard = mutex.lock_owned().await;
        let waited = start.elapsed();

        metrics::observe_lock_wait(kind, waited.as_secs_f64());
        debug!(
            lock.key = %key,
            lock.wait_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            "Acquired named lock"
        );

        NamedLockGuard { key, _guard: guard }
    }

    /// Number of keys ever locked through this registry
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_same_key_blocks_until_released() {
        let locks = NamedLocks::new();
        let guard = locks.lock(APPLICATION, "app-1").await;
        assert_eq!(guard.key(), "application:app-1");

        let second = timeout(Duration::from_millis(50), locks.lock(APPLICATION, "app-1")).await;
        assert!(second.is_err(), "second holder must wait while the first is held");

        drop(guard);
        let second = timeout(Duration::from_millis(50), locks.lock(APPLICATION, "app-1")).await;
        assert!(second.is_ok(), "lock must be available after release");
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = NamedLocks::new();
        let _first = locks.lock(APPLICATION, "app-1").await;

        let other_id = timeout(Duration::from_millis(50), locks.lock(APPLICATION, "app-2")).await;
        assert!(other_id.is_ok());

        // same id, different kind is a different key
        let other_kind = timeout(Duration::from_millis(50), locks.lock(GROUP, "app-1")).await;
        assert!(other_kind.is_ok());
    }

    #[tokio::test]
    async fn test_entries_are_created_lazily_and_kept() {
        let locks = NamedLocks::new();
        assert!(locks.is_empty());

        drop(locks.lock(APPLICATION, "a").await);
        drop(locks.lock(APPLICATION, "b").await);
        drop(locks.lock(APPLICATION, "a").await);

        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_guard_released_on_early_return() {
        async fn fails_while_locked(locks: &NamedLocks) -> Result<(), &'static str> {
            let _guard = locks.lock(APPLICATION, "app-err").await;
            let write: Result<(), &'static str> = Err("remote write failed");
            write?;
            Ok(())
        }

        let locks = NamedLocks::new();
        assert!(fails_while_locked(&locks).await.is_err());

        let again = timeout(Duration::from_millis(50), locks.lock(APPLICATION, "app-err")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_global_registry_is_shared() {
        let guard = global().lock(APPLICATION, "global-shared-test").await;
        let blocked = timeout(
            Duration::from_millis(50),
            global().lock(APPLICATION, "global-shared-test"),
        )
        .await;
        assert!(blocked.is_err());
        drop(guard);
    }
}
