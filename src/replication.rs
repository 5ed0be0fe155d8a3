//! # Replication Waiter
//!
//! Azure AD is eventually consistent: an object returned by a successful create
//! may still answer 404 on the next read. After creating a group or user the
//! caller polls with [`wait_for_replication`] until the object is readable.
//!
//! - 404 from the probe: not replicated yet, retry after a Fibonacci backoff
//! - any other error: fatal, returned immediately
//! - success: done once `consecutive_successes` probes in a row succeeded
//! - budget exhausted: [`ProviderError::ReplicationTimeout`] naming the object

use crate::backoff::FibonacciBackoff;
use crate::constants::{
    DEFAULT_REPLICATION_CONSECUTIVE_SUCCESSES, DEFAULT_REPLICATION_MAX_ATTEMPTS,
    DEFAULT_REPLICATION_MAX_DELAY_MS, DEFAULT_REPLICATION_MIN_DELAY_MS,
};
use crate::error::{GraphResult, ProviderError, ProviderResult};
use crate::observability::metrics;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument};

/// Retry budget for the replication waiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationPolicy {
    /// Probes issued before giving up (at least one probe is always issued)
    pub max_attempts: u32,
    /// First delay between probes
    pub min_delay: Duration,
    /// Cap on the delay between probes
    pub max_delay: Duration,
    /// Successful probes in a row required before returning
    pub consecutive_successes: u32,
}

impl Default for ReplicationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_REPLICATION_MAX_ATTEMPTS,
            min_delay: Duration::from_millis(DEFAULT_REPLICATION_MIN_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_REPLICATION_MAX_DELAY_MS),
            consecutive_successes: DEFAULT_REPLICATION_CONSECUTIVE_SUCCESSES,
        }
    }
}

impl ReplicationPolicy {
    /// Policy with no delay between probes
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            consecutive_successes: 1,
        }
    }
}

/// Poll `probe` until the object `id` is visible.
///
/// Returns the value produced by the last successful probe.
///
/// # Errors
///
/// - [`ProviderError::Api`] when the probe fails with anything but 404
/// - [`ProviderError::ReplicationTimeout`] when the budget runs out
pub async fn wait_for_replication<T, F, Fut>(
    resource: &'static str,
    id: &str,
    policy: &ReplicationPolicy,
    mut probe: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GraphResult<T>>,
{
    let span = info_span!(
        "replication.wait",
        resource = resource,
        object.id = id,
        attempts = tracing::field::Empty
    );
    let span_clone = span.clone();

    async move {
        let max_attempts = policy.max_attempts.max(1);
        let required = policy.consecutive_successes.max(1);
        let mut backoff = FibonacciBackoff::new(policy.min_delay, policy.max_delay);
        let mut successes = 0u32;

        for attempt in 1..=max_attempts {
            metrics::increment_replication_attempts(resource);

            match probe().await {
                Ok(value) => {
                    successes += 1;
                    if successes >= required {
                        span_clone.record("attempts", attempt);
                        debug!("{resource} {id} visible after {attempt} attempt(s)");
                        return Ok(value);
                    }
                }
                Err(e) if e.is_not_found() => {
                    successes = 0;
                    debug!("{resource} {id} not yet replicated (attempt {attempt}/{max_attempts})");
                }
                Err(e) => {
                    span_clone.record("attempts", attempt);
                    return Err(ProviderError::api(
                        format!("Waiting for {resource} to replicate"),
                        id,
                        e,
                    ));
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(backoff.next_backoff()).await;
            }
        }

        span_clone.record("attempts", max_attempts);
        metrics::increment_replication_timeouts(resource);
        warn!("{resource} {id} still not readable after {max_attempts} attempts");
        Err(ProviderError::ReplicationTimeout {
            resource,
            id: id.to_string(),
            attempts: max_attempts,
        })
    }
    .instrument(span)
    .await
}
