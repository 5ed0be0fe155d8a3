//! # Metrics
//!
//! Prometheus metrics for monitoring directory reconciliation.
//!
//! ## Metrics Exposed
//!
//! - `azuread_graph_operations_total` - Graph API calls by object type and operation
//! - `azuread_graph_operation_duration_seconds` - Duration of Graph API calls
//! - `azuread_graph_operation_errors_total` - Failed Graph API calls
//! - `azuread_graph_retries_total` - Transport-level retries of throttled calls
//! - `azuread_lock_wait_seconds` - Time spent waiting on a named parent lock
//! - `azuread_replication_attempts_total` - Probes issued while waiting for replication
//! - `azuread_replication_timeouts_total` - Objects that never became visible
//! - `azuread_relationship_changes_total` - Owner/member additions and removals
//! - `azuread_resource_operations_total` - Resource lifecycle operations by kind and action

use anyhow::{Context, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static GRAPH_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "azuread_graph_operations_total",
            "Total number of Graph API operations by object type and operation",
        ),
        &["object_type", "operation"],
    )
    .expect("Failed to create GRAPH_OPERATIONS_TOTAL metric - this should never happen")
});

static GRAPH_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "azuread_graph_operation_duration_seconds",
            "Duration of Graph API operations in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["object_type", "operation"],
    )
    .expect("Failed to create GRAPH_OPERATION_DURATION metric - this should never happen")
});

static GRAPH_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "azuread_graph_operation_errors_total",
            "Total number of failed Graph API operations",
        ),
        &["object_type", "operation"],
    )
    .expect("Failed to create GRAPH_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

static GRAPH_RETRIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "azuread_graph_retries_total",
            "Total number of transport-level retries by HTTP status",
        ),
        &["status"],
    )
    .expect("Failed to create GRAPH_RETRIES_TOTAL metric - this should never happen")
});

static LOCK_WAIT_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "azuread_lock_wait_seconds",
            "Time spent waiting to acquire a named parent lock",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["kind"],
    )
    .expect("Failed to create LOCK_WAIT_SECONDS metric - this should never happen")
});

static REPLICATION_ATTEMPTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "azuread_replication_attempts_total",
            "Total number of probes issued while waiting for replication",
        ),
        &["resource"],
    )
    .expect("Failed to create REPLICATION_ATTEMPTS_TOTAL metric - this should never happen")
});

static REPLICATION_TIMEOUTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "azuread_replication_timeouts_total",
            "Total number of objects that did not replicate within the retry budget",
        ),
        &["resource"],
    )
    .expect("Failed to create REPLICATION_TIMEOUTS_TOTAL metric - this should never happen")
});

static RELATIONSHIP_CHANGES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "azuread_relationship_changes_total",
            "Total number of owner/member references added or removed",
        ),
        &["relationship", "change"],
    )
    .expect("Failed to create RELATIONSHIP_CHANGES_TOTAL metric - this should never happen")
});

static RESOURCE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "azuread_resource_operations_total",
            "Total number of resource lifecycle operations by kind and action",
        ),
        &["kind", "action"],
    )
    .expect("Failed to create RESOURCE_OPERATIONS_TOTAL metric - this should never happen")
});

fn register<C>(collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    match REGISTRY.register(Box::new(collector.clone())) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e).context("Failed to register metric"),
    }
}

/// Register every metric with the crate registry. Safe to call more than once.
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    register(&*GRAPH_OPERATIONS_TOTAL)?;
    register(&*GRAPH_OPERATION_DURATION)?;
    register(&*GRAPH_OPERATION_ERRORS_TOTAL)?;
    register(&*GRAPH_RETRIES_TOTAL)?;
    register(&*LOCK_WAIT_SECONDS)?;
    register(&*REPLICATION_ATTEMPTS_TOTAL)?;
    register(&*REPLICATION_TIMEOUTS_TOTAL)?;
    register(&*RELATIONSHIP_CHANGES_TOTAL)?;
    register(&*RESOURCE_OPERATIONS_TOTAL)?;

    Ok(())
}

/// Render the registry in the Prometheus text exposition format
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn gather_text() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not valid UTF-8")
}

pub fn record_graph_operation(object_type: &str, operation: &str, duration: f64) {
    GRAPH_OPERATIONS_TOTAL
        .with_label_values(&[object_type, operation])
        .inc();
    GRAPH_OPERATION_DURATION
        .with_label_values(&[object_type, operation])
        .observe(duration);
}

pub fn increment_graph_operation_errors(object_type: &str, operation: &str) {
    GRAPH_OPERATION_ERRORS_TOTAL
        .with_label_values(&[object_type, operation])
        .inc();
}

pub fn increment_graph_retries(status: u16) {
    GRAPH_RETRIES_TOTAL
        .with_label_values(&[&status.to_string()])
        .inc();
}

pub fn observe_lock_wait(kind: &str, duration: f64) {
    LOCK_WAIT_SECONDS.with_label_values(&[kind]).observe(duration);
}

pub fn increment_replication_attempts(resource: &str) {
    REPLICATION_ATTEMPTS_TOTAL
        .with_label_values(&[resource])
        .inc();
}

pub fn increment_replication_timeouts(resource: &str) {
    REPLICATION_TIMEOUTS_TOTAL
        .with_label_values(&[resource])
        .inc();
}

pub fn record_relationship_changes(relationship: &str, added: usize, removed: usize) {
    RELATIONSHIP_CHANGES_TOTAL
        .with_label_values(&[relationship, "added"])
        .inc_by(added as u64);
    RELATIONSHIP_CHANGES_TOTAL
        .with_label_values(&[relationship, "removed"])
        .inc_by(removed as u64);
}

pub fn increment_resource_operations(kind: &str, action: &str) {
    RESOURCE_OPERATIONS_TOTAL
        .with_label_values(&[kind, action])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_is_idempotent() {
        assert!(register_metrics().is_ok());
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_record_graph_operation() {
        let before = GRAPH_OPERATIONS_TOTAL
            .with_label_values(&["application", "get"])
            .get();
        record_graph_operation("application", "get", 0.2);
        let after = GRAPH_OPERATIONS_TOTAL
            .with_label_values(&["application", "get"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_graph_operation_errors() {
        let before = GRAPH_OPERATION_ERRORS_TOTAL
            .with_label_values(&["group", "update"])
            .get();
        increment_graph_operation_errors("group", "update");
        let after = GRAPH_OPERATION_ERRORS_TOTAL
            .with_label_values(&["group", "update"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_record_relationship_changes() {
        let added_before = RELATIONSHIP_CHANGES_TOTAL
            .with_label_values(&["group_members", "added"])
            .get();
        let removed_before = RELATIONSHIP_CHANGES_TOTAL
            .with_label_values(&["group_members", "removed"])
            .get();
        record_relationship_changes("group_members", 3, 1);
        assert_eq!(
            RELATIONSHIP_CHANGES_TOTAL
                .with_label_values(&["group_members", "added"])
                .get(),
            added_before + 3
        );
        assert_eq!(
            RELATIONSHIP_CHANGES_TOTAL
                .with_label_values(&["group_members", "removed"])
                .get(),
            removed_before + 1
        );
    }

    #[test]
    fn test_replication_counters() {
        let before = REPLICATION_ATTEMPTS_TOTAL
            .with_label_values(&["user"])
            .get();
        increment_replication_attempts("user");
        increment_replication_attempts("user");
        let after = REPLICATION_ATTEMPTS_TOTAL
            .with_label_values(&["user"])
            .get();
        assert_eq!(after, before + 2u64);
    }

    #[test]
    fn test_gather_text_contains_registered_metrics() {
        register_metrics().unwrap();
        increment_resource_operations("group", "create");
        let text = gather_text().unwrap();
        assert!(text.contains("azuread_resource_operations_total"));
    }
}
