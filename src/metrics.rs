// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the cloudplane control plane.
//!
//! Every series is prefixed with `cloudplane_io_` (prometheus-safe version of
//! "cloudplane.io") and labelled by the kind a controller serves.
//!
//! # Metrics Categories
//!
//! - **Reconciliation** - outcome, duration and requeue reason per kind
//! - **Cloud objects** - creates and deletes issued by resource adapters,
//!   record writes by any controller
//! - **Errors** - failed reconciles by [`ReconcileError::reason`](crate::errors::ReconcileError::reason)
//! - **Leadership** - lease acquisitions and losses
//! - **Work queues** - keys waiting per kind, cloud API calls per operation
//!
//! The free functions record into one process-wide [`Metrics`]. When it
//! cannot be built the failure is logged once and recording becomes a no-op;
//! metrics never fail a reconcile.
//!
//! # Example
//!
//! ```rust,no_run
//! use cloudplane::metrics::{gather_metrics, record_reconciliation_success};
//!
//! record_reconciliation_success("Network", std::time::Duration::from_secs(1));
//! let text = gather_metrics().unwrap_or_default();
//! ```

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::error;

/// Namespace prefix for all cloudplane metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "cloudplane_io";

/// Reconcile duration buckets; cloud calls make reconciles slow, not fast
const DURATION_BUCKETS: &[f64] = &[0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0];

static METRICS: LazyLock<Option<Metrics>> = LazyLock::new(|| match Metrics::new() {
    Ok(metrics) => Some(metrics),
    Err(e) => {
        error!(error = %e, "failed to register metrics, recording disabled");
        None
    }
});

fn with_metrics(record: impl FnOnce(&Metrics)) {
    if let Some(metrics) = METRICS.as_ref() {
        record(metrics);
    }
}

/// All control-plane series, registered in their own [`Registry`].
pub struct Metrics {
    registry: Registry,
    /// `kind`, `outcome` (`success`, `error`, `requeue`)
    reconciliations: CounterVec,
    /// `kind`
    reconcile_duration: HistogramVec,
    /// `kind`, `reason` (`pending`, `conflict`, `error`)
    requeues: CounterVec,
    /// `kind`, `action` (`created`, `deleted`, `written`)
    objects: CounterVec,
    /// `kind`, `reason`
    errors: CounterVec,
    /// `event` (`acquired`, `lost`)
    lease_transitions: CounterVec,
    /// `identity`; 1 while this process holds the lease
    leader: GaugeVec,
    /// `kind`
    queue_depth: GaugeVec,
    /// `operation`, `status` (`success`, `error`)
    cloud_calls: CounterVec,
}

impl Metrics {
    /// Build and register every series.
    ///
    /// # Errors
    ///
    /// Returns an error if a series is malformed or registered twice.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str, labels: &[&str]| {
            let vec = CounterVec::new(Opts::new(format!("{METRICS_NAMESPACE}_{name}"), help), labels)?;
            registry.register(Box::new(vec.clone()))?;
            Ok::<_, prometheus::Error>(vec)
        };
        let gauge = |name: &str, help: &str, labels: &[&str]| {
            let vec = GaugeVec::new(Opts::new(format!("{METRICS_NAMESPACE}_{name}"), help), labels)?;
            registry.register(Box::new(vec.clone()))?;
            Ok::<_, prometheus::Error>(vec)
        };

        let reconciliations = counter(
            "reconciliations_total",
            "Reconciliations by kind and outcome",
            &["kind", "outcome"],
        )?;
        let requeues = counter("requeues_total", "Requeues by kind and reason", &["kind", "reason"])?;
        let objects = counter(
            "objects_total",
            "Cloud objects created or deleted and records written, by kind",
            &["kind", "action"],
        )?;
        let errors = counter("errors_total", "Failed reconciles by kind and reason", &["kind", "reason"])?;
        let lease_transitions = counter(
            "lease_transitions_total",
            "Leader lease acquisitions and losses",
            &["event"],
        )?;
        let cloud_calls = counter(
            "cloud_calls_total",
            "Cloud API calls by operation and status",
            &["operation", "status"],
        )?;
        let leader = gauge("leader", "1 while this process holds the leader lease", &["identity"])?;
        let queue_depth = gauge("queue_depth", "Keys waiting in a work queue, by kind", &["kind"])?;

        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                format!("{METRICS_NAMESPACE}_reconcile_duration_seconds"),
                "Reconcile duration by kind",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["kind"],
        )?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            reconcile_duration,
            requeues,
            objects,
            errors,
            lease_transitions,
            leader,
            queue_depth,
            cloud_calls,
        })
    }

    fn reconciled(&self, kind: &str, outcome: &str, duration: Duration) {
        self.reconciliations.with_label_values(&[kind, outcome]).inc();
        self.reconcile_duration
            .with_label_values(&[kind])
            .observe(duration.as_secs_f64());
    }

    fn requeued(&self, kind: &str, reason: &str) {
        self.reconciliations.with_label_values(&[kind, "requeue"]).inc();
        self.requeues.with_label_values(&[kind, reason]).inc();
    }

    fn object(&self, kind: &str, action: &str) {
        self.objects.with_label_values(&[kind, action]).inc();
    }

    fn lease(&self, identity: &str, held: bool) {
        let event = if held { "acquired" } else { "lost" };
        self.lease_transitions.with_label_values(&[event]).inc();
        self.leader
            .with_label_values(&[identity])
            .set(if held { 1.0 } else { 0.0 });
    }

    /// Encode every series in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
    }
}

/// Record a successful reconciliation of `kind`
pub fn record_reconciliation_success(kind: &str, duration: Duration) {
    with_metrics(|m| m.reconciled(kind, "success", duration));
}

/// Record a failed reconciliation of `kind`
pub fn record_reconciliation_error(kind: &str, duration: Duration) {
    with_metrics(|m| m.reconciled(kind, "error", duration));
}

/// Record a requeue of `kind`
///
/// # Arguments
/// * `reason` - `pending` (cloud work in flight), `conflict` or `error`
pub fn record_reconciliation_requeue(kind: &str, reason: &str) {
    with_metrics(|m| m.requeued(kind, reason));
}

/// Record a cloud object created by a resource adapter
pub fn record_resource_created(kind: &str) {
    with_metrics(|m| m.object(kind, "created"));
}

/// Record a record written back to the store
pub fn record_resource_updated(kind: &str) {
    with_metrics(|m| m.object(kind, "written"));
}

/// Record a cloud object deleted by a resource adapter
pub fn record_resource_deleted(kind: &str) {
    with_metrics(|m| m.object(kind, "deleted"));
}

/// Record a failed reconcile of `kind` by error reason
pub fn record_error(kind: &str, reason: &str) {
    with_metrics(|m| m.errors.with_label_values(&[kind, reason]).inc());
}

/// Record that `identity` acquired the leader lease
pub fn record_leader_elected(identity: &str) {
    with_metrics(|m| m.lease(identity, true));
}

/// Record that `identity` lost or released the leader lease
pub fn record_leader_lost(identity: &str) {
    with_metrics(|m| m.lease(identity, false));
}

/// Set the current depth of the work queue of `kind`
pub fn set_queue_depth(kind: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    with_metrics(|m| m.queue_depth.with_label_values(&[kind]).set(depth as f64));
}

/// Record the outcome of a cloud API call
pub fn record_cloud_call(operation: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    with_metrics(|m| m.cloud_calls.with_label_values(&[operation, status]).inc());
}

/// Gather and encode the process-wide metrics in Prometheus text format
///
/// # Errors
/// Returns error if the registry is unavailable or encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    METRICS
        .as_ref()
        .ok_or_else(|| prometheus::Error::Msg("metrics registry unavailable".to_string()))?
        .encode()
}
