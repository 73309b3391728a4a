// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller template shared by every kind.
//!
//! A [`Controller`] couples an informer, a work queue and a [`Reconciler`].
//! Workers pull a key, reconcile a private copy of the cached record and let
//! the loop decide what happens next:
//!
//! - a changed record is written back under optimistic concurrency, the
//!   write is applied to the local cache, dependents named by the outcome
//!   are woken and a `ResourceUpdate` event is published
//! - a pending outcome re-adds the key after a delay, up to the kind's retry
//!   cap
//! - a failure is dispatched on [`ReconcileError::disposition`]: conflicts are
//!   retried at once on fresh state, transient errors are rate limited up to
//!   the error cap, terminal errors are recorded in status, and fatal errors
//!   stop the process
//!
//! The queue guarantees that at most one worker holds a key at a time, so
//! reconciles of the same record never overlap.

pub mod cloud;
pub mod host;
pub mod resource;

pub use cloud::CloudReconciler;
pub use host::HostReconciler;
pub use resource::ResourceReconciler;

use crate::adapters::Progress;
use crate::dependency::controller_owner;
use crate::errors::{Disposition, ReconcileError, StoreError};
use crate::events::{EventSink, REASON_RESOURCE_ERROR, REASON_RESOURCE_UPDATE};
use crate::informer::{Handler, Informer};
use crate::metrics::{
    record_error, record_reconciliation_error, record_reconciliation_requeue,
    record_reconciliation_success, record_resource_updated,
};
use crate::store::{make_key, object_key, split_key, ObjectStore};
use crate::workqueue::WorkQueue;
use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// What the loop does once a reconcile returned.
#[derive(Clone, Debug, Default)]
pub struct Outcome {
    /// Record to persist; `None` when nothing changed
    pub write: Option<DynamicObject>,
    /// Re-add the key after this delay
    pub requeue_after: Option<Duration>,
    /// Keys to wake on the resource queues after a write, by kind
    pub notify: BTreeMap<String, BTreeSet<String>>,
}

impl Outcome {
    /// Nothing to write, nothing to retry.
    #[must_use]
    pub fn done() -> Self {
        Self::default()
    }

    /// Write `obj` only when it differs from `original` in finalizers,
    /// labels, spec or status.
    #[must_use]
    pub fn changed(original: &DynamicObject, obj: DynamicObject) -> Self {
        let same = original.metadata.finalizers == obj.metadata.finalizers
            && original.metadata.labels == obj.metadata.labels
            && original.data == obj.data;
        Self {
            write: (!same).then_some(obj),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn requeue_after(mut self, delay: Duration) -> Self {
        self.requeue_after = Some(delay);
        self
    }

    /// Requeue according to an adapter's progress; `backoff` covers `Pending`.
    #[must_use]
    pub fn follow(self, progress: Progress, backoff: Duration) -> Self {
        match progress {
            Progress::Done => self,
            Progress::Pending => self.requeue_after(backoff),
            Progress::PollAfter(delay) => self.requeue_after(delay),
        }
    }

    #[must_use]
    pub fn notify(mut self, keys: BTreeMap<String, BTreeSet<String>>) -> Self {
        self.notify = keys;
        self
    }
}

/// Retry budget of a controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delayed retries of a key before it is left alone until its next change
    pub retry_cap: u32,
    /// Delay used for `Pending` outcomes
    pub retry_backoff: Duration,
    /// Failures are retried rate-limited while `num_requeues <= error_cap`, then recorded as terminal
    pub error_cap: u32,
}

/// Kind-specific reconcile step driven by a [`Controller`].
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn api_resource(&self) -> ApiResource;

    fn policy(&self) -> RetryPolicy;

    /// Converge one record. `obj` is the cached copy and must not be written
    /// by the reconciler itself; the returned outcome carries the write.
    async fn reconcile(&self, obj: &DynamicObject) -> Result<Outcome, ReconcileError>;

    /// The record with `err` recorded in its status, or `None` when the kind
    /// carries no status of ours.
    fn mark_error(&self, obj: &DynamicObject, err: &ReconcileError) -> Option<DynamicObject>;
}

/// Resource work queues by primitive kind, used to wake dependents.
pub type DependentQueues = BTreeMap<String, WorkQueue>;

/// Collaborators shared by every controller of a process.
#[derive(Clone)]
pub struct Shared {
    pub store: Arc<dyn ObjectStore>,
    pub events: Arc<dyn EventSink>,
    pub dependents: Arc<DependentQueues>,
    /// Receives the reason of a fatal error; the manager exits on it
    pub fatal: mpsc::UnboundedSender<String>,
}

/// Informer + work queue + reconciler for one kind.
pub struct Controller {
    ar: ApiResource,
    reconciler: Arc<dyn Reconciler>,
    informer: Arc<Informer>,
    queue: WorkQueue,
    shared: Shared,
    /// key → delayed retries since the last success
    retries: Mutex<HashMap<String, u32>>,
}

impl Controller {
    #[must_use]
    pub fn new(
        reconciler: Arc<dyn Reconciler>,
        informer: Arc<Informer>,
        queue: WorkQueue,
        shared: Shared,
    ) -> Arc<Self> {
        Arc::new(Self {
            ar: reconciler.api_resource(),
            reconciler,
            informer,
            queue,
            shared,
            retries: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.ar.kind
    }

    #[must_use]
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Enqueue every change of the controller's own kind.
    pub fn watch(&self) {
        let queue = self.queue.clone();
        let handler: Handler = Arc::new(move |event| queue.add(&object_key(event.object())));
        self.informer.add_handler(handler);
    }

    /// Enqueue the controlling owner of every change on `child`.
    ///
    /// Only owners of this controller's kind are considered.
    pub fn watch_owned(&self, child: &Informer) {
        let queue = self.queue.clone();
        let api_version = self.ar.api_version.clone();
        let kind = self.ar.kind.clone();
        let handler: Handler = Arc::new(move |event| {
            let obj = event.object();
            if let Some(owner) = controller_owner(obj.as_ref())
                .filter(|o| o.api_version == api_version && o.kind == kind)
            {
                queue.add(&make_key(obj.namespace().as_deref(), &owner.name));
            }
        });
        child.add_handler(handler);
    }

    /// Spawn `workers` workers. They exit once the queue is shut down and drained.
    pub fn run(self: &Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        info!(kind = %self.ar.kind, workers = workers.max(1), "starting controller");
        (0..workers.max(1))
            .map(|_| {
                let controller = Arc::clone(self);
                tokio::spawn(async move { controller.worker().await })
            })
            .collect()
    }

    pub fn shut_down(&self) {
        self.queue.shut_down();
    }

    async fn worker(&self) {
        while let Some(key) = self.queue.get().await {
            self.process(&key).await;
            self.queue.done(&key);
        }
        debug!(kind = %self.ar.kind, "controller worker stopped");
    }

    /// Reconcile one key. The caller owns the key (took it from the queue).
    pub async fn process(&self, key: &str) {
        let Some(cached) = self.informer.get(key) else {
            trace!(kind = %self.ar.kind, key = %key, "record gone from cache");
            self.forget(key);
            return;
        };
        let obj = DynamicObject::clone(&cached);
        let started = Instant::now();

        let result = match self.reconciler.reconcile(&obj).await {
            Ok(outcome) => self.apply(key, outcome).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => record_reconciliation_success(&self.ar.kind, started.elapsed()),
            Err(e) => {
                record_reconciliation_error(&self.ar.kind, started.elapsed());
                self.fail(key, &obj, e).await;
            }
        }
    }

    async fn apply(&self, key: &str, outcome: Outcome) -> Result<(), ReconcileError> {
        if let Some(obj) = outcome.write {
            let written = match self.persist(&obj).await {
                Ok(written) => written,
                Err(ReconcileError::Store(StoreError::NotFound { .. })) => {
                    debug!(kind = %self.ar.kind, key = %key, "record vanished before write");
                    self.forget(key);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            record_resource_updated(&self.ar.kind);
            for (kind, keys) in &outcome.notify {
                if let Some(queue) = self.shared.dependents.get(kind) {
                    for dependent in keys {
                        queue.add(dependent);
                    }
                }
            }
            self.shared
                .events
                .publish(
                    &self.ar,
                    &written,
                    false,
                    REASON_RESOURCE_UPDATE,
                    format!("{} {key} updated", self.ar.kind),
                )
                .await;
        }

        match outcome.requeue_after {
            Some(delay) => {
                let attempts = self.count_retry(key);
                if attempts <= self.reconciler.policy().retry_cap {
                    trace!(kind = %self.ar.kind, key = %key, delay = ?delay, attempts, "requeue");
                    record_reconciliation_requeue(&self.ar.kind, "pending");
                    self.queue.add_after(key, delay);
                } else {
                    warn!(
                        kind = %self.ar.kind,
                        key = %key,
                        attempts,
                        "retry cap reached, waiting for the next change"
                    );
                    self.forget(key);
                }
            }
            None => self.forget(key),
        }
        Ok(())
    }

    async fn persist(&self, obj: &DynamicObject) -> Result<DynamicObject, ReconcileError> {
        let written = self.shared.store.update(&self.ar, obj).await?;
        self.informer.apply_local(written.clone());
        Ok(written)
    }

    async fn fail(&self, key: &str, obj: &DynamicObject, err: ReconcileError) {
        let kind = self.ar.kind.as_str();
        record_error(kind, err.reason());
        let note = format!("{kind} {key}: {err}");

        match err.disposition() {
            Disposition::Immediate => {
                debug!(kind = %kind, key = %key, error = %err, "conflict, retrying on fresh state");
                record_reconciliation_requeue(kind, "conflict");
                self.refresh(key).await;
                self.queue.add(key);
            }
            Disposition::RateLimited
                if self.queue.num_requeues(key) <= self.reconciler.policy().error_cap =>
            {
                warn!(kind = %kind, key = %key, error = %err, "reconcile failed, retrying");
                record_reconciliation_requeue(kind, "error");
                self.publish_error(obj, note).await;
                self.queue.add_rate_limited(key);
            }
            Disposition::RateLimited | Disposition::Terminal => {
                error!(kind = %kind, key = %key, error = %err, "reconcile failed, giving up");
                self.publish_error(obj, note).await;
                self.record_failure(key, obj, &err).await;
                self.forget(key);
            }
            Disposition::Fatal => {
                error!(kind = %kind, key = %key, error = %err, "fatal reconcile error");
                self.publish_error(obj, note.clone()).await;
                self.forget(key);
                // The receiver is gone only while the process is already stopping
                let _ = self.shared.fatal.send(note);
            }
        }
    }

    async fn publish_error(&self, obj: &DynamicObject, note: String) {
        self.shared
            .events
            .publish(&self.ar, obj, true, REASON_RESOURCE_ERROR, note)
            .await;
    }

    /// Write the failure into status so users can see why the record stopped converging.
    async fn record_failure(&self, key: &str, obj: &DynamicObject, err: &ReconcileError) {
        let Some(marked) = self.reconciler.mark_error(obj, err) else {
            return;
        };
        if let Err(e) = self.persist(&marked).await {
            warn!(kind = %self.ar.kind, key = %key, error = %e, "failed to record error status");
        }
    }

    /// Replace the cached copy with the stored one after a conflict.
    async fn refresh(&self, key: &str) {
        let (namespace, name) = split_key(key);
        match self.shared.store.get(&self.ar, namespace, name).await {
            Ok(fresh) => self.informer.apply_local(fresh),
            Err(e) => trace!(kind = %self.ar.kind, key = %key, error = %e, "refresh failed"),
        }
    }

    fn count_retry(&self, key: &str) -> u32 {
        let mut retries = self
            .retries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let attempts = retries.entry(key.to_string()).or_default();
        *attempts += 1;
        *attempts
    }

    fn forget(&self, key: &str) {
        self.queue.forget(key);
        self.retries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
