// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the controller template

#[cfg(test)]
mod tests {
    use crate::controller::{Controller, DependentQueues, Outcome, Reconciler, RetryPolicy, Shared};
    use crate::crd::resources::{Vcn, VcnSpec};
    use crate::errors::ReconcileError;
    use crate::events::{MemoryEventSink, REASON_RESOURCE_ERROR, REASON_RESOURCE_UPDATE};
    use crate::informer::Informer;
    use crate::store::memory::MemoryStore;
    use crate::store::{api_resource, to_dynamic, ObjectStore};
    use crate::workqueue::WorkQueue;
    use async_trait::async_trait;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::{ApiResource, DynamicObject};
    use kube::ResourceExt;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const KEY: &str = "team/net";

    type Script = Box<dyn Fn(&DynamicObject, u32) -> Result<Outcome, ReconcileError> + Send + Sync>;

    /// Reconciler whose result is computed from the call number.
    struct Scripted {
        policy: RetryPolicy,
        script: Script,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(
            policy: RetryPolicy,
            script: impl Fn(&DynamicObject, u32) -> Result<Outcome, ReconcileError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                policy,
                script: Box::new(script),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Reconciler for Scripted {
        fn api_resource(&self) -> ApiResource {
            api_resource::<Vcn>()
        }

        fn policy(&self) -> RetryPolicy {
            self.policy
        }

        async fn reconcile(&self, obj: &DynamicObject) -> Result<Outcome, ReconcileError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            (self.script)(obj, call)
        }

        fn mark_error(&self, obj: &DynamicObject, _err: &ReconcileError) -> Option<DynamicObject> {
            let mut marked = obj.clone();
            marked.labels_mut().insert("failed".into(), "true".into());
            Some(marked)
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            retry_cap: 2,
            retry_backoff: Duration::from_secs(1),
            error_cap: 2,
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        events: Arc<MemoryEventSink>,
        subnets: WorkQueue,
        fatal: mpsc::UnboundedReceiver<String>,
        informer: Arc<Informer>,
        controller: Arc<Controller>,
    }

    async fn harness(reconciler: Arc<Scripted>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let mut vcn = Vcn::new("net", VcnSpec::default());
        vcn.metadata.namespace = Some("team".into());
        let created = store
            .create(&api_resource::<Vcn>(), &to_dynamic(&vcn).expect("dynamic"))
            .await
            .expect("create");

        let informer = Arc::new(Informer::new(api_resource::<Vcn>(), None, store.clone(), None));
        informer.apply_local(created);

        let events = Arc::new(MemoryEventSink::new());
        let subnets = WorkQueue::new("Subnet");
        let dependents: DependentQueues = BTreeMap::from([("Subnet".to_string(), subnets.clone())]);
        let (tx, fatal) = mpsc::unbounded_channel();
        let shared = Shared {
            store: store.clone(),
            events: events.clone(),
            dependents: Arc::new(dependents),
            fatal: tx,
        };
        let controller = Controller::new(reconciler, informer.clone(), WorkQueue::new("Vcn"), shared);
        Harness {
            store,
            events,
            subnets,
            fatal,
            informer,
            controller,
        }
    }

    /// Feed the queue to `process` until nothing shows up within an hour of (paused) time.
    async fn drain(controller: &Controller) {
        let queue = controller.queue().clone();
        while let Ok(Some(key)) =
            tokio::time::timeout(Duration::from_secs(3600), queue.get()).await
        {
            controller.process(&key).await;
            queue.done(&key);
        }
    }

    async fn stored(store: &MemoryStore) -> DynamicObject {
        store
            .get(&api_resource::<Vcn>(), Some("team"), "net")
            .await
            .expect("stored")
    }

    #[tokio::test]
    async fn test_write_publishes_event_and_wakes_dependents() {
        let reconciler = Scripted::new(policy(), |obj, _| {
            let mut next = obj.clone();
            next.labels_mut().insert("seen".into(), "yes".into());
            Ok(Outcome::changed(obj, next).notify(BTreeMap::from([(
                "Subnet".to_string(),
                BTreeSet::from(["team/sub-a".to_string()]),
            )])))
        });
        let h = harness(reconciler.clone()).await;

        h.controller.process(KEY).await;

        let obj = stored(&h.store).await;
        assert_eq!(obj.labels().get("seen").map(String::as_str), Some("yes"));
        // The cache sees the write at once
        let cached = h.informer.get(KEY).expect("cached");
        assert_eq!(cached.resource_version(), obj.resource_version());
        assert_eq!(h.subnets.get().await.as_deref(), Some("team/sub-a"));

        let events = h.events.events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].warning);
        assert_eq!(events[0].reason, REASON_RESOURCE_UPDATE);
        assert!(events[0].note.contains("Vcn team/net"));
    }

    #[tokio::test]
    async fn test_unchanged_outcome_makes_no_write() {
        let reconciler = Scripted::new(policy(), |obj, _| Ok(Outcome::changed(obj, obj.clone())));
        let h = harness(reconciler).await;
        let writes = h.store.total_writes();

        h.controller.process(KEY).await;

        assert_eq!(h.store.total_writes(), writes);
        assert!(h.events.events().is_empty());
        assert!(h.subnets.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_retries_stop_at_cap() {
        let reconciler = Scripted::new(policy(), |_, _| {
            Ok(Outcome::done().requeue_after(Duration::from_secs(3)))
        });
        let h = harness(reconciler.clone()).await;
        h.controller.queue().add(KEY);

        drain(&h.controller).await;
        // First attempt plus two delayed retries
        assert_eq!(reconciler.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_retry_budget() {
        // Pending twice, done, then pending forever
        let reconciler = Scripted::new(policy(), |_, call| {
            if call == 3 {
                Ok(Outcome::done())
            } else {
                Ok(Outcome::done().requeue_after(Duration::from_secs(3)))
            }
        });
        let h = harness(reconciler.clone()).await;
        h.controller.queue().add(KEY);
        drain(&h.controller).await;
        assert_eq!(reconciler.calls(), 3);

        h.controller.queue().add(KEY);
        drain(&h.controller).await;
        assert_eq!(reconciler.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_rate_limited_then_recorded() {
        let reconciler = Scripted::new(policy(), |_, _| {
            Err(ReconcileError::Transient("cloud unavailable".into()))
        });
        let h = harness(reconciler.clone()).await;
        h.controller.queue().add(KEY);

        drain(&h.controller).await;

        // First attempt plus a rate-limited retry at 0, 1 and 2 prior requeues
        assert_eq!(reconciler.calls(), 4);
        let warnings: Vec<_> = h.events.events().into_iter().filter(|e| e.warning).collect();
        assert_eq!(warnings.len(), 4);
        assert!(warnings.iter().all(|e| e.reason == REASON_RESOURCE_ERROR));
        let obj = stored(&h.store).await;
        assert_eq!(obj.labels().get("failed").map(String::as_str), Some("true"));
        assert_eq!(h.controller.queue().num_requeues(KEY), 0);
    }

    #[tokio::test]
    async fn test_terminal_error_is_recorded_without_retry() {
        let reconciler = Scripted::new(policy(), |_, _| {
            Err(ReconcileError::validation("spec.cidrBlock", "must be a /16"))
        });
        let h = harness(reconciler.clone()).await;

        h.controller.process(KEY).await;

        let obj = stored(&h.store).await;
        assert_eq!(obj.labels().get("failed").map(String::as_str), Some("true"));
        assert!(h.controller.queue().is_empty());
        let events = h.events.events();
        assert!(events[0].warning);
        assert!(events[0].note.contains("spec.cidrBlock"));
    }

    #[tokio::test]
    async fn test_conflict_is_retried_at_once() {
        let reconciler = Scripted::new(policy(), |_, _| {
            Err(ReconcileError::Conflict("stale parent".into()))
        });
        let h = harness(reconciler).await;

        h.controller.process(KEY).await;

        assert_eq!(h.controller.queue().len(), 1);
        assert_eq!(h.controller.queue().num_requeues(KEY), 0);
    }

    #[tokio::test]
    async fn test_fatal_error_reaches_the_manager() {
        let reconciler = Scripted::new(policy(), |_, _| Err(ReconcileError::Fatal("lease lost".into())));
        let mut h = harness(reconciler).await;

        h.controller.process(KEY).await;

        let reason = h.fatal.recv().await.expect("fatal");
        assert!(reason.contains("lease lost"));
        assert!(h.controller.queue().is_empty());
    }

    #[tokio::test]
    async fn test_missing_record_is_skipped() {
        let reconciler = Scripted::new(policy(), |_, _| Ok(Outcome::done()));
        let h = harness(reconciler.clone()).await;

        h.controller.process("team/ghost").await;

        assert_eq!(reconciler.calls(), 0);
    }

    #[tokio::test]
    async fn test_owned_child_events_enqueue_owner() {
        let reconciler = Scripted::new(policy(), |_, _| Ok(Outcome::done()));
        let h = harness(reconciler).await;
        let children = Informer::new(
            api_resource::<crate::crd::resources::Subnet>(),
            None,
            h.store.clone(),
            None,
        );
        h.controller.watch_owned(&children);

        let mut child = DynamicObject::new("net-11-ad1", &api_resource::<crate::crd::resources::Subnet>())
            .within("team");
        child.metadata.resource_version = Some("1".into());
        child.metadata.owner_references = Some(vec![OwnerReference {
            api_version: api_resource::<Vcn>().api_version,
            kind: "Vcn".into(),
            name: "net".into(),
            uid: "uid-1".into(),
            controller: Some(true),
            block_owner_deletion: None,
        }]);
        children.apply_local(child.clone());

        // An owner of another kind is ignored
        let mut foreign = child;
        foreign.metadata.name = Some("other".into());
        if let Some(owners) = foreign.metadata.owner_references.as_mut() {
            owners[0].kind = "Compute".into();
        }
        children.apply_local(foreign);

        assert_eq!(h.controller.queue().len(), 1);
        assert_eq!(h.controller.queue().get().await.as_deref(), Some(KEY));
    }
}
