// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common test utilities for integration tests
//!
//! Runs the whole control plane on the in-memory store and cloud.

#![allow(dead_code)]

use cloudplane::cloud::memory::MemoryCloud;
use cloudplane::crd::resources::Compartment;
use cloudplane::crd::ResourceState;
use cloudplane::dependency::resource_status;
use cloudplane::events::MemoryEventSink;
use cloudplane::labels::{COMPARTMENT_ENABLED, COMPARTMENT_LABEL};
use cloudplane::manager::{Manager, ManagerConfig, ManagerError};
use cloudplane::registry::AdapterRegistry;
use cloudplane::store::memory::MemoryStore;
use cloudplane::store::{api_resource, to_dynamic, to_typed, ObjectStore};
use cloudplane::validation::admission_validator;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{ApiResource, DynamicObject};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Namespace every scenario runs in
pub const NS: &str = "ns";

/// Virtual time a scenario step may take
pub const STEP_TIMEOUT: Duration = Duration::from_secs(1800);

pub struct Env {
    pub store: Arc<MemoryStore>,
    pub cloud: Arc<MemoryCloud>,
    pub events: Arc<MemoryEventSink>,
    stop: Option<oneshot::Sender<()>>,
    run: Option<JoinHandle<Result<(), ManagerError>>>,
}

impl Env {
    /// Start the control plane with a compartment-enabled namespace [`NS`]
    /// and wait for its compartment.
    pub async fn start() -> Self {
        let store = Arc::new(MemoryStore::new().with_validator(admission_validator()));
        let cloud = Arc::new(MemoryCloud::new());
        let events = Arc::new(MemoryEventSink::new());

        let mut ns = Namespace::default();
        ns.metadata.name = Some(NS.to_string());
        ns.metadata.labels = Some(BTreeMap::from([(
            COMPARTMENT_LABEL.to_string(),
            COMPARTMENT_ENABLED.to_string(),
        )]));
        store
            .create(&api_resource::<Namespace>(), &to_dynamic(&ns).expect("dynamic"))
            .await
            .expect("create namespace");

        let manager = Manager::new(
            store.clone(),
            cloud.clone(),
            events.clone(),
            Arc::new(AdapterRegistry::with_builtin()),
            &ManagerConfig::default(),
        );
        let (stop, stopped) = oneshot::channel::<()>();
        let run = tokio::spawn(manager.run(async move {
            let _ = stopped.await;
        }));

        let env = Self {
            store,
            cloud,
            events,
            stop: Some(stop),
            run: Some(run),
        };
        env.wait_processed::<Compartment>(NS).await;
        env
    }

    /// Stop the control plane and check it exited cleanly.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(run) = self.run.take() {
            run.await.expect("join").expect("manager exited cleanly");
        }
    }

    pub async fn create<K>(&self, mut obj: K) -> DynamicObject
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        obj.meta_mut().namespace = Some(NS.to_string());
        self.store
            .create(&api_resource::<K>(), &to_dynamic(&obj).expect("dynamic"))
            .await
            .expect("create")
    }

    pub async fn get<K>(&self, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        self.store
            .get(&api_resource::<K>(), Some(NS), name)
            .await
            .ok()
            .map(|obj| to_typed(&obj).expect("typed"))
    }

    pub async fn dynamic(&self, ar: &ApiResource, name: &str) -> Option<DynamicObject> {
        self.store.get(ar, Some(NS), name).await.ok()
    }

    /// Read-modify-write a record, retrying when a controller wrote in between.
    pub async fn edit<K>(&self, name: &str, change: impl Fn(&mut K))
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    {
        for _ in 0..5 {
            let mut obj: K = self.get(name).await.expect("record to edit");
            change(&mut obj);
            match self
                .store
                .update(&api_resource::<K>(), &to_dynamic(&obj).expect("dynamic"))
                .await
            {
                Ok(_) => return,
                Err(e) if e.is_conflict() => continue,
                Err(e) => panic!("edit of {name} failed: {e}"),
            }
        }
        panic!("edit of {name} kept conflicting");
    }

    pub async fn delete<K: Resource<DynamicType = ()>>(&self, name: &str) {
        self.store
            .delete(&api_resource::<K>(), Some(NS), name)
            .await
            .expect("delete");
    }

    /// Names of the live records of a kind.
    pub async fn names(&self, ar: &ApiResource) -> Vec<String> {
        let mut names: Vec<String> = self
            .store
            .list(ar, Some(NS), None)
            .await
            .expect("list")
            .into_iter()
            .filter(|obj| obj.metadata.deletion_timestamp.is_none())
            .filter_map(|obj| obj.metadata.name)
            .collect();
        names.sort();
        names
    }

    /// Wait until a primitive record reaches `Processed`.
    pub async fn wait_processed<K: Resource<DynamicType = ()>>(&self, name: &str) -> DynamicObject {
        let ar = &api_resource::<K>();
        eventually(&format!("{} {name} processed", ar.kind), || async move {
            self.dynamic(ar, name)
                .await
                .filter(|obj| resource_status(obj).state == ResourceState::Processed)
        })
        .await
    }

    /// Wait until every live record of a kind is `Processed`, and there are `count` of them.
    pub async fn wait_all_processed(&self, ar: &ApiResource, count: usize) -> Vec<DynamicObject> {
        eventually(&format!("{count} {} processed", ar.kind), || async move {
            let objs = self.store.list(ar, Some(NS), None).await.ok()?;
            (objs.len() == count
                && objs
                    .iter()
                    .all(|obj| resource_status(obj).state == ResourceState::Processed))
            .then_some(objs)
        })
        .await
    }

    /// Wait until a record is gone from the store.
    pub async fn wait_gone(&self, ar: &ApiResource, name: &str) {
        eventually(&format!("{} {name} removed", ar.kind), || async move {
            self.dynamic(ar, name).await.is_none().then_some(())
        })
        .await;
    }
}

/// Poll `probe` every second of virtual time until it yields a value.
///
/// Panics once [`STEP_TIMEOUT`] has passed.
pub async fn eventually<T, F, Fut>(what: &str, probe: F) -> T
where
    F: Fn() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let waited = tokio::time::timeout(STEP_TIMEOUT, async {
        loop {
            if let Some(value) = probe().await {
                return value;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
    .await;
    match waited {
        Ok(value) => value,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}
