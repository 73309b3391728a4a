// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-process object store.
//!
//! `MemoryStore` reproduces the API-server behaviour the engine relies on:
//!
//! - uid, resourceVersion and creationTimestamp are assigned on create
//! - updates carrying a stale resourceVersion fail with `Conflict`
//! - an update that changes nothing does not bump the resourceVersion and
//!   emits no watch event
//! - deleting a record with finalizers only sets `deletionTimestamp`; the
//!   record disappears once an update empties its finalizer list
//! - an optional admission validator rejects invalid writes with `Invalid`
//!
//! It also counts writes per kind so tests can assert idempotence.

use super::{make_key, ObjectStore, WatchEvent, WatchStream};
use crate::crd::LabelSelector;
use crate::errors::StoreError;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{ApiResource, DynamicObject, TypeMeta};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

/// Admission check run on every create and update.
pub type Validator = Arc<dyn Fn(&ApiResource, &DynamicObject) -> Result<(), String> + Send + Sync>;

const WATCH_CHANNEL_CAPACITY: usize = 4096;

#[derive(Default)]
struct Inner {
    /// kind id → key → record
    objects: BTreeMap<String, BTreeMap<String, DynamicObject>>,
    watchers: BTreeMap<String, broadcast::Sender<WatchEvent>>,
    writes: BTreeMap<String, u64>,
    revision: u64,
}

impl Inner {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn emit(&mut self, kind_id: &str, event: WatchEvent) {
        if let Some(tx) = self.watchers.get(kind_id) {
            // No receivers is fine
            let _ = tx.send(event);
        }
    }

    fn count_write(&mut self, ar: &ApiResource) {
        *self.writes.entry(ar.kind.clone()).or_default() += 1;
    }
}

/// Thread-safe in-memory [`ObjectStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    validator: Option<Validator>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an admission validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Number of successful writes (create, update, delete) for a kind.
    #[must_use]
    pub fn write_count(&self, kind: &str) -> u64 {
        self.lock().writes.get(kind).copied().unwrap_or_default()
    }

    /// Total number of successful writes across kinds.
    #[must_use]
    pub fn total_writes(&self) -> u64 {
        self.lock().writes.values().sum()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-write
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn validate(&self, ar: &ApiResource, obj: &DynamicObject, key: &str) -> Result<(), StoreError> {
        match &self.validator {
            Some(validate) => validate(ar, obj).map_err(|reason| StoreError::Invalid {
                kind: ar.kind.clone(),
                key: key.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

fn kind_id(ar: &ApiResource) -> String {
    format!("{}/{}", ar.api_version, ar.plural)
}

fn not_found(ar: &ApiResource, key: &str) -> StoreError {
    StoreError::NotFound {
        kind: ar.kind.clone(),
        key: key.to_string(),
    }
}

/// Compare two records ignoring server-managed bookkeeping.
fn same_content(a: &DynamicObject, b: &DynamicObject) -> bool {
    let strip = |o: &DynamicObject| {
        let mut o = o.clone();
        o.metadata.resource_version = None;
        o.metadata.managed_fields = None;
        o.metadata.generation = None;
        o.types = None;
        o
    };
    let (a, b) = (strip(a), strip(b));
    a.metadata == b.metadata && a.data == b.data
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let inner = self.lock();
        let Some(objects) = inner.objects.get(&kind_id(ar)) else {
            return Ok(Vec::new());
        };
        Ok(objects
            .values()
            .filter(|o| namespace.is_none() || o.namespace().as_deref() == namespace)
            .filter(|o| selector.is_none_or(|s| s.matches(o.labels())))
            .cloned()
            .collect())
    }

    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, StoreError> {
        let key = make_key(namespace, name);
        self.lock()
            .objects
            .get(&kind_id(ar))
            .and_then(|objects| objects.get(&key))
            .cloned()
            .ok_or_else(|| not_found(ar, &key))
    }

    async fn create(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = obj.name_any();
        if name.is_empty() {
            return Err(StoreError::Invalid {
                kind: ar.kind.clone(),
                key: String::new(),
                reason: "metadata.name is required".to_string(),
            });
        }
        let key = make_key(obj.namespace().as_deref(), &name);
        self.validate(ar, obj, &key)?;

        let mut inner = self.lock();
        let id = kind_id(ar);
        if inner
            .objects
            .get(&id)
            .is_some_and(|objects| objects.contains_key(&key))
        {
            return Err(StoreError::AlreadyExists {
                kind: ar.kind.clone(),
                key,
            });
        }

        let mut stored = obj.clone();
        stored.types = Some(TypeMeta {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
        });
        stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        stored.metadata.resource_version = Some(inner.next_revision());
        stored.metadata.creation_timestamp = Some(Time(k8s_openapi::jiff::Timestamp::now()));
        stored.metadata.deletion_timestamp = None;
        stored.metadata.generation = Some(1);

        inner
            .objects
            .entry(id.clone())
            .or_default()
            .insert(key.clone(), stored.clone());
        inner.count_write(ar);
        inner.emit(&id, WatchEvent::Added(stored.clone()));
        debug!(kind = %ar.kind, key = %key, "memory store: created");
        Ok(stored)
    }

    async fn update(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = make_key(obj.namespace().as_deref(), &obj.name_any());
        self.validate(ar, obj, &key)?;

        let mut inner = self.lock();
        let id = kind_id(ar);
        let current = inner
            .objects
            .get(&id)
            .and_then(|objects| objects.get(&key))
            .cloned()
            .ok_or_else(|| not_found(ar, &key))?;

        if let Some(rv) = obj.resource_version() {
            if Some(rv.as_str()) != current.metadata.resource_version.as_deref() {
                return Err(StoreError::Conflict {
                    kind: ar.kind.clone(),
                    key,
                });
            }
        }

        let mut next = obj.clone();
        next.types = current.types.clone();
        next.metadata.uid.clone_from(&current.metadata.uid);
        next.metadata
            .creation_timestamp
            .clone_from(&current.metadata.creation_timestamp);
        next.metadata
            .deletion_timestamp
            .clone_from(&current.metadata.deletion_timestamp);
        next.metadata.resource_version.clone_from(&current.metadata.resource_version);
        next.metadata.generation = current.metadata.generation;

        if same_content(&next, &current) {
            return Ok(current);
        }

        if next.data.get("spec") != current.data.get("spec") {
            next.metadata.generation = Some(current.metadata.generation.unwrap_or(1) + 1);
        }
        next.metadata.resource_version = Some(inner.next_revision());
        inner.count_write(ar);

        let finalized =
            next.metadata.deletion_timestamp.is_some() && next.finalizers().is_empty();
        if finalized {
            if let Some(objects) = inner.objects.get_mut(&id) {
                objects.remove(&key);
            }
            inner.emit(&id, WatchEvent::Deleted(next.clone()));
            debug!(kind = %ar.kind, key = %key, "memory store: finalized and removed");
        } else {
            inner
                .objects
                .entry(id.clone())
                .or_default()
                .insert(key, next.clone());
            inner.emit(&id, WatchEvent::Modified(next.clone()));
        }
        Ok(next)
    }

    async fn delete(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        let key = make_key(namespace, name);
        let mut inner = self.lock();
        let id = kind_id(ar);
        let current = inner
            .objects
            .get(&id)
            .and_then(|objects| objects.get(&key))
            .cloned()
            .ok_or_else(|| not_found(ar, &key))?;

        if current.finalizers().is_empty() {
            if let Some(objects) = inner.objects.get_mut(&id) {
                objects.remove(&key);
            }
            inner.count_write(ar);
            inner.emit(&id, WatchEvent::Deleted(current));
            debug!(kind = %ar.kind, key = %key, "memory store: deleted");
            return Ok(());
        }

        if current.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }

        let mut marked = current;
        marked.metadata.deletion_timestamp = Some(Time(k8s_openapi::jiff::Timestamp::now()));
        marked.metadata.resource_version = Some(inner.next_revision());
        inner
            .objects
            .entry(id.clone())
            .or_default()
            .insert(key.clone(), marked.clone());
        inner.count_write(ar);
        inner.emit(&id, WatchEvent::Modified(marked));
        debug!(kind = %ar.kind, key = %key, "memory store: deletion requested");
        Ok(())
    }

    async fn watch(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<WatchStream, StoreError> {
        let rx = {
            let mut inner = self.lock();
            inner
                .watchers
                .entry(kind_id(ar))
                .or_insert_with(|| broadcast::channel(WATCH_CHANNEL_CAPACITY).0)
                .subscribe()
        };
        let namespace = namespace.map(str::to_string);

        let stream = futures::stream::unfold(rx, move |mut rx| {
            let namespace = namespace.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            if namespace.is_some() && event.object().namespace() != namespace {
                                continue;
                            }
                            return Some((Ok(event), rx));
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            return Some((
                                Err(StoreError::Other(format!(
                                    "watch fell behind by {missed} events"
                                ))),
                                rx,
                            ));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod memory_tests;
