// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared informer cache.
//!
//! An [`Informer`] keeps an in-memory, read-only snapshot of one kind,
//! populated by list + watch against an [`ObjectStore`], and dispatches
//! add / update / delete callbacks. Cached objects are `Arc`s: workers clone
//! before mutating.
//!
//! A watch failure triggers a fresh list; objects that vanished in between
//! are reported as deleted. Every `resync` period all cached objects are
//! re-delivered as updates so lost events heal.
//!
//! Controllers write their own results back with [`Informer::apply_local`],
//! so the next reconcile of a key never sees a version older than the one
//! it just wrote.

use crate::constants::INFORMER_RELIST_DELAY;
use crate::crd::LabelSelector;
use crate::errors::StoreError;
use crate::store::{is_newer, object_key, ObjectStore, WatchEvent};
use futures::StreamExt;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A change delivered to informer handlers.
#[derive(Clone, Debug)]
pub enum InformerEvent {
    Added(Arc<DynamicObject>),
    Updated {
        old: Arc<DynamicObject>,
        new: Arc<DynamicObject>,
    },
    Deleted(Arc<DynamicObject>),
}

impl InformerEvent {
    /// The object the event is about (the new version for updates).
    #[must_use]
    pub fn object(&self) -> &Arc<DynamicObject> {
        match self {
            InformerEvent::Added(o) | InformerEvent::Deleted(o) => o,
            InformerEvent::Updated { new, .. } => new,
        }
    }
}

/// Callback registered on an informer.
pub type Handler = Arc<dyn Fn(&InformerEvent) + Send + Sync>;

#[derive(Default)]
struct Cache {
    objects: BTreeMap<String, Arc<DynamicObject>>,
    /// `key=value` label → object keys
    label_index: BTreeMap<String, BTreeSet<String>>,
}

impl Cache {
    fn index_terms(obj: &DynamicObject) -> impl Iterator<Item = String> + '_ {
        obj.labels().iter().map(|(k, v)| format!("{k}={v}"))
    }

    fn insert(&mut self, key: &str, obj: Arc<DynamicObject>) -> Option<Arc<DynamicObject>> {
        let old = self.remove(key);
        for term in Self::index_terms(&obj) {
            self.label_index
                .entry(term)
                .or_default()
                .insert(key.to_string());
        }
        self.objects.insert(key.to_string(), obj);
        old
    }

    fn remove(&mut self, key: &str) -> Option<Arc<DynamicObject>> {
        let old = self.objects.remove(key)?;
        for term in Self::index_terms(&old) {
            if let Some(keys) = self.label_index.get_mut(&term) {
                keys.remove(key);
                if keys.is_empty() {
                    self.label_index.remove(&term);
                }
            }
        }
        Some(old)
    }
}

/// Cache and event source for one kind.
pub struct Informer {
    ar: ApiResource,
    namespace: Option<String>,
    store: Arc<dyn ObjectStore>,
    resync: Option<Duration>,
    cache: RwLock<Cache>,
    handlers: RwLock<Vec<Handler>>,
    synced: watch::Sender<bool>,
    started: AtomicBool,
}

impl Informer {
    #[must_use]
    pub fn new(
        ar: ApiResource,
        namespace: Option<String>,
        store: Arc<dyn ObjectStore>,
        resync: Option<Duration>,
    ) -> Self {
        Self {
            ar,
            namespace,
            store,
            resync,
            cache: RwLock::new(Cache::default()),
            handlers: RwLock::new(Vec::new()),
            synced: watch::channel(false).0,
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn api_resource(&self) -> &ApiResource {
        &self.ar
    }

    /// Register a callback. Handlers added after the initial list miss it.
    pub fn add_handler(&self, handler: Handler) {
        self.handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(handler);
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, Cache> {
        self.cache
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_cache(&self) -> std::sync::RwLockWriteGuard<'_, Cache> {
        self.cache
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Cached object by `namespace/name` key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<DynamicObject>> {
        self.read_cache().objects.get(key).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<Arc<DynamicObject>> {
        self.read_cache().objects.values().cloned().collect()
    }

    /// Label-indexed lister.
    ///
    /// `matchLabels` terms are answered from the index; expressions are then
    /// evaluated on the narrowed set.
    #[must_use]
    pub fn list_by_selector(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Vec<Arc<DynamicObject>> {
        let cache = self.read_cache();
        let candidates: Vec<&Arc<DynamicObject>> = match selector
            .match_labels
            .as_ref()
            .and_then(|labels| labels.iter().next())
        {
            Some((k, v)) => cache
                .label_index
                .get(&format!("{k}={v}"))
                .into_iter()
                .flatten()
                .filter_map(|key| cache.objects.get(key))
                .collect(),
            None => cache.objects.values().collect(),
        };
        candidates
            .into_iter()
            .filter(|o| namespace.is_none() || o.namespace().as_deref() == namespace)
            .filter(|o| selector.matches(o.labels()))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the first list has been applied.
    pub async fn wait_for_sync(&self) {
        let mut rx = self.synced.subscribe();
        // The sender lives as long as `self`
        let _ = rx.wait_for(|synced| *synced).await;
    }

    fn dispatch(&self, event: &InformerEvent) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        for handler in &handlers {
            handler(event);
        }
    }

    /// Record a write made by this process and notify handlers.
    ///
    /// Finalized objects (deletion requested, no finalizers left) are removed.
    pub fn apply_local(&self, obj: DynamicObject) {
        if obj.metadata.deletion_timestamp.is_some() && obj.finalizers().is_empty() {
            self.delete(&obj);
        } else {
            self.upsert(obj);
        }
    }

    fn upsert(&self, obj: DynamicObject) {
        let key = object_key(&obj);
        let new = Arc::new(obj);
        let event = {
            let mut cache = self.write_cache();
            if let Some(existing) = cache.objects.get(&key) {
                if existing.resource_version() == new.resource_version()
                    || !is_newer(&new, existing)
                {
                    return;
                }
            }
            match cache.insert(&key, new.clone()) {
                Some(old) => InformerEvent::Updated { old, new },
                None => InformerEvent::Added(new),
            }
        };
        self.dispatch(&event);
    }

    fn delete(&self, obj: &DynamicObject) {
        let key = object_key(obj);
        let removed = self.write_cache().remove(&key);
        if let Some(old) = removed {
            self.dispatch(&InformerEvent::Deleted(old));
        }
    }

    /// Apply a full listing: new and changed objects are upserted, missing ones deleted.
    fn replace(&self, items: Vec<DynamicObject>) {
        let listed: BTreeSet<String> = items.iter().map(object_key).collect();
        let gone: Vec<Arc<DynamicObject>> = self
            .read_cache()
            .objects
            .iter()
            .filter(|(key, _)| !listed.contains(*key))
            .map(|(_, obj)| obj.clone())
            .collect();
        for obj in gone {
            self.delete(&obj);
        }
        for obj in items {
            self.upsert(obj);
        }
    }

    fn resync_all(&self) {
        for obj in self.list() {
            self.dispatch(&InformerEvent::Updated {
                old: obj.clone(),
                new: obj,
            });
        }
    }

    /// List, then follow the watch until it fails or `stop` fires.
    async fn list_and_watch(&self, stop: &mut watch::Receiver<bool>) -> Result<(), StoreError> {
        let namespace = self.namespace.as_deref();
        // Subscribe before listing so nothing written in between is missed
        let mut stream = self.store.watch(&self.ar, namespace).await?;
        let items = self.store.list(&self.ar, namespace, None).await?;
        debug!(kind = %self.ar.kind, count = items.len(), "informer listed");
        self.replace(items);
        self.synced.send_replace(true);

        let mut resync = self.resync.map(|period| {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                _ = stop.changed() => return Ok(()),
                event = stream.next() => match event {
                    Some(Ok(WatchEvent::Added(obj) | WatchEvent::Modified(obj))) => self.upsert(obj),
                    Some(Ok(WatchEvent::Deleted(obj))) => self.delete(&obj),
                    Some(Err(e)) => return Err(e),
                    None => return Err(StoreError::Other(format!("{} watch closed", self.ar.kind))),
                },
                () = async {
                    match resync.as_mut() {
                        Some(ticker) => { ticker.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => self.resync_all(),
            }
        }
    }

    /// Run until `stop` fires, re-listing after watch failures.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(kind = %self.ar.kind, "informer started");
        loop {
            if *stop.borrow() {
                break;
            }
            match self.list_and_watch(&mut stop).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(kind = %self.ar.kind, error = %e, "informer watch failed, re-listing");
                    tokio::select! {
                        _ = stop.changed() => break,
                        () = tokio::time::sleep(INFORMER_RELIST_DELAY) => {}
                    }
                }
            }
        }
        info!(kind = %self.ar.kind, "informer stopped");
    }
}

/// One informer per kind, shared by every controller of a group.
pub struct InformerFactory {
    store: Arc<dyn ObjectStore>,
    namespace: Option<String>,
    resync: Option<Duration>,
    informers: Mutex<BTreeMap<String, Arc<Informer>>>,
}

impl InformerFactory {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, namespace: Option<String>, resync: Option<Duration>) -> Self {
        Self {
            store,
            namespace,
            resync,
            informers: Mutex::new(BTreeMap::new()),
        }
    }

    /// The shared informer of a kind, created on first use.
    pub fn informer(&self, ar: &ApiResource) -> Arc<Informer> {
        let id = format!("{}/{}", ar.api_version, ar.plural);
        self.informers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(id)
            .or_insert_with(|| {
                Arc::new(Informer::new(
                    ar.clone(),
                    self.namespace.clone(),
                    self.store.clone(),
                    self.resync,
                ))
            })
            .clone()
    }

    fn all(&self) -> Vec<Arc<Informer>> {
        self.informers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Spawn every informer created so far.
    pub fn start(&self, stop: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.all()
            .into_iter()
            .map(|informer| tokio::spawn(informer.run(stop.clone())))
            .collect()
    }

    pub async fn wait_for_sync(&self) {
        for informer in self.all() {
            informer.wait_for_sync().await;
        }
    }
}

#[cfg(test)]
#[path = "informer_tests.rs"]
mod informer_tests;
