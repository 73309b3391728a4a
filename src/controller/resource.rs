// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Resource controller: one primitive kind ↔ one cloud object per record.
//!
//! Normal path:
//!
//! 1. validate `spec` and store [`RESOURCE_FINALIZER`] on the record, alone
//! 2. resolve the parents (named and label-selected) and register the record
//!    in each parent's `status.dependents`
//! 3. before the first create, wait until every parent and, transitively,
//!    their own parents are ready
//! 4. create, or observe and update until the cloud object is compliant
//!
//! Deletion path:
//!
//! 1. drain: refuse while `status.dependents` names records that still exist
//! 2. delete the cloud object and wait for it to terminate
//! 3. unregister from every parent, then clear the finalizer

use super::{Outcome, Reconciler, RetryPolicy};
use crate::adapters::{AdapterContext, Parents, Progress, ResourceAdapter, CONDITION_READY};
use crate::constants::{
    CONTROLLER_ERROR_CAP, MAX_PARENT_DEPTH, RESOURCE_FINALIZER, RESOURCE_RETRY_BACKOFF,
    RESOURCE_RETRY_CAP,
};
use crate::crd::ResourceState;
use crate::dependency::{
    add_finalizer, has_finalizer, is_deleting, is_ready, register_dependent, remove_finalizer,
    resource_status, set_resource_status, unregister_dependent,
};
use crate::errors::{ReconcileError, StoreError};
use crate::registry::AdapterRegistry;
use crate::store::{object_key, split_key};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parents of one record as found in the store.
struct Resolution {
    parents: Parents,
    /// Human-readable names of parents that are missing, deleting or not ready
    waiting: Vec<String>,
    /// (kind, name) of every parent the record stays registered on
    keep: BTreeSet<(String, String)>,
    /// Parent kinds scanned for registrations
    kinds: BTreeMap<String, ApiResource>,
}

pub struct ResourceReconciler {
    adapter: Arc<dyn ResourceAdapter>,
    ctx: AdapterContext,
    registry: Arc<AdapterRegistry>,
}

impl ResourceReconciler {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn ResourceAdapter>,
        ctx: AdapterContext,
        registry: Arc<AdapterRegistry>,
    ) -> Self {
        Self {
            adapter,
            ctx,
            registry,
        }
    }

    fn kind(&self) -> String {
        self.adapter.api_resource().kind
    }

    /// Write back finalizer and label edits, and status changes the adapter reports.
    fn outcome(&self, original: &DynamicObject, obj: DynamicObject) -> Outcome {
        let metadata_changed = original.metadata.finalizers != obj.metadata.finalizers
            || original.metadata.labels != obj.metadata.labels;
        if metadata_changed || self.adapter.is_status_changed(original, &obj) {
            Outcome::changed(original, obj)
        } else {
            Outcome::done()
        }
    }

    async fn resolve(&self, obj: &DynamicObject) -> Result<Resolution, ReconcileError> {
        let store = self.ctx.store.as_ref();
        let namespace = obj.namespace();
        let ns = namespace.as_deref();
        let kind = self.kind();
        let key = object_key(obj);
        let mut resolution = Resolution {
            parents: Parents::new(ns.unwrap_or_default()),
            waiting: Vec::new(),
            keep: BTreeSet::new(),
            kinds: BTreeMap::new(),
        };

        for parent_ref in self.adapter.depends_on_refs(obj)? {
            let label = format!("{} {}", parent_ref.ar.kind, parent_ref.name);
            resolution
                .kinds
                .insert(parent_ref.ar.kind.clone(), parent_ref.ar.clone());
            resolution
                .keep
                .insert((parent_ref.ar.kind.clone(), parent_ref.name.clone()));
            let parent = match store.get(&parent_ref.ar, ns, &parent_ref.name).await {
                Ok(parent) => parent,
                Err(StoreError::NotFound { .. }) => {
                    resolution.waiting.push(format!("{label} (missing)"));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let parent = if is_deleting(&parent) {
                resolution.waiting.push(format!("{label} (deleting)"));
                parent
            } else {
                register_dependent(store, &parent_ref.ar, &parent, &kind, &key)
                    .await?
                    .unwrap_or(parent)
            };
            resolution.parents.insert(&parent_ref.ar.kind, parent);
        }

        for parent_selector in self.adapter.depends_on(obj)? {
            let ar = parent_selector.ar.clone();
            resolution.kinds.insert(ar.kind.clone(), ar.clone());
            let selected = store.list(&ar, ns, Some(&parent_selector.selector)).await?;
            if selected.is_empty() {
                resolution
                    .waiting
                    .push(format!("{} matching {}", ar.kind, parent_selector.selector.to_selector_string()));
            }
            // A deleting parent is dropped so it can drain
            for parent in selected.into_iter().filter(|p| !is_deleting(p)) {
                resolution.keep.insert((ar.kind.clone(), parent.name_any()));
                let parent = register_dependent(store, &ar, &parent, &kind, &key)
                    .await?
                    .unwrap_or(parent);
                resolution.parents.insert(&ar.kind, parent);
            }
        }

        for (parent_kind, parent) in resolution.parents.iter() {
            if !is_ready(parent) {
                resolution
                    .waiting
                    .push(format!("{parent_kind} {} (not ready)", parent.name_any()));
            }
        }
        Ok(resolution)
    }

    /// Every parent of `obj` is ready, and so are theirs, up to [`MAX_PARENT_DEPTH`].
    fn ancestors_ready<'a>(
        &'a self,
        adapter: Arc<dyn ResourceAdapter>,
        obj: &'a DynamicObject,
        depth: usize,
    ) -> BoxFuture<'a, Result<bool, ReconcileError>> {
        async move {
            if depth >= MAX_PARENT_DEPTH {
                return Ok(true);
            }
            let store = self.ctx.store.as_ref();
            let namespace = obj.namespace();
            for parent_ref in adapter.depends_on_refs(obj)? {
                let parent = match store
                    .get(&parent_ref.ar, namespace.as_deref(), &parent_ref.name)
                    .await
                {
                    Ok(parent) => parent,
                    Err(StoreError::NotFound { .. }) => return Ok(false),
                    Err(e) => return Err(e.into()),
                };
                if !is_ready(&parent) {
                    return Ok(false);
                }
                if let Some(parent_adapter) = self.registry.resource(&parent_ref.ar.kind) {
                    if !self.ancestors_ready(parent_adapter, &parent, depth + 1).await? {
                        return Ok(false);
                    }
                }
            }
            Ok(true)
        }
        .boxed()
    }

    /// Drop registrations on parents of `kinds` not listed in `keep`.
    async fn unregister_stale(
        &self,
        obj: &DynamicObject,
        kinds: &BTreeMap<String, ApiResource>,
        keep: &BTreeSet<(String, String)>,
    ) -> Result<(), ReconcileError> {
        let store = self.ctx.store.as_ref();
        let namespace = obj.namespace();
        let kind = self.kind();
        let key = object_key(obj);
        for (parent_kind, ar) in kinds {
            for parent in store.list(ar, namespace.as_deref(), None).await? {
                let name = parent.name_any();
                if keep.contains(&(parent_kind.clone(), name.clone()))
                    || !resource_status(&parent).is_dependent_registered(&kind, &key)
                {
                    continue;
                }
                unregister_dependent(store, ar, namespace.as_deref(), &name, &kind, &key).await?;
            }
        }
        Ok(())
    }

    /// Every parent kind the record may be registered on.
    fn parent_kinds(&self, obj: &DynamicObject) -> Result<BTreeMap<String, ApiResource>, ReconcileError> {
        Ok(self
            .adapter
            .depends_on_refs(obj)?
            .into_iter()
            .map(|r| r.ar)
            .chain(self.adapter.depends_on(obj)?.into_iter().map(|s| s.ar))
            .map(|ar| (ar.kind.clone(), ar))
            .collect())
    }

    async fn converge(&self, original: &DynamicObject) -> Result<Outcome, ReconcileError> {
        let mut obj = original.clone();
        self.adapter.validate(&obj)?;
        if add_finalizer(&mut obj, RESOURCE_FINALIZER) {
            debug!(kind = %self.kind(), key = %object_key(&obj), "added finalizer");
            // Nothing reaches the cloud before the finalizer is stored; the
            // write re-enqueues the key through the informer
            return Ok(self.outcome(original, obj));
        }

        let resolution = self.resolve(&obj).await?;
        self.unregister_stale(&obj, &resolution.kinds, &resolution.keep)
            .await?;

        let created = !self.adapter.id(&obj).is_empty();
        if !created {
            let mut waiting = resolution.waiting.clone();
            if waiting.is_empty()
                && !self
                    .ancestors_ready(self.adapter.clone(), &obj, 0)
                    .await?
            {
                waiting.push("ancestors (not ready)".to_string());
            }
            if !waiting.is_empty() {
                debug!(kind = %self.kind(), key = %object_key(&obj), waiting = ?waiting, "waiting for parents");
                let mut status = resource_status(&obj);
                status.state = ResourceState::Pending;
                status.message = format!("waiting for {}", waiting.join(", "));
                status.add_condition(CONDITION_READY, "WaitingForParents");
                set_resource_status(&mut obj, &status)?;
                return Ok(self.outcome(original, obj).requeue_after(RESOURCE_RETRY_BACKOFF));
            }
        }

        let desired = self
            .adapter
            .desired(&self.ctx, &obj, &resolution.parents)
            .await?;
        let progress = if created {
            match self.adapter.get(&self.ctx, &mut obj).await? {
                Progress::Done if !self.adapter.is_compliant(&desired, &obj) => {
                    self.adapter.update(&self.ctx, &mut obj, &desired).await?
                }
                progress => progress,
            }
        } else {
            let progress = self.adapter.create(&self.ctx, &mut obj, &desired).await?;
            crate::metrics::record_resource_created(&self.kind());
            progress
        };

        let progress = match progress {
            Progress::Done if self.adapter.is_compliant(&desired, &obj) => {
                let mut status = resource_status(&obj);
                if status.state != ResourceState::Processed {
                    info!(kind = %self.kind(), key = %object_key(&obj), id = %status.resource_id(), "resource ready");
                }
                status.state = ResourceState::Processed;
                status.message = format!("{} {} available", self.adapter.resource_type(), status.resource_id());
                status.add_condition(CONDITION_READY, "Available");
                set_resource_status(&mut obj, &status)?;
                Progress::Done
            }
            // Observed but not yet matching; the next pass updates it
            Progress::Done => Progress::Pending,
            progress => progress,
        };

        let notify = self.adapter.dependents(&obj);
        Ok(self.outcome(original, obj)
            .follow(progress, RESOURCE_RETRY_BACKOFF)
            .notify(notify))
    }

    async fn finalize(&self, original: &DynamicObject) -> Result<Outcome, ReconcileError> {
        if !has_finalizer(original, RESOURCE_FINALIZER) {
            return Ok(Outcome::done());
        }
        let mut obj = original.clone();
        let key = object_key(&obj);

        // Drain, forgetting dependents that no longer exist
        let mut status = resource_status(&obj);
        for (child_kind, keys) in status.dependents.clone() {
            // Only resource controllers register dependents, so an unknown kind is stale
            let Some(child_adapter) = self.registry.resource(&child_kind) else {
                warn!(kind = %self.kind(), key = %key, dependent_kind = %child_kind, "pruning dependents of an unknown kind");
                for child_key in &keys {
                    status.remove_dependent(&child_kind, child_key);
                }
                continue;
            };
            let ar = child_adapter.api_resource();
            for child_key in keys {
                let (namespace, name) = split_key(&child_key);
                match self.ctx.store.get(&ar, namespace, name).await {
                    Ok(_) => {}
                    Err(StoreError::NotFound { .. }) => {
                        debug!(kind = %self.kind(), key = %key, dependent = %child_key, "pruning stale dependent");
                        status.remove_dependent(&child_kind, &child_key);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        if status.has_dependents() {
            let count: usize = status.dependents.values().map(BTreeSet::len).sum();
            status.message = format!("waiting for {count} dependents to be deleted");
            status.add_condition(CONDITION_READY, "DependentsPresent");
            set_resource_status(&mut obj, &status)?;
            return Ok(self.outcome(original, obj).requeue_after(RESOURCE_RETRY_BACKOFF));
        }
        set_resource_status(&mut obj, &status)?;

        let progress = self.adapter.delete(&self.ctx, &mut obj).await?;
        if !progress.is_done() {
            return Ok(self.outcome(original, obj).follow(progress, RESOURCE_RETRY_BACKOFF));
        }

        let kinds = self.parent_kinds(&obj)?;
        self.unregister_stale(&obj, &kinds, &BTreeSet::new()).await?;
        remove_finalizer(&mut obj, RESOURCE_FINALIZER);
        crate::metrics::record_resource_deleted(&self.kind());
        info!(kind = %self.kind(), key = %key, "resource deleted");
        Ok(self.outcome(original, obj))
    }
}

#[async_trait]
impl Reconciler for ResourceReconciler {
    fn api_resource(&self) -> ApiResource {
        self.adapter.api_resource()
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_cap: RESOURCE_RETRY_CAP,
            retry_backoff: RESOURCE_RETRY_BACKOFF,
            error_cap: CONTROLLER_ERROR_CAP,
        }
    }

    async fn reconcile(&self, obj: &DynamicObject) -> Result<Outcome, ReconcileError> {
        if is_deleting(obj) {
            self.finalize(obj).await
        } else {
            self.converge(obj).await
        }
    }

    fn mark_error(&self, obj: &DynamicObject, err: &ReconcileError) -> Option<DynamicObject> {
        let mut marked = obj.clone();
        let mut status = resource_status(&marked);
        status.state = ResourceState::Error;
        status.message = err.to_string();
        status.add_condition(CONDITION_READY, err.reason());
        set_resource_status(&mut marked, &status).ok()?;
        Some(marked)
    }
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod resource_tests;
