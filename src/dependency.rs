// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Parent/child bookkeeping shared by every controller.
//!
//! A child registers itself in its parent's `status.dependents` before it is
//! created on the cloud and removes itself after its cloud object is gone. A
//! parent refuses to be deleted while that set is non-empty. All writes go
//! through the store's optimistic concurrency: a conflict surfaces as an
//! error and the reconcile is retried with fresh state, never merged.
//!
//! The helpers here work on [`DynamicObject`] so the same code serves every
//! primitive kind.

use crate::crd::{ResourceState, ResourceStatus};
use crate::errors::{ReconcileError, StoreError};
use crate::store::{object_key, ObjectStore};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject};
use kube::{Resource, ResourceExt};
use tracing::debug;

/// Status of a primitive held in a dynamic record; empty when absent or unreadable.
#[must_use]
pub fn resource_status(obj: &DynamicObject) -> ResourceStatus {
    obj.data
        .get("status")
        .and_then(|s| serde_json::from_value(s.clone()).ok())
        .unwrap_or_default()
}

/// Replace the status of a primitive held in a dynamic record.
///
/// # Errors
///
/// Returns an error if the status cannot be serialized.
pub fn set_resource_status(
    obj: &mut DynamicObject,
    status: &ResourceStatus,
) -> Result<(), serde_json::Error> {
    let value = serde_json::to_value(status)?;
    if let Some(map) = obj.data.as_object_mut() {
        map.insert("status".to_string(), value);
    } else {
        obj.data = serde_json::json!({ "status": value });
    }
    Ok(())
}

/// Cloud identifier of a primitive, or "".
#[must_use]
pub fn resource_id(obj: &DynamicObject) -> String {
    resource_status(obj).resource_id().to_string()
}

/// A parent is ready once it has a cloud id and reached `Processed`.
#[must_use]
pub fn is_ready(obj: &DynamicObject) -> bool {
    let status = resource_status(obj);
    !status.resource_id().is_empty() && status.state == ResourceState::Processed
}

/// Deletion has been requested.
#[must_use]
pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

#[must_use]
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Add a finalizer; returns `false` when it was already present.
pub fn add_finalizer<K: Resource>(obj: &mut K, finalizer: &str) -> bool {
    if has_finalizer(obj, finalizer) {
        return false;
    }
    obj.finalizers_mut().push(finalizer.to_string());
    true
}

/// Remove a finalizer; returns whether it was present.
pub fn remove_finalizer<K: Resource>(obj: &mut K, finalizer: &str) -> bool {
    let before = obj.finalizers().len();
    obj.finalizers_mut().retain(|f| f != finalizer);
    before != obj.finalizers().len()
}

/// The owner reference with `controller: true`, if any.
#[must_use]
pub fn controller_owner<K: Resource>(obj: &K) -> Option<&OwnerReference> {
    obj.owner_references()
        .iter()
        .find(|o| o.controller == Some(true))
}

/// `true` when `obj` is controlled by the record identified by `api_version`, `kind` and `name`.
#[must_use]
pub fn is_controlled_by<K: Resource>(obj: &K, api_version: &str, kind: &str, name: &str) -> bool {
    controller_owner(obj)
        .is_some_and(|o| o.api_version == api_version && o.kind == kind && o.name == name)
}

/// Register `child` in `parent.status.dependents[child_kind]`.
///
/// `parent` is the cached copy; its resourceVersion guards the write. Returns
/// the written parent, or `None` when the child was already registered.
///
/// # Errors
///
/// Returns a store error (notably `Conflict`) when the write fails.
pub async fn register_dependent(
    store: &dyn ObjectStore,
    parent_ar: &ApiResource,
    parent: &DynamicObject,
    child_kind: &str,
    child_key: &str,
) -> Result<Option<DynamicObject>, ReconcileError> {
    let mut status = resource_status(parent);
    if !status.add_dependent(child_kind, child_key) {
        return Ok(None);
    }
    let mut updated = parent.clone();
    set_resource_status(&mut updated, &status)?;
    let written = store.update(parent_ar, &updated).await?;
    debug!(
        parent_kind = %parent_ar.kind,
        parent = %object_key(parent),
        child_kind = %child_kind,
        child = %child_key,
        "registered dependent"
    );
    Ok(Some(written))
}

/// Remove `child` from a parent's dependents, reading the parent fresh from the store.
///
/// A parent that no longer exists counts as done. Returns the written parent
/// when something changed.
///
/// # Errors
///
/// Returns a store error (notably `Conflict`) when the write fails.
pub async fn unregister_dependent(
    store: &dyn ObjectStore,
    parent_ar: &ApiResource,
    namespace: Option<&str>,
    parent_name: &str,
    child_kind: &str,
    child_key: &str,
) -> Result<Option<DynamicObject>, ReconcileError> {
    let parent = match store.get(parent_ar, namespace, parent_name).await {
        Ok(parent) => parent,
        Err(StoreError::NotFound { .. }) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut status = resource_status(&parent);
    if !status.remove_dependent(child_kind, child_key) {
        return Ok(None);
    }
    let mut updated = parent;
    set_resource_status(&mut updated, &status)?;
    match store.update(parent_ar, &updated).await {
        Ok(written) => {
            debug!(
                parent_kind = %parent_ar.kind,
                parent = %parent_name,
                child_kind = %child_kind,
                child = %child_key,
                "unregistered dependent"
            );
            Ok(Some(written))
        }
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "dependency_tests.rs"]
mod dependency_tests;
