// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Object store facade.
//!
//! Every record is handled as a [`DynamicObject`] addressed by its
//! [`ApiResource`], so controllers and the dependency protocol stay
//! kind-agnostic. Adapters convert to their typed kind at the edge with
//! [`to_typed`] / [`to_dynamic`].
//!
//! Two implementations exist:
//!
//! - [`apiserver::KubeStore`] - the Kubernetes API server
//! - [`memory::MemoryStore`] - an in-process store with the same
//!   concurrency and finalizer semantics, used by tests and dry runs

pub mod apiserver;
pub mod memory;

use crate::crd::LabelSelector;
use crate::errors::StoreError;
use kube::api::{ApiResource, DynamicObject};
use kube::{Resource, ResourceExt};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A change observed on a watch stream.
#[derive(Clone, Debug)]
pub enum WatchEvent {
    Added(DynamicObject),
    Modified(DynamicObject),
    Deleted(DynamicObject),
}

impl WatchEvent {
    #[must_use]
    pub fn object(&self) -> &DynamicObject {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }
}

/// Stream returned by [`ObjectStore::watch`].
pub type WatchStream = BoxStream<'static, Result<WatchEvent, StoreError>>;

/// Namespaced, versioned, watchable record store.
///
/// `namespace = None` addresses cluster-scoped kinds (or all namespaces for
/// `list` / `watch`).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List records, optionally restricted by namespace and label selector.
    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, StoreError>;

    /// Create a record. The store assigns uid and resourceVersion.
    async fn create(&self, ar: &ApiResource, obj: &DynamicObject)
        -> Result<DynamicObject, StoreError>;

    /// Replace a record (metadata, spec and status).
    ///
    /// Fails with [`StoreError::Conflict`] when `obj`'s resourceVersion is stale.
    async fn update(&self, ar: &ApiResource, obj: &DynamicObject)
        -> Result<DynamicObject, StoreError>;

    /// Request deletion. Records with finalizers only get a deletionTimestamp.
    async fn delete(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError>;

    /// Watch every change of a kind.
    async fn watch(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<WatchStream, StoreError>;
}

/// `ApiResource` of a typed kind.
#[must_use]
pub fn api_resource<K: Resource<DynamicType = ()>>() -> ApiResource {
    ApiResource::erase::<K>(&())
}

/// Work-queue key: `namespace/name`, or `name` for cluster-scoped records.
#[must_use]
pub fn object_key(obj: &DynamicObject) -> String {
    make_key(obj.namespace().as_deref(), &obj.name_any())
}

#[must_use]
pub fn make_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

/// Split a key produced by [`make_key`].
#[must_use]
pub fn split_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once('/') {
        Some((ns, name)) => (Some(ns), name),
        None => (None, key),
    }
}

/// Convert a dynamic record into its typed kind.
///
/// # Errors
///
/// Returns an error when the record does not match the kind's schema.
pub fn to_typed<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(obj)?)
}

/// Convert a typed record into a dynamic one.
///
/// # Errors
///
/// Returns an error when serialization fails.
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(obj)?)
}

/// `true` when `candidate` carries a newer resourceVersion than `current`.
///
/// Resource versions are opaque; numeric ones are compared, anything else is
/// assumed newer.
#[must_use]
pub fn is_newer(candidate: &DynamicObject, current: &DynamicObject) -> bool {
    match (
        candidate.resource_version().and_then(|v| v.parse::<u64>().ok()),
        current.resource_version().and_then(|v| v.parse::<u64>().ok()),
    ) {
        (Some(a), Some(b)) => a >= b,
        _ => true,
    }
}
