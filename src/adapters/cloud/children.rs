// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Child records produced by composites.
//!
//! Every child carries a single controller ownerReference to its composite.
//! That reference is how the cloud controller routes child events back to the
//! composite, and how orphans are found when the desired set shrinks.

use crate::adapters::Progress;
use crate::errors::{ReconcileError, StoreError};
use crate::labels::{K8S_MANAGED_BY, MANAGED_BY_CLOUDPLANE};
use crate::store::{api_resource, object_key, ObjectStore};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject, ObjectMeta, TypeMeta};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// The composite a set of children belongs to.
#[derive(Clone, Debug)]
pub struct Owner {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl Owner {
    /// # Errors
    ///
    /// Returns a transient error for a record the store has not assigned a uid yet.
    pub fn of<K: Resource<DynamicType = ()>>(obj: &K) -> Result<Self, ReconcileError> {
        let meta = obj.meta();
        let uid = meta.uid.clone().filter(|u| !u.is_empty()).ok_or_else(|| {
            ReconcileError::Transient(format!(
                "{} {} has no uid yet",
                K::kind(&()),
                meta.name.clone().unwrap_or_default()
            ))
        })?;
        Ok(Self {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            uid,
        })
    }

    #[must_use]
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// `true` when `obj` is controlled by this composite, this incarnation of it included.
    #[must_use]
    pub fn owns(&self, obj: &DynamicObject) -> bool {
        obj.owner_references().iter().any(|r| {
            r.controller == Some(true)
                && r.api_version == self.api_version
                && r.kind == self.kind
                && r.name == self.name
                && r.uid == self.uid
        })
    }
}

/// Desired state of one child record.
#[derive(Clone, Debug)]
pub struct Child {
    pub ar: ApiResource,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Top-level fields owned by the composite (`spec`, or `type`/`data` for a Secret)
    pub body: Map<String, Value>,
}

impl Child {
    /// A record of kind `K` with the given spec.
    ///
    /// # Errors
    ///
    /// Returns an error if `spec` cannot be serialized.
    pub fn spec<K: Resource<DynamicType = ()>>(
        name: impl Into<String>,
        spec: &impl Serialize,
    ) -> Result<Self, ReconcileError> {
        let mut body = Map::new();
        body.insert("spec".to_string(), serde_json::to_value(spec)?);
        Ok(Self {
            ar: api_resource::<K>(),
            name: name.into(),
            labels: BTreeMap::new(),
            body,
        })
    }

    /// An opaque Secret holding text values.
    #[must_use]
    pub fn secret(name: impl Into<String>, data: &BTreeMap<String, String>) -> Self {
        let encoded: Map<String, Value> = data
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(BASE64.encode(v))))
            .collect();
        let mut body = Map::new();
        body.insert("type".to_string(), Value::String("Opaque".to_string()));
        body.insert("data".to_string(), Value::Object(encoded));
        Self {
            ar: api_resource::<Secret>(),
            name: name.into(),
            labels: BTreeMap::new(),
            body,
        }
    }

    #[must_use]
    pub fn label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn labels<'a>(mut self, labels: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (key, value) in labels {
            self.labels.insert(key.clone(), value.clone());
        }
        self
    }

    fn to_object(&self, owner: &Owner) -> DynamicObject {
        let mut labels = self.labels.clone();
        labels.insert(K8S_MANAGED_BY.to_string(), MANAGED_BY_CLOUDPLANE.to_string());
        DynamicObject {
            types: Some(TypeMeta {
                api_version: self.ar.api_version.clone(),
                kind: self.ar.kind.clone(),
            }),
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(owner.namespace.clone()),
                labels: Some(labels),
                owner_references: Some(vec![owner.owner_reference()]),
                ..Default::default()
            },
            data: Value::Object(self.body.clone()),
        }
    }

    /// Whether `existing` already carries this child's labels and body.
    fn is_reflected_by(&self, existing: &DynamicObject) -> bool {
        let labels = existing.labels();
        self.labels.iter().all(|(k, v)| labels.get(k) == Some(v))
            && self
                .body
                .iter()
                .all(|(k, v)| existing.data.get(k) == Some(v))
    }
}

/// Create the child, or bring an existing one in line with it.
///
/// A child that is being deleted is returned untouched; it is recreated
/// once it is gone.
///
/// # Errors
///
/// Returns a transient error when a record of the same name exists but is
/// not owned by `owner`, or the store error.
pub async fn ensure(
    store: &dyn ObjectStore,
    owner: &Owner,
    child: &Child,
) -> Result<DynamicObject, ReconcileError> {
    let existing = match store
        .get(&child.ar, Some(&owner.namespace), &child.name)
        .await
    {
        Ok(existing) => existing,
        Err(StoreError::NotFound { .. }) => {
            let created = store.create(&child.ar, &child.to_object(owner)).await?;
            info!(
                owner_kind = %owner.kind,
                owner = %owner.name,
                kind = %child.ar.kind,
                key = %object_key(&created),
                "created child record"
            );
            return Ok(created);
        }
        Err(e) => return Err(e.into()),
    };

    if !owner.owns(&existing) {
        return Err(ReconcileError::Transient(format!(
            "{} {} exists and is not owned by {} {}",
            child.ar.kind,
            object_key(&existing),
            owner.kind,
            owner.name
        )));
    }
    if existing.metadata.deletion_timestamp.is_some() || child.is_reflected_by(&existing) {
        return Ok(existing);
    }

    let mut updated = existing;
    let labels = updated.metadata.labels.get_or_insert_with(BTreeMap::new);
    for (key, value) in &child.labels {
        labels.insert(key.clone(), value.clone());
    }
    if let Some(data) = updated.data.as_object_mut() {
        for (key, value) in &child.body {
            data.insert(key.clone(), value.clone());
        }
    }
    let written = store.update(&child.ar, &updated).await?;
    debug!(
        owner_kind = %owner.kind,
        owner = %owner.name,
        kind = %child.ar.kind,
        key = %object_key(&written),
        "updated child record"
    );
    Ok(written)
}

/// Ensure every child, returning the stored records by name.
///
/// Children of different kinds may share a name; only use the map for one kind.
///
/// # Errors
///
/// Returns the first failure.
pub async fn ensure_all(
    store: &dyn ObjectStore,
    owner: &Owner,
    children: &[Child],
) -> Result<BTreeMap<String, DynamicObject>, ReconcileError> {
    let mut stored = BTreeMap::new();
    for child in children {
        let obj = ensure(store, owner, child).await?;
        stored.insert(child.name.clone(), obj);
    }
    Ok(stored)
}

/// Records of one kind controlled by `owner`.
///
/// # Errors
///
/// Returns the store error.
pub async fn owned(
    store: &dyn ObjectStore,
    owner: &Owner,
    ar: &ApiResource,
) -> Result<Vec<DynamicObject>, ReconcileError> {
    Ok(store
        .list(ar, Some(&owner.namespace), None)
        .await?
        .into_iter()
        .filter(|obj| owner.owns(obj))
        .collect())
}

/// Request deletion of a record; an already missing record is fine.
///
/// # Errors
///
/// Returns the store error.
pub async fn delete(
    store: &dyn ObjectStore,
    ar: &ApiResource,
    obj: &DynamicObject,
) -> Result<(), ReconcileError> {
    if obj.metadata.deletion_timestamp.is_some() {
        return Ok(());
    }
    match store
        .delete(ar, obj.namespace().as_deref(), &obj.name_any())
        .await
    {
        Ok(()) | Err(StoreError::NotFound { .. }) => {
            info!(kind = %ar.kind, key = %object_key(obj), "deleting child record");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete owned children of `ar` whose names are not in `keep`.
///
/// Returns how many such orphans still exist (including ones already being
/// deleted).
///
/// # Errors
///
/// Returns the store error.
pub async fn prune(
    store: &dyn ObjectStore,
    owner: &Owner,
    ar: &ApiResource,
    keep: &BTreeSet<String>,
) -> Result<usize, ReconcileError> {
    let mut remaining = 0;
    for obj in owned(store, owner, ar).await? {
        if keep.contains(&obj.name_any()) {
            continue;
        }
        delete(store, ar, &obj).await?;
        remaining += 1;
    }
    Ok(remaining)
}

/// Delete every owned child, one stage at a time.
///
/// A stage is only started once every child of the previous stages is gone.
/// `Done` when nothing owned is left.
///
/// # Errors
///
/// Returns the store error.
pub async fn teardown(
    store: &dyn ObjectStore,
    owner: &Owner,
    stages: &[Vec<ApiResource>],
) -> Result<Progress, ReconcileError> {
    for stage in stages {
        let mut present = 0;
        for ar in stage {
            for obj in owned(store, owner, ar).await? {
                delete(store, ar, &obj).await?;
                present += 1;
            }
        }
        if present > 0 {
            debug!(
                owner_kind = %owner.kind,
                owner = %owner.name,
                present = present,
                "waiting for children to be deleted"
            );
            return Ok(Progress::Pending);
        }
    }
    Ok(Progress::Done)
}

#[cfg(test)]
#[path = "children_tests.rs"]
mod children_tests;
