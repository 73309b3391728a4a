// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `Namespace` → the namespace's top-level `Compartment`.
//!
//! A namespace labelled `cloudplane.io/compartment=enabled` gets a
//! Compartment record of the same name inside it, which every other
//! primitive in the namespace names as its parent. The namespace carries
//! [`HOST_FINALIZER`] until that Compartment is gone, whether the namespace
//! is being deleted or the label was removed.

use crate::adapters::{AdapterContext, HostAdapter, Progress};
use crate::constants::HOST_FINALIZER;
use crate::crd::resources::{Compartment, CompartmentSpec};
use crate::dependency::{add_finalizer, has_finalizer, remove_finalizer};
use crate::errors::{ReconcileError, StoreError};
use crate::labels::{COMPARTMENT_ENABLED, COMPARTMENT_LABEL, K8S_MANAGED_BY, MANAGED_BY_CLOUDPLANE};
use crate::store::{api_resource, to_dynamic, ObjectStore};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// `true` when the namespace asks for a compartment.
#[must_use]
pub fn is_enabled(namespace: &DynamicObject) -> bool {
    namespace.labels().get(COMPARTMENT_LABEL).map(String::as_str) == Some(COMPARTMENT_ENABLED)
}

/// The Compartment record of a namespace.
///
/// # Errors
///
/// Returns an error if the record cannot be serialized.
pub fn compartment_for(namespace: &DynamicObject) -> Result<DynamicObject, ReconcileError> {
    let name = namespace.name_any();
    let mut compartment = Compartment::new(
        &name,
        CompartmentSpec {
            description: format!("compartment of namespace {name}"),
        },
    );
    compartment.metadata.namespace = Some(name.clone());
    compartment.metadata.labels = Some(BTreeMap::from([(
        K8S_MANAGED_BY.to_string(),
        MANAGED_BY_CLOUDPLANE.to_string(),
    )]));
    compartment.metadata.owner_references = namespace.uid().map(|uid| {
        vec![OwnerReference {
            api_version: "v1".to_string(),
            kind: "Namespace".to_string(),
            name: name.clone(),
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]
    });
    Ok(to_dynamic(&compartment)?)
}

pub struct NamespaceAdapter;

impl NamespaceAdapter {
    /// Delete the Compartment; `Done` once it no longer exists.
    async fn release(store: &dyn ObjectStore, name: &str) -> Result<Progress, ReconcileError> {
        let ar = api_resource::<Compartment>();
        let existing = match store.get(&ar, Some(name), name).await {
            Ok(existing) => existing,
            Err(StoreError::NotFound { .. }) => return Ok(Progress::Done),
            Err(e) => return Err(e.into()),
        };
        if existing.metadata.deletion_timestamp.is_none() {
            match store.delete(&ar, Some(name), name).await {
                Ok(()) => info!(namespace = %name, "deleting namespace compartment"),
                Err(StoreError::NotFound { .. }) => return Ok(Progress::Done),
                Err(e) => return Err(e.into()),
            }
        }
        // Deletion without finalizers removes the record at once
        match store.get(&ar, Some(name), name).await {
            Ok(_) => {
                debug!(namespace = %name, "waiting for namespace compartment to go away");
                Ok(Progress::Pending)
            }
            Err(StoreError::NotFound { .. }) => Ok(Progress::Done),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl HostAdapter for NamespaceAdapter {
    fn api_resource(&self) -> ApiResource {
        api_resource::<Namespace>()
    }

    async fn reconcile(
        &self,
        ctx: &AdapterContext,
        obj: &mut DynamicObject,
    ) -> Result<Progress, ReconcileError> {
        let name = obj.name_any();
        let store = ctx.store.as_ref();

        if obj.metadata.deletion_timestamp.is_some() || !is_enabled(obj) {
            if !has_finalizer(obj, HOST_FINALIZER) {
                return Ok(Progress::Done);
            }
            let progress = Self::release(store, &name).await?;
            if progress.is_done() {
                remove_finalizer(obj, HOST_FINALIZER);
                info!(namespace = %name, "namespace compartment released");
            }
            return Ok(progress);
        }

        if add_finalizer(obj, HOST_FINALIZER) {
            debug!(namespace = %name, "added compartment finalizer");
        }
        let ar = api_resource::<Compartment>();
        match store.get(&ar, Some(&name), &name).await {
            Ok(_) => {}
            Err(StoreError::NotFound { .. }) => {
                store.create(&ar, &compartment_for(obj)?).await?;
                info!(namespace = %name, "created namespace compartment");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Progress::Done)
    }
}

#[cfg(test)]
#[path = "namespace_tests.rs"]
mod namespace_tests;
