// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`ObjectStore`] backed by the Kubernetes API server.
//!
//! Records of the cloudplane groups carry a status subresource, so an update
//! is two calls: a `replace` of metadata and spec (optimistic on
//! resourceVersion) followed by a server-side apply of the status carrying the
//! fresh resourceVersion. Host kinds (Namespace, Secret) are replaced in one
//! call.

use super::{make_key, ObjectStore, WatchEvent, WatchStream};
use crate::constants::CONTROLLER_NAME;
use crate::crd::LabelSelector;
use crate::errors::StoreError;
use crate::retry::retry_api_call;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

/// Kubernetes-backed record store.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if !ns.is_empty() => Api::namespaced_with(self.client.clone(), ns, ar),
            _ => Api::all_with(self.client.clone(), ar),
        }
    }
}

/// Only the cloudplane kinds declare a status subresource.
fn has_status_subresource(ar: &ApiResource) -> bool {
    ar.group.ends_with("cloudplane.io")
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let api = self.api(ar, namespace);
        let mut params = ListParams::default();
        if let Some(selector) = selector.filter(|s| !s.is_empty()) {
            params = params.labels(&selector.to_selector_string());
        }
        let key = namespace.unwrap_or_default();
        let list = retry_api_call(|| api.list(&params), &format!("list {}", ar.plural))
            .await
            .map_err(|e| StoreError::from_kube(e, &ar.kind, key))?;
        Ok(list.items)
    }

    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, StoreError> {
        let api = self.api(ar, namespace);
        let key = make_key(namespace, name);
        retry_api_call(|| api.get(name), &format!("get {} {key}", ar.kind))
            .await
            .map_err(|e| StoreError::from_kube(e, &ar.kind, &key))
    }

    async fn create(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let namespace = obj.namespace();
        let key = make_key(namespace.as_deref(), &obj.name_any());
        let api = self.api(ar, namespace.as_deref());
        let created = api
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| StoreError::from_kube(e, &ar.kind, &key))?;
        debug!(kind = %ar.kind, key = %key, "created record");

        // Status is ignored on create when a status subresource exists
        if has_status_subresource(ar) && obj.data.get("status").is_some() {
            return apply_status(&api, ar, &created, obj, &key).await;
        }
        Ok(created)
    }

    async fn update(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let namespace = obj.namespace();
        let name = obj.name_any();
        let key = make_key(namespace.as_deref(), &name);
        let api = self.api(ar, namespace.as_deref());

        let replaced = api
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| StoreError::from_kube(e, &ar.kind, &key))?;

        if !has_status_subresource(ar) || replaced.data.get("status") == obj.data.get("status") {
            return Ok(replaced);
        }
        // Finalizer removal can make the record vanish before the status write
        if replaced.metadata.deletion_timestamp.is_some() && replaced.finalizers().is_empty() {
            return Ok(replaced);
        }
        apply_status(&api, ar, &replaced, obj, &key).await
    }

    async fn delete(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        let key = make_key(namespace, name);
        self.api(ar, namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| StoreError::from_kube(e, &ar.kind, &key))?;
        debug!(kind = %ar.kind, key = %key, "deletion requested");
        Ok(())
    }

    async fn watch(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<WatchStream, StoreError> {
        let api = self.api(ar, namespace);
        let kind = ar.kind.clone();
        let stream = watcher(api, watcher::Config::default())
            .map_err(move |e| StoreError::Other(format!("watch {kind}: {e}")))
            .filter_map(|event| async move {
                match event {
                    Ok(watcher::Event::Apply(obj) | watcher::Event::InitApply(obj)) => {
                        Some(Ok(WatchEvent::Modified(obj)))
                    }
                    Ok(watcher::Event::Delete(obj)) => Some(Ok(WatchEvent::Deleted(obj))),
                    Ok(watcher::Event::Init | watcher::Event::InitDone) => None,
                    Err(e) => Some(Err(e)),
                }
            });
        Ok(Box::pin(stream))
    }
}

/// Server-side apply of `desired.status` on top of `current`.
async fn apply_status(
    api: &Api<DynamicObject>,
    ar: &ApiResource,
    current: &DynamicObject,
    desired: &DynamicObject,
    key: &str,
) -> Result<DynamicObject, StoreError> {
    let patch = json!({
        "apiVersion": ar.api_version,
        "kind": ar.kind,
        "metadata": {
            "name": current.name_any(),
            "resourceVersion": current.resource_version(),
        },
        "status": desired.data.get("status"),
    });
    api.patch_status(
        &current.name_any(),
        &PatchParams::apply(CONTROLLER_NAME).force(),
        &Patch::Apply(&patch),
    )
    .await
    .map_err(|e| StoreError::from_kube(e, &ar.kind, key))
}
