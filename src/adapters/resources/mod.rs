// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Primitive adapters, one per cloud object type.
//!
//! Each adapter only says which parents a record has and what the cloud
//! object should look like; creation gating, status bookkeeping and deletion
//! ordering live in the resource controller.

pub mod compute;
pub mod containerengine;
pub mod database;
pub mod identity;
pub mod loadbalancer;
pub mod network;

use super::{namespace_compartment, AdapterContext, ParentRef, Parents};
use crate::errors::{ReconcileError, StoreError};
use crate::store::{api_resource, to_typed};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

pub use compute::{InstanceAdapter, VolumeAdapter};
pub use containerengine::{CeClusterAdapter, NodePoolAdapter};
pub use database::DbAutonomousAdapter;
pub use identity::{CompartmentAdapter, DynamicGroupAdapter, PolicyAdapter};
pub use loadbalancer::{
    BackendAdapter, BackendSetAdapter, CertificateAdapter, ListenerAdapter, LoadBalancerAdapter,
};
pub use network::{
    DhcpOptionAdapter, InternetGatewayAdapter, RouteTableAdapter, SecurityRuleSetAdapter,
    SubnetAdapter, VcnAdapter,
};

/// The namespace compartment followed by `refs`.
fn in_compartment<K: ResourceExt>(obj: &K, refs: impl IntoIterator<Item = ParentRef>) -> Vec<ParentRef> {
    let namespace = obj.namespace().unwrap_or_default();
    std::iter::once(namespace_compartment(&namespace))
        .chain(refs)
        .collect()
}

/// Cloud ids of named parents of one kind, in the given order.
fn ids_of(parents: &Parents, kind: &str, names: &[String]) -> Result<Vec<String>, ReconcileError> {
    names.iter().map(|name| parents.id(kind, name)).collect()
}

/// A value of a Secret in the record's namespace.
///
/// A missing Secret or key is transient: the Secret may simply not be
/// written yet.
async fn secret_value(
    ctx: &AdapterContext,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<Option<String>, ReconcileError> {
    let secret: Secret = match ctx
        .store
        .get(&api_resource::<Secret>(), Some(namespace), name)
        .await
    {
        Ok(obj) => to_typed(&obj)?,
        Err(StoreError::NotFound { .. }) => {
            return Err(ReconcileError::Transient(format!(
                "secret {namespace}/{name} does not exist"
            )))
        }
        Err(e) => return Err(e.into()),
    };
    let value = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|data| data.get(key).cloned())
        });
    Ok(value)
}

/// Like [`secret_value`], but the key is required.
async fn required_secret_value(
    ctx: &AdapterContext,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<String, ReconcileError> {
    secret_value(ctx, namespace, name, key).await?.ok_or_else(|| {
        ReconcileError::Transient(format!("secret {namespace}/{name} has no key '{key}'"))
    })
}
