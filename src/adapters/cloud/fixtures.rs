// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Store fixtures shared by the composite adapter tests.

use crate::adapters::AdapterContext;
use crate::cloud::memory::MemoryCloud;
use crate::crd::cloud::{Network, NetworkSpec, NetworkStatus};
use crate::crd::resources::{Compartment, CompartmentSpec};
use crate::crd::{CloudResource, LifecycleState, OperatorState, ResourceState, ResourceStatus};
use crate::dependency::set_resource_status;
use crate::store::memory::MemoryStore;
use crate::store::{api_resource, to_dynamic, to_typed, ObjectStore};
use kube::api::ApiResource;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const NS: &str = "team";
pub const COMPARTMENT_ID: &str = "ocid1.compartment.oc1..team";

pub fn context(cloud: MemoryCloud) -> (Arc<MemoryStore>, Arc<MemoryCloud>, AdapterContext) {
    let store = Arc::new(MemoryStore::new());
    let cloud = Arc::new(cloud);
    let ctx = AdapterContext::new(store.clone(), cloud.clone());
    (store, cloud, ctx)
}

/// Store `obj` in the test namespace and read it back with its uid.
pub async fn create<K>(store: &MemoryStore, mut obj: K) -> K
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    obj.meta_mut().namespace = Some(NS.into());
    let stored = store
        .create(&api_resource::<K>(), &to_dynamic(&obj).expect("dynamic"))
        .await
        .expect("create");
    to_typed(&stored).expect("typed")
}

/// Re-read a typed record.
pub async fn reload<K>(store: &MemoryStore, name: &str) -> K
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let obj = store
        .get(&api_resource::<K>(), Some(NS), name)
        .await
        .expect("get");
    to_typed(&obj).expect("typed")
}

/// The namespace compartment, already reflected in the cloud.
pub async fn compartment(store: &MemoryStore) {
    let compartment = create(
        store,
        Compartment::new(
            NS,
            CompartmentSpec {
                description: "team".into(),
            },
        ),
    )
    .await;
    mark_ready(
        store,
        &api_resource::<Compartment>(),
        &compartment.name_any(),
        COMPARTMENT_ID,
        BTreeMap::new(),
    )
    .await;
}

/// A Network whose children have been synthesized.
pub async fn network(store: &MemoryStore, name: &str) -> Network {
    let mut network = Network::new(
        name,
        NetworkSpec {
            cidr_block: "10.0.0.0/16".into(),
            dns_label: None,
        },
    );
    let mut status = NetworkStatus::default();
    status.operator.state = OperatorState::Created;
    network.status = Some(status);
    create(store, network).await
}

/// Mark a primitive record as reflected and available in the cloud.
pub async fn mark_ready(
    store: &MemoryStore,
    ar: &ApiResource,
    name: &str,
    id: &str,
    attributes: BTreeMap<String, String>,
) {
    let mut obj = store.get(ar, Some(NS), name).await.expect("get");
    let status = ResourceStatus {
        state: ResourceState::Processed,
        resource: Some(CloudResource {
            id: id.into(),
            display_name: name.into(),
            compartment_id: COMPARTMENT_ID.into(),
            lifecycle_state: LifecycleState::Available,
            attributes,
        }),
        ..Default::default()
    };
    set_resource_status(&mut obj, &status).expect("status");
    store.update(ar, &obj).await.expect("update");
}

/// Mark every record of a kind as available.
pub async fn mark_all_ready(store: &MemoryStore, ar: &ApiResource) {
    for obj in store.list(ar, Some(NS), None).await.expect("list") {
        let name = obj.name_any();
        let id = format!("ocid1.{}.oc1..{name}", ar.kind.to_lowercase());
        mark_ready(store, ar, &name, &id, BTreeMap::new()).await;
    }
}

/// Names of the records of a kind in the test namespace, in key order.
pub async fn names(store: &MemoryStore, ar: &ApiResource) -> Vec<String> {
    store
        .list(ar, Some(NS), None)
        .await
        .expect("list")
        .iter()
        .map(ResourceExt::name_any)
        .collect()
}

/// Names of the records of a kind that are not being deleted.
pub async fn live_names(store: &MemoryStore, ar: &ApiResource) -> Vec<String> {
    store
        .list(ar, Some(NS), None)
        .await
        .expect("list")
        .iter()
        .filter(|obj| obj.metadata.deletion_timestamp.is_none())
        .map(ResourceExt::name_any)
        .collect()
}
