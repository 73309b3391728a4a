// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `dependency.rs`

#[cfg(test)]
mod tests {
    use crate::crd::resources::{Vcn, VcnSpec};
    use crate::crd::{CloudResource, ResourceState, ResourceStatus};
    use crate::dependency::{
        add_finalizer, controller_owner, has_finalizer, is_controlled_by, is_ready,
        register_dependent, remove_finalizer, resource_id, resource_status, set_resource_status,
        unregister_dependent,
    };
    use crate::errors::{ReconcileError, StoreError};
    use crate::store::memory::MemoryStore;
    use crate::store::{api_resource, to_dynamic, ObjectStore};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::DynamicObject;

    fn vcn() -> DynamicObject {
        let mut vcn = Vcn::new(
            "net-a",
            VcnSpec {
                cidr_block: "10.0.0.0/16".into(),
                dns_label: None,
            },
        );
        vcn.metadata.namespace = Some("ns".into());
        to_dynamic(&vcn).expect("vcn")
    }

    #[test]
    fn test_status_round_trip_on_dynamic_object() {
        let mut obj = vcn();
        assert_eq!(resource_status(&obj), ResourceStatus::default());
        assert_eq!(resource_id(&obj), "");
        assert!(!is_ready(&obj));

        let status = ResourceStatus {
            state: ResourceState::Processed,
            resource: Some(CloudResource {
                id: "ocid1.vcn.oc1..1".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        set_resource_status(&mut obj, &status).expect("set");
        assert_eq!(resource_id(&obj), "ocid1.vcn.oc1..1");
        assert!(is_ready(&obj));
        // Spec survives
        assert_eq!(obj.data["spec"]["cidrBlock"], "10.0.0.0/16");
    }

    #[test]
    fn test_processing_parent_is_not_ready() {
        let mut obj = vcn();
        let status = ResourceStatus {
            state: ResourceState::Processing,
            resource: Some(CloudResource {
                id: "ocid1.vcn.oc1..1".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        set_resource_status(&mut obj, &status).expect("set");
        assert!(!is_ready(&obj));
    }

    #[test]
    fn test_finalizers() {
        let mut obj = vcn();
        assert!(add_finalizer(&mut obj, "a/finalizer"));
        assert!(!add_finalizer(&mut obj, "a/finalizer"));
        assert!(has_finalizer(&obj, "a/finalizer"));
        assert!(remove_finalizer(&mut obj, "a/finalizer"));
        assert!(!remove_finalizer(&mut obj, "a/finalizer"));
    }

    #[test]
    fn test_controller_owner() {
        let mut obj = vcn();
        obj.metadata.owner_references = Some(vec![
            OwnerReference {
                api_version: "v1".into(),
                kind: "Other".into(),
                name: "x".into(),
                uid: "1".into(),
                ..Default::default()
            },
            OwnerReference {
                api_version: "cloud.cloudplane.io/v1alpha1".into(),
                kind: "Network".into(),
                name: "net-a".into(),
                uid: "2".into(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            },
        ]);
        assert_eq!(controller_owner(&obj).map(|o| o.uid.as_str()), Some("2"));
        assert!(is_controlled_by(&obj, "cloud.cloudplane.io/v1alpha1", "Network", "net-a"));
        assert!(!is_controlled_by(&obj, "oci.cloudplane.io/v1alpha1", "Network", "net-a"));
    }

    #[tokio::test]
    async fn test_register_and_unregister_dependent() {
        let store = MemoryStore::new();
        let ar = api_resource::<Vcn>();
        let parent = store.create(&ar, &vcn()).await.expect("create");

        let written = register_dependent(&store, &ar, &parent, "Subnet", "ns/s1")
            .await
            .expect("register")
            .expect("written");
        assert!(resource_status(&written).is_dependent_registered("Subnet", "ns/s1"));

        // Already registered: no write
        let again = register_dependent(&store, &ar, &written, "Subnet", "ns/s1")
            .await
            .expect("register again");
        assert!(again.is_none());

        let removed = unregister_dependent(&store, &ar, Some("ns"), "net-a", "Subnet", "ns/s1")
            .await
            .expect("unregister")
            .expect("written");
        assert!(!resource_status(&removed).has_dependents());
    }

    #[tokio::test]
    async fn test_register_with_stale_parent_conflicts() {
        let store = MemoryStore::new();
        let ar = api_resource::<Vcn>();
        let stale = store.create(&ar, &vcn()).await.expect("create");
        register_dependent(&store, &ar, &stale, "Subnet", "ns/s1")
            .await
            .expect("first");

        let err = register_dependent(&store, &ar, &stale, "Subnet", "ns/s2")
            .await
            .expect_err("stale");
        assert!(matches!(
            err,
            ReconcileError::Store(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_unregister_from_missing_parent_is_done() {
        let store = MemoryStore::new();
        let ar = api_resource::<Vcn>();
        let result = unregister_dependent(&store, &ar, Some("ns"), "gone", "Subnet", "ns/s1")
            .await
            .expect("no error");
        assert!(result.is_none());
    }
}
