// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `cloud/memory.rs`

#[cfg(test)]
mod tests {
    use crate::cloud::memory::{CloudOp, MemoryCloud, TEST_TENANCY};
    use crate::cloud::{CloudApi, CloudRequest, ResourceType};
    use crate::crd::LifecycleState;
    use crate::errors::CloudError;

    fn vcn_request() -> CloudRequest {
        CloudRequest::new(TEST_TENANCY, "net-a").attr("cidrBlock", "10.0.0.0/16")
    }

    #[tokio::test]
    async fn test_provisioning_then_available() {
        let cloud = MemoryCloud::new().with_provisioning_polls(2);
        let vcn = cloud
            .create(ResourceType::Vcn, &vcn_request())
            .await
            .expect("create");
        assert_eq!(vcn.lifecycle_state, LifecycleState::Provisioning);
        assert!(vcn.id.starts_with("ocid1.vcn.oc1.."));

        let first = cloud.get(ResourceType::Vcn, &vcn.id).await.expect("get");
        assert_eq!(first.lifecycle_state, LifecycleState::Provisioning);
        let second = cloud.get(ResourceType::Vcn, &vcn.id).await.expect("get");
        assert_eq!(second.lifecycle_state, LifecycleState::Available);
        assert_eq!(second.attributes["cidrBlock"], "10.0.0.0/16");
    }

    #[tokio::test]
    async fn test_zero_polls_creates_available() {
        let cloud = MemoryCloud::new().with_provisioning_polls(0);
        let vcn = cloud
            .create(ResourceType::Vcn, &vcn_request())
            .await
            .expect("create");
        assert_eq!(vcn.lifecycle_state, LifecycleState::Available);
    }

    #[tokio::test]
    async fn test_terminating_then_not_found() {
        let cloud = MemoryCloud::new()
            .with_provisioning_polls(0)
            .with_termination_polls(2);
        let vcn = cloud
            .create(ResourceType::Vcn, &vcn_request())
            .await
            .expect("create");
        cloud.delete(ResourceType::Vcn, &vcn.id).await.expect("delete");

        let seen = cloud.get(ResourceType::Vcn, &vcn.id).await.expect("get");
        assert_eq!(seen.lifecycle_state, LifecycleState::Terminating);
        // Deleting again while terminating is accepted
        cloud.delete(ResourceType::Vcn, &vcn.id).await.expect("delete again");

        let gone = cloud.get(ResourceType::Vcn, &vcn.id).await;
        assert!(matches!(gone, Err(CloudError::NotFound { .. })));
        assert!(matches!(
            cloud.delete(ResourceType::Vcn, &vcn.id).await,
            Err(CloudError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_parent_with_children_cannot_be_deleted() {
        let cloud = MemoryCloud::new().with_provisioning_polls(0);
        let vcn = cloud
            .create(ResourceType::Vcn, &vcn_request())
            .await
            .expect("vcn");
        let subnet = cloud
            .create(
                ResourceType::Subnet,
                &CloudRequest::new(TEST_TENANCY, "s").with_parent(&vcn.id),
            )
            .await
            .expect("subnet");

        let err = cloud.delete(ResourceType::Vcn, &vcn.id).await;
        assert!(matches!(err, Err(CloudError::Conflict { .. })));

        cloud
            .delete(ResourceType::Subnet, &subnet.id)
            .await
            .expect("delete subnet");
        // The subnet is still terminating until polled away
        assert!(cloud.delete(ResourceType::Vcn, &vcn.id).await.is_err());
        let _ = cloud.get(ResourceType::Subnet, &subnet.id).await;
        cloud
            .delete(ResourceType::Vcn, &vcn.id)
            .await
            .expect("delete vcn");
    }

    #[tokio::test]
    async fn test_create_requires_existing_parent() {
        let cloud = MemoryCloud::new();
        let err = cloud
            .create(
                ResourceType::Subnet,
                &CloudRequest::new(TEST_TENANCY, "s").with_parent("ocid1.vcn.oc1..missing"),
            )
            .await;
        assert!(matches!(err, Err(CloudError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_addresses_are_assigned() {
        let cloud = MemoryCloud::new();
        let lb = cloud
            .create(ResourceType::LoadBalancer, &CloudRequest::new(TEST_TENANCY, "lb"))
            .await
            .expect("lb");
        let vm = cloud
            .create(ResourceType::Instance, &CloudRequest::new(TEST_TENANCY, "vm"))
            .await
            .expect("vm");
        assert!(lb.attributes.contains_key("ipAddress"));
        assert!(vm.attributes.contains_key("privateIp"));
        assert_ne!(lb.attributes["ipAddress"], vm.attributes["privateIp"]);
    }

    #[tokio::test]
    async fn test_update_merges_attributes() {
        let cloud = MemoryCloud::new().with_provisioning_polls(0);
        let vcn = cloud
            .create(ResourceType::Vcn, &vcn_request())
            .await
            .expect("create");
        let request = CloudRequest::new(TEST_TENANCY, "net-b").attr("dnsLabel", "neta");
        let updated = cloud
            .update(ResourceType::Vcn, &vcn.id, &request)
            .await
            .expect("update");
        assert_eq!(updated.display_name, "net-b");
        assert_eq!(updated.attributes["dnsLabel"], "neta");
        assert_eq!(updated.attributes["cidrBlock"], "10.0.0.0/16");
        assert!(request.is_satisfied_by(&updated));
    }

    #[tokio::test]
    async fn test_failure_injection_and_call_recording() {
        let cloud = MemoryCloud::new();
        cloud.fail_next(CloudOp::Create, CloudError::Throttled("slow down".into()));

        let first = cloud.create(ResourceType::Vcn, &vcn_request()).await;
        assert!(matches!(first, Err(CloudError::Throttled(_))));
        let second = cloud.create(ResourceType::Vcn, &vcn_request()).await;
        assert!(second.is_ok());

        assert_eq!(cloud.call_count(CloudOp::Create, ResourceType::Vcn), 2);
        assert_eq!(cloud.objects(ResourceType::Vcn).len(), 1);
        assert_eq!(cloud.calls()[0].target, "net-a");
    }

    #[tokio::test]
    async fn test_cluster_kubeconfig_requires_available_cluster() {
        let cloud = MemoryCloud::new();
        let cluster = cloud
            .create(ResourceType::Cluster, &CloudRequest::new(TEST_TENANCY, "k8s"))
            .await
            .expect("create");
        assert!(matches!(
            cloud.cluster_kubeconfig(&cluster.id).await,
            Err(CloudError::Conflict { .. })
        ));

        cloud.get(ResourceType::Cluster, &cluster.id).await.expect("poll");
        let kubeconfig = cloud.cluster_kubeconfig(&cluster.id).await.expect("kubeconfig");
        assert!(kubeconfig.contains("current-context: k8s"));
    }

    #[tokio::test]
    async fn test_availability_domains_and_tenancy() {
        let cloud = MemoryCloud::new().with_availability_domains(vec!["AD-1".into()]);
        assert_eq!(
            cloud.availability_domains(TEST_TENANCY).await.expect("ads"),
            vec!["AD-1".to_string()]
        );
        assert_eq!(cloud.tenancy_id(), TEST_TENANCY);
    }
}
