// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `cluster.rs`

#[cfg(test)]
mod tests {
    use crate::adapters::cloud::cluster::{
        ca_secret_name, kubeconfig_secret_name, quantity_per_subnet,
    };
    use crate::adapters::cloud::fixtures::{
        compartment, context, create, mark_ready, names, network, reload, COMPARTMENT_ID, NS,
    };
    use crate::adapters::cloud::ClusterAdapter;
    use crate::adapters::{CompositeAdapter, Progress, CONDITION_READY};
    use crate::cloud::memory::MemoryCloud;
    use crate::cloud::{CloudApi, CloudRequest, ResourceType};
    use crate::constants::{KUBECONFIG_SECRET_KEY, LB_READY_POLL};
    use crate::crd::cloud::{
        Cluster, ClusterSpec, Compute, LoadBalancer, Network, NodeGroup, Security,
    };
    use crate::crd::resources::{CeCluster, NodePool, Policy, Subnet};
    use crate::crd::OperatorState;
    use crate::labels::{CLUSTER_LABEL, ROLE_LABEL};
    use crate::pki::kubeconfig_summary;
    use crate::store::memory::MemoryStore;
    use crate::store::{api_resource, to_dynamic, ObjectStore};
    use k8s_openapi::api::core::v1::Secret;
    use kube::ResourceExt;
    use std::collections::BTreeMap;

    fn spec(is_managed: bool) -> ClusterSpec {
        ClusterSpec {
            is_managed,
            network: is_managed.then(|| "net".to_string()),
            network_cidr: None,
            kubernetes_version: "v1.31.1".into(),
            master: NodeGroup {
                replicas: 1,
                ..Default::default()
            },
            worker: NodeGroup {
                replicas: if is_managed { 5 } else { 2 },
                ..Default::default()
            },
            ssh_authorized_keys: vec!["ssh-ed25519 AAAA".into()],
        }
    }

    fn reason(cluster: &Cluster) -> String {
        cluster
            .status
            .as_ref()
            .and_then(|s| s.operator.find_condition(CONDITION_READY))
            .map(|c| c.reason.clone())
            .unwrap_or_default()
    }

    fn state(cluster: &Cluster) -> Option<OperatorState> {
        cluster.status.as_ref().map(|s| s.operator.state)
    }

    async fn kubeconfig(store: &MemoryStore, cluster: &str) -> String {
        let secret: Secret = reload(store, &kubeconfig_secret_name(cluster)).await;
        let bytes = secret
            .data
            .expect("data")
            .remove(KUBECONFIG_SECRET_KEY)
            .expect("kubeconfig key");
        String::from_utf8(bytes.0).expect("utf8")
    }

    /// Give the self-managed cluster's load balancer an address.
    async fn assign_address(store: &MemoryStore, name: &str, ip: &str) {
        let mut lb: LoadBalancer = reload(store, name).await;
        lb.status.get_or_insert_with(Default::default).ip_address = Some(ip.into());
        store
            .update(&api_resource::<LoadBalancer>(), &to_dynamic(&lb).expect("dynamic"))
            .await
            .expect("address");
    }

    #[test]
    fn test_quantity_per_subnet_rounds_up() {
        assert_eq!(quantity_per_subnet(5, 3), 2);
        assert_eq!(quantity_per_subnet(6, 3), 2);
        assert_eq!(quantity_per_subnet(0, 3), 0);
        assert_eq!(quantity_per_subnet(3, 0), 3);
    }

    #[tokio::test]
    async fn test_managed_cluster_graph() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        compartment(&store).await;
        network(&store, "net").await;
        let mut cluster = create(&store, Cluster::new("k8s", spec(true))).await;

        let progress = ClusterAdapter.synthesize(&ctx, &mut cluster).await.expect("synthesize");
        assert_eq!(progress, Progress::Done);
        assert_eq!(
            names(&store, &api_resource::<Subnet>()).await,
            vec![
                "k8s-lb-21-ad1",
                "k8s-lb-22-ad2",
                "k8s-node-11-ad1",
                "k8s-node-12-ad2",
                "k8s-node-13-ad3"
            ]
        );
        assert_eq!(
            names(&store, &api_resource::<Security>()).await,
            vec!["k8s-lb", "k8s-node"]
        );
        assert_eq!(names(&store, &api_resource::<Policy>()).await, vec!["k8s"]);

        let ce: CeCluster = reload(&store, "k8s").await;
        assert_eq!(ce.spec.vcn_ref, "net");
        assert_eq!(ce.spec.lb_subnet_refs, vec!["k8s-lb-21-ad1", "k8s-lb-22-ad2"]);
        let pool: NodePool = reload(&store, "k8s").await;
        assert_eq!(pool.spec.subnet_refs.len(), 3);
        assert_eq!(pool.spec.quantity_per_subnet, 2);
        assert_eq!(pool.spec.ssh_public_key.as_deref(), Some("ssh-ed25519 AAAA"));
        assert_eq!(pool.labels().get(CLUSTER_LABEL).map(String::as_str), Some("k8s"));

        let net: Network = reload(&store, "net").await;
        let allocations = net.status.expect("status").subnet_allocation_map;
        assert_eq!(allocations.get("Cluster/k8s"), Some(&10));
        assert_eq!(allocations.get("Cluster/k8s-lb"), Some(&20));
        assert_eq!(reason(&cluster), "Provisioning");
    }

    #[tokio::test]
    async fn test_managed_lb_subnets_cycle_single_zone() {
        let (store, _cloud, ctx) =
            context(MemoryCloud::new().with_availability_domains(vec!["AD-1".into()]));
        compartment(&store).await;
        network(&store, "net").await;
        let mut cluster = create(&store, Cluster::new("k8s", spec(true))).await;
        ClusterAdapter.synthesize(&ctx, &mut cluster).await.expect("synthesize");

        let lb_a: Subnet = reload(&store, "k8s-lb-21-ad1").await;
        let lb_b: Subnet = reload(&store, "k8s-lb-22-ad2").await;
        assert_eq!(lb_a.spec.availability_domain, "AD-1");
        assert_eq!(lb_b.spec.availability_domain, "AD-1");
        assert_ne!(lb_a.spec.cidr_block, lb_b.spec.cidr_block);
    }

    #[tokio::test]
    async fn test_managed_kubeconfig_from_cloud() {
        let (store, cloud, ctx) = context(MemoryCloud::new().with_provisioning_polls(0));
        compartment(&store).await;
        network(&store, "net").await;
        let mut cluster = create(&store, Cluster::new("k8s", spec(true))).await;
        ClusterAdapter.synthesize(&ctx, &mut cluster).await.expect("synthesize");

        let control_plane = cloud
            .create(ResourceType::Cluster, &CloudRequest::new(COMPARTMENT_ID, "k8s"))
            .await
            .expect("cloud cluster");
        mark_ready(
            &store,
            &api_resource::<CeCluster>(),
            "k8s",
            &control_plane.id,
            BTreeMap::new(),
        )
        .await;

        ClusterAdapter.synthesize(&ctx, &mut cluster).await.expect("synthesize");
        assert_eq!(state(&cluster), Some(OperatorState::Processed));
        let status = cluster.status.as_ref().expect("status");
        assert_eq!(status.kubeconfig_secret.as_deref(), Some("cluster-k8s"));
        let (server, context) = kubeconfig_summary(&kubeconfig(&store, "k8s").await).expect("kubeconfig");
        assert!(server.contains(&control_plane.id));
        assert_eq!(context, "k8s");
    }

    #[tokio::test]
    async fn test_self_managed_waits_for_load_balancer() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        let mut cluster = create(&store, Cluster::new("k8s", spec(false))).await;

        let progress = ClusterAdapter.synthesize(&ctx, &mut cluster).await.expect("synthesize");
        assert_eq!(progress, Progress::PollAfter(LB_READY_POLL));
        assert_eq!(reason(&cluster), "WaitingForLoadBalancer");
        assert!(cluster
            .status
            .as_ref()
            .and_then(|s| s.lb_wait_started.as_ref())
            .is_some());

        assert_eq!(names(&store, &api_resource::<Network>()).await, vec!["k8s"]);
        assert_eq!(
            names(&store, &api_resource::<Security>()).await,
            vec!["k8s-lb", "k8s-node"]
        );
        let lb: LoadBalancer = reload(&store, "k8s").await;
        assert_eq!(lb.spec.backend_port, 6443);
        assert_eq!(lb.spec.listeners[0].port, 443);
        assert_eq!(lb.spec.health_check.protocol, "TCP");
        // The node scripts need the address, so no compute yet
        assert!(names(&store, &api_resource::<Compute>()).await.is_empty());
    }

    #[tokio::test]
    async fn test_self_managed_kubeconfig_and_computes() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        let mut cluster = create(&store, Cluster::new("k8s", spec(false))).await;
        ClusterAdapter.synthesize(&ctx, &mut cluster).await.expect("synthesize");
        assign_address(&store, "k8s", "129.146.0.2").await;

        let progress = ClusterAdapter.synthesize(&ctx, &mut cluster).await.expect("synthesize");
        assert_eq!(progress, Progress::Done);
        assert_eq!(state(&cluster), Some(OperatorState::Processed));
        assert!(cluster.status.as_ref().and_then(|s| s.lb_wait_started.as_ref()).is_none());

        assert_eq!(
            names(&store, &api_resource::<Compute>()).await,
            vec!["k8s-master", "k8s-worker"]
        );
        let master: Compute = reload(&store, "k8s-master").await;
        assert_eq!(master.spec.replicas, 1);
        assert_eq!(master.labels().get(ROLE_LABEL).map(String::as_str), Some("master"));
        assert_eq!(master.labels().get(CLUSTER_LABEL).map(String::as_str), Some("k8s"));
        let script = master.spec.user_data.expect("user data");
        assert!(script.contains("kubeadm init"));
        assert!(script.contains("129.146.0.2:6443"));
        let worker: Compute = reload(&store, "k8s-worker").await;
        assert_eq!(worker.spec.replicas, 2);
        assert!(worker.spec.user_data.expect("user data").contains("kubeadm join"));
        assert_eq!(master.spec.network, "k8s");

        let names_of_secrets = names(&store, &api_resource::<Secret>()).await;
        assert_eq!(names_of_secrets, vec![kubeconfig_secret_name("k8s"), ca_secret_name("k8s")]);
        let (server, context) =
            kubeconfig_summary(&kubeconfig(&store, "k8s").await).expect("kubeconfig");
        assert_eq!(server, "https://129.146.0.2");
        assert_eq!(context, "k8s");

        // Re-reconciling keeps the CA and the kubeconfig as they are
        let secret_writes = store.write_count("Secret");
        let compute_writes = store.write_count("Compute");
        ClusterAdapter.synthesize(&ctx, &mut cluster).await.expect("synthesize");
        assert_eq!(store.write_count("Secret"), secret_writes);
        assert_eq!(store.write_count("Compute"), compute_writes);
    }

    #[tokio::test]
    async fn test_self_managed_load_balancer_deadline() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        let mut cluster = create(&store, Cluster::new("k8s", spec(false))).await;
        ClusterAdapter.synthesize(&ctx, &mut cluster).await.expect("synthesize");

        let started = chrono::Utc::now() - chrono::TimeDelta::seconds(601);
        cluster
            .status
            .get_or_insert_with(Default::default)
            .lb_wait_started = Some(started.to_rfc3339());
        let progress = ClusterAdapter.synthesize(&ctx, &mut cluster).await.expect("synthesize");
        assert_eq!(progress, Progress::Done);
        assert_eq!(state(&cluster), Some(OperatorState::Error));
        assert_eq!(reason(&cluster), "LoadBalancerTimeout");

        // A late address still completes the cluster
        assign_address(&store, "k8s", "129.146.0.9").await;
        ClusterAdapter.synthesize(&ctx, &mut cluster).await.expect("synthesize");
        assert_eq!(state(&cluster), Some(OperatorState::Processed));
    }

    #[tokio::test]
    async fn test_self_managed_teardown_order() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        let mut cluster = create(&store, Cluster::new("k8s", spec(false))).await;
        ClusterAdapter.synthesize(&ctx, &mut cluster).await.expect("synthesize");
        assign_address(&store, "k8s", "129.146.0.2").await;
        ClusterAdapter.synthesize(&ctx, &mut cluster).await.expect("synthesize");

        // Computes, then the load balancer, then securities, then the network, then secrets
        let mut rounds = 0;
        while ClusterAdapter.teardown(&ctx, &mut cluster).await.expect("teardown")
            == Progress::Pending
        {
            rounds += 1;
            match rounds {
                1 => assert!(names(&store, &api_resource::<Compute>()).await.is_empty()),
                2 => assert!(names(&store, &api_resource::<LoadBalancer>()).await.is_empty()),
                3 => {
                    assert!(names(&store, &api_resource::<Security>()).await.is_empty());
                    assert_eq!(names(&store, &api_resource::<Network>()).await, vec!["k8s"]);
                }
                4 => assert_eq!(names(&store, &api_resource::<Secret>()).await.len(), 2),
                _ => {}
            }
            assert!(rounds < 10, "teardown never finished");
        }
        assert_eq!(rounds, 5);
        for ar in ClusterAdapter.children() {
            let left: Vec<String> = store
                .list(&ar, Some(NS), None)
                .await
                .expect("list")
                .iter()
                .map(ResourceExt::name_any)
                .collect();
            assert!(left.is_empty(), "{} left: {left:?}", ar.kind);
        }
    }
}
