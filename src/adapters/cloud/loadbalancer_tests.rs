// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `loadbalancer.rs`

#[cfg(test)]
mod tests {
    use crate::adapters::cloud::fixtures::{
        compartment, context, create, mark_all_ready, mark_ready, names, network, reload, NS,
    };
    use crate::adapters::cloud::loadbalancer::{
        backend_weight, health_checker, IP_ADDRESS_ATTRIBUTE,
    };
    use crate::adapters::cloud::{ComputeAdapter, LoadBalancerAdapter};
    use crate::adapters::{AdapterContext, CompositeAdapter, Progress, CONDITION_READY};
    use crate::cloud::memory::MemoryCloud;
    use crate::crd::cloud::{
        Compute, ComputeSpec, HealthCheck, ListenerConfig, LoadBalancer, LoadBalancerSpec, Network,
    };
    use crate::crd::resources::{
        Backend, BackendSet, Certificate, Instance, Listener, LoadBalancer as LbPrimitive, Subnet,
    };
    use crate::crd::{LabelSelector, OperatorState};
    use crate::labels::LOADBALANCER_LABEL;
    use crate::store::memory::MemoryStore;
    use crate::store::{api_resource, to_dynamic, to_typed, ObjectStore};
    use kube::ResourceExt;
    use std::collections::BTreeMap;

    /// A placed, fully available Compute `web` with `replicas` instances.
    async fn ready_compute(store: &MemoryStore, ctx: &AdapterContext, replicas: i32) -> Compute {
        let mut compute = Compute::new(
            "web",
            ComputeSpec {
                network: "net".into(),
                replicas,
                image: "Oracle-Linux-8".into(),
                ..Default::default()
            },
        );
        compute.labels_mut().insert("app".into(), "web".into());
        let mut compute = create(store, compute).await;
        ComputeAdapter.synthesize(ctx, &mut compute).await.expect("compute");
        mark_all_ready(store, &api_resource::<Instance>()).await;
        ComputeAdapter.synthesize(ctx, &mut compute).await.expect("compute");
        let stored = store
            .update(&api_resource::<Compute>(), &to_dynamic(&compute).expect("dynamic"))
            .await
            .expect("persist compute");
        to_typed(&stored).expect("typed")
    }

    fn spec() -> LoadBalancerSpec {
        LoadBalancerSpec {
            network: "net".into(),
            compute_selector: LabelSelector::from_labels([("app", "web")]),
            listeners: vec![
                ListenerConfig {
                    port: 80,
                    protocol: "HTTP".into(),
                    tls_secret: None,
                },
                ListenerConfig {
                    port: 443,
                    protocol: "HTTP".into(),
                    tls_secret: Some("tls".into()),
                },
            ],
            backend_port: 8080,
            label_weight_map: BTreeMap::from([("app=web".to_string(), 3)]),
            ..Default::default()
        }
    }

    fn reason(lb: &LoadBalancer) -> String {
        lb.status
            .as_ref()
            .and_then(|s| s.operator.find_condition(CONDITION_READY))
            .map(|c| c.reason.clone())
            .unwrap_or_default()
    }

    #[test]
    fn test_health_checker_defaults() {
        let checker = health_checker(&LoadBalancerSpec::default());
        assert_eq!(checker.port, 80);
        assert_eq!(checker.protocol, "HTTP");
        assert_eq!(checker.url_path, "/");

        let tcp = health_checker(&LoadBalancerSpec {
            health_check: HealthCheck {
                port: 6443,
                protocol: "TCP".into(),
                url_path: String::new(),
            },
            ..Default::default()
        });
        assert_eq!(tcp.port, 6443);
        assert_eq!(tcp.url_path, "");
    }

    #[test]
    fn test_backend_weight_lookup() {
        let weights = BTreeMap::from([("tier=gold".to_string(), 5), ("bogus".to_string(), 9)]);
        let gold = BTreeMap::from([("tier".to_string(), "gold".to_string())]);
        let plain = BTreeMap::from([("tier".to_string(), "bronze".to_string())]);
        assert_eq!(backend_weight(&weights, &gold), 5);
        assert_eq!(backend_weight(&weights, &plain), 1);
    }

    #[tokio::test]
    async fn test_frontend_and_backends() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        compartment(&store).await;
        network(&store, "net").await;
        ready_compute(&store, &ctx, 2).await;
        let mut lb = create(&store, LoadBalancer::new("lb", spec())).await;

        let progress = LoadBalancerAdapter.synthesize(&ctx, &mut lb).await.expect("synthesize");
        assert_eq!(progress, Progress::Done);
        assert_eq!(
            names(&store, &api_resource::<Subnet>()).await,
            vec!["lb-21-ad1", "lb-22-ad2", "lb-23-ad3", "web-11-ad1", "web-12-ad2", "web-13-ad3"]
        );
        assert_eq!(names(&store, &api_resource::<LbPrimitive>()).await, vec!["lb"]);
        assert_eq!(names(&store, &api_resource::<BackendSet>()).await, vec!["lb"]);
        assert_eq!(names(&store, &api_resource::<Listener>()).await, vec!["lb-443", "lb-80"]);
        assert_eq!(names(&store, &api_resource::<Certificate>()).await, vec!["lb-tls"]);
        assert_eq!(
            names(&store, &api_resource::<Backend>()).await,
            vec!["lb-web-0", "lb-web-1"]
        );

        let backend: Backend = reload(&store, "lb-web-1").await;
        assert_eq!(backend.spec.port, 8080);
        assert_eq!(backend.spec.weight, 3);
        assert_eq!(backend.labels().get(LOADBALANCER_LABEL).map(String::as_str), Some("lb"));
        let listener: Listener = reload(&store, "lb-443").await;
        assert_eq!(listener.spec.certificate_ref.as_deref(), Some("lb-tls"));

        assert_eq!(reason(&lb), "Provisioning");
        assert_eq!(lb.status.as_ref().and_then(|s| s.ip_address.clone()), None);
    }

    #[tokio::test]
    async fn test_address_reported_once_available() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        compartment(&store).await;
        network(&store, "net").await;
        ready_compute(&store, &ctx, 1).await;
        let mut lb = create(&store, LoadBalancer::new("lb", spec())).await;
        LoadBalancerAdapter.synthesize(&ctx, &mut lb).await.expect("synthesize");

        mark_ready(
            &store,
            &api_resource::<LbPrimitive>(),
            "lb",
            "ocid1.loadbalancer.oc1..lb",
            BTreeMap::from([(IP_ADDRESS_ATTRIBUTE.to_string(), "129.146.0.2".to_string())]),
        )
        .await;
        LoadBalancerAdapter.synthesize(&ctx, &mut lb).await.expect("synthesize");
        let status = lb.status.as_ref().expect("status");
        assert_eq!(status.operator.state, OperatorState::Processed);
        assert_eq!(status.ip_address.as_deref(), Some("129.146.0.2"));
        assert_eq!(reason(&lb), "Available");
    }

    #[tokio::test]
    async fn test_waits_for_selected_computes() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        compartment(&store).await;
        network(&store, "net").await;
        let mut compute = Compute::new(
            "web",
            ComputeSpec {
                network: "net".into(),
                replicas: 1,
                image: "Oracle-Linux-8".into(),
                ..Default::default()
            },
        );
        compute.labels_mut().insert("app".into(), "web".into());
        create(&store, compute).await;
        let mut lb = create(&store, LoadBalancer::new("lb", spec())).await;

        let progress = LoadBalancerAdapter.synthesize(&ctx, &mut lb).await.expect("synthesize");
        assert_eq!(progress, Progress::Pending);
        assert_eq!(reason(&lb), "ComputesNotReady");
        // The frontend does not wait for the computes
        assert_eq!(names(&store, &api_resource::<LbPrimitive>()).await, vec!["lb"]);
        assert!(names(&store, &api_resource::<Backend>()).await.is_empty());
    }

    #[tokio::test]
    async fn test_removed_listener_is_pruned() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        compartment(&store).await;
        network(&store, "net").await;
        let mut lb = create(&store, LoadBalancer::new("lb", spec())).await;
        LoadBalancerAdapter.synthesize(&ctx, &mut lb).await.expect("synthesize");

        lb.spec.listeners.truncate(1);
        LoadBalancerAdapter.synthesize(&ctx, &mut lb).await.expect("synthesize");
        assert_eq!(names(&store, &api_resource::<Listener>()).await, vec!["lb-80"]);
        assert!(names(&store, &api_resource::<Certificate>()).await.is_empty());
    }

    #[tokio::test]
    async fn test_backends_follow_scale_down() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        compartment(&store).await;
        network(&store, "net").await;
        let mut compute = ready_compute(&store, &ctx, 2).await;
        let mut lb = create(&store, LoadBalancer::new("lb", spec())).await;
        LoadBalancerAdapter.synthesize(&ctx, &mut lb).await.expect("synthesize");

        // The instance is still there, but beyond the replica count
        compute.spec.replicas = 1;
        store
            .update(&api_resource::<Compute>(), &to_dynamic(&compute).expect("dynamic"))
            .await
            .expect("scale");
        LoadBalancerAdapter.synthesize(&ctx, &mut lb).await.expect("synthesize");
        assert_eq!(names(&store, &api_resource::<Backend>()).await, vec!["lb-web-0"]);
    }

    #[tokio::test]
    async fn test_teardown_in_stages_then_release() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        compartment(&store).await;
        network(&store, "net").await;
        ready_compute(&store, &ctx, 1).await;
        let mut lb = create(&store, LoadBalancer::new("lb", spec())).await;
        LoadBalancerAdapter.synthesize(&ctx, &mut lb).await.expect("synthesize");

        let mut rounds = 0;
        while LoadBalancerAdapter.teardown(&ctx, &mut lb).await.expect("teardown")
            == Progress::Pending
        {
            rounds += 1;
            assert!(rounds < 10, "teardown never finished");
        }
        assert_eq!(rounds, 4);
        for ar in LoadBalancerAdapter.children() {
            let left: Vec<String> = store
                .list(&ar, Some(NS), None)
                .await
                .expect("list")
                .iter()
                .filter(|o| o.labels().get(LOADBALANCER_LABEL).is_some())
                .map(ResourceExt::name_any)
                .collect();
            assert!(left.is_empty(), "{} left: {left:?}", ar.kind);
        }
        let net: Network = reload(&store, "net").await;
        let map = net.status.expect("status").subnet_allocation_map;
        assert!(!map.contains_key("LoadBalancer/lb"));
        assert!(map.contains_key("Compute/web"));
    }
}
