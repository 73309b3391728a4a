// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `network.rs`

#[cfg(test)]
mod tests {
    use crate::adapters::cloud::fixtures::{context, mark_all_ready, names, network};
    use crate::adapters::cloud::NetworkAdapter;
    use crate::adapters::{CompositeAdapter, Progress, CONDITION_READY};
    use crate::cloud::memory::MemoryCloud;
    use crate::crd::cloud::Network;
    use crate::crd::resources::{DhcpOption, InternetGateway, RouteTable, Vcn};
    use crate::crd::OperatorState;
    use crate::errors::ReconcileError;
    use crate::labels::NETWORK_LABEL;
    use crate::store::{api_resource, to_typed, ObjectStore};
    use kube::ResourceExt;

    fn reason(network: &Network) -> String {
        network
            .status
            .as_ref()
            .and_then(|s| s.operator.find_condition(CONDITION_READY))
            .map(|c| c.reason.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_synthesize_produces_network_primitives() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        let mut net = network(&store, "net").await;

        let progress = NetworkAdapter.synthesize(&ctx, &mut net).await.expect("synthesize");
        assert_eq!(progress, Progress::Done);
        assert_eq!(net.labels().get(NETWORK_LABEL).map(String::as_str), Some("net"));
        assert_eq!(reason(&net), "Provisioning");

        for ar in NetworkAdapter.children() {
            assert_eq!(names(&store, &ar).await, vec!["net".to_string()], "{}", ar.kind);
        }
        let route_table = store
            .get(&api_resource::<RouteTable>(), Some("team"), "net")
            .await
            .expect("route table");
        assert_eq!(
            route_table.data["spec"]["routeRules"][0]["internetGatewayRef"],
            "net"
        );
    }

    #[tokio::test]
    async fn test_network_available_once_primitives_are() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        let mut net = network(&store, "net").await;
        NetworkAdapter.synthesize(&ctx, &mut net).await.expect("synthesize");

        for ar in [
            api_resource::<Vcn>(),
            api_resource::<InternetGateway>(),
            api_resource::<RouteTable>(),
            api_resource::<DhcpOption>(),
        ] {
            mark_all_ready(&store, &ar).await;
        }
        let writes = store.total_writes();
        NetworkAdapter.synthesize(&ctx, &mut net).await.expect("synthesize");
        assert_eq!(reason(&net), "Available");
        assert_eq!(
            net.status.as_ref().map(|s| s.operator.state),
            Some(OperatorState::Created)
        );
        // Nothing changed, so no child was rewritten
        assert_eq!(store.total_writes(), writes);
    }

    #[tokio::test]
    async fn test_invalid_cidr_is_rejected() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        let mut net = network(&store, "net").await;
        net.spec.cidr_block = "10.0.0.0/24".into();
        let err = NetworkAdapter.synthesize(&ctx, &mut net).await.expect_err("invalid");
        assert!(matches!(err, ReconcileError::Validation { .. }));
        assert!(names(&store, &api_resource::<Vcn>()).await.is_empty());
    }

    #[tokio::test]
    async fn test_teardown_waits_for_allocations() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        let mut net = network(&store, "net").await;
        NetworkAdapter.synthesize(&ctx, &mut net).await.expect("synthesize");

        net.status
            .get_or_insert_with(Default::default)
            .subnet_allocation_map
            .insert("Compute/web".into(), 10);
        let progress = NetworkAdapter.teardown(&ctx, &mut net).await.expect("teardown");
        assert_eq!(progress, Progress::Pending);
        assert_eq!(reason(&net), "InUse");
        assert_eq!(names(&store, &api_resource::<Vcn>()).await, vec!["net".to_string()]);

        net.status
            .get_or_insert_with(Default::default)
            .subnet_allocation_map
            .clear();
        assert_eq!(
            NetworkAdapter.teardown(&ctx, &mut net).await.expect("teardown"),
            Progress::Pending
        );
        assert_eq!(reason(&net), "Deleting");
        assert_eq!(
            NetworkAdapter.teardown(&ctx, &mut net).await.expect("teardown"),
            Progress::Done
        );
        for ar in NetworkAdapter.children() {
            assert!(names(&store, &ar).await.is_empty(), "{}", ar.kind);
        }
        // The composite itself is untouched
        let stored: Network = to_typed(
            &store
                .get(&api_resource::<Network>(), Some("team"), "net")
                .await
                .expect("network"),
        )
        .expect("typed");
        assert_eq!(stored.name_any(), "net");
    }
}
