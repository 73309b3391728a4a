// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `security.rs`

#[cfg(test)]
mod tests {
    use crate::adapters::cloud::fixtures::{context, create, mark_all_ready, names, network, NS};
    use crate::adapters::cloud::security::{default_egress, default_ingress, rule_set_name};
    use crate::adapters::cloud::SecurityAdapter;
    use crate::adapters::{CompositeAdapter, Progress, CONDITION_READY};
    use crate::cloud::memory::MemoryCloud;
    use crate::crd::cloud::{Network, Security, SecuritySpec};
    use crate::crd::resources::{IngressRule, SecurityRuleSet, SecurityRuleSetSpec};
    use crate::crd::{Composite, LabelSelector};
    use crate::labels::{NETWORK_LABEL, SECURITY_LABEL};
    use crate::store::memory::MemoryStore;
    use crate::store::{api_resource, to_typed, ObjectStore};
    use kube::ResourceExt;

    async fn labelled_network(store: &MemoryStore, name: &str, tier: &str) {
        let ar = api_resource::<Network>();
        network(store, name).await;
        let mut obj = store.get(&ar, Some(NS), name).await.expect("get");
        let labels = obj.labels_mut();
        labels.insert(NETWORK_LABEL.into(), name.into());
        labels.insert("tier".into(), tier.into());
        store.update(&ar, &obj).await.expect("label");
    }

    async fn security(store: &MemoryStore, selector: LabelSelector) -> Security {
        create(
            store,
            Security::new(
                "ssh",
                SecuritySpec {
                    network_selector: selector,
                    ingress_rules: Vec::new(),
                    egress_rules: Vec::new(),
                },
            ),
        )
        .await
    }

    fn reason(security: &Security) -> String {
        security
            .operator_status()
            .and_then(|s| s.find_condition(CONDITION_READY))
            .map(|c| c.reason.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_rule_set_per_selected_network() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        labelled_network(&store, "front", "web").await;
        labelled_network(&store, "back", "db").await;
        let mut sec = security(&store, LabelSelector::from_labels([("tier", "web")])).await;

        let progress = SecurityAdapter.synthesize(&ctx, &mut sec).await.expect("synthesize");
        assert_eq!(progress, Progress::Done);
        let ar = api_resource::<SecurityRuleSet>();
        assert_eq!(names(&store, &ar).await, vec![rule_set_name("ssh", "front")]);

        let obj = store
            .get(&ar, Some(NS), &rule_set_name("ssh", "front"))
            .await
            .expect("rule set");
        assert_eq!(obj.labels().get(NETWORK_LABEL).map(String::as_str), Some("front"));
        assert_eq!(obj.labels().get(SECURITY_LABEL).map(String::as_str), Some("ssh"));
        let rules: SecurityRuleSet = to_typed(&obj).expect("typed");
        assert_eq!(
            rules.spec,
            SecurityRuleSetSpec {
                vcn_ref: "front".into(),
                ingress_rules: default_ingress(),
                egress_rules: default_egress(),
            }
        );
        assert_eq!(reason(&sec), "Provisioning");

        mark_all_ready(&store, &ar).await;
        SecurityAdapter.synthesize(&ctx, &mut sec).await.expect("synthesize");
        assert_eq!(reason(&sec), "Available");
    }

    #[tokio::test]
    async fn test_selector_change_prunes_rule_sets() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        labelled_network(&store, "front", "web").await;
        labelled_network(&store, "back", "db").await;
        let mut sec = security(&store, LabelSelector::default()).await;
        SecurityAdapter.synthesize(&ctx, &mut sec).await.expect("synthesize");
        let ar = api_resource::<SecurityRuleSet>();
        assert_eq!(names(&store, &ar).await.len(), 2);

        sec.spec.network_selector = LabelSelector::from_labels([("tier", "db")]);
        SecurityAdapter.synthesize(&ctx, &mut sec).await.expect("synthesize");
        assert_eq!(names(&store, &ar).await, vec![rule_set_name("ssh", "back")]);
    }

    #[tokio::test]
    async fn test_custom_rules_and_no_networks() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        let mut sec = security(&store, LabelSelector::from_labels([("tier", "web")])).await;
        SecurityAdapter.synthesize(&ctx, &mut sec).await.expect("synthesize");
        assert_eq!(reason(&sec), "NoNetworks");

        labelled_network(&store, "front", "web").await;
        let https = IngressRule {
            protocol: "tcp".into(),
            source: "10.0.0.0/8".into(),
            port_min: Some(443),
            port_max: Some(443),
        };
        sec.spec.ingress_rules = vec![https.clone()];
        SecurityAdapter.synthesize(&ctx, &mut sec).await.expect("synthesize");
        let rules: SecurityRuleSet = to_typed(
            &store
                .get(
                    &api_resource::<SecurityRuleSet>(),
                    Some(NS),
                    &rule_set_name("ssh", "front"),
                )
                .await
                .expect("rule set"),
        )
        .expect("typed");
        assert_eq!(rules.spec.ingress_rules, vec![https]);
        assert_eq!(rules.spec.egress_rules, default_egress());
    }

    #[tokio::test]
    async fn test_teardown_removes_rule_sets() {
        let (store, _cloud, ctx) = context(MemoryCloud::new());
        labelled_network(&store, "front", "web").await;
        let mut sec = security(&store, LabelSelector::default()).await;
        SecurityAdapter.synthesize(&ctx, &mut sec).await.expect("synthesize");

        assert_eq!(
            SecurityAdapter.teardown(&ctx, &mut sec).await.expect("teardown"),
            Progress::Pending
        );
        assert_eq!(
            SecurityAdapter.teardown(&ctx, &mut sec).await.expect("teardown"),
            Progress::Done
        );
        assert!(names(&store, &api_resource::<SecurityRuleSet>()).await.is_empty());
    }
}
