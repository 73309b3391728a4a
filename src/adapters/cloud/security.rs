// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `Security` → one `SecurityRuleSet` per selected network.
//!
//! Subnets select rule sets by network label, so a rule set produced here
//! applies to every subnet of its network.

use super::children::{self, Child, Owner};
use super::waiting;
use crate::adapters::{AdapterContext, CompositeAdapter, Progress, CONDITION_READY};
use crate::constants::ANYWHERE_CIDR;
use crate::crd::cloud::{Network, Security};
use crate::crd::resources::{EgressRule, IngressRule, SecurityRuleSet, SecurityRuleSetSpec};
use crate::crd::{Composite, OperatorState};
use crate::dependency::is_ready;
use crate::errors::ReconcileError;
use crate::labels::{NETWORK_LABEL, SECURITY_LABEL};
use crate::store::api_resource;
use async_trait::async_trait;
use kube::api::ApiResource;
use kube::ResourceExt;
use std::collections::BTreeSet;
use tracing::info;

/// Allow ssh from anywhere.
#[must_use]
pub fn default_ingress() -> Vec<IngressRule> {
    vec![IngressRule {
        protocol: "tcp".to_string(),
        source: ANYWHERE_CIDR.to_string(),
        port_min: Some(22),
        port_max: Some(22),
    }]
}

/// Allow everything out.
#[must_use]
pub fn default_egress() -> Vec<EgressRule> {
    vec![EgressRule {
        protocol: "all".to_string(),
        destination: ANYWHERE_CIDR.to_string(),
        port_min: None,
        port_max: None,
    }]
}

#[must_use]
pub fn rule_set_name(security: &str, network: &str) -> String {
    format!("{security}-{network}")
}

pub struct SecurityAdapter;

#[async_trait]
impl CompositeAdapter for SecurityAdapter {
    type Kind = Security;

    fn children(&self) -> Vec<ApiResource> {
        vec![api_resource::<SecurityRuleSet>()]
    }

    async fn synthesize(
        &self,
        ctx: &AdapterContext,
        security: &mut Security,
    ) -> Result<Progress, ReconcileError> {
        let name = security.name_any();
        let namespace = security.namespace().unwrap_or_default();
        let owner = Owner::of(security)?;

        let networks: Vec<String> = ctx
            .store
            .list(
                &api_resource::<Network>(),
                Some(&namespace),
                Some(&security.spec.network_selector),
            )
            .await?
            .iter()
            .filter(|obj| obj.metadata.deletion_timestamp.is_none())
            .map(ResourceExt::name_any)
            .collect();

        let ingress = if security.spec.ingress_rules.is_empty() {
            default_ingress()
        } else {
            security.spec.ingress_rules.clone()
        };
        let egress = if security.spec.egress_rules.is_empty() {
            default_egress()
        } else {
            security.spec.egress_rules.clone()
        };

        let desired = networks
            .iter()
            .map(|network| {
                Ok(Child::spec::<SecurityRuleSet>(
                    rule_set_name(&name, network),
                    &SecurityRuleSetSpec {
                        vcn_ref: network.clone(),
                        ingress_rules: ingress.clone(),
                        egress_rules: egress.clone(),
                    },
                )?
                .label(NETWORK_LABEL, network)
                .label(SECURITY_LABEL, &name))
            })
            .collect::<Result<Vec<_>, ReconcileError>>()?;

        let stored = children::ensure_all(ctx.store.as_ref(), &owner, &desired).await?;
        let keep: BTreeSet<String> = stored.keys().cloned().collect();
        let orphans = children::prune(
            ctx.store.as_ref(),
            &owner,
            &api_resource::<SecurityRuleSet>(),
            &keep,
        )
        .await?;
        if orphans > 0 {
            info!(security = %name, orphans = orphans, "removing rule sets of deselected networks");
        }

        let status = security.operator_status_mut();
        status.state = OperatorState::Created;
        if networks.is_empty() {
            waiting(status, "NoNetworks", "no network matches the selector");
        } else if stored.values().all(is_ready) {
            status.set_condition(
                CONDITION_READY,
                "Available",
                &format!("rules applied to {}", networks.join(", ")),
            );
            status.message = format!("rules applied to {} network(s)", networks.len());
        } else {
            waiting(status, "Provisioning", "waiting for rule sets");
        }
        Ok(Progress::Done)
    }

    async fn teardown(
        &self,
        ctx: &AdapterContext,
        security: &mut Security,
    ) -> Result<Progress, ReconcileError> {
        let owner = Owner::of(security)?;
        let progress = children::teardown(ctx.store.as_ref(), &owner, &[self.children()]).await?;
        if !progress.is_done() {
            waiting(
                security.operator_status_mut(),
                "Deleting",
                "waiting for rule sets to be deleted",
            );
        }
        Ok(progress)
    }
}

#[cfg(test)]
#[path = "security_tests.rs"]
mod security_tests;
