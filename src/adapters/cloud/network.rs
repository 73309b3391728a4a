// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `Network` → VCN, internet gateway, route table and DHCP options.
//!
//! Subnets are not produced here. Composites placed in the network allocate
//! a subnet range on it and create their own subnets, which is why teardown
//! waits until every allocation has been released.

use super::children::{self, Child, Owner};
use super::waiting;
use crate::adapters::{AdapterContext, CompositeAdapter, Progress, CONDITION_READY};
use crate::constants::{ANYWHERE_CIDR, DEFAULT_DHCP_SERVER_TYPE};
use crate::crd::cloud::Network;
use crate::crd::resources::{
    DhcpOption, DhcpOptionSpec, InternetGateway, InternetGatewaySpec, RouteRule, RouteTable,
    RouteTableSpec, Vcn, VcnSpec,
};
use crate::crd::OperatorState;
use crate::dependency::is_ready;
use crate::errors::ReconcileError;
use crate::labels::NETWORK_LABEL;
use crate::store::api_resource;
use crate::validation::validate_network;
use async_trait::async_trait;
use kube::api::ApiResource;
use kube::ResourceExt;
use tracing::debug;

pub struct NetworkAdapter;

impl NetworkAdapter {
    fn desired(network: &Network) -> Result<Vec<Child>, ReconcileError> {
        let name = network.name_any();
        let children = vec![
            Child::spec::<Vcn>(
                &name,
                &VcnSpec {
                    cidr_block: network.spec.cidr_block.clone(),
                    dns_label: network.spec.dns_label.clone(),
                },
            )?,
            Child::spec::<InternetGateway>(
                &name,
                &InternetGatewaySpec {
                    vcn_ref: name.clone(),
                    enabled: true,
                },
            )?,
            Child::spec::<RouteTable>(
                &name,
                &RouteTableSpec {
                    vcn_ref: name.clone(),
                    route_rules: vec![RouteRule {
                        destination: ANYWHERE_CIDR.to_string(),
                        internet_gateway_ref: name.clone(),
                    }],
                },
            )?,
            Child::spec::<DhcpOption>(
                &name,
                &DhcpOptionSpec {
                    vcn_ref: name.clone(),
                    server_type: DEFAULT_DHCP_SERVER_TYPE.to_string(),
                    search_domains: Vec::new(),
                },
            )?,
        ];
        Ok(children
            .into_iter()
            .map(|child| child.label(NETWORK_LABEL, &name))
            .collect())
    }
}

#[async_trait]
impl CompositeAdapter for NetworkAdapter {
    type Kind = Network;

    fn children(&self) -> Vec<ApiResource> {
        vec![
            api_resource::<Vcn>(),
            api_resource::<InternetGateway>(),
            api_resource::<RouteTable>(),
            api_resource::<DhcpOption>(),
        ]
    }

    async fn synthesize(
        &self,
        ctx: &AdapterContext,
        network: &mut Network,
    ) -> Result<Progress, ReconcileError> {
        validate_network(&network.spec)?;
        let name = network.name_any();
        network
            .labels_mut()
            .insert(NETWORK_LABEL.to_string(), name.clone());

        let owner = Owner::of(network)?;
        let mut pending = Vec::new();
        for child in Self::desired(network)? {
            let stored = children::ensure(ctx.store.as_ref(), &owner, &child).await?;
            if !is_ready(&stored) {
                pending.push(child.ar.kind);
            }
        }

        let status = &mut network.status.get_or_insert_with(Default::default).operator;
        status.state = OperatorState::Created;
        if pending.is_empty() {
            status.set_condition(CONDITION_READY, "Available", "all network resources are available");
            status.message = format!("network {name} is available");
        } else {
            debug!(network = %name, pending = ?pending, "network resources still provisioning");
            waiting(
                status,
                "Provisioning",
                format!("waiting for {}", pending.join(", ")),
            );
        }
        Ok(Progress::Done)
    }

    async fn teardown(
        &self,
        ctx: &AdapterContext,
        network: &mut Network,
    ) -> Result<Progress, ReconcileError> {
        let status = network.status.get_or_insert_with(Default::default);
        if !status.subnet_allocation_map.is_empty() {
            let holders: Vec<&str> = status.subnet_allocation_map.keys().map(String::as_str).collect();
            let message = format!("still in use by {}", holders.join(", "));
            waiting(&mut status.operator, "InUse", message);
            return Ok(Progress::Pending);
        }

        let owner = Owner::of(network)?;
        let progress = children::teardown(ctx.store.as_ref(), &owner, &[self.children()]).await?;
        if !progress.is_done() {
            let status = &mut network.status.get_or_insert_with(Default::default).operator;
            waiting(status, "Deleting", "waiting for network resources to be deleted");
        }
        Ok(progress)
    }
}

#[cfg(test)]
#[path = "network_tests.rs"]
mod network_tests;
