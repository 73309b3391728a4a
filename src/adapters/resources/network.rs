// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Networking primitives.
//!
//! Everything below a VCN is created inside it (`parentId` = VCN id), so the
//! cloud refuses to delete a VCN that still holds any of them. Subnets pick up
//! their security rule sets by label, which lets a `Security` composite attach
//! rules to subnets it never heard of.

use super::{ids_of, in_compartment};
use crate::adapters::{AdapterContext, ParentRef, ParentSelector, Parents, PrimitiveAdapter};
use crate::cloud::{CloudRequest, ResourceType};
use crate::constants::DEFAULT_DHCP_SERVER_TYPE;
use crate::crd::resources::{
    DhcpOption, EgressRule, IngressRule, InternetGateway, RouteTable, SecurityRuleSet, Subnet,
    Vcn,
};
use crate::errors::ReconcileError;
use crate::validation::validate_subnet;
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::BTreeSet;

fn port_range(min: Option<i32>, max: Option<i32>) -> String {
    match (min, max) {
        (None, None) => "*".to_string(),
        (Some(min), None) => format!("{min}-{min}"),
        (None, Some(max)) => format!("{max}-{max}"),
        (Some(min), Some(max)) => format!("{min}-{max}"),
    }
}

/// Compact, order-preserving rendering of ingress rules: `proto:source:ports;...`
#[must_use]
pub fn ingress_digest(rules: &[IngressRule]) -> String {
    rules
        .iter()
        .map(|r| {
            format!(
                "{}:{}:{}",
                r.protocol.to_lowercase(),
                r.source,
                port_range(r.port_min, r.port_max)
            )
        })
        .collect::<Vec<_>>()
        .join(";")
}

#[must_use]
pub fn egress_digest(rules: &[EgressRule]) -> String {
    rules
        .iter()
        .map(|r| {
            format!(
                "{}:{}:{}",
                r.protocol.to_lowercase(),
                r.destination,
                port_range(r.port_min, r.port_max)
            )
        })
        .collect::<Vec<_>>()
        .join(";")
}

pub struct VcnAdapter;

#[async_trait]
impl PrimitiveAdapter for VcnAdapter {
    type Kind = Vcn;
    const RESOURCE_TYPE: ResourceType = ResourceType::Vcn;

    fn parent_refs(&self, obj: &Vcn) -> Vec<ParentRef> {
        in_compartment(obj, [])
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &Vcn,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        Ok(CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .attr("cidrBlock", obj.spec.cidr_block.clone())
            .attr("dnsLabel", obj.spec.dns_label.clone().unwrap_or_default()))
    }
}

pub struct InternetGatewayAdapter;

#[async_trait]
impl PrimitiveAdapter for InternetGatewayAdapter {
    type Kind = InternetGateway;
    const RESOURCE_TYPE: ResourceType = ResourceType::InternetGateway;

    fn parent_refs(&self, obj: &InternetGateway) -> Vec<ParentRef> {
        in_compartment(obj, [ParentRef::of::<Vcn>(&obj.spec.vcn_ref)])
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &InternetGateway,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let vcn_id = parents.id("Vcn", &obj.spec.vcn_ref)?;
        Ok(CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .with_parent(&vcn_id)
            .attr("vcnId", vcn_id.clone())
            .attr("isEnabled", obj.spec.enabled.to_string()))
    }
}

/// Route rules point at internet gateways, which become parents too.
pub struct RouteTableAdapter;

#[async_trait]
impl PrimitiveAdapter for RouteTableAdapter {
    type Kind = RouteTable;
    const RESOURCE_TYPE: ResourceType = ResourceType::RouteTable;

    fn parent_refs(&self, obj: &RouteTable) -> Vec<ParentRef> {
        let gateways: BTreeSet<&str> = obj
            .spec
            .route_rules
            .iter()
            .map(|r| r.internet_gateway_ref.as_str())
            .collect();
        in_compartment(
            obj,
            std::iter::once(ParentRef::of::<Vcn>(&obj.spec.vcn_ref))
                .chain(gateways.into_iter().map(ParentRef::of::<InternetGateway>)),
        )
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &RouteTable,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let vcn_id = parents.id("Vcn", &obj.spec.vcn_ref)?;
        let rules = obj
            .spec
            .route_rules
            .iter()
            .map(|rule| {
                parents
                    .id("InternetGateway", &rule.internet_gateway_ref)
                    .map(|gateway| format!("{}=>{gateway}", rule.destination))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .with_parent(&vcn_id)
            .attr("vcnId", vcn_id.clone())
            .attr("routeRules", rules.join(",")))
    }
}

pub struct DhcpOptionAdapter;

#[async_trait]
impl PrimitiveAdapter for DhcpOptionAdapter {
    type Kind = DhcpOption;
    const RESOURCE_TYPE: ResourceType = ResourceType::DhcpOptions;

    fn parent_refs(&self, obj: &DhcpOption) -> Vec<ParentRef> {
        in_compartment(obj, [ParentRef::of::<Vcn>(&obj.spec.vcn_ref)])
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &DhcpOption,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let vcn_id = parents.id("Vcn", &obj.spec.vcn_ref)?;
        let server_type = if obj.spec.server_type.is_empty() {
            DEFAULT_DHCP_SERVER_TYPE.to_string()
        } else {
            obj.spec.server_type.clone()
        };
        Ok(CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .with_parent(&vcn_id)
            .attr("vcnId", vcn_id.clone())
            .attr("serverType", server_type)
            .attr("searchDomains", obj.spec.search_domains.join(",")))
    }
}

pub struct SecurityRuleSetAdapter;

#[async_trait]
impl PrimitiveAdapter for SecurityRuleSetAdapter {
    type Kind = SecurityRuleSet;
    const RESOURCE_TYPE: ResourceType = ResourceType::SecurityList;

    fn parent_refs(&self, obj: &SecurityRuleSet) -> Vec<ParentRef> {
        in_compartment(obj, [ParentRef::of::<Vcn>(&obj.spec.vcn_ref)])
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &SecurityRuleSet,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let vcn_id = parents.id("Vcn", &obj.spec.vcn_ref)?;
        Ok(CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .with_parent(&vcn_id)
            .attr("vcnId", vcn_id.clone())
            .attr("ingressRules", ingress_digest(&obj.spec.ingress_rules))
            .attr("egressRules", egress_digest(&obj.spec.egress_rules)))
    }
}

pub struct SubnetAdapter;

#[async_trait]
impl PrimitiveAdapter for SubnetAdapter {
    type Kind = Subnet;
    const RESOURCE_TYPE: ResourceType = ResourceType::Subnet;

    fn check(&self, obj: &Subnet) -> Result<(), ReconcileError> {
        validate_subnet(&obj.spec)
    }

    fn parent_refs(&self, obj: &Subnet) -> Vec<ParentRef> {
        let mut refs = vec![ParentRef::of::<Vcn>(&obj.spec.vcn_ref)];
        if let Some(route_table) = &obj.spec.route_table_ref {
            refs.push(ParentRef::of::<RouteTable>(route_table));
        }
        if let Some(dhcp) = &obj.spec.dhcp_option_ref {
            refs.push(ParentRef::of::<DhcpOption>(dhcp));
        }
        in_compartment(obj, refs)
    }

    fn parent_selectors(&self, obj: &Subnet) -> Vec<ParentSelector> {
        obj.spec
            .security_rule_set_selector
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| ParentSelector::of::<SecurityRuleSet>(s.clone()))
            .collect()
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &Subnet,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let vcn_id = parents.id("Vcn", &obj.spec.vcn_ref)?;
        let route_table_id = obj
            .spec
            .route_table_ref
            .iter()
            .cloned()
            .collect::<Vec<_>>();
        let dhcp_id = obj.spec.dhcp_option_ref.iter().cloned().collect::<Vec<_>>();
        Ok(CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .with_parent(&vcn_id)
            .attr("vcnId", vcn_id.clone())
            .attr("cidrBlock", obj.spec.cidr_block.clone())
            .attr("availabilityDomain", obj.spec.availability_domain.clone())
            .attr("routeTableId", ids_of(parents, "RouteTable", &route_table_id)?.join(","))
            .attr("dhcpOptionsId", ids_of(parents, "DhcpOption", &dhcp_id)?.join(","))
            .attr("securityListIds", parents.ids("SecurityRuleSet").join(","))
            .attr("prohibitPublicIp", obj.spec.prohibit_public_ip.to_string()))
    }
}
