// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Managed Kubernetes primitives: the control plane and its node pools.

use super::{ids_of, in_compartment};
use crate::adapters::{AdapterContext, ParentRef, Parents, PrimitiveAdapter};
use crate::cloud::{CloudRequest, ResourceType};
use crate::crd::resources::{CeCluster, NodePool, Subnet, Vcn};
use crate::errors::ReconcileError;
use async_trait::async_trait;
use kube::ResourceExt;

/// Number of subnets the managed control plane spreads its load balancers over.
pub const CE_LB_SUBNETS: usize = 2;

pub struct CeClusterAdapter;

#[async_trait]
impl PrimitiveAdapter for CeClusterAdapter {
    type Kind = CeCluster;
    const RESOURCE_TYPE: ResourceType = ResourceType::Cluster;

    fn check(&self, obj: &CeCluster) -> Result<(), ReconcileError> {
        if obj.spec.lb_subnet_refs.len() != CE_LB_SUBNETS {
            return Err(ReconcileError::validation(
                "spec.lbSubnetRefs",
                format!("exactly {CE_LB_SUBNETS} subnets are required"),
            ));
        }
        if obj.spec.kubernetes_version.is_empty() {
            return Err(ReconcileError::validation(
                "spec.kubernetesVersion",
                "must not be empty",
            ));
        }
        Ok(())
    }

    fn parent_refs(&self, obj: &CeCluster) -> Vec<ParentRef> {
        in_compartment(
            obj,
            std::iter::once(ParentRef::of::<Vcn>(&obj.spec.vcn_ref))
                .chain(obj.spec.lb_subnet_refs.iter().map(ParentRef::of::<Subnet>)),
        )
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &CeCluster,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        Ok(CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .attr("vcnId", parents.id("Vcn", &obj.spec.vcn_ref)?)
            .attr("kubernetesVersion", obj.spec.kubernetes_version.clone())
            .attr(
                "serviceLbSubnetIds",
                ids_of(parents, "Subnet", &obj.spec.lb_subnet_refs)?.join(","),
            )
            .attr("podsCidr", obj.spec.pods_cidr.clone().unwrap_or_default())
            .attr("servicesCidr", obj.spec.services_cidr.clone().unwrap_or_default()))
    }
}

pub struct NodePoolAdapter;

#[async_trait]
impl PrimitiveAdapter for NodePoolAdapter {
    type Kind = NodePool;
    const RESOURCE_TYPE: ResourceType = ResourceType::NodePool;

    fn check(&self, obj: &NodePool) -> Result<(), ReconcileError> {
        if obj.spec.subnet_refs.is_empty() {
            return Err(ReconcileError::validation(
                "spec.subnetRefs",
                "at least one subnet is required",
            ));
        }
        if obj.spec.quantity_per_subnet < 0 {
            return Err(ReconcileError::validation(
                "spec.quantityPerSubnet",
                "must not be negative",
            ));
        }
        Ok(())
    }

    fn parent_refs(&self, obj: &NodePool) -> Vec<ParentRef> {
        in_compartment(
            obj,
            std::iter::once(ParentRef::of::<CeCluster>(&obj.spec.ce_cluster_ref))
                .chain(obj.spec.subnet_refs.iter().map(ParentRef::of::<Subnet>)),
        )
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &NodePool,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let cluster_id = parents.id("CeCluster", &obj.spec.ce_cluster_ref)?;
        let mut request = CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .with_parent(&cluster_id)
            .attr("clusterId", cluster_id.clone())
            .attr("kubernetesVersion", obj.spec.kubernetes_version.clone())
            .attr("nodeShape", obj.spec.node_shape.clone())
            .attr("nodeImageName", obj.spec.node_image.clone())
            .attr("subnetIds", ids_of(parents, "Subnet", &obj.spec.subnet_refs)?.join(","))
            .attr("quantityPerSubnet", obj.spec.quantity_per_subnet.to_string());
        if let Some(key) = &obj.spec.ssh_public_key {
            request = request.sensitive("sshPublicKey", key.clone());
        }
        Ok(request)
    }
}
