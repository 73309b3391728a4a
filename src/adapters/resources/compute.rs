// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Compute primitives: instances and block volumes.

use super::in_compartment;
use crate::adapters::{AdapterContext, ParentRef, Parents, PrimitiveAdapter};
use crate::cloud::{CloudRequest, ResourceType};
use crate::crd::resources::{Instance, Subnet, Volume};
use crate::errors::ReconcileError;
use crate::validation::validate_volume;
use async_trait::async_trait;
use kube::ResourceExt;

/// Instances are launched into a subnet; user-data is write-only.
pub struct InstanceAdapter;

#[async_trait]
impl PrimitiveAdapter for InstanceAdapter {
    type Kind = Instance;
    const RESOURCE_TYPE: ResourceType = ResourceType::Instance;

    fn check(&self, obj: &Instance) -> Result<(), ReconcileError> {
        if obj.spec.shape.is_empty() {
            return Err(ReconcileError::validation("spec.shape", "must not be empty"));
        }
        if obj.spec.image.is_empty() {
            return Err(ReconcileError::validation("spec.image", "must not be empty"));
        }
        Ok(())
    }

    fn parent_refs(&self, obj: &Instance) -> Vec<ParentRef> {
        in_compartment(obj, [ParentRef::of::<Subnet>(&obj.spec.subnet_ref)])
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &Instance,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let subnet_id = parents.id("Subnet", &obj.spec.subnet_ref)?;
        let mut request = CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .with_parent(&subnet_id)
            .attr("subnetId", subnet_id.clone())
            .attr("availabilityDomain", obj.spec.availability_domain.clone())
            .attr("shape", obj.spec.shape.clone())
            .attr("image", obj.spec.image.clone())
            .attr("sshAuthorizedKeys", obj.spec.ssh_authorized_keys.join("\n"))
            .attr("assignPublicIp", obj.spec.assign_public_ip.to_string());
        if let Some(user_data) = &obj.spec.user_data {
            request = request.sensitive("userData", user_data.clone());
        }
        Ok(request)
    }
}

pub struct VolumeAdapter;

#[async_trait]
impl PrimitiveAdapter for VolumeAdapter {
    type Kind = Volume;
    const RESOURCE_TYPE: ResourceType = ResourceType::Volume;

    fn check(&self, obj: &Volume) -> Result<(), ReconcileError> {
        validate_volume(&obj.spec)
    }

    fn parent_refs(&self, obj: &Volume) -> Vec<ParentRef> {
        in_compartment(
            obj,
            obj.spec
                .instance_ref
                .iter()
                .map(ParentRef::of::<Instance>),
        )
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &Volume,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let instance_id = match &obj.spec.instance_ref {
            Some(instance) => parents.id("Instance", instance)?,
            None => String::new(),
        };
        Ok(CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .attr("availabilityDomain", obj.spec.availability_domain.clone())
            .attr("sizeInGBs", obj.spec.size_in_gbs.to_string())
            .attr("instanceId", instance_id))
    }
}
