// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Identity primitives: compartments, policies and dynamic groups.

use super::in_compartment;
use crate::adapters::{AdapterContext, ParentRef, Parents, PrimitiveAdapter};
use crate::cloud::{CloudRequest, ResourceType};
use crate::crd::resources::{Compartment, DynamicGroup, Policy};
use crate::errors::ReconcileError;
use async_trait::async_trait;
use kube::ResourceExt;

/// `Compartment` lives directly under the tenancy and has no parents.
pub struct CompartmentAdapter;

#[async_trait]
impl PrimitiveAdapter for CompartmentAdapter {
    type Kind = Compartment;
    const RESOURCE_TYPE: ResourceType = ResourceType::Compartment;

    fn parent_refs(&self, _obj: &Compartment) -> Vec<ParentRef> {
        Vec::new()
    }

    async fn request(
        &self,
        ctx: &AdapterContext,
        obj: &Compartment,
        _parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let description = if obj.spec.description.is_empty() {
            format!("Compartment of namespace {}", obj.name_any())
        } else {
            obj.spec.description.clone()
        };
        Ok(CloudRequest::new(ctx.cloud.tenancy_id(), &obj.name_any())
            .attr("description", description))
    }
}

pub struct PolicyAdapter;

#[async_trait]
impl PrimitiveAdapter for PolicyAdapter {
    type Kind = Policy;
    const RESOURCE_TYPE: ResourceType = ResourceType::Policy;

    fn check(&self, obj: &Policy) -> Result<(), ReconcileError> {
        if obj.spec.statements.iter().all(|s| s.trim().is_empty()) {
            return Err(ReconcileError::validation(
                "spec.statements",
                "at least one statement is required",
            ));
        }
        Ok(())
    }

    fn parent_refs(&self, obj: &Policy) -> Vec<ParentRef> {
        in_compartment(obj, [])
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &Policy,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        Ok(CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .attr("description", obj.spec.description.clone())
            .attr("statements", obj.spec.statements.join("\n")))
    }
}

/// Dynamic groups are tenancy-wide; the namespace compartment is still a
/// parent so its rule can refer to it.
pub struct DynamicGroupAdapter;

#[async_trait]
impl PrimitiveAdapter for DynamicGroupAdapter {
    type Kind = DynamicGroup;
    const RESOURCE_TYPE: ResourceType = ResourceType::DynamicGroup;

    fn check(&self, obj: &DynamicGroup) -> Result<(), ReconcileError> {
        if obj.spec.matching_rule.trim().is_empty() {
            return Err(ReconcileError::validation(
                "spec.matchingRule",
                "must not be empty",
            ));
        }
        Ok(())
    }

    fn parent_refs(&self, obj: &DynamicGroup) -> Vec<ParentRef> {
        in_compartment(obj, [])
    }

    async fn request(
        &self,
        ctx: &AdapterContext,
        obj: &DynamicGroup,
        _parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        Ok(CloudRequest::new(ctx.cloud.tenancy_id(), &obj.name_any())
            .attr("description", obj.spec.description.clone())
            .attr("matchingRule", obj.spec.matching_rule.clone()))
    }
}
