// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `Cpod` → a subnet in the first zone and one instance running the containers.

use super::children::{self, Child, Owner};
use super::{placement_key, waiting, Placement};
use crate::adapters::{AdapterContext, CompositeAdapter, Progress, CONDITION_READY};
use crate::allocator::release;
use crate::constants::DEFAULT_SHAPE;
use crate::crd::cloud::Cpod;
use crate::crd::resources::{Instance, InstanceSpec, Subnet};
use crate::crd::{Composite, OperatorState};
use crate::dependency::is_ready;
use crate::errors::ReconcileError;
use crate::labels::{CPOD_LABEL, NETWORK_LABEL};
use crate::store::api_resource;
use crate::userdata::{cpod_script, encode};
use async_trait::async_trait;
use kube::api::ApiResource;
use kube::ResourceExt;

pub struct CpodAdapter;

#[async_trait]
impl CompositeAdapter for CpodAdapter {
    type Kind = Cpod;

    fn children(&self) -> Vec<ApiResource> {
        vec![api_resource::<Subnet>(), api_resource::<Instance>()]
    }

    async fn synthesize(
        &self,
        ctx: &AdapterContext,
        cpod: &mut Cpod,
    ) -> Result<Progress, ReconcileError> {
        if cpod.spec.containers.is_empty() {
            return Err(ReconcileError::validation(
                "spec.containers",
                "at least one container is required",
            ));
        }
        let name = cpod.name_any();
        let namespace = cpod.namespace().unwrap_or_default();
        let owner = Owner::of(cpod)?;
        let key = placement_key(cpod);
        let network = cpod.spec.network.clone();

        let Some(mut placement) =
            Placement::resolve(ctx, &namespace, &network, &key, cpod.operator_status_mut()).await?
        else {
            return Ok(Progress::Pending);
        };
        placement.zones.truncate(1);
        let Some(subnet) = placement.subnets(&name)?.into_iter().next() else {
            return Err(ReconcileError::Transient(format!("no zone for cpod {name}")));
        };

        let instance = Child::spec::<Instance>(
            &name,
            &InstanceSpec {
                subnet_ref: subnet.name.clone(),
                availability_domain: subnet.zone.clone(),
                shape: if cpod.spec.shape.is_empty() {
                    DEFAULT_SHAPE.to_string()
                } else {
                    cpod.spec.shape.clone()
                },
                image: cpod.spec.image.clone(),
                ssh_authorized_keys: cpod.spec.ssh_authorized_keys.clone(),
                user_data: Some(encode(&cpod_script(&cpod.spec.containers))),
                assign_public_ip: true,
            },
        )?
        .label(CPOD_LABEL, &name)
        .label(NETWORK_LABEL, &network);

        children::ensure(ctx.store.as_ref(), &owner, &subnet.child.label(CPOD_LABEL, &name)).await?;
        let stored = children::ensure(ctx.store.as_ref(), &owner, &instance).await?;

        let container_count = cpod.spec.containers.len();
        let status = cpod.operator_status_mut();
        if is_ready(&stored) {
            status.state = OperatorState::Processed;
            status.set_condition(
                CONDITION_READY,
                "Available",
                &format!("{} container(s) scheduled", container_count),
            );
            status.message = format!("instance {name} is running");
        } else {
            status.state = OperatorState::Created;
            waiting(status, "Provisioning", format!("waiting for instance {name}"));
        }
        Ok(Progress::Done)
    }

    async fn teardown(
        &self,
        ctx: &AdapterContext,
        cpod: &mut Cpod,
    ) -> Result<Progress, ReconcileError> {
        let namespace = cpod.namespace().unwrap_or_default();
        let owner = Owner::of(cpod)?;
        let stages = [vec![api_resource::<Instance>()], vec![api_resource::<Subnet>()]];
        if !children::teardown(ctx.store.as_ref(), &owner, &stages)
            .await?
            .is_done()
        {
            waiting(
                cpod.operator_status_mut(),
                "Deleting",
                "waiting for the instance and subnet to be deleted",
            );
            return Ok(Progress::Pending);
        }
        release(ctx.store.as_ref(), &namespace, &cpod.spec.network, &placement_key(cpod)).await?;
        Ok(Progress::Done)
    }
}

#[cfg(test)]
#[path = "cpod_tests.rs"]
mod cpod_tests;
