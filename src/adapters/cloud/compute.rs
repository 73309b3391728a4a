// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `Compute` → one subnet per availability zone and `replicas` instances.
//!
//! Instance `<name>-<ordinal>` lands in subnet `ordinal % zones`. Scaling
//! down removes the highest ordinals, and any Backend pointing at a removed
//! instance is deleted before the instance itself.

use super::children::{self, Child, Owner};
use super::{placement_key, waiting, Placement};
use crate::adapters::{AdapterContext, CompositeAdapter, Progress, CONDITION_READY};
use crate::allocator::release;
use crate::constants::DEFAULT_SHAPE;
use crate::crd::cloud::Compute;
use crate::crd::resources::{Backend, Instance, InstanceSpec, Subnet};
use crate::crd::{Composite, OperatorState};
use crate::dependency::is_ready;
use crate::errors::ReconcileError;
use crate::labels::{COMPUTE_LABEL, NETWORK_LABEL, ORDINAL_LABEL};
use crate::store::{api_resource, to_typed, ObjectStore};
use crate::userdata;
use crate::validation::validate_compute;
use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use std::collections::BTreeSet;
use tracing::{debug, info};

#[must_use]
pub fn instance_name(compute: &str, ordinal: usize) -> String {
    format!("{compute}-{ordinal}")
}

/// Backends in `namespace` whose instance is one of `instances`, whoever owns them.
///
/// # Errors
///
/// Returns the store error.
pub async fn backends_of(
    store: &dyn ObjectStore,
    namespace: &str,
    instances: &BTreeSet<String>,
) -> Result<Vec<DynamicObject>, ReconcileError> {
    let mut found = Vec::new();
    for obj in store
        .list(&api_resource::<Backend>(), Some(namespace), None)
        .await?
    {
        let backend: Backend = to_typed(&obj)?;
        if instances.contains(&backend.spec.instance_ref) {
            found.push(obj);
        }
    }
    Ok(found)
}

/// Delete the Backends of `instances`; returns how many still exist.
async fn drain_backends(
    store: &dyn ObjectStore,
    namespace: &str,
    instances: &BTreeSet<String>,
) -> Result<usize, ReconcileError> {
    let backends = backends_of(store, namespace, instances).await?;
    for backend in &backends {
        children::delete(store, &api_resource::<Backend>(), backend).await?;
    }
    Ok(backends.len())
}

pub struct ComputeAdapter;

impl ComputeAdapter {
    fn instances(
        compute: &Compute,
        subnets: &[super::ZoneSubnet],
    ) -> Result<Vec<Child>, ReconcileError> {
        let name = compute.name_any();
        let replicas = usize::try_from(compute.spec.replicas).unwrap_or(0);
        let shape = if compute.spec.shape.is_empty() {
            DEFAULT_SHAPE.to_string()
        } else {
            compute.spec.shape.clone()
        };
        (0..replicas)
            .map(|ordinal| {
                let subnet = &subnets[ordinal % subnets.len()];
                Ok(Child::spec::<Instance>(
                    instance_name(&name, ordinal),
                    &InstanceSpec {
                        subnet_ref: subnet.name.clone(),
                        availability_domain: subnet.zone.clone(),
                        shape: shape.clone(),
                        image: compute.spec.image.clone(),
                        ssh_authorized_keys: compute.spec.ssh_authorized_keys.clone(),
                        user_data: compute.spec.user_data.as_deref().map(userdata::encode),
                        assign_public_ip: true,
                    },
                )?
                .labels(compute.labels())
                .label(COMPUTE_LABEL, &name)
                .label(ORDINAL_LABEL, ordinal.to_string())
                .label(NETWORK_LABEL, &compute.spec.network))
            })
            .collect()
    }
}

#[async_trait]
impl CompositeAdapter for ComputeAdapter {
    type Kind = Compute;

    fn children(&self) -> Vec<ApiResource> {
        vec![api_resource::<Subnet>(), api_resource::<Instance>()]
    }

    async fn synthesize(
        &self,
        ctx: &AdapterContext,
        compute: &mut Compute,
    ) -> Result<Progress, ReconcileError> {
        validate_compute(&compute.spec)?;
        let name = compute.name_any();
        let namespace = compute.namespace().unwrap_or_default();
        let owner = Owner::of(compute)?;
        let key = placement_key(compute);
        let network = compute.spec.network.clone();

        let Some(placement) =
            Placement::resolve(ctx, &namespace, &network, &key, compute.operator_status_mut()).await?
        else {
            return Ok(Progress::Pending);
        };

        let planned = placement.subnets(&name)?;
        let instances = Self::instances(compute, &planned)?;
        let subnets: Vec<Child> = planned
            .into_iter()
            .map(|s| s.child.label(COMPUTE_LABEL, &name))
            .collect();
        children::ensure_all(ctx.store.as_ref(), &owner, &subnets).await?;
        let stored = children::ensure_all(ctx.store.as_ref(), &owner, &instances).await?;

        // Scale-down: backends of vanishing instances go first
        let keep: BTreeSet<String> = stored.keys().cloned().collect();
        let orphans: BTreeSet<String> =
            children::owned(ctx.store.as_ref(), &owner, &api_resource::<Instance>())
                .await?
                .iter()
                .map(ResourceExt::name_any)
                .filter(|n| !keep.contains(n))
                .collect();
        let mut remaining = orphans.len();
        if !orphans.is_empty() {
            let backends = drain_backends(ctx.store.as_ref(), &namespace, &orphans).await?;
            if backends == 0 {
                remaining = children::prune(
                    ctx.store.as_ref(),
                    &owner,
                    &api_resource::<Instance>(),
                    &keep,
                )
                .await?;
            } else {
                debug!(compute = %name, backends = backends, "waiting for backends of removed instances");
            }
        }

        let ready = stored.values().filter(|obj| is_ready(obj)).count();
        let status = compute.operator_status_mut();
        if remaining > 0 {
            status.state = OperatorState::Created;
            waiting(
                status,
                "ScalingDown",
                format!("removing {remaining} instance(s)"),
            );
            return Ok(Progress::Pending);
        }
        if ready == stored.len() {
            if status.state != OperatorState::Processed {
                info!(compute = %name, replicas = ready, "all instances available");
            }
            status.state = OperatorState::Processed;
            status.set_condition(
                CONDITION_READY,
                "Available",
                &format!("{ready} instance(s) available"),
            );
            status.message = format!("{ready}/{} instances available", stored.len());
        } else {
            status.state = OperatorState::Created;
            waiting(
                status,
                "Provisioning",
                format!("{ready}/{} instances available", stored.len()),
            );
        }
        Ok(Progress::Done)
    }

    async fn teardown(
        &self,
        ctx: &AdapterContext,
        compute: &mut Compute,
    ) -> Result<Progress, ReconcileError> {
        let namespace = compute.namespace().unwrap_or_default();
        let owner = Owner::of(compute)?;
        let store = ctx.store.as_ref();

        let instances: BTreeSet<String> = children::owned(store, &owner, &api_resource::<Instance>())
            .await?
            .iter()
            .map(ResourceExt::name_any)
            .collect();
        let backends = drain_backends(store, &namespace, &instances).await?;
        if backends > 0 {
            waiting(
                compute.operator_status_mut(),
                "Deleting",
                format!("waiting for {backends} backend(s) to be removed"),
            );
            return Ok(Progress::Pending);
        }

        let stages = [vec![api_resource::<Instance>()], vec![api_resource::<Subnet>()]];
        if !children::teardown(store, &owner, &stages).await?.is_done() {
            waiting(
                compute.operator_status_mut(),
                "Deleting",
                "waiting for instances and subnets to be deleted",
            );
            return Ok(Progress::Pending);
        }

        release(store, &namespace, &compute.spec.network, &placement_key(compute)).await?;
        Ok(Progress::Done)
    }
}

#[cfg(test)]
#[path = "compute_tests.rs"]
mod compute_tests;
