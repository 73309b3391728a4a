// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Composite adapters.
//!
//! Each adapter turns one composite record into a bounded set of child
//! records in the store. Children are addressed by deterministic names and
//! carry a controller ownerReference back to the composite, so a reconcile
//! only ever needs store state to decide what to create, update or prune.

pub mod children;
pub mod cluster;
pub mod compute;
pub mod cpod;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod loadbalancer;
pub mod network;
pub mod security;

use self::children::Child;
use super::AdapterContext;
use crate::allocator::{allocate, allocation_key, subnet_cidr, subnet_octet};
use crate::constants::MAX_AVAILABILITY_ZONES;
use crate::crd::cloud::Network;
use crate::crd::resources::{Compartment, Subnet, SubnetSpec};
use crate::crd::{LabelSelector, OperatorState, OperatorStatus};
use crate::dependency::{is_deleting, resource_id};
use crate::errors::{ReconcileError, StoreError};
use crate::labels::NETWORK_LABEL;
use crate::store::{api_resource, to_typed};
use kube::ResourceExt;
use rand::seq::SliceRandom;
use tracing::{debug, info};

pub use cluster::ClusterAdapter;
pub use compute::ComputeAdapter;
pub use cpod::CpodAdapter;
pub use loadbalancer::LoadBalancerAdapter;
pub use network::NetworkAdapter;
pub use security::SecurityAdapter;

/// Availability zones of a composite, chosen once.
///
/// The first call shuffles the compartment's zone list into
/// `status.availabilityZones`; later calls return it untouched. `None` while
/// the namespace compartment has no cloud id yet.
///
/// # Errors
///
/// Returns a validation error for more than [`MAX_AVAILABILITY_ZONES`]
/// zones, a transient error for none, or the store/cloud error.
pub async fn availability_zones(
    ctx: &AdapterContext,
    namespace: &str,
    status: &mut OperatorStatus,
) -> Result<Option<Vec<String>>, ReconcileError> {
    if !status.availability_zones.is_empty() {
        return Ok(Some(status.availability_zones.clone()));
    }

    let compartment = match ctx
        .store
        .get(&api_resource::<Compartment>(), Some(namespace), namespace)
        .await
    {
        Ok(obj) => obj,
        Err(StoreError::NotFound { .. }) => {
            debug!(namespace = %namespace, "namespace compartment not found yet");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let compartment_id = resource_id(&compartment);
    if compartment_id.is_empty() {
        return Ok(None);
    }

    let mut zones = ctx.cloud.availability_domains(&compartment_id).await?;
    if zones.len() > MAX_AVAILABILITY_ZONES {
        return Err(ReconcileError::validation(
            "status.availabilityZones",
            format!(
                "{} availability zones, at most {MAX_AVAILABILITY_ZONES} are supported",
                zones.len()
            ),
        ));
    }
    if zones.is_empty() {
        return Err(ReconcileError::Transient(format!(
            "compartment {compartment_id} reports no availability zones"
        )));
    }
    zones.shuffle(&mut rand::thread_rng());
    info!(namespace = %namespace, zones = ?zones, "chose availability zone order");
    status.availability_zones.clone_from(&zones);
    Ok(Some(zones))
}

/// The Network a composite is placed in, once its children exist.
///
/// `None` when it is missing, being deleted, or not yet `Created`.
///
/// # Errors
///
/// Returns the store error.
pub async fn placement_network(
    ctx: &AdapterContext,
    namespace: &str,
    name: &str,
) -> Result<Option<Network>, ReconcileError> {
    let obj = match ctx
        .store
        .get(&api_resource::<Network>(), Some(namespace), name)
        .await
    {
        Ok(obj) => obj,
        Err(StoreError::NotFound { .. }) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if is_deleting(&obj) {
        return Ok(None);
    }
    let network: Network = to_typed(&obj)?;
    let created = network
        .status
        .as_ref()
        .is_some_and(|s| matches!(s.operator.state, OperatorState::Created | OperatorState::Processed));
    Ok(created.then_some(network))
}

/// Where a composite's subnets go: its network, zone order and octet base.
#[derive(Clone, Debug)]
pub struct Placement {
    pub network: Network,
    pub zones: Vec<String>,
    pub base: u8,
}

impl Placement {
    /// Resolve the network, the zone order and the subnet allocation of a
    /// composite. `None` (with a waiting condition in `status`) until the
    /// network and the namespace compartment are usable.
    ///
    /// # Errors
    ///
    /// Returns allocation, zone lookup or store errors.
    pub async fn resolve(
        ctx: &AdapterContext,
        namespace: &str,
        network: &str,
        allocation: &str,
        status: &mut OperatorStatus,
    ) -> Result<Option<Self>, ReconcileError> {
        let Some(found) = placement_network(ctx, namespace, network).await? else {
            waiting(status, "NetworkNotReady", format!("waiting for network {network}"));
            return Ok(None);
        };
        let Some(zones) = availability_zones(ctx, namespace, status).await? else {
            waiting(
                status,
                "CompartmentNotReady",
                format!("waiting for compartment {namespace}"),
            );
            return Ok(None);
        };
        let base = allocate(ctx.store.as_ref(), namespace, network, allocation).await?;
        Ok(Some(Self {
            network: found,
            zones,
            base,
        }))
    }

    /// One /24 per zone, named `<prefix>-<octet>-ad<n>`, wired to the
    /// network's route table, DHCP options and rule sets.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the allocation cannot hold every zone.
    pub fn subnets(&self, prefix: &str) -> Result<Vec<ZoneSubnet>, ReconcileError> {
        let network = self.network.name_any();
        self.zones
            .iter()
            .enumerate()
            .map(|(index, zone)| {
                let octet = subnet_octet(self.base, index)?;
                let name = format!("{prefix}-{octet}-ad{}", index + 1);
                let child = Child::spec::<Subnet>(
                    &name,
                    &SubnetSpec {
                        vcn_ref: network.clone(),
                        cidr_block: subnet_cidr(&self.network.spec.cidr_block, octet)?,
                        availability_domain: zone.clone(),
                        route_table_ref: Some(network.clone()),
                        dhcp_option_ref: Some(network.clone()),
                        security_rule_set_selector: Some(LabelSelector::from_labels([(
                            NETWORK_LABEL,
                            network.as_str(),
                        )])),
                        prohibit_public_ip: false,
                    },
                )?
                .label(NETWORK_LABEL, &network);
                Ok(ZoneSubnet {
                    name,
                    zone: zone.clone(),
                    child,
                })
            })
            .collect()
    }
}

/// A planned subnet and the zone it sits in.
#[derive(Clone, Debug)]
pub struct ZoneSubnet {
    pub name: String,
    pub zone: String,
    pub child: Child,
}

/// Allocation key of a composite on its network.
#[must_use]
pub fn placement_key<K: kube::Resource<DynamicType = ()>>(obj: &K) -> String {
    allocation_key(&K::kind(&()), &obj.meta().name.clone().unwrap_or_default())
}

/// Record a wait in the composite's status.
pub(crate) fn waiting(status: &mut OperatorStatus, reason: &str, message: impl Into<String>) {
    let message = message.into();
    status.set_condition(super::CONDITION_READY, reason, &message);
    status.message = message;
}
