// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Subnet octet allocation on a Network.
//!
//! Every composite placed in a network owns one allocation: a multiple of 10
//! in `[10, 250]`, recorded in `Network.status.subnetAllocationMap` under
//! `<kind>/<name>`. Its per-AZ subnets use the third octets `base + 1`,
//! `base + 2`, ... so an allocation covers at most nine AZs.
//!
//! The map is shared by every composite in the network. Writers read the
//! Network fresh from the store and write it back under its resourceVersion;
//! a conflict means somebody else allocated first, so the read is retried.

use crate::constants::{
    CAS_RETRY_LIMIT, MAX_AVAILABILITY_ZONES, SUBNET_OCTET_MAX, SUBNET_OCTET_MIN,
    SUBNET_OCTET_STRIDE,
};
use crate::crd::cloud::Network;
use crate::errors::{ReconcileError, StoreError};
use crate::store::{api_resource, to_dynamic, to_typed, ObjectStore};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Allocation key of a composite.
#[must_use]
pub fn allocation_key(kind: &str, name: &str) -> String {
    format!("{kind}/{name}")
}

/// First free multiple of the stride in `[min, max]`, or `None` when exhausted.
#[must_use]
pub fn first_free_octet(map: &BTreeMap<String, u8>) -> Option<u8> {
    (SUBNET_OCTET_MIN..=SUBNET_OCTET_MAX)
        .step_by(usize::from(SUBNET_OCTET_STRIDE))
        .find(|candidate| !map.values().any(|used| used == candidate))
}

/// Third octet of the subnet in AZ `index` for an allocation `base`.
///
/// # Errors
///
/// Returns a validation error when the AZ index does not fit in one stride
/// or the octet would leave the valid range.
pub fn subnet_octet(base: u8, index: usize) -> Result<u8, ReconcileError> {
    if index >= MAX_AVAILABILITY_ZONES {
        return Err(ReconcileError::validation(
            "status.availabilityZones",
            format!("at most {MAX_AVAILABILITY_ZONES} availability zones are supported"),
        ));
    }
    let octet = usize::from(base) + index + 1;
    u8::try_from(octet)
        .ok()
        .filter(|o| *o < 255)
        .ok_or_else(|| {
            ReconcileError::validation(
                "status.subnetAllocationMap",
                format!("allocation {base} leaves no room for availability zone {index}"),
            )
        })
}

/// `/24` inside a `/16` network for a given third octet.
///
/// # Errors
///
/// Returns a validation error when the network CIDR is not an IPv4 `/16`.
pub fn subnet_cidr(network_cidr: &str, octet: u8) -> Result<String, ReconcileError> {
    let invalid = || ReconcileError::validation("spec.cidrBlock", format!("'{network_cidr}' is not a /16"));
    let (address, prefix) = network_cidr.split_once('/').ok_or_else(invalid)?;
    if prefix != "16" {
        return Err(invalid());
    }
    let octets: Vec<&str> = address.split('.').collect();
    if octets.len() != 4 || octets.iter().any(|o| o.parse::<u8>().is_err()) {
        return Err(invalid());
    }
    Ok(format!("{}.{}.{octet}.0/24", octets[0], octets[1]))
}

/// Allocate (or return the existing) base octet for `key` in a network.
///
/// # Errors
///
/// - `Exhausted` when every slot is taken
/// - `Conflict` when the compare-and-set keeps losing
/// - store errors, including `NotFound` for a missing network
pub async fn allocate(
    store: &dyn ObjectStore,
    namespace: &str,
    network: &str,
    key: &str,
) -> Result<u8, ReconcileError> {
    let ar = api_resource::<Network>();
    for attempt in 1..=CAS_RETRY_LIMIT {
        let current: Network = to_typed(&store.get(&ar, Some(namespace), network).await?)?;
        let mut status = current.status.clone().unwrap_or_default();
        if let Some(existing) = status.subnet_allocation_map.get(key) {
            return Ok(*existing);
        }
        let Some(octet) = first_free_octet(&status.subnet_allocation_map) else {
            return Err(ReconcileError::Exhausted(format!(
                "network {namespace}/{network} has no free subnet range for {key}"
            )));
        };
        status.subnet_allocation_map.insert(key.to_string(), octet);

        let mut next = current;
        next.status = Some(status);
        match store.update(&ar, &to_dynamic(&next)?).await {
            Ok(_) => {
                info!(network = %network, key = %key, octet = octet, "allocated subnet range");
                return Ok(octet);
            }
            Err(StoreError::Conflict { .. }) => {
                debug!(network = %network, key = %key, attempt = attempt, "allocation raced, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ReconcileError::Conflict(format!(
        "allocation of {key} in {namespace}/{network} kept conflicting"
    )))
}

/// Release the allocation of `key`. A missing network or key is not an error.
///
/// # Errors
///
/// Returns `Conflict` when the compare-and-set keeps losing, or a store error.
pub async fn release(
    store: &dyn ObjectStore,
    namespace: &str,
    network: &str,
    key: &str,
) -> Result<(), ReconcileError> {
    let ar = api_resource::<Network>();
    for _ in 0..CAS_RETRY_LIMIT {
        let current: Network = match store.get(&ar, Some(namespace), network).await {
            Ok(obj) => to_typed(&obj)?,
            Err(StoreError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut status = current.status.clone().unwrap_or_default();
        if status.subnet_allocation_map.remove(key).is_none() {
            return Ok(());
        }
        let mut next = current;
        next.status = Some(status);
        match store.update(&ar, &to_dynamic(&next)?).await {
            Ok(_) => {
                info!(network = %network, key = %key, "released subnet range");
                return Ok(());
            }
            Err(StoreError::Conflict { .. }) => {}
            Err(StoreError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
    Err(ReconcileError::Conflict(format!(
        "release of {key} in {namespace}/{network} kept conflicting"
    )))
}

#[cfg(test)]
#[path = "allocator_tests.rs"]
mod allocator_tests;
