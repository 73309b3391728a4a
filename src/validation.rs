// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Field validation for composite and primitive specs.
//!
//! The same checks run in two places: as the admission hook of the in-memory
//! store (a rejected write never reaches an adapter) and at the start of each
//! reconcile, where a failure is terminal for the key. The CRD schemas carry
//! the numeric ranges for the API server.

use crate::allocator::subnet_cidr;
use crate::constants::{CLOUD_API_GROUP, RESOURCE_API_GROUP};
use crate::crd::cloud::{ClusterSpec, ComputeSpec, LoadBalancerSpec, NetworkSpec};
use crate::crd::resources::{BackendSpec, ListenerSpec, SubnetSpec, VolumeSpec};
use crate::errors::ReconcileError;
use crate::store::memory::Validator;
use kube::api::{ApiResource, DynamicObject};
use serde::de::DeserializeOwned;
use std::sync::Arc;

fn port(field: &str, value: i32) -> Result<(), ReconcileError> {
    if (1..=65535).contains(&value) {
        Ok(())
    } else {
        Err(ReconcileError::validation(
            field,
            format!("{value} is outside [1, 65535]"),
        ))
    }
}

fn cidr16(field: &str, cidr: &str) -> Result<(), ReconcileError> {
    subnet_cidr(cidr, 0)
        .map(|_| ())
        .map_err(|_| ReconcileError::validation(field, format!("'{cidr}' is not an IPv4 /16")))
}

fn required(field: &str, value: &str) -> Result<(), ReconcileError> {
    if value.trim().is_empty() {
        Err(ReconcileError::validation(field, "must not be empty"))
    } else {
        Ok(())
    }
}

/// # Errors
///
/// Returns a validation error naming the offending field.
pub fn validate_network(spec: &NetworkSpec) -> Result<(), ReconcileError> {
    cidr16("spec.cidrBlock", &spec.cidr_block)
}

/// # Errors
///
/// Returns a validation error naming the offending field.
pub fn validate_compute(spec: &ComputeSpec) -> Result<(), ReconcileError> {
    required("spec.network", &spec.network)?;
    required("spec.image", &spec.image)?;
    if !(0..=1000).contains(&spec.replicas) {
        return Err(ReconcileError::validation(
            "spec.replicas",
            format!("{} is outside [0, 1000]", spec.replicas),
        ));
    }
    Ok(())
}

/// # Errors
///
/// Returns a validation error naming the offending field.
pub fn validate_load_balancer(spec: &LoadBalancerSpec) -> Result<(), ReconcileError> {
    required("spec.network", &spec.network)?;
    port("spec.backendPort", spec.backend_port)?;
    if spec.listeners.is_empty() {
        return Err(ReconcileError::validation(
            "spec.listeners",
            "at least one listener is required",
        ));
    }
    for (i, listener) in spec.listeners.iter().enumerate() {
        port(&format!("spec.listeners[{i}].port"), listener.port)?;
    }
    if spec.health_check.port != 0 {
        port("spec.healthCheck.port", spec.health_check.port)?;
    }
    for key in spec.label_weight_map.keys() {
        if !key.contains('=') {
            return Err(ReconcileError::validation(
                "spec.labelWeightMap",
                format!("key '{key}' is not of the form label=value"),
            ));
        }
    }
    Ok(())
}

/// # Errors
///
/// Returns a validation error naming the offending field.
pub fn validate_cluster(spec: &ClusterSpec) -> Result<(), ReconcileError> {
    required("spec.kubernetesVersion", &spec.kubernetes_version)?;
    if spec.is_managed {
        match spec.network.as_deref() {
            Some(network) if !network.trim().is_empty() => {}
            _ => {
                return Err(ReconcileError::validation(
                    "spec.network",
                    "a managed cluster requires an existing network",
                ))
            }
        }
    } else {
        if let Some(cidr) = &spec.network_cidr {
            cidr16("spec.networkCidr", cidr)?;
        }
        if spec.master.replicas < 1 {
            return Err(ReconcileError::validation(
                "spec.master.replicas",
                "a self-managed cluster needs at least one master",
            ));
        }
    }
    if spec.worker.replicas < 0 {
        return Err(ReconcileError::validation(
            "spec.worker.replicas",
            "must not be negative",
        ));
    }
    Ok(())
}

/// # Errors
///
/// Returns a validation error naming the offending field.
pub fn validate_subnet(spec: &SubnetSpec) -> Result<(), ReconcileError> {
    required("spec.vcnRef", &spec.vcn_ref)?;
    required("spec.availabilityDomain", &spec.availability_domain)
}

/// # Errors
///
/// Returns a validation error naming the offending field.
pub fn validate_backend(spec: &BackendSpec) -> Result<(), ReconcileError> {
    port("spec.port", spec.port)
}

/// # Errors
///
/// Returns a validation error naming the offending field.
pub fn validate_listener(spec: &ListenerSpec) -> Result<(), ReconcileError> {
    port("spec.port", spec.port)
}

/// # Errors
///
/// Returns a validation error naming the offending field.
pub fn validate_volume(spec: &VolumeSpec) -> Result<(), ReconcileError> {
    if (50..=32768).contains(&spec.size_in_gbs) {
        Ok(())
    } else {
        Err(ReconcileError::validation(
            "spec.sizeInGbs",
            format!("{} is outside [50, 32768]", spec.size_in_gbs),
        ))
    }
}

fn check<S: DeserializeOwned>(
    obj: &DynamicObject,
    validate: fn(&S) -> Result<(), ReconcileError>,
) -> Result<(), String> {
    let Some(spec) = obj.data.get("spec") else {
        return Err("spec is required".to_string());
    };
    let spec: S = serde_json::from_value(spec.clone()).map_err(|e| format!("spec: {e}"))?;
    validate(&spec).map_err(|e| e.to_string())
}

/// Admission check for a record of any kind; unknown kinds pass.
///
/// # Errors
///
/// Returns the reason the record is rejected.
pub fn validate_object(ar: &ApiResource, obj: &DynamicObject) -> Result<(), String> {
    match (ar.group.as_str(), ar.kind.as_str()) {
        (CLOUD_API_GROUP, "Network") => check(obj, validate_network),
        (CLOUD_API_GROUP, "Compute") => check(obj, validate_compute),
        (CLOUD_API_GROUP, "LoadBalancer") => check(obj, validate_load_balancer),
        (CLOUD_API_GROUP, "Cluster") => check(obj, validate_cluster),
        (RESOURCE_API_GROUP, "Subnet") => check(obj, validate_subnet),
        (RESOURCE_API_GROUP, "Backend") => check(obj, validate_backend),
        (RESOURCE_API_GROUP, "Listener") => check(obj, validate_listener),
        (RESOURCE_API_GROUP, "Volume") => check(obj, validate_volume),
        _ => Ok(()),
    }
}

/// [`validate_object`] as a store admission hook.
#[must_use]
pub fn admission_validator() -> Validator {
    Arc::new(validate_object)
}

#[cfg(test)]
#[path = "validation_tests.rs"]
mod validation_tests;
