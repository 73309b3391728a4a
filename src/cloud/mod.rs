// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cloud provider client contract.
//!
//! Resource adapters talk to the provider through [`CloudApi`]. Requests are
//! typed by [`ResourceType`] and carry flat string attributes; the provider
//! echoes the object back as a [`CloudResource`] whose lifecycle state drives
//! the primitive state machine.
//!
//! - [`memory::MemoryCloud`] simulates provisioning and termination and
//!   records every call
//! - [`rest::RestCloud`] speaks JSON to a provider gateway

pub mod memory;
pub mod rest;

use crate::crd::CloudResource;
use crate::errors::CloudError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Cloud object types handled by resource adapters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Compartment,
    Policy,
    DynamicGroup,
    Vcn,
    InternetGateway,
    RouteTable,
    DhcpOptions,
    SecurityList,
    Subnet,
    Instance,
    Volume,
    LoadBalancer,
    BackendSet,
    Backend,
    Listener,
    Certificate,
    AutonomousDatabase,
    Cluster,
    NodePool,
}

impl ResourceType {
    /// REST collection path of the type.
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            ResourceType::Compartment => "compartments",
            ResourceType::Policy => "policies",
            ResourceType::DynamicGroup => "dynamicGroups",
            ResourceType::Vcn => "vcns",
            ResourceType::InternetGateway => "internetGateways",
            ResourceType::RouteTable => "routeTables",
            ResourceType::DhcpOptions => "dhcps",
            ResourceType::SecurityList => "securityLists",
            ResourceType::Subnet => "subnets",
            ResourceType::Instance => "instances",
            ResourceType::Volume => "volumes",
            ResourceType::LoadBalancer => "loadBalancers",
            ResourceType::BackendSet => "backendSets",
            ResourceType::Backend => "backends",
            ResourceType::Listener => "listeners",
            ResourceType::Certificate => "certificates",
            ResourceType::AutonomousDatabase => "autonomousDatabases",
            ResourceType::Cluster => "clusters",
            ResourceType::NodePool => "nodePools",
        }
    }

    /// Short lower-case name used in identifiers.
    #[must_use]
    pub fn short_name(self) -> &'static str {
        match self {
            ResourceType::Compartment => "compartment",
            ResourceType::Policy => "policy",
            ResourceType::DynamicGroup => "dynamicgroup",
            ResourceType::Vcn => "vcn",
            ResourceType::InternetGateway => "internetgateway",
            ResourceType::RouteTable => "routetable",
            ResourceType::DhcpOptions => "dhcpoptions",
            ResourceType::SecurityList => "securitylist",
            ResourceType::Subnet => "subnet",
            ResourceType::Instance => "instance",
            ResourceType::Volume => "volume",
            ResourceType::LoadBalancer => "loadbalancer",
            ResourceType::BackendSet => "backendset",
            ResourceType::Backend => "backend",
            ResourceType::Listener => "listener",
            ResourceType::Certificate => "certificate",
            ResourceType::AutonomousDatabase => "autonomousdatabase",
            ResourceType::Cluster => "cluster",
            ResourceType::NodePool => "nodepool",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Desired state of a cloud object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudRequest {
    pub compartment_id: String,

    pub display_name: String,

    /// Containing object (VCN of a subnet, load balancer of a listener, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Flat attributes compared against the observed object for compliance
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Write-only values (keys, passwords); sent but never compared or echoed
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sensitive: BTreeMap<String, String>,
}

impl CloudRequest {
    #[must_use]
    pub fn new(compartment_id: &str, display_name: &str) -> Self {
        Self {
            compartment_id: compartment_id.to_string(),
            display_name: display_name.to_string(),
            parent_id: None,
            attributes: BTreeMap::new(),
            sensitive: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }

    /// Set an attribute; empty values are skipped.
    #[must_use]
    pub fn attr(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.attributes.insert(key.to_string(), value);
        }
        self
    }

    /// Set a write-only value.
    #[must_use]
    pub fn sensitive(mut self, key: &str, value: impl Into<String>) -> Self {
        self.sensitive.insert(key.to_string(), value.into());
        self
    }

    /// `true` when every requested attribute is reflected by `observed`.
    #[must_use]
    pub fn is_satisfied_by(&self, observed: &CloudResource) -> bool {
        self.attributes
            .iter()
            .all(|(k, v)| observed.attributes.get(k) == Some(v))
            && observed.display_name == self.display_name
    }
}

/// Typed client of the cloud provider.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Create an object; it usually starts out `PROVISIONING`.
    async fn create(
        &self,
        resource_type: ResourceType,
        request: &CloudRequest,
    ) -> Result<CloudResource, CloudError>;

    async fn get(&self, resource_type: ResourceType, id: &str)
        -> Result<CloudResource, CloudError>;

    /// Apply attribute changes to an existing object.
    async fn update(
        &self,
        resource_type: ResourceType,
        id: &str,
        request: &CloudRequest,
    ) -> Result<CloudResource, CloudError>;

    /// Start termination. `NotFound` means it is already gone.
    async fn delete(&self, resource_type: ResourceType, id: &str) -> Result<(), CloudError>;

    /// Availability domains visible to a compartment.
    async fn availability_domains(&self, compartment_id: &str) -> Result<Vec<String>, CloudError>;

    /// Admin kubeconfig of a managed cluster.
    async fn cluster_kubeconfig(&self, cluster_id: &str) -> Result<String, CloudError>;

    /// Root compartment of the account.
    fn tenancy_id(&self) -> &str;
}
