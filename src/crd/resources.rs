// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Primitive kinds: one record per cloud object.
//!
//! Every primitive carries [`ResourceStatus`] and declares its parents either by
//! name (`*Ref` fields, resolved by store lookup) or by label selector. The
//! namespace's `Compartment` record is an implicit named parent of every
//! top-level cloud object.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: oci.cloudplane.io/v1alpha1
//! kind: Subnet
//! metadata:
//!   name: c-11-ad1
//!   namespace: team-a
//! spec:
//!   vcnRef: net-a
//!   cidrBlock: 10.0.11.0/24
//!   availabilityDomain: AD-1
//! ```

use super::{LabelSelector, ResourceStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// Identity
// ============================================================================

/// `Compartment` is the top-level isolation container for a namespace.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "Compartment",
    namespaced,
    doc = "Compartment is the cloud isolation container named after a namespace."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct CompartmentSpec {
    /// Free-form description stored on the cloud side
    #[serde(default)]
    pub description: String,
}

/// `Policy` is a set of IAM statements scoped to the namespace compartment.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "Policy",
    plural = "policies",
    namespaced,
    doc = "Policy is a set of IAM policy statements."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    #[serde(default)]
    pub description: String,

    /// Policy statements, in order
    pub statements: Vec<String>,
}

/// `DynamicGroup` groups instances by a matching rule for IAM purposes.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "DynamicGroup",
    namespaced,
    doc = "DynamicGroup matches instances by rule so they can be granted IAM policies."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct DynamicGroupSpec {
    #[serde(default)]
    pub description: String,

    /// Matching rule, e.g. `instance.compartment.id = '...'`
    pub matching_rule: String,
}

// ============================================================================
// Networking
// ============================================================================

/// `Vcn` is a virtual cloud network.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "Vcn",
    namespaced,
    doc = "Vcn is a virtual cloud network."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct VcnSpec {
    /// CIDR block, e.g. `10.0.0.0/16`
    pub cidr_block: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_label: Option<String>,
}

/// `InternetGateway` connects a VCN to the internet.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "InternetGateway",
    namespaced,
    doc = "InternetGateway gives a VCN a route to the internet."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct InternetGatewaySpec {
    /// Name of the parent `Vcn`
    pub vcn_ref: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A single route rule.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    /// Destination CIDR
    pub destination: String,

    /// Name of the `InternetGateway` traffic is sent to
    pub internet_gateway_ref: String,
}

/// `RouteTable` holds the route rules of a VCN.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "RouteTable",
    namespaced,
    doc = "RouteTable holds route rules for subnets of a VCN."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct RouteTableSpec {
    pub vcn_ref: String,

    #[serde(default)]
    pub route_rules: Vec<RouteRule>,
}

/// `DhcpOption` configures DNS resolution for a VCN.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "DhcpOption",
    namespaced,
    doc = "DhcpOption configures DHCP/DNS settings for subnets of a VCN."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct DhcpOptionSpec {
    pub vcn_ref: String,

    /// `VcnLocalPlusInternet` or `CustomDnsServer`
    #[serde(default)]
    pub server_type: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_domains: Vec<String>,
}

/// Ingress rule of a security rule set.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    /// `tcp`, `udp`, `icmp` or `all`
    pub protocol: String,

    /// Source CIDR
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_min: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_max: Option<i32>,
}

/// Egress rule of a security rule set.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EgressRule {
    pub protocol: String,

    /// Destination CIDR
    pub destination: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_min: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_max: Option<i32>,
}

/// `SecurityRuleSet` is a stateful security list attached to subnets.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "SecurityRuleSet",
    namespaced,
    doc = "SecurityRuleSet is a list of ingress and egress rules for subnets of a VCN."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct SecurityRuleSetSpec {
    pub vcn_ref: String,

    #[serde(default)]
    pub ingress_rules: Vec<IngressRule>,

    #[serde(default)]
    pub egress_rules: Vec<EgressRule>,
}

/// `Subnet` is a /24 inside a VCN, bound to one availability domain.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "Subnet",
    namespaced,
    doc = "Subnet is an address range of a VCN in a single availability domain."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    pub vcn_ref: String,

    pub cidr_block: String,

    pub availability_domain: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_option_ref: Option<String>,

    /// Security rule sets attached to the subnet, selected by label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_rule_set_selector: Option<LabelSelector>,

    #[serde(default)]
    pub prohibit_public_ip: bool,
}

// ============================================================================
// Compute
// ============================================================================

/// `Instance` is a virtual machine.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "Instance",
    namespaced,
    doc = "Instance is a virtual machine launched into a subnet."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    pub subnet_ref: String,

    pub availability_domain: String,

    pub shape: String,

    /// Image name or identifier
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_authorized_keys: Vec<String>,

    /// Base64-encoded user-data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,

    #[serde(default = "default_true")]
    pub assign_public_ip: bool,
}

/// `Volume` is a block volume, optionally attached to an instance.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "Volume",
    namespaced,
    doc = "Volume is a block volume optionally attached to an instance."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    pub availability_domain: String,

    #[schemars(range(min = 50, max = 32768))]
    pub size_in_gbs: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_ref: Option<String>,
}

// ============================================================================
// Load Balancing
// ============================================================================

/// `LoadBalancer` is the cloud load balancer object itself.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "LoadBalancer",
    namespaced,
    doc = "LoadBalancer is a cloud load balancer placed in one or more subnets."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    /// Bandwidth shape, e.g. `100Mbps`
    pub shape: String,

    pub subnet_refs: Vec<String>,

    #[serde(default)]
    pub is_private: bool,
}

/// Health checker of a backend set.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthChecker {
    pub protocol: String,

    pub port: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url_path: String,
}

/// `BackendSet` groups backends under one balancing policy.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "BackendSet",
    namespaced,
    doc = "BackendSet is a group of backends sharing a policy and a health check."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct BackendSetSpec {
    pub load_balancer_ref: String,

    /// `ROUND_ROBIN`, `LEAST_CONNECTIONS` or `IP_HASH`
    pub policy: String,

    pub health_checker: HealthChecker,
}

/// `Backend` is one instance behind a backend set.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "Backend",
    namespaced,
    doc = "Backend places an instance behind a backend set."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    pub load_balancer_ref: String,

    pub backend_set_ref: String,

    pub instance_ref: String,

    #[schemars(range(min = 1, max = 65535))]
    pub port: i32,

    #[serde(default = "default_weight")]
    pub weight: i32,
}

/// `Listener` accepts traffic on a port and forwards it to a backend set.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "Listener",
    namespaced,
    doc = "Listener accepts traffic on a port of a load balancer."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct ListenerSpec {
    pub load_balancer_ref: String,

    pub backend_set_ref: String,

    #[schemars(range(min = 1, max = 65535))]
    pub port: i32,

    /// `TCP` or `HTTP`
    pub protocol: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_ref: Option<String>,
}

/// `Certificate` is a TLS bundle uploaded to a load balancer.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "Certificate",
    namespaced,
    doc = "Certificate is a TLS certificate bundle attached to a load balancer."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    pub load_balancer_ref: String,

    /// Name of the Secret holding `tls.crt`, `tls.key` and optionally `ca.crt`
    pub secret_ref: String,
}

// ============================================================================
// Database
// ============================================================================

/// `DbAutonomous` is an autonomous database.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "DbAutonomous",
    plural = "dbautonomouses",
    namespaced,
    doc = "DbAutonomous is a self-managing cloud database."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct DbAutonomousSpec {
    pub db_name: String,

    #[schemars(range(min = 1, max = 128))]
    pub cpu_core_count: i32,

    #[schemars(range(min = 1, max = 128))]
    pub data_storage_size_in_tbs: i32,

    /// Secret holding the admin password under key `password`
    pub admin_password_secret: String,
}

// ============================================================================
// Container Engine
// ============================================================================

/// `CeCluster` is a managed Kubernetes control plane.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "CeCluster",
    namespaced,
    doc = "CeCluster is a managed Kubernetes control plane."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct CeClusterSpec {
    pub vcn_ref: String,

    pub kubernetes_version: String,

    /// Exactly two subnets for service load balancers
    pub lb_subnet_refs: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods_cidr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services_cidr: Option<String>,
}

/// `NodePool` is a group of worker nodes of a managed cluster.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "oci.cloudplane.io",
    version = "v1alpha1",
    kind = "NodePool",
    namespaced,
    doc = "NodePool is a group of worker nodes for a managed cluster."
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    pub ce_cluster_ref: String,

    pub kubernetes_version: String,

    pub node_shape: String,

    pub node_image: String,

    pub subnet_refs: Vec<String>,

    #[schemars(range(min = 0, max = 100))]
    pub quantity_per_subnet: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> i32 {
    crate::constants::DEFAULT_BACKEND_WEIGHT
}
