// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Composite kinds decomposed by cloud adapters into primitives.
//!
//! Every composite carries [`OperatorStatus`] (flattened into a richer status
//! struct where the kind reports more, e.g. the load balancer address).

use super::resources::{EgressRule, IngressRule};
use super::{LabelSelector, OperatorStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Network
// ============================================================================

/// `Network` produces a VCN with its internet gateway, route table and DHCP options.
///
/// Subnets are not produced here: every composite placed in a network asks it
/// for a subnet-octet allocation and creates its own per-AZ subnets.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "cloud.cloudplane.io",
    version = "v1alpha1",
    kind = "Network",
    namespaced,
    doc = "Network is a virtual cloud network with its gateway, route table and DHCP options.",
    printcolumn = r#"{"name":"CIDR","type":"string","jsonPath":".spec.cidrBlock"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[kube(status = "NetworkStatus")]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// /16 CIDR block, e.g. `10.0.0.0/16`
    pub cidr_block: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_label: Option<String>,
}

/// Status of a [`Network`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    #[serde(flatten)]
    pub operator: OperatorStatus,

    /// `<kind>/<name>` of a composite → third octet of its first subnet
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subnet_allocation_map: BTreeMap<String, u8>,
}

// ============================================================================
// Security
// ============================================================================

/// `Security` produces one security rule set per selected network.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "cloud.cloudplane.io",
    version = "v1alpha1",
    kind = "Security",
    plural = "securities",
    namespaced,
    doc = "Security applies ingress and egress rules to every network it selects."
)]
#[kube(status = "OperatorStatus")]
#[serde(rename_all = "camelCase")]
pub struct SecuritySpec {
    /// Networks to apply the rules to, matched on Network labels
    pub network_selector: LabelSelector,

    /// Empty means "tcp/22 from anywhere"
    #[serde(default)]
    pub ingress_rules: Vec<IngressRule>,

    /// Empty means "all traffic to anywhere"
    #[serde(default)]
    pub egress_rules: Vec<EgressRule>,
}

// ============================================================================
// Compute
// ============================================================================

/// `Compute` produces `replicas` instances spread round-robin over one subnet per AZ.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "cloud.cloudplane.io",
    version = "v1alpha1",
    kind = "Compute",
    namespaced,
    doc = "Compute is a group of identical instances spread across availability domains.",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[kube(status = "OperatorStatus")]
#[serde(rename_all = "camelCase")]
pub struct ComputeSpec {
    /// Name of the `Network` the instances live in
    pub network: String,

    #[schemars(range(min = 0, max = 1000))]
    pub replicas: i32,

    #[serde(default)]
    pub shape: String,

    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_authorized_keys: Vec<String>,

    /// Plain-text user-data (cloud-init or shell script)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

// ============================================================================
// LoadBalancer
// ============================================================================

/// One listener of a composite load balancer.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListenerConfig {
    #[schemars(range(min = 1, max = 65535))]
    pub port: i32,

    /// `TCP` or `HTTP`
    pub protocol: String,

    /// TLS Secret terminating this listener; produces a `Certificate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret: Option<String>,
}

/// Health check settings; zero and empty values take defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    #[serde(default)]
    pub port: i32,

    #[serde(default)]
    pub protocol: String,

    #[serde(default)]
    pub url_path: String,
}

/// `LoadBalancer` fronts the instances of every selected `Compute`.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "cloud.cloudplane.io",
    version = "v1alpha1",
    kind = "LoadBalancer",
    namespaced,
    doc = "LoadBalancer balances traffic across the instances of the selected Computes.",
    printcolumn = r#"{"name":"Address","type":"string","jsonPath":".status.ipAddress"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[kube(status = "LoadBalancerStatus")]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    /// Name of the `Network` the load balancer subnets are placed in
    pub network: String,

    /// Computes whose instances become backends
    pub compute_selector: LabelSelector,

    pub listeners: Vec<ListenerConfig>,

    #[schemars(range(min = 1, max = 65535))]
    pub backend_port: i32,

    #[serde(default)]
    pub health_check: HealthCheck,

    /// Defaults to `ROUND_ROBIN`
    #[serde(default)]
    pub balance_mode: String,

    /// Defaults to `100Mbps`
    #[serde(default)]
    pub bandwidth: String,

    /// `"key=value"` of an instance label → backend weight
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_weight_map: BTreeMap<String, i32>,

    #[serde(default)]
    pub is_private: bool,
}

/// Status of a composite [`LoadBalancer`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerStatus {
    #[serde(flatten)]
    pub operator: OperatorStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

// ============================================================================
// Cluster
// ============================================================================

/// Sizing of a node group.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    #[schemars(range(min = 0, max = 100))]
    pub replicas: i32,

    #[serde(default)]
    pub shape: String,

    #[serde(default)]
    pub image: String,
}

/// `Cluster` is a Kubernetes cluster, either managed by the cloud or self-managed.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "cloud.cloudplane.io",
    version = "v1alpha1",
    kind = "Cluster",
    namespaced,
    doc = "Cluster is a Kubernetes cluster built from cloud primitives.",
    printcolumn = r#"{"name":"Managed","type":"boolean","jsonPath":".spec.isManaged"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[kube(status = "ClusterStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// `true` for a cloud-managed control plane
    #[serde(default)]
    pub is_managed: bool,

    /// Existing `Network` to place a managed cluster in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// CIDR of the network created for a self-managed cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_cidr: Option<String>,

    pub kubernetes_version: String,

    #[serde(default)]
    pub master: NodeGroup,

    #[serde(default)]
    pub worker: NodeGroup,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_authorized_keys: Vec<String>,
}

/// Status of a [`Cluster`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(flatten)]
    pub operator: OperatorStatus,

    /// RFC3339 time the cluster started waiting for its load balancer address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lb_wait_started: Option<String>,

    /// Name of the Secret holding the admin kubeconfig
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_secret: Option<String>,
}

// ============================================================================
// Cpod
// ============================================================================

/// A container run on a Cpod instance.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,

    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// `host:container` port mappings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
}

/// `Cpod` runs a list of containers on a single instance.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "cloud.cloudplane.io",
    version = "v1alpha1",
    kind = "Cpod",
    namespaced,
    doc = "Cpod runs a set of containers on one dedicated instance."
)]
#[kube(status = "OperatorStatus")]
#[serde(rename_all = "camelCase")]
pub struct CpodSpec {
    pub network: String,

    #[serde(default)]
    pub shape: String,

    pub image: String,

    pub containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_authorized_keys: Vec<String>,
}
