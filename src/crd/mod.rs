// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for cloud infrastructure.
//!
//! Two families of kinds live here:
//!
//! - [`resources`] - primitives that map one-to-one to a cloud object (VCN,
//!   subnet, instance, ...). Every primitive embeds [`ResourceStatus`].
//! - [`cloud`] - composites that a cloud adapter decomposes into primitives
//!   (Network, Security, Compute, LoadBalancer, Cluster, Cpod). Every composite
//!   embeds [`OperatorStatus`].
//!
//! Status mix-ins are modelled by composition: each kind holds the shared
//! status struct rather than inheriting behaviour.
//!
//! # Example
//!
//! ```rust,no_run
//! use cloudplane::crd::cloud::{Network, NetworkSpec};
//!
//! let network = Network::new(
//!     "net-a",
//!     NetworkSpec {
//!         cidr_block: "10.0.0.0/16".to_string(),
//!         ..Default::default()
//!     },
//! );
//! ```

pub mod cloud;
pub mod resources;

use chrono::Utc;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Label selector to match records.
///
/// A label selector is a label query over a set of resources. The result of matchLabels and
/// matchExpressions are `ANDed`. An empty label selector matches all objects.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Map of {key,value} pairs. All requirements must be satisfied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    /// List of label selector requirements. All requirements must be satisfied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_expressions: Option<Vec<LabelSelectorRequirement>>,
}

/// A label selector requirement is a selector that contains values, a key, and an operator
/// that relates the key and values.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct LabelSelectorRequirement {
    /// The label key that the selector applies to.
    pub key: String,

    /// Operator represents a key's relationship to a set of values.
    /// Valid operators are In, `NotIn`, Exists and `DoesNotExist`.
    pub operator: String,

    /// Values for `In` / `NotIn`; empty for `Exists` / `DoesNotExist`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

// ============================================================================
// Primitive status mix-in
// ============================================================================

/// Lifecycle state of a primitive record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ResourceState {
    /// Not yet created, or waiting on parents / the cloud
    #[default]
    Pending,
    /// Cloud object requested, not yet observed as available
    Processing,
    /// Cloud object observed and compliant with its `spec`
    Processed,
    /// Terminal failure recorded in `message` and `conditions`
    Error,
}

/// Lifecycle state reported by the cloud for an object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleState {
    #[default]
    Provisioning,
    Available,
    Updating,
    Terminating,
    Terminated,
    Failed,
}

impl LifecycleState {
    /// The cloud is still working on the object.
    #[must_use]
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            LifecycleState::Provisioning | LifecycleState::Updating | LifecycleState::Terminating
        )
    }
}

/// The cloud object reflected into a primitive's status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudResource {
    /// Cloud-assigned identifier
    pub id: String,

    /// Display name used on the cloud side
    #[serde(default)]
    pub display_name: String,

    /// Compartment the object lives in
    #[serde(default)]
    pub compartment_id: String,

    /// Lifecycle state last observed
    #[serde(default)]
    pub lifecycle_state: LifecycleState,

    /// Observed attributes (cidrs, addresses, rule digests, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A condition entry on a primitive, keyed by condition type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConditionEntry {
    /// CamelCase reason
    pub reason: String,

    /// RFC3339 time of the last transition
    pub last_transition_time: String,
}

/// Shared status carried by every primitive record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default)]
    pub state: ResourceState,

    /// Last human-readable explanation
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// conditionType → (reason, lastTransition); duplicates by type collapse
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<String, ConditionEntry>,

    /// child kind → set of "namespace/name" keys registered on this parent
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependents: BTreeMap<String, BTreeSet<String>>,

    /// The reflected cloud object, `None` until observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<CloudResource>,
}

impl ResourceStatus {
    /// Cloud identifier, or "" when the object was never created.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        self.resource.as_ref().map_or("", |r| r.id.as_str())
    }

    /// Add (or refresh) a condition. The transition time only moves when the reason changes.
    pub fn add_condition(&mut self, condition_type: &str, reason: &str) {
        match self.conditions.get_mut(condition_type) {
            Some(existing) if existing.reason == reason => {}
            Some(existing) => {
                existing.reason = reason.to_string();
                existing.last_transition_time = Utc::now().to_rfc3339();
            }
            None => {
                self.conditions.insert(
                    condition_type.to_string(),
                    ConditionEntry {
                        reason: reason.to_string(),
                        last_transition_time: Utc::now().to_rfc3339(),
                    },
                );
            }
        }
    }

    /// Remove a condition; returns whether it was present.
    pub fn remove_condition(&mut self, condition_type: &str) -> bool {
        self.conditions.remove(condition_type).is_some()
    }

    /// Register a child. Returns `false` when it was already registered.
    pub fn add_dependent(&mut self, kind: &str, key: &str) -> bool {
        self.dependents
            .entry(kind.to_string())
            .or_default()
            .insert(key.to_string())
    }

    /// Unregister a child. Empty kind entries are dropped.
    pub fn remove_dependent(&mut self, kind: &str, key: &str) -> bool {
        let Some(set) = self.dependents.get_mut(kind) else {
            return false;
        };
        let removed = set.remove(key);
        if set.is_empty() {
            self.dependents.remove(kind);
        }
        removed
    }

    #[must_use]
    pub fn is_dependent_registered(&self, kind: &str, key: &str) -> bool {
        self.dependents
            .get(kind)
            .is_some_and(|set| set.contains(key))
    }

    #[must_use]
    pub fn has_dependents(&self) -> bool {
        self.dependents.values().any(|set| !set.is_empty())
    }
}

// ============================================================================
// Composite status mix-in
// ============================================================================

/// Lifecycle state of a composite record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum OperatorState {
    #[default]
    Pending,
    /// The child graph has been synthesized in the store
    Created,
    /// The composite reached its end state (address known, kubeconfig written)
    Processed,
    Error,
}

/// Condition represents an observation of a composite's current state.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, at most one entry per type.
    pub r#type: String,

    /// Brief CamelCase reason for the condition's last transition.
    pub reason: String,

    /// Human-readable message indicating details about the transition.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the condition transitioned (RFC3339 format).
    pub last_transition_time: String,
}

/// Shared status carried by every composite record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    #[serde(default)]
    pub state: OperatorState,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Ordered conditions, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Availability zones chosen once, at random, on first reconcile
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub availability_zones: Vec<String>,
}

impl OperatorStatus {
    /// Update a condition in place, or append it when the type is new.
    ///
    /// `lastTransitionTime` only moves when the reason changes.
    pub fn set_condition(&mut self, condition_type: &str, reason: &str, message: &str) {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition_type)
        {
            if existing.reason != reason {
                existing.reason = reason.to_string();
                existing.last_transition_time = Utc::now().to_rfc3339();
            }
            existing.message = message.to_string();
            return;
        }
        self.conditions.push(Condition {
            r#type: condition_type.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Utc::now().to_rfc3339(),
        });
    }

    /// Remove a condition by type; returns whether it was present.
    pub fn remove_condition(&mut self, condition_type: &str) -> bool {
        let before = self.conditions.len();
        self.conditions.retain(|c| c.r#type != condition_type);
        before != self.conditions.len()
    }

    #[must_use]
    pub fn find_condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == condition_type)
    }
}

// ============================================================================
// Kind traits
// ============================================================================

/// Bounds shared by every typed record handled by an adapter.
pub trait Record:
    kube::Resource<DynamicType = ()>
    + Clone
    + std::fmt::Debug
    + Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> Record for T where
    T: kube::Resource<DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + Serialize
        + serde::de::DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// A primitive record: one cloud object, status is [`ResourceStatus`].
pub trait Primitive: Record {
    fn resource_status(&self) -> Option<&ResourceStatus>;

    /// Mutable status, created empty when absent.
    fn resource_status_mut(&mut self) -> &mut ResourceStatus;

    /// Cloud identifier, or "" before creation.
    fn resource_id(&self) -> &str {
        self.resource_status().map_or("", ResourceStatus::resource_id)
    }
}

/// A composite record: status embeds [`OperatorStatus`].
pub trait Composite: Record {
    fn operator_status(&self) -> Option<&OperatorStatus>;

    fn operator_status_mut(&mut self) -> &mut OperatorStatus;
}

macro_rules! impl_primitive {
    ($($kind:ty),+ $(,)?) => {
        $(
            impl Primitive for $kind {
                fn resource_status(&self) -> Option<&ResourceStatus> {
                    self.status.as_ref()
                }

                fn resource_status_mut(&mut self) -> &mut ResourceStatus {
                    self.status.get_or_insert_with(ResourceStatus::default)
                }
            }
        )+
    };
}

macro_rules! impl_composite {
    // Status is `OperatorStatus` itself
    (direct: $($kind:ty),+ $(,)?) => {
        $(
            impl Composite for $kind {
                fn operator_status(&self) -> Option<&OperatorStatus> {
                    self.status.as_ref()
                }

                fn operator_status_mut(&mut self) -> &mut OperatorStatus {
                    self.status.get_or_insert_with(OperatorStatus::default)
                }
            }
        )+
    };
    // Status flattens `OperatorStatus` under `operator`
    (nested: $($kind:ty),+ $(,)?) => {
        $(
            impl Composite for $kind {
                fn operator_status(&self) -> Option<&OperatorStatus> {
                    self.status.as_ref().map(|s| &s.operator)
                }

                fn operator_status_mut(&mut self) -> &mut OperatorStatus {
                    &mut self.status.get_or_insert_with(Default::default).operator
                }
            }
        )+
    };
}

impl_primitive!(
    resources::Compartment,
    resources::Policy,
    resources::DynamicGroup,
    resources::Vcn,
    resources::InternetGateway,
    resources::RouteTable,
    resources::DhcpOption,
    resources::SecurityRuleSet,
    resources::Subnet,
    resources::Instance,
    resources::Volume,
    resources::LoadBalancer,
    resources::BackendSet,
    resources::Backend,
    resources::Listener,
    resources::Certificate,
    resources::DbAutonomous,
    resources::CeCluster,
    resources::NodePool,
);

impl_composite!(direct: cloud::Security, cloud::Compute, cloud::Cpod);
impl_composite!(nested: cloud::Network, cloud::LoadBalancer, cloud::Cluster);

/// Schemas of every kind owned by the process, primitives first.
#[must_use]
pub fn crds() -> Vec<CustomResourceDefinition> {
    vec![
        resources::Compartment::crd(),
        resources::Policy::crd(),
        resources::DynamicGroup::crd(),
        resources::Vcn::crd(),
        resources::InternetGateway::crd(),
        resources::RouteTable::crd(),
        resources::DhcpOption::crd(),
        resources::SecurityRuleSet::crd(),
        resources::Subnet::crd(),
        resources::Instance::crd(),
        resources::Volume::crd(),
        resources::LoadBalancer::crd(),
        resources::BackendSet::crd(),
        resources::Backend::crd(),
        resources::Listener::crd(),
        resources::Certificate::crd(),
        resources::DbAutonomous::crd(),
        resources::CeCluster::crd(),
        resources::NodePool::crd(),
        cloud::Network::crd(),
        cloud::Security::crd(),
        cloud::Compute::crd(),
        cloud::LoadBalancer::crd(),
        cloud::Cluster::crd(),
        cloud::Cpod::crd(),
    ]
}
