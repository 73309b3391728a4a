// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-process cloud provider.
//!
//! `MemoryCloud` behaves like the provider as far as adapters can tell:
//!
//! - new objects start `PROVISIONING` and become `AVAILABLE` after a number
//!   of `get` polls
//! - deleted objects are `TERMINATING` for a number of polls, then `get`
//!   returns `NotFound`
//! - deleting an object that still contains live children fails with
//!   `Conflict`, as does creating inside a parent that does not exist
//! - load balancers get a public `ipAddress`, instances a `privateIp`
//!
//! Every call is recorded, and failures can be injected per operation.

use super::{CloudApi, CloudRequest, ResourceType};
use crate::crd::{CloudResource, LifecycleState};
use crate::errors::CloudError;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Tenancy reported by a default `MemoryCloud`
pub const TEST_TENANCY: &str = "ocid1.tenancy.oc1..test";

/// Cloud operations, as recorded and as targets for failure injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CloudOp {
    Create,
    Get,
    Update,
    Delete,
    AvailabilityDomains,
    ClusterKubeconfig,
}

/// One recorded call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudCall {
    pub op: CloudOp,
    pub resource_type: Option<ResourceType>,
    /// Display name for creates, identifier otherwise
    pub target: String,
}

struct Entry {
    resource_type: ResourceType,
    resource: CloudResource,
    parent_id: Option<String>,
    polls_left: u32,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    next_address: u32,
    objects: BTreeMap<String, Entry>,
    calls: Vec<CloudCall>,
    failures: BTreeMap<CloudOp, VecDeque<CloudError>>,
}

impl Inner {
    fn record(&mut self, op: CloudOp, resource_type: Option<ResourceType>, target: &str) {
        self.calls.push(CloudCall {
            op,
            resource_type,
            target: target.to_string(),
        });
    }

    fn injected(&mut self, op: CloudOp) -> Option<CloudError> {
        self.failures.get_mut(&op).and_then(VecDeque::pop_front)
    }

    fn has_live_children(&self, id: &str) -> bool {
        self.objects
            .values()
            .any(|e| e.parent_id.as_deref() == Some(id))
    }
}

/// Simulated cloud provider.
pub struct MemoryCloud {
    inner: Mutex<Inner>,
    tenancy: String,
    availability_domains: Vec<String>,
    provisioning_polls: u32,
    termination_polls: u32,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCloud {
    /// Three availability domains, one poll to provision, one poll to terminate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            tenancy: TEST_TENANCY.to_string(),
            availability_domains: vec!["AD-1".into(), "AD-2".into(), "AD-3".into()],
            provisioning_polls: 1,
            termination_polls: 1,
        }
    }

    #[must_use]
    pub fn with_availability_domains(mut self, ads: Vec<String>) -> Self {
        self.availability_domains = ads;
        self
    }

    /// Number of `get` calls an object stays `PROVISIONING`. Zero creates it `AVAILABLE`.
    #[must_use]
    pub fn with_provisioning_polls(mut self, polls: u32) -> Self {
        self.provisioning_polls = polls;
        self
    }

    /// Number of `get` calls a deleted object stays `TERMINATING`.
    #[must_use]
    pub fn with_termination_polls(mut self, polls: u32) -> Self {
        self.termination_polls = polls;
        self
    }

    /// Make the next call of `op` fail with `err`. Injections queue up.
    pub fn fail_next(&self, op: CloudOp, err: CloudError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<CloudCall> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls of `op` on `resource_type`.
    #[must_use]
    pub fn call_count(&self, op: CloudOp, resource_type: ResourceType) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op && c.resource_type == Some(resource_type))
            .count()
    }

    /// Current state of an object, without counting as a poll.
    #[must_use]
    pub fn peek(&self, id: &str) -> Option<CloudResource> {
        self.lock().objects.get(id).map(|e| e.resource.clone())
    }

    /// Objects of one type that still exist (including terminating ones).
    #[must_use]
    pub fn objects(&self, resource_type: ResourceType) -> Vec<CloudResource> {
        self.lock()
            .objects
            .values()
            .filter(|e| e.resource_type == resource_type)
            .map(|e| e.resource.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn not_found(resource_type: ResourceType, id: &str) -> CloudError {
    CloudError::NotFound {
        resource: resource_type.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl CloudApi for MemoryCloud {
    async fn create(
        &self,
        resource_type: ResourceType,
        request: &CloudRequest,
    ) -> Result<CloudResource, CloudError> {
        let mut inner = self.lock();
        inner.record(CloudOp::Create, Some(resource_type), &request.display_name);
        if let Some(err) = inner.injected(CloudOp::Create) {
            return Err(err);
        }

        if let Some(parent) = &request.parent_id {
            match inner.objects.get(parent) {
                None => {
                    return Err(CloudError::Invalid(format!(
                        "parent {parent} of {resource_type} does not exist"
                    )))
                }
                Some(e) if e.resource.lifecycle_state == LifecycleState::Terminating => {
                    return Err(CloudError::Conflict {
                        resource: resource_type.to_string(),
                        reason: format!("parent {parent} is terminating"),
                    })
                }
                Some(_) => {}
            }
        }

        inner.next_id += 1;
        let id = format!("ocid1.{}.oc1..{:06}", resource_type.short_name(), inner.next_id);
        let mut attributes = request.attributes.clone();
        match resource_type {
            ResourceType::LoadBalancer => {
                inner.next_address += 1;
                attributes.insert(
                    "ipAddress".into(),
                    format!("129.146.{}.{}", inner.next_address / 250, inner.next_address % 250 + 1),
                );
            }
            ResourceType::Instance => {
                inner.next_address += 1;
                attributes.insert(
                    "privateIp".into(),
                    format!("10.0.{}.{}", inner.next_address / 250, inner.next_address % 250 + 1),
                );
            }
            _ => {}
        }

        let lifecycle_state = if self.provisioning_polls == 0 {
            LifecycleState::Available
        } else {
            LifecycleState::Provisioning
        };
        let resource = CloudResource {
            id: id.clone(),
            display_name: request.display_name.clone(),
            compartment_id: request.compartment_id.clone(),
            lifecycle_state,
            attributes,
        };
        inner.objects.insert(
            id.clone(),
            Entry {
                resource_type,
                resource: resource.clone(),
                parent_id: request.parent_id.clone(),
                polls_left: self.provisioning_polls,
            },
        );
        debug!(resource_type = %resource_type, id = %id, "memory cloud: created");
        Ok(resource)
    }

    async fn get(
        &self,
        resource_type: ResourceType,
        id: &str,
    ) -> Result<CloudResource, CloudError> {
        let mut inner = self.lock();
        inner.record(CloudOp::Get, Some(resource_type), id);
        if let Some(err) = inner.injected(CloudOp::Get) {
            return Err(err);
        }

        let Some(entry) = inner.objects.get_mut(id) else {
            return Err(not_found(resource_type, id));
        };
        if entry.resource.lifecycle_state.is_transitional() {
            entry.polls_left = entry.polls_left.saturating_sub(1);
            if entry.polls_left == 0 {
                if entry.resource.lifecycle_state == LifecycleState::Terminating {
                    inner.objects.remove(id);
                    debug!(resource_type = %resource_type, id = %id, "memory cloud: terminated");
                    return Err(not_found(resource_type, id));
                }
                entry.resource.lifecycle_state = LifecycleState::Available;
            }
        }
        Ok(entry.resource.clone())
    }

    async fn update(
        &self,
        resource_type: ResourceType,
        id: &str,
        request: &CloudRequest,
    ) -> Result<CloudResource, CloudError> {
        let mut inner = self.lock();
        inner.record(CloudOp::Update, Some(resource_type), id);
        if let Some(err) = inner.injected(CloudOp::Update) {
            return Err(err);
        }

        let Some(entry) = inner.objects.get_mut(id) else {
            return Err(not_found(resource_type, id));
        };
        if entry.resource.lifecycle_state == LifecycleState::Terminating {
            return Err(CloudError::Conflict {
                resource: resource_type.to_string(),
                reason: format!("{id} is terminating"),
            });
        }
        entry.resource.display_name.clone_from(&request.display_name);
        for (k, v) in &request.attributes {
            entry.resource.attributes.insert(k.clone(), v.clone());
        }
        Ok(entry.resource.clone())
    }

    async fn delete(&self, resource_type: ResourceType, id: &str) -> Result<(), CloudError> {
        let mut inner = self.lock();
        inner.record(CloudOp::Delete, Some(resource_type), id);
        if let Some(err) = inner.injected(CloudOp::Delete) {
            return Err(err);
        }

        if !inner.objects.contains_key(id) {
            return Err(not_found(resource_type, id));
        }
        if inner.has_live_children(id) {
            return Err(CloudError::Conflict {
                resource: resource_type.to_string(),
                reason: format!("{id} still contains resources"),
            });
        }

        let termination_polls = self.termination_polls;
        if termination_polls == 0 {
            inner.objects.remove(id);
            return Ok(());
        }
        if let Some(entry) = inner.objects.get_mut(id) {
            if entry.resource.lifecycle_state != LifecycleState::Terminating {
                entry.resource.lifecycle_state = LifecycleState::Terminating;
                entry.polls_left = termination_polls;
            }
        }
        debug!(resource_type = %resource_type, id = %id, "memory cloud: terminating");
        Ok(())
    }

    async fn availability_domains(&self, compartment_id: &str) -> Result<Vec<String>, CloudError> {
        let mut inner = self.lock();
        inner.record(CloudOp::AvailabilityDomains, None, compartment_id);
        if let Some(err) = inner.injected(CloudOp::AvailabilityDomains) {
            return Err(err);
        }
        Ok(self.availability_domains.clone())
    }

    async fn cluster_kubeconfig(&self, cluster_id: &str) -> Result<String, CloudError> {
        let mut inner = self.lock();
        inner.record(CloudOp::ClusterKubeconfig, Some(ResourceType::Cluster), cluster_id);
        if let Some(err) = inner.injected(CloudOp::ClusterKubeconfig) {
            return Err(err);
        }
        let Some(entry) = inner.objects.get(cluster_id) else {
            return Err(not_found(ResourceType::Cluster, cluster_id));
        };
        if entry.resource.lifecycle_state != LifecycleState::Available {
            return Err(CloudError::Conflict {
                resource: ResourceType::Cluster.to_string(),
                reason: format!("{cluster_id} is not available yet"),
            });
        }
        let name = &entry.resource.display_name;
        Ok(format!(
            "apiVersion: v1\nkind: Config\nclusters:\n- name: {name}\n  cluster:\n    server: https://{cluster_id}.clusters.local:6443\ncontexts:\n- name: {name}\n  context:\n    cluster: {name}\n    user: {name}-admin\ncurrent-context: {name}\nusers:\n- name: {name}-admin\n  user:\n    token: memory\n"
        ))
    }

    fn tenancy_id(&self) -> &str {
        &self.tenancy
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod memory_tests;
