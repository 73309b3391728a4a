// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Adapter registry.
//!
//! Built once at startup and then shared read-only by every controller.
//! Primitive adapters are indexed by kind so the resource controller can find
//! the adapter of a dependent (or a parent) from the kind recorded in
//! `status.dependents`.

use crate::adapters::{cloud, host, resources, CloudAdapter, HostAdapter, ResourceAdapter};
use kube::api::ApiResource;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Every adapter known to the process.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    resources: BTreeMap<String, Arc<dyn ResourceAdapter>>,
    clouds: Vec<Arc<dyn CloudAdapter>>,
    hosts: Vec<Arc<dyn HostAdapter>>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry of every built-in kind.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register_resource(resources::CompartmentAdapter)
            .register_resource(resources::PolicyAdapter)
            .register_resource(resources::DynamicGroupAdapter)
            .register_resource(resources::VcnAdapter)
            .register_resource(resources::InternetGatewayAdapter)
            .register_resource(resources::RouteTableAdapter)
            .register_resource(resources::DhcpOptionAdapter)
            .register_resource(resources::SecurityRuleSetAdapter)
            .register_resource(resources::SubnetAdapter)
            .register_resource(resources::InstanceAdapter)
            .register_resource(resources::VolumeAdapter)
            .register_resource(resources::LoadBalancerAdapter)
            .register_resource(resources::BackendSetAdapter)
            .register_resource(resources::BackendAdapter)
            .register_resource(resources::ListenerAdapter)
            .register_resource(resources::CertificateAdapter)
            .register_resource(resources::DbAutonomousAdapter)
            .register_resource(resources::CeClusterAdapter)
            .register_resource(resources::NodePoolAdapter);
        registry
            .register_cloud(cloud::NetworkAdapter)
            .register_cloud(cloud::SecurityAdapter)
            .register_cloud(cloud::ComputeAdapter)
            .register_cloud(cloud::LoadBalancerAdapter)
            .register_cloud(cloud::ClusterAdapter)
            .register_cloud(cloud::CpodAdapter);
        registry.register_host(host::NamespaceAdapter);
        registry
    }

    pub fn register_resource(&mut self, adapter: impl ResourceAdapter + 'static) -> &mut Self {
        let kind = adapter.api_resource().kind;
        self.resources.insert(kind, Arc::new(adapter));
        self
    }

    pub fn register_cloud(&mut self, adapter: impl CloudAdapter + 'static) -> &mut Self {
        self.clouds.push(Arc::new(adapter));
        self
    }

    pub fn register_host(&mut self, adapter: impl HostAdapter + 'static) -> &mut Self {
        self.hosts.push(Arc::new(adapter));
        self
    }

    /// Primitive adapter of a kind.
    #[must_use]
    pub fn resource(&self, kind: &str) -> Option<Arc<dyn ResourceAdapter>> {
        self.resources.get(kind).cloned()
    }

    pub fn resources(&self) -> impl Iterator<Item = &Arc<dyn ResourceAdapter>> {
        self.resources.values()
    }

    pub fn clouds(&self) -> impl Iterator<Item = &Arc<dyn CloudAdapter>> {
        self.clouds.iter()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Arc<dyn HostAdapter>> {
        self.hosts.iter()
    }

    /// Kinds this process owns a schema for: every primitive and composite.
    #[must_use]
    pub fn owned_kinds(&self) -> Vec<ApiResource> {
        self.resources
            .values()
            .map(|a| a.api_resource())
            .chain(self.clouds.iter().map(|a| a.api_resource()))
            .collect()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod registry_tests;
