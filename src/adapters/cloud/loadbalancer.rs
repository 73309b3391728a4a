// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Composite `LoadBalancer` → subnets, the load balancer primitive, one
//! backend set, a backend per selected instance, a listener per port and a
//! certificate per TLS secret.

use super::children::{self, Child, Owner};
use super::compute::instance_name;
use super::{placement_key, waiting, Placement};
use crate::adapters::{AdapterContext, CompositeAdapter, Progress, CONDITION_READY};
use crate::allocator::release;
use crate::constants::{
    DEFAULT_BACKEND_WEIGHT, DEFAULT_BALANCE_MODE, DEFAULT_BANDWIDTH, DEFAULT_HEALTH_CHECK_PATH,
    DEFAULT_HEALTH_CHECK_PORT, DEFAULT_HEALTH_CHECK_PROTOCOL,
};
use crate::crd::cloud::{Compute, LoadBalancer, LoadBalancerSpec};
use crate::crd::resources::{
    Backend, BackendSet, BackendSetSpec, BackendSpec, Certificate, CertificateSpec, HealthChecker,
    Instance, Listener, ListenerSpec, LoadBalancer as LbPrimitive,
    LoadBalancerSpec as LbPrimitiveSpec, Subnet,
};
use crate::crd::{LabelSelector, OperatorState};
use crate::dependency::{is_ready, resource_status};
use crate::errors::ReconcileError;
use crate::labels::{COMPUTE_LABEL, LOADBALANCER_LABEL};
use crate::store::{api_resource, to_typed};
use crate::validation::validate_load_balancer;
use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Observed attribute carrying the load balancer's address.
pub const IP_ADDRESS_ATTRIBUTE: &str = "ipAddress";

/// Health check with empty fields filled in.
#[must_use]
pub fn health_checker(spec: &LoadBalancerSpec) -> HealthChecker {
    let check = &spec.health_check;
    let protocol = if check.protocol.is_empty() {
        DEFAULT_HEALTH_CHECK_PROTOCOL.to_string()
    } else {
        check.protocol.clone()
    };
    let url_path = if check.url_path.is_empty() && protocol.eq_ignore_ascii_case("HTTP") {
        DEFAULT_HEALTH_CHECK_PATH.to_string()
    } else {
        check.url_path.clone()
    };
    HealthChecker {
        port: if check.port == 0 {
            DEFAULT_HEALTH_CHECK_PORT
        } else {
            check.port
        },
        protocol,
        url_path,
    }
}

/// Weight of an instance: the first `label=value` entry it carries, else the default.
#[must_use]
pub fn backend_weight(weights: &BTreeMap<String, i32>, labels: &BTreeMap<String, String>) -> i32 {
    weights
        .iter()
        .find_map(|(term, weight)| {
            let (key, value) = term.split_once('=')?;
            (labels.get(key).map(String::as_str) == Some(value)).then_some(*weight)
        })
        .unwrap_or(DEFAULT_BACKEND_WEIGHT)
}

#[must_use]
pub fn backend_name(load_balancer: &str, instance: &str) -> String {
    format!("{load_balancer}-{instance}")
}

#[must_use]
pub fn listener_name(load_balancer: &str, port: i32) -> String {
    format!("{load_balancer}-{port}")
}

#[must_use]
pub fn certificate_name(load_balancer: &str, secret: &str) -> String {
    format!("{load_balancer}-{secret}")
}

/// Instances of a Compute that stay within its replica count.
fn live_instances<'a>(
    compute: &'a Compute,
    instances: &'a [DynamicObject],
) -> impl Iterator<Item = &'a DynamicObject> + 'a {
    let replicas = usize::try_from(compute.spec.replicas).unwrap_or(0);
    let wanted: BTreeSet<String> = (0..replicas)
        .map(|ordinal| instance_name(&compute.name_any(), ordinal))
        .collect();
    instances.iter().filter(move |obj| {
        obj.metadata.deletion_timestamp.is_none() && wanted.contains(&obj.name_any())
    })
}

pub struct LoadBalancerAdapter;

impl LoadBalancerAdapter {
    fn frontend(lb: &LoadBalancer, subnets: Vec<String>) -> Result<Vec<Child>, ReconcileError> {
        let name = lb.name_any();
        let spec = &lb.spec;
        let mut children = vec![
            Child::spec::<LbPrimitive>(
                &name,
                &LbPrimitiveSpec {
                    shape: if spec.bandwidth.is_empty() {
                        DEFAULT_BANDWIDTH.to_string()
                    } else {
                        spec.bandwidth.clone()
                    },
                    subnet_refs: subnets,
                    is_private: spec.is_private,
                },
            )?,
            Child::spec::<BackendSet>(
                &name,
                &BackendSetSpec {
                    load_balancer_ref: name.clone(),
                    policy: if spec.balance_mode.is_empty() {
                        DEFAULT_BALANCE_MODE.to_string()
                    } else {
                        spec.balance_mode.clone()
                    },
                    health_checker: health_checker(spec),
                },
            )?,
        ];

        let secrets: BTreeSet<&String> = spec
            .listeners
            .iter()
            .filter_map(|l| l.tls_secret.as_ref())
            .collect();
        for secret in secrets {
            children.push(Child::spec::<Certificate>(
                certificate_name(&name, secret),
                &CertificateSpec {
                    load_balancer_ref: name.clone(),
                    secret_ref: secret.clone(),
                },
            )?);
        }
        for listener in &spec.listeners {
            children.push(Child::spec::<Listener>(
                listener_name(&name, listener.port),
                &ListenerSpec {
                    load_balancer_ref: name.clone(),
                    backend_set_ref: name.clone(),
                    port: listener.port,
                    protocol: listener.protocol.clone(),
                    certificate_ref: listener
                        .tls_secret
                        .as_ref()
                        .map(|secret| certificate_name(&name, secret)),
                },
            )?);
        }
        Ok(children
            .into_iter()
            .map(|child| child.label(LOADBALANCER_LABEL, &name))
            .collect())
    }

    /// Backends for the selected Computes, or `None` while one is not ready.
    async fn backends(
        ctx: &AdapterContext,
        lb: &LoadBalancer,
    ) -> Result<Option<Vec<Child>>, ReconcileError> {
        let name = lb.name_any();
        let namespace = lb.namespace().unwrap_or_default();
        let computes = ctx
            .store
            .list(
                &api_resource::<Compute>(),
                Some(&namespace),
                Some(&lb.spec.compute_selector),
            )
            .await?;

        let mut backends = Vec::new();
        for obj in computes.iter().filter(|o| o.metadata.deletion_timestamp.is_none()) {
            let compute: Compute = to_typed(obj)?;
            let processed = compute
                .status
                .as_ref()
                .is_some_and(|s| s.state == OperatorState::Processed);
            if !processed {
                return Ok(None);
            }
            let compute_name = compute.name_any();
            let instances = ctx
                .store
                .list(
                    &api_resource::<Instance>(),
                    Some(&namespace),
                    Some(&LabelSelector::from_labels([(COMPUTE_LABEL, compute_name.as_str())])),
                )
                .await?;
            for instance in live_instances(&compute, &instances) {
                let target = instance.name_any();
                backends.push(
                    Child::spec::<Backend>(
                        backend_name(&name, &target),
                        &BackendSpec {
                            load_balancer_ref: name.clone(),
                            backend_set_ref: name.clone(),
                            instance_ref: target,
                            port: lb.spec.backend_port,
                            weight: backend_weight(&lb.spec.label_weight_map, instance.labels()),
                        },
                    )?
                    .label(LOADBALANCER_LABEL, &name)
                    .label(COMPUTE_LABEL, &compute_name),
                );
            }
        }
        Ok(Some(backends))
    }
}

#[async_trait]
impl CompositeAdapter for LoadBalancerAdapter {
    type Kind = LoadBalancer;

    fn children(&self) -> Vec<ApiResource> {
        vec![
            api_resource::<Subnet>(),
            api_resource::<LbPrimitive>(),
            api_resource::<BackendSet>(),
            api_resource::<Backend>(),
            api_resource::<Listener>(),
            api_resource::<Certificate>(),
        ]
    }

    async fn synthesize(
        &self,
        ctx: &AdapterContext,
        lb: &mut LoadBalancer,
    ) -> Result<Progress, ReconcileError> {
        validate_load_balancer(&lb.spec)?;
        let name = lb.name_any();
        let namespace = lb.namespace().unwrap_or_default();
        let owner = Owner::of(lb)?;
        let key = placement_key(lb);
        let network = lb.spec.network.clone();
        let store = ctx.store.as_ref();

        let status = lb.status.get_or_insert_with(Default::default);
        let Some(placement) =
            Placement::resolve(ctx, &namespace, &network, &key, &mut status.operator).await?
        else {
            return Ok(Progress::Pending);
        };

        let planned = placement.subnets(&name)?;
        let subnet_names = planned.iter().map(|s| s.name.clone()).collect();
        let subnets: Vec<Child> = planned
            .into_iter()
            .map(|s| s.child.label(LOADBALANCER_LABEL, &name))
            .collect();
        children::ensure_all(store, &owner, &subnets).await?;
        // The primitive and the backend set share the composite's name
        let mut frontend = Self::frontend(lb, subnet_names)?;
        let primitive = children::ensure(store, &owner, &frontend.remove(0)).await?;
        children::ensure_all(store, &owner, &frontend).await?;

        let listeners: BTreeSet<String> = lb
            .spec
            .listeners
            .iter()
            .map(|l| listener_name(&name, l.port))
            .collect();
        children::prune(store, &owner, &api_resource::<Listener>(), &listeners).await?;
        let certificates: BTreeSet<String> = lb
            .spec
            .listeners
            .iter()
            .filter_map(|l| l.tls_secret.as_deref())
            .map(|secret| certificate_name(&name, secret))
            .collect();
        children::prune(store, &owner, &api_resource::<Certificate>(), &certificates).await?;

        let backends = match Self::backends(ctx, lb).await? {
            Some(backends) => {
                let stored = children::ensure_all(store, &owner, &backends).await?;
                let keep: BTreeSet<String> = stored.keys().cloned().collect();
                let removed = children::prune(store, &owner, &api_resource::<Backend>(), &keep).await?;
                if removed > 0 {
                    info!(load_balancer = %name, removed = removed, "removing stale backends");
                }
                Some(stored.len())
            }
            None => None,
        };

        let address = Some(&primitive)
            .filter(|obj| is_ready(obj))
            .and_then(|obj| resource_status(obj).resource)
            .and_then(|r| r.attributes.get(IP_ADDRESS_ATTRIBUTE).cloned())
            .filter(|ip| !ip.is_empty());

        let status = lb.status.get_or_insert_with(Default::default);
        let Some(count) = backends else {
            status.operator.state = OperatorState::Created;
            waiting(
                &mut status.operator,
                "ComputesNotReady",
                "waiting for selected computes",
            );
            return Ok(Progress::Pending);
        };
        match address {
            Some(ip) => {
                if status.ip_address.as_deref() != Some(ip.as_str()) {
                    info!(load_balancer = %name, address = %ip, "load balancer address assigned");
                }
                status.operator.state = OperatorState::Processed;
                status.operator.set_condition(
                    CONDITION_READY,
                    "Available",
                    &format!("{ip} with {count} backend(s)"),
                );
                status.operator.message = format!("serving on {ip}");
                status.ip_address = Some(ip);
            }
            None => {
                status.operator.state = OperatorState::Created;
                waiting(
                    &mut status.operator,
                    "Provisioning",
                    "waiting for the load balancer address",
                );
            }
        }
        Ok(Progress::Done)
    }

    async fn teardown(
        &self,
        ctx: &AdapterContext,
        lb: &mut LoadBalancer,
    ) -> Result<Progress, ReconcileError> {
        let namespace = lb.namespace().unwrap_or_default();
        let owner = Owner::of(lb)?;
        let stages = [
            vec![api_resource::<Backend>(), api_resource::<Listener>()],
            vec![api_resource::<Certificate>(), api_resource::<BackendSet>()],
            vec![api_resource::<LbPrimitive>()],
            vec![api_resource::<Subnet>()],
        ];
        if !children::teardown(ctx.store.as_ref(), &owner, &stages)
            .await?
            .is_done()
        {
            let status = lb.status.get_or_insert_with(Default::default);
            waiting(
                &mut status.operator,
                "Deleting",
                "waiting for load balancer resources to be deleted",
            );
            return Ok(Progress::Pending);
        }
        release(ctx.store.as_ref(), &namespace, &lb.spec.network, &placement_key(lb)).await?;
        Ok(Progress::Done)
    }
}

#[cfg(test)]
#[path = "loadbalancer_tests.rs"]
mod loadbalancer_tests;
