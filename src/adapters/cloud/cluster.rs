// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `Cluster` → a Kubernetes cluster, in one of two shapes.
//!
//! A managed cluster is a `CeCluster` and a `NodePool` placed in an existing
//! network, with two load balancer subnets and one node subnet per zone. Its
//! kubeconfig comes from the cloud once the control plane is ready.
//!
//! A self-managed cluster is built from other composites: its own Network,
//! two Securities, a LoadBalancer in front of the masters and a master and a
//! worker Compute booted with kubeadm. The node scripts need the load
//! balancer address, so the Computes are only created once it is known. The
//! admin kubeconfig is signed by a CA kept in `cluster-<name>-ca`.

use super::children::{self, Child, Owner};
use super::{placement_key, waiting, Placement};
use crate::adapters::{AdapterContext, CompositeAdapter, Progress, CONDITION_READY};
use crate::allocator::release;
use crate::constants::{
    ANYWHERE_CIDR, APISERVER_LISTENER_PORT, APISERVER_PORT, DEFAULT_CLUSTER_CIDR, DEFAULT_IMAGE,
    DEFAULT_SHAPE, KUBECONFIG_SECRET_KEY, LB_READY_POLL, LB_READY_TIMEOUT,
};
use crate::crd::cloud::{
    Cluster, Compute, ComputeSpec, HealthCheck, ListenerConfig, LoadBalancer, LoadBalancerSpec,
    Network, NetworkSpec, NodeGroup, Security, SecuritySpec,
};
use crate::crd::resources::{
    CeCluster, CeClusterSpec, IngressRule, NodePool, NodePoolSpec, Policy, PolicySpec, Subnet,
};
use crate::crd::{LabelSelector, OperatorState, OperatorStatus};
use crate::dependency::{is_ready, resource_id};
use crate::errors::{ReconcileError, StoreError};
use crate::labels::{CLUSTER_LABEL, NETWORK_LABEL, ROLE_LABEL};
use crate::pki::{kubeconfig_summary, render_kubeconfig, ClusterCa};
use crate::store::{api_resource, to_typed, ObjectStore};
use crate::userdata::{master_script, worker_script};
use crate::validation::validate_cluster;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Load balancer subnets a managed control plane needs.
pub const MANAGED_LB_SUBNETS: usize = 2;

#[must_use]
pub fn kubeconfig_secret_name(cluster: &str) -> String {
    format!("cluster-{cluster}")
}

#[must_use]
pub fn ca_secret_name(cluster: &str) -> String {
    format!("cluster-{cluster}-ca")
}

/// Allocation key of the managed load balancer subnets.
#[must_use]
pub fn lb_placement_key(cluster: &Cluster) -> String {
    format!("{}-lb", placement_key(cluster))
}

/// Node subnets of a managed cluster hold an even share of the workers.
#[must_use]
pub fn quantity_per_subnet(workers: i32, subnets: usize) -> i32 {
    let subnets = i32::try_from(subnets.max(1)).unwrap_or(i32::MAX);
    (workers.max(0) + subnets - 1) / subnets
}

fn tcp_from(source: &str, port: i32) -> IngressRule {
    IngressRule {
        protocol: "tcp".to_string(),
        source: source.to_string(),
        port_min: Some(port),
        port_max: Some(port),
    }
}

fn all_from(source: &str) -> IngressRule {
    IngressRule {
        protocol: "all".to_string(),
        source: source.to_string(),
        port_min: None,
        port_max: None,
    }
}

/// The `-lb` and `-node` Securities of a cluster on `network`.
fn securities(
    cluster: &str,
    network: &str,
    cidr: &str,
    node_ports: &[i32],
) -> Result<Vec<Child>, ReconcileError> {
    let selector = LabelSelector::from_labels([(NETWORK_LABEL, network)]);
    let mut node_rules = vec![tcp_from(ANYWHERE_CIDR, 22)];
    node_rules.extend(node_ports.iter().map(|port| tcp_from(ANYWHERE_CIDR, *port)));
    node_rules.push(all_from(cidr));
    let groups = [
        ("lb", vec![tcp_from(ANYWHERE_CIDR, APISERVER_LISTENER_PORT)]),
        ("node", node_rules),
    ];
    groups
        .into_iter()
        .map(|(role, ingress_rules)| {
            Ok(Child::spec::<Security>(
                format!("{cluster}-{role}"),
                &SecuritySpec {
                    network_selector: selector.clone(),
                    ingress_rules,
                    egress_rules: Vec::new(),
                },
            )?
            .label(CLUSTER_LABEL, cluster))
        })
        .collect()
}

fn or_default(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

async fn find(
    store: &dyn ObjectStore,
    ar: &ApiResource,
    namespace: &str,
    name: &str,
) -> Result<Option<DynamicObject>, ReconcileError> {
    match store.get(ar, Some(namespace), name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Text value of one Secret key.
fn secret_text(obj: &DynamicObject, key: &str) -> Result<Option<String>, ReconcileError> {
    let secret: Secret = to_typed(obj)?;
    Ok(secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok()))
}

fn pki_error(e: impl std::fmt::Display) -> ReconcileError {
    ReconcileError::Transient(format!("cluster credentials: {e}"))
}

/// Record a ready cluster whose kubeconfig is in `secret`.
fn available(status: &mut OperatorStatus, secret: &str) {
    status.state = OperatorState::Processed;
    status.set_condition(CONDITION_READY, "Available", &format!("kubeconfig in {secret}"));
    status.message = format!("kubeconfig in {secret}");
}

pub struct ClusterAdapter;

impl ClusterAdapter {
    async fn synthesize_managed(
        ctx: &AdapterContext,
        cluster: &mut Cluster,
    ) -> Result<Progress, ReconcileError> {
        let name = cluster.name_any();
        let namespace = cluster.namespace().unwrap_or_default();
        let owner = Owner::of(cluster)?;
        let store = ctx.store.as_ref();
        let network = cluster.spec.network.clone().unwrap_or_default();
        let node_key = placement_key(cluster);
        let lb_key = lb_placement_key(cluster);

        let status = cluster.status.get_or_insert_with(Default::default);
        let Some(nodes) =
            Placement::resolve(ctx, &namespace, &network, &node_key, &mut status.operator).await?
        else {
            return Ok(Progress::Pending);
        };
        let Some(mut lbs) =
            Placement::resolve(ctx, &namespace, &network, &lb_key, &mut status.operator).await?
        else {
            return Ok(Progress::Pending);
        };
        lbs.zones = lbs
            .zones
            .iter()
            .cycle()
            .take(MANAGED_LB_SUBNETS)
            .cloned()
            .collect();

        let node_subnets = nodes.subnets(&format!("{name}-node"))?;
        let lb_subnets = lbs.subnets(&format!("{name}-lb"))?;
        let node_refs: Vec<String> = node_subnets.iter().map(|s| s.name.clone()).collect();
        let lb_refs: Vec<String> = lb_subnets.iter().map(|s| s.name.clone()).collect();
        let subnets: Vec<Child> = node_subnets
            .into_iter()
            .chain(lb_subnets)
            .map(|s| s.child.label(CLUSTER_LABEL, &name))
            .collect();
        children::ensure_all(store, &owner, &subnets).await?;

        let spec = &cluster.spec;
        let worker = &spec.worker;
        let mut desired = securities(&name, &network, &nodes.network.spec.cidr_block, &[])?;
        desired.push(Child::spec::<Policy>(
            &name,
            &PolicySpec {
                description: format!("control plane access for cluster {name}"),
                statements: vec![format!(
                    "Allow service OKE to manage all-resources in compartment {namespace}"
                )],
            },
        )?);
        desired.push(Child::spec::<CeCluster>(
            &name,
            &CeClusterSpec {
                vcn_ref: network.clone(),
                kubernetes_version: spec.kubernetes_version.clone(),
                lb_subnet_refs: lb_refs,
                pods_cidr: None,
                services_cidr: None,
            },
        )?);
        desired.push(Child::spec::<NodePool>(
            &name,
            &NodePoolSpec {
                ce_cluster_ref: name.clone(),
                kubernetes_version: spec.kubernetes_version.clone(),
                node_shape: or_default(&worker.shape, DEFAULT_SHAPE),
                node_image: or_default(&worker.image, DEFAULT_IMAGE),
                quantity_per_subnet: quantity_per_subnet(worker.replicas, node_refs.len()),
                subnet_refs: node_refs,
                ssh_public_key: spec.ssh_authorized_keys.first().cloned(),
            },
        )?);
        let desired: Vec<Child> = desired
            .into_iter()
            .map(|child| child.label(CLUSTER_LABEL, &name))
            .collect();
        children::ensure_all(store, &owner, &desired).await?;

        let secret_name = kubeconfig_secret_name(&name);
        let control_plane = find(store, &api_resource::<CeCluster>(), &namespace, &name)
            .await?
            .filter(is_ready);

        let status = cluster.status.get_or_insert_with(Default::default);
        let Some(control_plane) = control_plane else {
            status.operator.state = OperatorState::Created;
            waiting(
                &mut status.operator,
                "Provisioning",
                "waiting for the control plane",
            );
            return Ok(Progress::Done);
        };

        let have_secret = find(store, &api_resource::<Secret>(), &namespace, &secret_name)
            .await?
            .is_some();
        if !have_secret {
            let kubeconfig = ctx
                .cloud
                .cluster_kubeconfig(&resource_id(&control_plane))
                .await?;
            let data = BTreeMap::from([(KUBECONFIG_SECRET_KEY.to_string(), kubeconfig)]);
            children::ensure(
                store,
                &owner,
                &Child::secret(&secret_name, &data).label(CLUSTER_LABEL, &name),
            )
            .await?;
            info!(cluster = %name, secret = %secret_name, "wrote managed cluster kubeconfig");
        }
        status.kubeconfig_secret = Some(secret_name.clone());
        available(&mut status.operator, &secret_name);
        Ok(Progress::Done)
    }

    /// The persisted CA of a self-managed cluster, generated on first use.
    async fn cluster_ca(
        store: &dyn ObjectStore,
        owner: &Owner,
        cluster: &str,
    ) -> Result<ClusterCa, ReconcileError> {
        let name = ca_secret_name(cluster);
        if let Some(obj) = find(store, &api_resource::<Secret>(), &owner.namespace, &name).await? {
            let secret: Secret = to_typed(&obj)?;
            return secret
                .data
                .as_ref()
                .and_then(ClusterCa::from_secret_data)
                .ok_or_else(|| {
                    ReconcileError::validation(
                        format!("secret {name}"),
                        "does not hold a complete cluster CA",
                    )
                });
        }
        let ca = ClusterCa::generate(cluster).map_err(pki_error)?;
        children::ensure(
            store,
            owner,
            &Child::secret(&name, &ca.to_secret_data()).label(CLUSTER_LABEL, cluster),
        )
        .await?;
        info!(cluster = %cluster, secret = %name, "generated cluster CA");
        Ok(ca)
    }

    fn node_compute(
        cluster: &Cluster,
        role: &str,
        group: &NodeGroup,
        user_data: String,
    ) -> Result<Child, ReconcileError> {
        let name = cluster.name_any();
        Ok(Child::spec::<Compute>(
            format!("{name}-{role}"),
            &ComputeSpec {
                network: name.clone(),
                replicas: group.replicas,
                shape: or_default(&group.shape, DEFAULT_SHAPE),
                image: or_default(&group.image, DEFAULT_IMAGE),
                ssh_authorized_keys: cluster.spec.ssh_authorized_keys.clone(),
                user_data: Some(user_data),
            },
        )?
        .label(CLUSTER_LABEL, &name)
        .label(ROLE_LABEL, role))
    }

    async fn synthesize_self_managed(
        ctx: &AdapterContext,
        cluster: &mut Cluster,
    ) -> Result<Progress, ReconcileError> {
        let name = cluster.name_any();
        let owner = Owner::of(cluster)?;
        let store = ctx.store.as_ref();
        let cidr = cluster
            .spec
            .network_cidr
            .clone()
            .unwrap_or_else(|| DEFAULT_CLUSTER_CIDR.to_string());

        let mut frame = vec![Child::spec::<Network>(
            &name,
            &NetworkSpec {
                cidr_block: cidr.clone(),
                dns_label: None,
            },
        )?
        .label(NETWORK_LABEL, &name)];
        frame.extend(securities(&name, &name, &cidr, &[APISERVER_PORT])?);
        frame.push(Child::spec::<LoadBalancer>(
            &name,
            &LoadBalancerSpec {
                network: name.clone(),
                compute_selector: LabelSelector::from_labels([
                    (CLUSTER_LABEL, name.as_str()),
                    (ROLE_LABEL, "master"),
                ]),
                listeners: vec![ListenerConfig {
                    port: APISERVER_LISTENER_PORT,
                    protocol: "TCP".to_string(),
                    tls_secret: None,
                }],
                backend_port: APISERVER_PORT,
                health_check: HealthCheck {
                    port: APISERVER_PORT,
                    protocol: "TCP".to_string(),
                    url_path: String::new(),
                },
                balance_mode: String::new(),
                bandwidth: String::new(),
                label_weight_map: BTreeMap::new(),
                is_private: false,
            },
        )?);
        let lb_child = frame.pop();
        let frame: Vec<Child> = frame
            .into_iter()
            .map(|child| child.label(CLUSTER_LABEL, &name))
            .collect();
        children::ensure_all(store, &owner, &frame).await?;
        let address = match lb_child {
            Some(child) => {
                let stored = children::ensure(store, &owner, &child.label(CLUSTER_LABEL, &name)).await?;
                to_typed::<LoadBalancer>(&stored)?
                    .status
                    .and_then(|s| s.ip_address)
                    .filter(|ip| !ip.is_empty())
            }
            None => None,
        };

        let Some(address) = address else {
            return Ok(Self::await_address(cluster));
        };

        let ca = Self::cluster_ca(store, &owner, &name).await?;
        let version = cluster.spec.kubernetes_version.clone();
        let computes = [
            Self::node_compute(
                cluster,
                "master",
                &cluster.spec.master,
                master_script(&version, &ca.bootstrap_token, &address, &ca.cert_pem, &ca.key_pem),
            )?,
            Self::node_compute(
                cluster,
                "worker",
                &cluster.spec.worker,
                worker_script(&version, &ca.bootstrap_token, &address),
            )?,
        ];
        children::ensure_all(store, &owner, &computes).await?;

        let secret_name = kubeconfig_secret_name(&name);
        let server = format!("https://{address}");
        let current = match find(store, &api_resource::<Secret>(), &owner.namespace, &secret_name)
            .await?
        {
            Some(obj) => secret_text(&obj, KUBECONFIG_SECRET_KEY)?,
            None => None,
        };
        let up_to_date = current
            .as_deref()
            .and_then(kubeconfig_summary)
            .is_some_and(|(existing, _)| existing == server);
        if !up_to_date {
            let (cert, key) = ca.issue_admin(&name).map_err(pki_error)?;
            let kubeconfig =
                render_kubeconfig(&name, &server, &ca.cert_pem, &cert, &key).map_err(pki_error)?;
            let data = BTreeMap::from([(KUBECONFIG_SECRET_KEY.to_string(), kubeconfig)]);
            children::ensure(
                store,
                &owner,
                &Child::secret(&secret_name, &data).label(CLUSTER_LABEL, &name),
            )
            .await?;
            info!(cluster = %name, server = %server, "wrote admin kubeconfig");
        }

        let status = cluster.status.get_or_insert_with(Default::default);
        status.lb_wait_started = None;
        status.kubeconfig_secret = Some(secret_name.clone());
        available(&mut status.operator, &secret_name);
        Ok(Progress::Done)
    }

    /// Poll for the load balancer address until the deadline passes.
    fn await_address(cluster: &mut Cluster) -> Progress {
        let name = cluster.name_any();
        let now = Utc::now();
        let status = cluster.status.get_or_insert_with(Default::default);
        let started = status
            .lb_wait_started
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        let Some(started) = started else {
            status.lb_wait_started = Some(now.to_rfc3339());
            status.operator.state = OperatorState::Created;
            waiting(
                &mut status.operator,
                "WaitingForLoadBalancer",
                "waiting for the load balancer address",
            );
            return Progress::PollAfter(LB_READY_POLL);
        };

        let waited = (now - started).to_std().unwrap_or_default();
        if waited >= LB_READY_TIMEOUT {
            if status.operator.state != OperatorState::Error {
                warn!(cluster = %name, waited_secs = waited.as_secs(), "load balancer address never arrived");
            }
            status.operator.state = OperatorState::Error;
            waiting(
                &mut status.operator,
                "LoadBalancerTimeout",
                format!(
                    "no load balancer address after {}s",
                    LB_READY_TIMEOUT.as_secs()
                ),
            );
            return Progress::Done;
        }
        status.operator.state = OperatorState::Created;
        waiting(
            &mut status.operator,
            "WaitingForLoadBalancer",
            format!("waiting for the load balancer address ({}s)", waited.as_secs()),
        );
        Progress::PollAfter(LB_READY_POLL)
    }
}

#[async_trait]
impl CompositeAdapter for ClusterAdapter {
    type Kind = Cluster;

    fn children(&self) -> Vec<ApiResource> {
        vec![
            api_resource::<Network>(),
            api_resource::<Security>(),
            api_resource::<LoadBalancer>(),
            api_resource::<Compute>(),
            api_resource::<Subnet>(),
            api_resource::<Policy>(),
            api_resource::<CeCluster>(),
            api_resource::<NodePool>(),
            api_resource::<Secret>(),
        ]
    }

    async fn synthesize(
        &self,
        ctx: &AdapterContext,
        cluster: &mut Cluster,
    ) -> Result<Progress, ReconcileError> {
        validate_cluster(&cluster.spec)?;
        if cluster.spec.is_managed {
            Self::synthesize_managed(ctx, cluster).await
        } else {
            Self::synthesize_self_managed(ctx, cluster).await
        }
    }

    async fn teardown(
        &self,
        ctx: &AdapterContext,
        cluster: &mut Cluster,
    ) -> Result<Progress, ReconcileError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let owner = Owner::of(cluster)?;
        let store = ctx.store.as_ref();
        let stages = [
            vec![api_resource::<NodePool>(), api_resource::<Compute>()],
            vec![api_resource::<CeCluster>(), api_resource::<LoadBalancer>()],
            vec![api_resource::<Subnet>(), api_resource::<Security>()],
            vec![api_resource::<Network>()],
            vec![api_resource::<Policy>(), api_resource::<Secret>()],
        ];
        if !children::teardown(store, &owner, &stages).await?.is_done() {
            let status = cluster.status.get_or_insert_with(Default::default);
            waiting(
                &mut status.operator,
                "Deleting",
                "waiting for cluster resources to be deleted",
            );
            return Ok(Progress::Pending);
        }
        if let Some(network) = cluster.spec.network.as_deref().filter(|_| cluster.spec.is_managed) {
            release(store, &namespace, network, &placement_key(cluster)).await?;
            release(store, &namespace, network, &lb_placement_key(cluster)).await?;
        }
        Ok(Progress::Done)
    }
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod cluster_tests;
