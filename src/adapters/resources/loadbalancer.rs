// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Load balancer primitives.
//!
//! The load balancer owns backend sets, listeners and certificates; a backend
//! lives inside its backend set and targets one instance's private address.

use super::{ids_of, in_compartment, required_secret_value, secret_value};
use crate::adapters::{AdapterContext, ParentRef, Parents, PrimitiveAdapter};
use crate::cloud::{CloudRequest, ResourceType};
use crate::crd::resources::{
    Backend, BackendSet, Certificate, Instance, Listener, LoadBalancer, Subnet,
};
use crate::errors::ReconcileError;
use crate::validation::{validate_backend, validate_listener};
use async_trait::async_trait;
use kube::ResourceExt;
use sha2::{Digest, Sha256};

pub struct LoadBalancerAdapter;

#[async_trait]
impl PrimitiveAdapter for LoadBalancerAdapter {
    type Kind = LoadBalancer;
    const RESOURCE_TYPE: ResourceType = ResourceType::LoadBalancer;

    fn check(&self, obj: &LoadBalancer) -> Result<(), ReconcileError> {
        if obj.spec.subnet_refs.is_empty() {
            return Err(ReconcileError::validation(
                "spec.subnetRefs",
                "at least one subnet is required",
            ));
        }
        Ok(())
    }

    fn parent_refs(&self, obj: &LoadBalancer) -> Vec<ParentRef> {
        in_compartment(
            obj,
            obj.spec.subnet_refs.iter().map(ParentRef::of::<Subnet>),
        )
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &LoadBalancer,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let subnet_ids = ids_of(parents, "Subnet", &obj.spec.subnet_refs)?;
        Ok(CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .attr("shapeName", obj.spec.shape.clone())
            .attr("subnetIds", subnet_ids.join(","))
            .attr("isPrivate", obj.spec.is_private.to_string()))
    }
}

pub struct BackendSetAdapter;

#[async_trait]
impl PrimitiveAdapter for BackendSetAdapter {
    type Kind = BackendSet;
    const RESOURCE_TYPE: ResourceType = ResourceType::BackendSet;

    fn parent_refs(&self, obj: &BackendSet) -> Vec<ParentRef> {
        in_compartment(
            obj,
            [ParentRef::of::<LoadBalancer>(&obj.spec.load_balancer_ref)],
        )
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &BackendSet,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let lb_id = parents.id("LoadBalancer", &obj.spec.load_balancer_ref)?;
        let checker = &obj.spec.health_checker;
        Ok(CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .with_parent(&lb_id)
            .attr("loadBalancerId", lb_id.clone())
            .attr("policy", obj.spec.policy.clone())
            .attr(
                "healthChecker",
                format!("{}:{}:{}", checker.protocol, checker.port, checker.url_path),
            ))
    }
}

/// Backends target an instance, resolved to its private address.
pub struct BackendAdapter;

#[async_trait]
impl PrimitiveAdapter for BackendAdapter {
    type Kind = Backend;
    const RESOURCE_TYPE: ResourceType = ResourceType::Backend;

    fn check(&self, obj: &Backend) -> Result<(), ReconcileError> {
        validate_backend(&obj.spec)
    }

    fn parent_refs(&self, obj: &Backend) -> Vec<ParentRef> {
        in_compartment(
            obj,
            [
                ParentRef::of::<BackendSet>(&obj.spec.backend_set_ref),
                ParentRef::of::<Instance>(&obj.spec.instance_ref),
            ],
        )
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &Backend,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let backend_set_id = parents.id("BackendSet", &obj.spec.backend_set_ref)?;
        let address = parents
            .resource("Instance", &obj.spec.instance_ref)
            .and_then(|instance| instance.attributes.get("privateIp").cloned())
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| {
                ReconcileError::Transient(format!(
                    "instance '{}' has no private address yet",
                    obj.spec.instance_ref
                ))
            })?;
        Ok(CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .with_parent(&backend_set_id)
            .attr("backendSetId", backend_set_id.clone())
            .attr("ipAddress", address)
            .attr("port", obj.spec.port.to_string())
            .attr("weight", obj.spec.weight.to_string()))
    }
}

pub struct ListenerAdapter;

#[async_trait]
impl PrimitiveAdapter for ListenerAdapter {
    type Kind = Listener;
    const RESOURCE_TYPE: ResourceType = ResourceType::Listener;

    fn check(&self, obj: &Listener) -> Result<(), ReconcileError> {
        validate_listener(&obj.spec)
    }

    fn parent_refs(&self, obj: &Listener) -> Vec<ParentRef> {
        let mut refs = vec![
            ParentRef::of::<LoadBalancer>(&obj.spec.load_balancer_ref),
            ParentRef::of::<BackendSet>(&obj.spec.backend_set_ref),
        ];
        if let Some(certificate) = &obj.spec.certificate_ref {
            refs.push(ParentRef::of::<Certificate>(certificate));
        }
        in_compartment(obj, refs)
    }

    async fn request(
        &self,
        _ctx: &AdapterContext,
        obj: &Listener,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let lb_id = parents.id("LoadBalancer", &obj.spec.load_balancer_ref)?;
        let certificates = obj.spec.certificate_ref.iter().cloned().collect::<Vec<_>>();
        Ok(CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .with_parent(&lb_id)
            .attr("loadBalancerId", lb_id.clone())
            .attr("backendSetId", parents.id("BackendSet", &obj.spec.backend_set_ref)?)
            .attr("port", obj.spec.port.to_string())
            .attr("protocol", obj.spec.protocol.clone())
            .attr("certificateId", ids_of(parents, "Certificate", &certificates)?.join(",")))
    }
}

/// Certificates are uploaded from a TLS Secret. Only a digest of the PEM
/// material is compared, so a rotated Secret triggers an update.
pub struct CertificateAdapter;

#[async_trait]
impl PrimitiveAdapter for CertificateAdapter {
    type Kind = Certificate;
    const RESOURCE_TYPE: ResourceType = ResourceType::Certificate;

    fn parent_refs(&self, obj: &Certificate) -> Vec<ParentRef> {
        in_compartment(
            obj,
            [ParentRef::of::<LoadBalancer>(&obj.spec.load_balancer_ref)],
        )
    }

    async fn request(
        &self,
        ctx: &AdapterContext,
        obj: &Certificate,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let namespace = obj.namespace().unwrap_or_default();
        let secret = &obj.spec.secret_ref;
        let certificate = required_secret_value(ctx, &namespace, secret, "tls.crt").await?;
        let private_key = required_secret_value(ctx, &namespace, secret, "tls.key").await?;
        let ca = secret_value(ctx, &namespace, secret, "ca.crt")
            .await?
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(certificate.as_bytes());
        hasher.update(private_key.as_bytes());
        hasher.update(ca.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        let lb_id = parents.id("LoadBalancer", &obj.spec.load_balancer_ref)?;
        let mut request = CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .with_parent(&lb_id)
            .attr("loadBalancerId", lb_id.clone())
            .attr("certificateDigest", digest)
            .sensitive("publicCertificate", certificate)
            .sensitive("privateKey", private_key);
        if !ca.is_empty() {
            request = request.sensitive("caCertificate", ca);
        }
        Ok(request)
    }
}
