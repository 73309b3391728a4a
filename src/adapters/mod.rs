// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Adapter contracts.
//!
//! Three families of adapters plug into the controllers:
//!
//! - [`ResourceAdapter`] - one per primitive kind. Maps a record one-to-one
//!   to a cloud object and reports the record's parents.
//! - [`CloudAdapter`] - one per composite kind. Decomposes a record into
//!   primitive (or other composite) records in the store.
//! - [`HostAdapter`] - reconciles kinds owned by the host system, such as a
//!   `Namespace`.
//!
//! Kind implementations are written against the typed traits
//! [`PrimitiveAdapter`] and [`CompositeAdapter`]; blanket impls erase them to
//! the [`DynamicObject`]-based traits the controllers dispatch on.

pub mod cloud;
pub mod host;
pub mod resources;

use crate::cloud::{CloudApi, CloudRequest, ResourceType};
use crate::crd::resources::Compartment;
use crate::crd::{
    CloudResource, Composite, LabelSelector, LifecycleState, OperatorState, Primitive,
    ResourceState, ResourceStatus,
};
use crate::dependency::{resource_id, resource_status, set_resource_status};
use crate::errors::{CloudError, ReconcileError};
use crate::store::{api_resource, object_key, to_dynamic, to_typed, ObjectStore};
use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use kube::Resource;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Condition type written by every adapter.
pub const CONDITION_READY: &str = "Ready";

/// Collaborators handed to every adapter call.
#[derive(Clone)]
pub struct AdapterContext {
    pub store: Arc<dyn ObjectStore>,
    pub cloud: Arc<dyn CloudApi>,
}

impl AdapterContext {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, cloud: Arc<dyn CloudApi>) -> Self {
        Self { store, cloud }
    }
}

/// Outcome of one adapter step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// Converged
    Done,
    /// Something is still converging; retry after the controller backoff
    Pending,
    /// Retry after the given delay
    PollAfter(Duration),
}

impl Progress {
    #[must_use]
    pub fn is_done(self) -> bool {
        self == Progress::Done
    }
}

/// A parent named by a `*Ref` field, in the child's namespace.
#[derive(Clone, Debug)]
pub struct ParentRef {
    pub ar: ApiResource,
    pub name: String,
}

impl ParentRef {
    #[must_use]
    pub fn of<K: Resource<DynamicType = ()>>(name: impl Into<String>) -> Self {
        Self {
            ar: api_resource::<K>(),
            name: name.into(),
        }
    }
}

/// Parents discovered by label, in the child's namespace.
#[derive(Clone, Debug)]
pub struct ParentSelector {
    pub ar: ApiResource,
    pub selector: LabelSelector,
}

impl ParentSelector {
    #[must_use]
    pub fn of<K: Resource<DynamicType = ()>>(selector: LabelSelector) -> Self {
        Self {
            ar: api_resource::<K>(),
            selector,
        }
    }
}

/// The namespace's own `Compartment`, an implicit parent of every other primitive.
#[must_use]
pub fn namespace_compartment(namespace: &str) -> ParentRef {
    ParentRef::of::<Compartment>(namespace)
}

/// Parents resolved for one reconcile, by kind then name.
#[derive(Clone, Debug, Default)]
pub struct Parents {
    namespace: String,
    objects: BTreeMap<String, BTreeMap<String, DynamicObject>>,
}

impl Parents {
    #[must_use]
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            objects: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, kind: &str, obj: DynamicObject) {
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.objects
            .entry(kind.to_string())
            .or_default()
            .insert(name, obj);
    }

    #[must_use]
    pub fn get(&self, kind: &str, name: &str) -> Option<&DynamicObject> {
        self.objects.get(kind).and_then(|by_name| by_name.get(name))
    }

    /// Observed cloud object of a parent.
    #[must_use]
    pub fn resource(&self, kind: &str, name: &str) -> Option<CloudResource> {
        self.get(kind, name).and_then(|obj| resource_status(obj).resource)
    }

    /// Cloud id of a parent.
    ///
    /// # Errors
    ///
    /// Returns a transient error when the parent was not resolved or has no id yet.
    pub fn id(&self, kind: &str, name: &str) -> Result<String, ReconcileError> {
        self.get(kind, name)
            .map(resource_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ReconcileError::Transient(format!("parent {kind} '{name}' has no cloud id yet"))
            })
    }

    /// Cloud ids of every resolved parent of a kind, ordered by name.
    #[must_use]
    pub fn ids(&self, kind: &str) -> Vec<String> {
        self.objects
            .get(kind)
            .into_iter()
            .flat_map(BTreeMap::values)
            .map(resource_id)
            .filter(|id| !id.is_empty())
            .collect()
    }

    /// Id of the namespace compartment.
    ///
    /// # Errors
    ///
    /// Returns a transient error when the compartment has no id yet.
    pub fn compartment_id(&self) -> Result<String, ReconcileError> {
        self.id("Compartment", &self.namespace)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DynamicObject)> {
        self.objects
            .iter()
            .flat_map(|(kind, by_name)| by_name.values().map(move |o| (kind.as_str(), o)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Resource adapters
// ============================================================================

/// Typed description of a primitive kind.
#[async_trait]
pub trait PrimitiveAdapter: Send + Sync + 'static {
    type Kind: Primitive;

    /// Cloud type the kind maps to
    const RESOURCE_TYPE: ResourceType;

    /// Field checks run before any parent lookup.
    fn check(&self, _obj: &Self::Kind) -> Result<(), ReconcileError> {
        Ok(())
    }

    /// Parents named by reference.
    fn parent_refs(&self, obj: &Self::Kind) -> Vec<ParentRef>;

    /// Parents discovered by label.
    fn parent_selectors(&self, _obj: &Self::Kind) -> Vec<ParentSelector> {
        Vec::new()
    }

    /// Desired cloud state, built once every parent is ready.
    async fn request(
        &self,
        ctx: &AdapterContext,
        obj: &Self::Kind,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError>;
}

/// Kind-erased primitive adapter driven by the resource controller.
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    fn api_resource(&self) -> ApiResource;

    fn resource_type(&self) -> ResourceType;

    /// # Errors
    ///
    /// Returns a validation error naming the offending field.
    fn validate(&self, obj: &DynamicObject) -> Result<(), ReconcileError>;

    /// Label-selected parents.
    ///
    /// # Errors
    ///
    /// Returns an error when the record does not match its kind.
    fn depends_on(&self, obj: &DynamicObject) -> Result<Vec<ParentSelector>, ReconcileError>;

    /// Named parents.
    ///
    /// # Errors
    ///
    /// Returns an error when the record does not match its kind.
    fn depends_on_refs(&self, obj: &DynamicObject) -> Result<Vec<ParentRef>, ReconcileError>;

    /// # Errors
    ///
    /// Returns an error when a parent is missing or a referenced Secret is unusable.
    async fn desired(
        &self,
        ctx: &AdapterContext,
        obj: &DynamicObject,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError>;

    fn id(&self, obj: &DynamicObject) -> String {
        resource_id(obj)
    }

    /// child kind → keys registered on this record
    fn dependents(&self, obj: &DynamicObject) -> BTreeMap<String, std::collections::BTreeSet<String>> {
        resource_status(obj).dependents
    }

    /// Create the cloud object and reflect it into status.
    ///
    /// # Errors
    ///
    /// Returns the cloud error.
    async fn create(
        &self,
        ctx: &AdapterContext,
        obj: &mut DynamicObject,
        desired: &CloudRequest,
    ) -> Result<Progress, ReconcileError> {
        let resource_type = self.resource_type();
        let created = ctx.cloud.create(resource_type, desired).await?;
        info!(
            resource_type = %resource_type,
            key = %object_key(obj),
            id = %created.id,
            "created cloud resource"
        );
        let mut status = resource_status(obj);
        status.message = format!("{resource_type} {} requested", created.id);
        let progress = reflect(&mut status, created);
        set_resource_status(obj, &status)?;
        Ok(progress)
    }

    /// Refresh the observed cloud object.
    ///
    /// A vanished object clears `status.resource` so the next reconcile
    /// creates it again.
    ///
    /// # Errors
    ///
    /// Returns the cloud error, or an error when the object failed.
    async fn get(
        &self,
        ctx: &AdapterContext,
        obj: &mut DynamicObject,
    ) -> Result<Progress, ReconcileError> {
        let resource_type = self.resource_type();
        let id = self.id(obj);
        let mut status = resource_status(obj);
        let progress = match ctx.cloud.get(resource_type, &id).await {
            Ok(observed) if observed.lifecycle_state == LifecycleState::Failed => {
                return Err(CloudError::Other(format!("{resource_type} {id} failed")).into());
            }
            Ok(observed) if observed.lifecycle_state != LifecycleState::Terminated => {
                reflect(&mut status, observed)
            }
            Err(e) if !e.is_not_found() => return Err(e.into()),
            _ => {
                warn!(resource_type = %resource_type, id = %id, key = %object_key(obj), "cloud resource disappeared, recreating");
                status.resource = None;
                status.state = ResourceState::Pending;
                status.message = format!("{resource_type} {id} disappeared");
                Progress::Pending
            }
        };
        set_resource_status(obj, &status)?;
        Ok(progress)
    }

    /// Push the desired state to an existing cloud object.
    ///
    /// # Errors
    ///
    /// Returns the cloud error.
    async fn update(
        &self,
        ctx: &AdapterContext,
        obj: &mut DynamicObject,
        desired: &CloudRequest,
    ) -> Result<Progress, ReconcileError> {
        let resource_type = self.resource_type();
        let id = self.id(obj);
        let updated = ctx.cloud.update(resource_type, &id, desired).await?;
        info!(resource_type = %resource_type, id = %id, key = %object_key(obj), "updated cloud resource");
        let mut status = resource_status(obj);
        status.state = ResourceState::Processing;
        status.message = format!("{resource_type} {id} updated");
        let progress = reflect(&mut status, updated);
        set_resource_status(obj, &status)?;
        Ok(progress)
    }

    /// Destroy the cloud object. `Pending` while the cloud is terminating it.
    ///
    /// # Errors
    ///
    /// Returns the cloud error.
    async fn delete(
        &self,
        ctx: &AdapterContext,
        obj: &mut DynamicObject,
    ) -> Result<Progress, ReconcileError> {
        let resource_type = self.resource_type();
        let id = self.id(obj);
        if id.is_empty() {
            return Ok(Progress::Done);
        }
        let mut status = resource_status(obj);
        let terminating = status
            .resource
            .as_ref()
            .is_some_and(|r| r.lifecycle_state == LifecycleState::Terminating);

        if !terminating {
            match ctx.cloud.delete(resource_type, &id).await {
                Ok(()) => {
                    info!(resource_type = %resource_type, id = %id, key = %object_key(obj), "deleting cloud resource");
                }
                Err(e) if e.is_not_found() => {
                    status.resource = None;
                    set_resource_status(obj, &status)?;
                    return Ok(Progress::Done);
                }
                Err(CloudError::Conflict { reason, .. }) => {
                    debug!(resource_type = %resource_type, id = %id, reason = %reason, "cloud refused delete");
                    status.message = format!("delete of {resource_type} {id} refused: {reason}");
                    set_resource_status(obj, &status)?;
                    return Ok(Progress::Pending);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let progress = match ctx.cloud.get(resource_type, &id).await {
            Ok(observed) if observed.lifecycle_state != LifecycleState::Terminated => {
                status.message = format!("{resource_type} {id} terminating");
                status.resource = Some(observed);
                Progress::Pending
            }
            Err(e) if !e.is_not_found() => return Err(e.into()),
            _ => {
                status.resource = None;
                status.message = format!("{resource_type} {id} deleted");
                Progress::Done
            }
        };
        set_resource_status(obj, &status)?;
        Ok(progress)
    }

    /// Desired state ≡ observed state.
    fn is_compliant(&self, desired: &CloudRequest, obj: &DynamicObject) -> bool {
        resource_status(obj)
            .resource
            .as_ref()
            .is_some_and(|observed| desired.is_satisfied_by(observed))
    }

    /// A status change that must be written back.
    fn is_status_changed(&self, old: &DynamicObject, new: &DynamicObject) -> bool {
        resource_status(old) != resource_status(new)
    }
}

/// Reflect an observed object; transitional states keep the record `Processing`.
fn reflect(status: &mut ResourceStatus, observed: CloudResource) -> Progress {
    let transitional = observed.lifecycle_state.is_transitional();
    status.resource = Some(observed);
    if transitional {
        status.state = ResourceState::Processing;
        status.add_condition(CONDITION_READY, "Provisioning");
        Progress::Pending
    } else {
        Progress::Done
    }
}

#[async_trait]
impl<T: PrimitiveAdapter> ResourceAdapter for T {
    fn api_resource(&self) -> ApiResource {
        api_resource::<T::Kind>()
    }

    fn resource_type(&self) -> ResourceType {
        T::RESOURCE_TYPE
    }

    fn validate(&self, obj: &DynamicObject) -> Result<(), ReconcileError> {
        self.check(&to_typed::<T::Kind>(obj)?)
    }

    fn depends_on(&self, obj: &DynamicObject) -> Result<Vec<ParentSelector>, ReconcileError> {
        Ok(self.parent_selectors(&to_typed::<T::Kind>(obj)?))
    }

    fn depends_on_refs(&self, obj: &DynamicObject) -> Result<Vec<ParentRef>, ReconcileError> {
        Ok(self.parent_refs(&to_typed::<T::Kind>(obj)?))
    }

    async fn desired(
        &self,
        ctx: &AdapterContext,
        obj: &DynamicObject,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let typed: T::Kind = to_typed(obj)?;
        self.request(ctx, &typed, parents).await
    }
}

// ============================================================================
// Cloud adapters
// ============================================================================

/// Typed description of a composite kind.
#[async_trait]
pub trait CompositeAdapter: Send + Sync + 'static {
    type Kind: Composite;

    /// Kinds of the records this composite produces.
    fn children(&self) -> Vec<ApiResource>;

    /// Converge the child graph toward the record's `spec`. Idempotent.
    async fn synthesize(
        &self,
        ctx: &AdapterContext,
        obj: &mut Self::Kind,
    ) -> Result<Progress, ReconcileError>;

    /// Tear the child graph down. `Done` once every child is gone.
    async fn teardown(
        &self,
        ctx: &AdapterContext,
        obj: &mut Self::Kind,
    ) -> Result<Progress, ReconcileError>;
}

/// Kind-erased composite adapter driven by the cloud controller.
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    fn api_resource(&self) -> ApiResource;

    /// Child kinds whose events re-enqueue the owning composite.
    fn subscriptions(&self) -> Vec<ApiResource>;

    /// # Errors
    ///
    /// Returns the reconcile failure.
    async fn reconcile(
        &self,
        ctx: &AdapterContext,
        obj: &mut DynamicObject,
    ) -> Result<Progress, ReconcileError>;

    /// # Errors
    ///
    /// Returns the teardown failure.
    async fn delete(
        &self,
        ctx: &AdapterContext,
        obj: &mut DynamicObject,
    ) -> Result<Progress, ReconcileError>;

    /// `true` when writing `b` over `a` would change nothing the controller owns.
    fn equivalent(&self, a: &DynamicObject, b: &DynamicObject) -> bool {
        a.metadata.labels == b.metadata.labels
            && a.metadata.finalizers == b.metadata.finalizers
            && a.data.get("status") == b.data.get("status")
    }

    /// Record a terminal failure in status.
    ///
    /// # Errors
    ///
    /// Returns an error when the record does not match its kind.
    fn mark_error(&self, obj: &mut DynamicObject, err: &ReconcileError) -> Result<(), ReconcileError>;
}

#[async_trait]
impl<T: CompositeAdapter> CloudAdapter for T {
    fn api_resource(&self) -> ApiResource {
        api_resource::<T::Kind>()
    }

    fn subscriptions(&self) -> Vec<ApiResource> {
        self.children()
    }

    async fn reconcile(
        &self,
        ctx: &AdapterContext,
        obj: &mut DynamicObject,
    ) -> Result<Progress, ReconcileError> {
        let mut typed: T::Kind = to_typed(obj)?;
        let progress = self.synthesize(ctx, &mut typed).await?;
        *obj = to_dynamic(&typed)?;
        Ok(progress)
    }

    async fn delete(
        &self,
        ctx: &AdapterContext,
        obj: &mut DynamicObject,
    ) -> Result<Progress, ReconcileError> {
        let mut typed: T::Kind = to_typed(obj)?;
        let progress = self.teardown(ctx, &mut typed).await?;
        *obj = to_dynamic(&typed)?;
        Ok(progress)
    }

    fn mark_error(&self, obj: &mut DynamicObject, err: &ReconcileError) -> Result<(), ReconcileError> {
        let mut typed: T::Kind = to_typed(obj)?;
        let status = typed.operator_status_mut();
        status.state = OperatorState::Error;
        status.message = err.to_string();
        status.set_condition(CONDITION_READY, err.reason(), &err.to_string());
        *obj = to_dynamic(&typed)?;
        Ok(())
    }
}

// ============================================================================
// Host adapters
// ============================================================================

/// Reconciler of a host-system kind. Owns its finalizer handling.
#[async_trait]
pub trait HostAdapter: Send + Sync {
    fn api_resource(&self) -> ApiResource;

    /// # Errors
    ///
    /// Returns the reconcile failure.
    async fn reconcile(
        &self,
        ctx: &AdapterContext,
        obj: &mut DynamicObject,
    ) -> Result<Progress, ReconcileError>;
}
