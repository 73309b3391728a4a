// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cloud controller: drives a composite adapter.
//!
//! The composite gets [`CLOUD_FINALIZER`] before any child is synthesized; the
//! finalizer is written on its own so a delete racing the first reconcile
//! still finds it. On deletion the adapter tears the child graph down and the
//! finalizer is cleared once it reports `Done`.

use super::{Outcome, Reconciler, RetryPolicy};
use crate::adapters::{AdapterContext, CloudAdapter};
use crate::constants::{CLOUD_FINALIZER, CLOUD_MAX_REQUEUES, CLOUD_RETRY_BACKOFF, CLOUD_RETRY_CAP};
use crate::dependency::{add_finalizer, has_finalizer, is_deleting, remove_finalizer};
use crate::errors::ReconcileError;
use crate::store::object_key;
use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use std::sync::Arc;
use tracing::{debug, info};

pub struct CloudReconciler {
    adapter: Arc<dyn CloudAdapter>,
    ctx: AdapterContext,
}

impl CloudReconciler {
    #[must_use]
    pub fn new(adapter: Arc<dyn CloudAdapter>, ctx: AdapterContext) -> Self {
        Self { adapter, ctx }
    }

    fn outcome(&self, original: &DynamicObject, obj: DynamicObject) -> Outcome {
        if self.adapter.equivalent(original, &obj) {
            Outcome::done()
        } else {
            Outcome::changed(original, obj)
        }
    }
}

#[async_trait]
impl Reconciler for CloudReconciler {
    fn api_resource(&self) -> ApiResource {
        self.adapter.api_resource()
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_cap: CLOUD_RETRY_CAP,
            retry_backoff: CLOUD_RETRY_BACKOFF,
            error_cap: CLOUD_MAX_REQUEUES,
        }
    }

    async fn reconcile(&self, original: &DynamicObject) -> Result<Outcome, ReconcileError> {
        let kind = self.adapter.api_resource().kind;
        let mut obj = original.clone();

        if is_deleting(&obj) {
            if !has_finalizer(&obj, CLOUD_FINALIZER) {
                return Ok(Outcome::done());
            }
            let progress = self.adapter.delete(&self.ctx, &mut obj).await?;
            if progress.is_done() {
                remove_finalizer(&mut obj, CLOUD_FINALIZER);
                info!(kind = %kind, key = %object_key(&obj), "composite torn down");
            }
            return Ok(self.outcome(original, obj).follow(progress, CLOUD_RETRY_BACKOFF));
        }

        if add_finalizer(&mut obj, CLOUD_FINALIZER) {
            debug!(kind = %kind, key = %object_key(&obj), "added finalizer");
            // The write re-enqueues the key through the informer
            return Ok(Outcome::changed(original, obj));
        }

        let progress = self.adapter.reconcile(&self.ctx, &mut obj).await?;
        Ok(self.outcome(original, obj).follow(progress, CLOUD_RETRY_BACKOFF))
    }

    fn mark_error(&self, obj: &DynamicObject, err: &ReconcileError) -> Option<DynamicObject> {
        let mut marked = obj.clone();
        self.adapter.mark_error(&mut marked, err).ok()?;
        Some(marked)
    }
}

#[cfg(test)]
#[path = "cloud_tests.rs"]
mod cloud_tests;
