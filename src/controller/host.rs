// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Host controller: drives a host adapter over a kind the process does not own.
//!
//! Host adapters handle their own finalizer; the controller only writes the
//! record back when they changed its metadata.

use super::{Outcome, Reconciler, RetryPolicy};
use crate::adapters::{AdapterContext, HostAdapter};
use crate::constants::{CONTROLLER_ERROR_CAP, HOST_RETRY_BACKOFF, HOST_RETRY_CAP};
use crate::errors::ReconcileError;
use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use std::sync::Arc;

pub struct HostReconciler {
    adapter: Arc<dyn HostAdapter>,
    ctx: AdapterContext,
}

impl HostReconciler {
    #[must_use]
    pub fn new(adapter: Arc<dyn HostAdapter>, ctx: AdapterContext) -> Self {
        Self { adapter, ctx }
    }
}

#[async_trait]
impl Reconciler for HostReconciler {
    fn api_resource(&self) -> ApiResource {
        self.adapter.api_resource()
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_cap: HOST_RETRY_CAP,
            retry_backoff: HOST_RETRY_BACKOFF,
            error_cap: CONTROLLER_ERROR_CAP,
        }
    }

    async fn reconcile(&self, original: &DynamicObject) -> Result<Outcome, ReconcileError> {
        let mut obj = original.clone();
        let progress = self.adapter.reconcile(&self.ctx, &mut obj).await?;
        Ok(Outcome::changed(original, obj).follow(progress, HOST_RETRY_BACKOFF))
    }

    fn mark_error(&self, _obj: &DynamicObject, _err: &ReconcileError) -> Option<DynamicObject> {
        None
    }
}
