// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Schema registration at startup.
//!
//! Every owned kind gets its `CustomResourceDefinition` registered before any
//! informer starts:
//!
//! - a missing schema is created
//! - an existing schema whose `spec` differs is replaced, carrying the
//!   server's resourceVersion
//! - the call then polls until the schema reports `Established=True`
//!
//! A schema created by this call that never becomes established is deleted
//! again. Schemas that already existed are left in place, since deleting them
//! would delete every record of the kind.

use crate::constants::{SCHEMA_ESTABLISH_TIMEOUT, SCHEMA_POLL_INTERVAL};
use crate::errors::StoreError;
use crate::retry::retry_api_call;
use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const KIND: &str = "CustomResourceDefinition";

/// Schema registration failures. All of them stop the process.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("schema without metadata.name")]
    Unnamed,

    #[error("failed to register schema {name}: {source}")]
    Store {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("schema {name} not established within {timeout:?}")]
    NotEstablished { name: String, timeout: Duration },
}

/// The schema endpoints registration needs.
#[async_trait]
pub trait SchemaApi: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<CustomResourceDefinition>, StoreError>;

    async fn create(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, StoreError>;

    /// Replace under optimistic concurrency on `crd`'s resourceVersion.
    async fn replace(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, StoreError>;

    async fn delete(&self, name: &str) -> Result<(), StoreError>;
}

/// [`SchemaApi`] on the API server.
pub struct KubeSchemaApi {
    api: Api<CustomResourceDefinition>,
}

impl KubeSchemaApi {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

fn name_of(crd: &CustomResourceDefinition) -> String {
    crd.metadata.name.clone().unwrap_or_default()
}

#[async_trait]
impl SchemaApi for KubeSchemaApi {
    async fn get(&self, name: &str) -> Result<Option<CustomResourceDefinition>, StoreError> {
        retry_api_call(|| self.api.get_opt(name), &format!("get schema {name}"))
            .await
            .map_err(|e| StoreError::from_kube(e, KIND, name))
    }

    async fn create(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, StoreError> {
        let name = name_of(crd);
        self.api
            .create(&PostParams::default(), crd)
            .await
            .map_err(|e| StoreError::from_kube(e, KIND, &name))
    }

    async fn replace(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, StoreError> {
        let name = name_of(crd);
        self.api
            .replace(&name, &PostParams::default(), crd)
            .await
            .map_err(|e| StoreError::from_kube(e, KIND, &name))
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match StoreError::from_kube(e, KIND, name) {
                StoreError::NotFound { .. } => Ok(()),
                other => Err(other),
            },
        }
    }
}

/// `Established=True` is reported.
#[must_use]
pub fn is_established(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Established" && c.status == "True")
        })
}

/// Register every schema in order, stopping at the first failure.
///
/// # Errors
///
/// Returns the first registration failure.
pub async fn register_all(
    api: &dyn SchemaApi,
    crds: &[CustomResourceDefinition],
) -> Result<(), SchemaError> {
    for crd in crds {
        register(api, crd, SCHEMA_POLL_INTERVAL, SCHEMA_ESTABLISH_TIMEOUT).await?;
    }
    info!(count = crds.len(), "schemas registered");
    Ok(())
}

/// Register one schema and wait for it to be established.
///
/// # Errors
///
/// Returns a store failure, or [`SchemaError::NotEstablished`] once `timeout`
/// passed without the schema being established.
pub async fn register(
    api: &dyn SchemaApi,
    crd: &CustomResourceDefinition,
    poll: Duration,
    timeout: Duration,
) -> Result<CustomResourceDefinition, SchemaError> {
    let name = crd.metadata.name.clone().ok_or(SchemaError::Unnamed)?;
    let store_err = |source: StoreError| SchemaError::Store {
        name: name.clone(),
        source,
    };

    let (written, created) = match api.get(&name).await.map_err(store_err)? {
        None => {
            info!(schema = %name, "creating schema");
            (api.create(crd).await.map_err(store_err)?, true)
        }
        Some(existing) if existing.spec == crd.spec => {
            debug!(schema = %name, "schema up to date");
            (existing, false)
        }
        Some(existing) => {
            info!(schema = %name, "updating schema");
            let mut next = crd.clone();
            next.metadata
                .resource_version
                .clone_from(&existing.metadata.resource_version);
            (api.replace(&next).await.map_err(store_err)?, false)
        }
    };
    if is_established(&written) {
        return Ok(written);
    }

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        tokio::time::sleep(poll).await;
        if let Some(current) = api.get(&name).await.map_err(store_err)? {
            if is_established(&current) {
                debug!(schema = %name, "schema established");
                return Ok(current);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
    }

    warn!(schema = %name, timeout = ?timeout, "schema not established");
    if created {
        if let Err(e) = api.delete(&name).await {
            warn!(schema = %name, error = %e, "failed to roll back schema");
        }
    }
    Err(SchemaError::NotEstablished { name, timeout })
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod schema_tests;
