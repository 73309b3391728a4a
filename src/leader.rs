// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Lease-based leader election.
//!
//! Only the holder of the `coordination.k8s.io/v1` Lease runs controllers.
//! Other replicas block in [`LeaderElector::acquire`] until the lease is
//! free. The lease lasts [`LEASE_DURATION_SECS`] and is renewed every
//! [`LEASE_RENEW_SECS`]; losing it is fatal to the process.

use crate::constants::{LEASE_DURATION_SECS, LEASE_NAME, LEASE_RENEW_SECS, LEASE_RETRY_SECS};
use crate::metrics::{record_leader_elected, record_leader_lost};
use kube::Client;
use kube_lease_manager::{LeaseManager, LeaseManagerBuilder};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Service-account file holding the pod's namespace
const SERVICE_ACCOUNT_NAMESPACE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Namespace of the lease: explicit value, then the service account's, then `default`.
#[must_use]
pub fn detect_namespace(explicit: Option<&str>) -> String {
    if let Some(ns) = explicit.filter(|ns| !ns.is_empty()) {
        return ns.to_string();
    }
    std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE)
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| "default".to_string())
}

/// Holder identity: `POD_NAME`, then `HOSTNAME`, then a random suffix.
#[must_use]
pub fn detect_identity() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("cloudplane-{:08x}", rand::random::<u32>()))
}

/// Grace before expiry at which the holder renews.
#[must_use]
pub fn renew_grace_secs() -> u64 {
    LEASE_DURATION_SECS.saturating_sub(LEASE_RENEW_SECS)
}

/// Competes for the lease.
pub struct LeaderElector {
    client: Client,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    #[must_use]
    pub fn new(client: Client, namespace: &str, identity: String) -> Self {
        info!(identity = %identity, namespace = %namespace, lease = LEASE_NAME, "initialized leader elector");
        Self {
            client,
            namespace: namespace.to_string(),
            identity,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    async fn manager(&self) -> Result<LeaseManager, kube_lease_manager::LeaseManagerError> {
        LeaseManagerBuilder::new(self.client.clone(), LEASE_NAME)
            .with_namespace(self.namespace.clone())
            .with_identity(self.identity.clone())
            .with_duration(LEASE_DURATION_SECS)
            .with_grace(renew_grace_secs())
            .build()
            .await
    }

    /// Block until the lease is held.
    ///
    /// Errors talking to the API server are retried every
    /// [`LEASE_RETRY_SECS`].
    pub async fn acquire(&self) -> Leadership {
        let retry = Duration::from_secs(LEASE_RETRY_SECS);
        info!(identity = %self.identity, lease = LEASE_NAME, "waiting for leader lease");
        loop {
            let manager = match self.manager().await {
                Ok(manager) => manager,
                Err(e) => {
                    warn!(error = %e, retry = ?retry, "failed to set up lease manager");
                    tokio::time::sleep(retry).await;
                    continue;
                }
            };
            let (mut channel, task) = manager.watch().await;
            loop {
                if *channel.borrow_and_update() {
                    info!(identity = %self.identity, "acquired leader lease");
                    record_leader_elected(&self.identity);
                    return Leadership {
                        identity: self.identity.clone(),
                        channel,
                        task,
                    };
                }
                if channel.changed().await.is_err() {
                    break;
                }
            }
            // The lease task ended before we got the lease
            match task.await {
                Ok(Err(e)) => warn!(error = %e, retry = ?retry, "lease manager failed"),
                Err(e) => warn!(error = %e, retry = ?retry, "lease manager task failed"),
                Ok(Ok(_)) => debug!("lease manager stopped"),
            }
            tokio::time::sleep(retry).await;
        }
    }
}

/// A held lease. Renewal runs in the background until [`Leadership::release`].
pub struct Leadership {
    identity: String,
    channel: watch::Receiver<bool>,
    task: JoinHandle<Result<LeaseManager, kube_lease_manager::LeaseManagerError>>,
}

impl Leadership {
    /// Resolve once the lease is no longer held.
    pub async fn lost(&mut self) {
        loop {
            if !*self.channel.borrow_and_update() {
                break;
            }
            if self.channel.changed().await.is_err() {
                break;
            }
        }
        warn!(identity = %self.identity, "leader lease lost");
        record_leader_lost(&self.identity);
    }

    /// Stop renewing and give the lease up.
    pub async fn release(self) {
        drop(self.channel);
        match self.task.await {
            Ok(Ok(_)) => info!(identity = %self.identity, "released leader lease"),
            Ok(Err(e)) => warn!(error = %e, "failed to release leader lease"),
            Err(e) => warn!(error = %e, "lease manager task failed"),
        }
        record_leader_lost(&self.identity);
    }
}

#[cfg(test)]
#[path = "leader_tests.rs"]
mod leader_tests;
