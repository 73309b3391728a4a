// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Wires informers, queues and controllers for every registered adapter
//! and runs them until shutdown or a fatal error.

use crate::adapters::AdapterContext;
use crate::cloud::CloudApi;
use crate::controller::{
    CloudReconciler, Controller, DependentQueues, HostReconciler, ResourceReconciler, Shared,
};
use crate::events::EventSink;
use crate::informer::InformerFactory;
use crate::registry::AdapterRegistry;
use crate::store::ObjectStore;
use crate::workqueue::WorkQueue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("fatal controller error: {0}")]
    Fatal(String),
}

/// Process-wide controller settings.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Period at which informers re-deliver their cache
    pub resync: Option<Duration>,
    /// Workers per kind
    pub workers: usize,
    /// Skip the composite controllers
    pub disable_cloud: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            resync: None,
            workers: 1,
            disable_cloud: false,
        }
    }
}

pub struct Manager {
    factory: InformerFactory,
    controllers: Vec<Arc<Controller>>,
    fatal_rx: mpsc::UnboundedReceiver<String>,
    workers: usize,
}

impl Manager {
    /// Build one controller per registered adapter.
    ///
    /// Informers watch every namespace; host kinds are cluster scoped.
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cloud: Arc<dyn CloudApi>,
        events: Arc<dyn EventSink>,
        registry: Arc<AdapterRegistry>,
        config: &ManagerConfig,
    ) -> Self {
        let ctx = AdapterContext::new(store.clone(), cloud);
        let factory = InformerFactory::new(store.clone(), None, config.resync);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

        let dependents: DependentQueues = registry
            .resources()
            .map(|adapter| {
                let kind = adapter.api_resource().kind;
                let queue = WorkQueue::new(&kind);
                (kind, queue)
            })
            .collect();
        let shared = Shared {
            store,
            events,
            dependents: Arc::new(dependents),
            fatal: fatal_tx,
        };

        let mut controllers = Vec::new();
        for adapter in registry.resources() {
            let ar = adapter.api_resource();
            // Dependent wake-ups and informer events share one queue per kind
            let queue = shared
                .dependents
                .get(&ar.kind)
                .cloned()
                .unwrap_or_else(|| WorkQueue::new(&ar.kind));
            let reconciler =
                ResourceReconciler::new(adapter.clone(), ctx.clone(), registry.clone());
            let controller = Controller::new(
                Arc::new(reconciler),
                factory.informer(&ar),
                queue,
                shared.clone(),
            );
            controller.watch();
            controllers.push(controller);
        }

        if config.disable_cloud {
            info!("composite controllers disabled");
        } else {
            for adapter in registry.clouds() {
                let ar = adapter.api_resource();
                let controller = Controller::new(
                    Arc::new(CloudReconciler::new(adapter.clone(), ctx.clone())),
                    factory.informer(&ar),
                    WorkQueue::new(&ar.kind),
                    shared.clone(),
                );
                controller.watch();
                for child in adapter.subscriptions() {
                    controller.watch_owned(&factory.informer(&child));
                }
                controllers.push(controller);
            }
        }

        for adapter in registry.hosts() {
            let ar = adapter.api_resource();
            let controller = Controller::new(
                Arc::new(HostReconciler::new(adapter.clone(), ctx.clone())),
                factory.informer(&ar),
                WorkQueue::new(&ar.kind),
                shared.clone(),
            );
            controller.watch();
            controllers.push(controller);
        }

        info!(controllers = controllers.len(), "controllers configured");
        Self {
            factory,
            controllers,
            fatal_rx,
            workers: config.workers,
        }
    }

    #[must_use]
    pub fn controllers(&self) -> &[Arc<Controller>] {
        &self.controllers
    }

    /// Run until `shutdown` resolves or a controller reports a fatal error.
    ///
    /// Informers are synced before any worker starts. On exit the informers
    /// are stopped and workers drain their queues.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Fatal`] with the reason of the first fatal
    /// reconcile failure.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<(), ManagerError> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let informers = self.factory.start(&stop_rx);
        self.factory.wait_for_sync().await;
        info!(informers = informers.len(), "informer caches synced");

        let workers: Vec<_> = self
            .controllers
            .iter()
            .flat_map(|controller| controller.run(self.workers))
            .collect();

        let result = tokio::select! {
            () = shutdown => {
                info!("shutdown requested");
                Ok(())
            }
            reason = self.fatal_rx.recv() => {
                let reason = reason.unwrap_or_else(|| "fatal channel closed".to_string());
                error!(reason = %reason, "stopping on fatal error");
                Err(ManagerError::Fatal(reason))
            }
        };

        let _ = stop_tx.send(true);
        for controller in &self.controllers {
            controller.shut_down();
        }
        for handle in workers.into_iter().chain(informers) {
            if let Err(e) = handle.await {
                error!(error = %e, "controller task failed");
            }
        }
        info!("controllers stopped");
        result
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod manager_tests;
