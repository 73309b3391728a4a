// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context, Result};
use clap::Parser;
use cloudplane::{
    cloud::{rest::RestCloud, CloudApi},
    config::{expand_home, CloudConfig, METADATA_BASE_URL},
    constants::{
        CONTROLLER_NAME, DEFAULT_RESYNC_SECS, METRICS_SERVER_BIND_ADDRESS, METRICS_SERVER_PATH,
        METRICS_SERVER_PORT, TOKIO_WORKER_THREADS,
    },
    crd::crds,
    events::KubeEventSink,
    leader::{detect_identity, detect_namespace, LeaderElector},
    manager::{Manager, ManagerConfig},
    metrics::gather_metrics,
    registry::AdapterRegistry,
    schema::{register_all, KubeSchemaApi},
    store::apiserver::KubeStore,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Declarative cloud-infrastructure control plane.
#[derive(Parser, Debug)]
#[command(name = "cloudplane", version, about)]
struct Cli {
    /// Kubeconfig of the host cluster; in-cluster config when unset
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Cloud provider config file
    #[arg(long, env = "OCICONFIG", default_value = "~/.oci/config")]
    ociconfig: String,

    /// Profile of the cloud provider config file
    #[arg(long, default_value = "DEFAULT")]
    oci_profile: String,

    /// Seconds between informer resyncs; 0 disables resync
    #[arg(long, default_value_t = DEFAULT_RESYNC_SECS)]
    resync_seconds: u64,

    /// Use instance-principal credentials from the metadata service
    #[arg(long)]
    ipr: bool,

    /// Run only the primitive controllers
    #[arg(long)]
    disable_cloud: bool,

    /// Namespace of the leader lease
    #[arg(long, env = "POD_NAMESPACE")]
    namespace: Option<String>,

    /// Workers per kind
    #[arg(long, default_value_t = 1)]
    workers: usize,

    #[arg(long, default_value_t = METRICS_SERVER_PORT)]
    metrics_port: u16,

    /// Run without competing for the leader lease
    #[arg(long)]
    no_leader_elect: bool,
}

impl Cli {
    fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            resync: (self.resync_seconds > 0).then(|| Duration::from_secs(self.resync_seconds)),
            workers: self.workers.max(1),
            disable_cloud: self.disable_cloud,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("cloudplane-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

fn init_tracing() {
    // Respects RUST_LOG (default info) and RUST_LOG_FORMAT=json|text
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(cli: Cli) -> Result<()> {
    init_tracing();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting cloudplane control plane");
    debug!(?cli, "parsed command line");

    tokio::spawn(serve_metrics(cli.metrics_port));

    let cloud = connect_cloud(&cli).await?;
    let client = kube_client(cli.kubeconfig.as_deref()).await?;
    debug!("Kubernetes client initialized successfully");

    register_all(&KubeSchemaApi::new(client.clone()), &crds())
        .await
        .context("schema registration failed")?;

    let manager = Manager::new(
        Arc::new(KubeStore::new(client.clone())),
        cloud,
        Arc::new(KubeEventSink::new(client.clone(), CONTROLLER_NAME)),
        Arc::new(AdapterRegistry::with_builtin()),
        &cli.manager_config(),
    );

    if cli.no_leader_elect {
        warn!("leader election disabled");
        manager.run(shutdown_signal()).await?;
        return Ok(());
    }

    let namespace = detect_namespace(cli.namespace.as_deref());
    let elector = LeaderElector::new(client, &namespace, detect_identity());
    let mut leadership = tokio::select! {
        leadership = elector.acquire() => leadership,
        () = shutdown_signal() => {
            info!("shutdown requested before acquiring leadership");
            return Ok(());
        }
    };

    let mut lost = false;
    let result = manager
        .run(async {
            tokio::select! {
                () = leadership.lost() => lost = true,
                () = shutdown_signal() => {}
            }
        })
        .await;

    if lost {
        error!(identity = %elector.identity(), "CRITICAL: leader lease lost, exiting");
        anyhow::bail!("leader lease lost");
    }
    leadership.release().await;
    result?;
    Ok(())
}

/// Cloud client from the config file or, with `--ipr`, the metadata service.
///
/// The credentials are checked with one call before any controller starts.
async fn connect_cloud(cli: &Cli) -> Result<Arc<dyn CloudApi>> {
    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let config = if cli.ipr {
        info!("using instance-principal credentials");
        CloudConfig::from_instance_metadata(&http, METADATA_BASE_URL).await?
    } else {
        let path = expand_home(&cli.ociconfig);
        CloudConfig::from_file(&path, &cli.oci_profile)?
    };
    let token = config.bearer_token()?;
    info!(region = %config.region, endpoint = %config.endpoint, "cloud config loaded");

    let cloud = RestCloud::new(http, &config.endpoint, &config.tenancy, token);
    let domains = cloud
        .availability_domains(cloud.tenancy_id())
        .await
        .context("cloud authentication failed")?;
    info!(availability_domains = domains.len(), "cloud credentials verified");
    Ok(Arc::new(cloud))
}

async fn kube_client(kubeconfig: Option<&std::path::Path>) -> Result<Client> {
    let Some(path) = kubeconfig else {
        return Ok(Client::try_default().await?);
    };
    debug!(path = %path.display(), "loading kubeconfig");
    let kubeconfig = Kubeconfig::read_from(path)?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    Ok(Client::try_from(config)?)
}

/// Serve `/metrics` until the process exits.
async fn serve_metrics(port: u16) {
    let app = axum::Router::new().route(
        METRICS_SERVER_PATH,
        axum::routing::get(|| async {
            gather_metrics().unwrap_or_else(|e| {
                error!(error = %e, "failed to encode metrics");
                String::new()
            })
        }),
    );
    let address = format!("{METRICS_SERVER_BIND_ADDRESS}:{port}");
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %address, error = %e, "failed to bind metrics server");
            return;
        }
    };
    info!(address = %address, path = METRICS_SERVER_PATH, "metrics server listening");
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "metrics server stopped");
    }
}

/// Resolve on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod main_tests;
