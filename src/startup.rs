//! Bootstrap sequence: config, orchestrator connect, node self-detection,
//! capacity declaration, classifier load/attach, hook server launch, and
//! graceful shutdown.
//!
//! Grounded on `examples/original_source/cmd/main.go`'s `run()` plus the
//! teacher's `runtime::boot`/`runtime::serve` split — the `boot()` phase
//! here does config + client + classifier setup, `run()` itself serves
//! until shutdown, matching the teacher's boot-then-serve structure.
//! `shutdown_signal` below is ported directly from the teacher's
//! `main.rs` (the `runtime::stop` module it forward-declares is never
//! actually defined in the teacher's own source).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cache::PodCache;
use crate::config::DaemonConfig;
use crate::error::EnvironmentError;
use crate::gateway::Gateway;
use crate::hook::{HookHandler, HookServer};
use crate::orchestrator::{self, KubeFetcher};

/// Initialize the tracing subsystem: an `EnvFilter` from `RUST_LOG`,
/// falling back to a sane per-module default, plus the `fmt` layer.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "traffic_limitd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Poll `path` once a second until it exists, per `spec.md` §6's
/// "startup polls this path every second until it exists".
async fn wait_for_kubeconfig(path: &str) {
    if Path::new(path).exists() {
        return;
    }
    info!(path, "waiting for kubeconfig to appear");
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if Path::new(path).exists() {
            return;
        }
    }
}

async fn connect_orchestrator(config: &DaemonConfig) -> Result<kube::Client, EnvironmentError> {
    wait_for_kubeconfig(&config.kubeconfig).await;

    let kube_config = kube::Config::from_kubeconfig(&kube::config::KubeConfigOptions {
        context: None,
        cluster: None,
        user: None,
    })
    .await
    .map_err(|e| EnvironmentError::Orchestrator(e.to_string()))?;

    kube::Client::try_from(kube_config).map_err(|e| EnvironmentError::Orchestrator(e.to_string()))
}

async fn resolve_node_name(client: &kube::Client, config: &DaemonConfig) -> Result<String, EnvironmentError> {
    if !config.node_name.is_empty() {
        return Ok(config.node_name.clone());
    }
    orchestrator::detect_node_name(client)
        .await
        .map_err(|e| EnvironmentError::Orchestrator(e.to_string()))
}

/// Run the daemon to completion: connect, load the classifier, serve
/// hook requests, and shut down gracefully on SIGINT/SIGTERM. Returns an
/// `EnvironmentError` for any startup failure (`spec.md` §7's
/// `EnvironmentFatal` taxonomy — the caller should abort the process).
pub async fn run(config: DaemonConfig) -> Result<(), EnvironmentError> {
    config.validate().map_err(EnvironmentError::Config)?;

    let client = connect_orchestrator(&config).await?;
    info!("connected to orchestrator API");

    let node_name = resolve_node_name(&client, &config).await?;
    info!(node = %node_name, "resolved node identity");

    orchestrator::declare_node_capacity(&client, &node_name, config.bps, config.pps)
        .await
        .map_err(|e| EnvironmentError::Orchestrator(e.to_string()))?;

    let gateway_handle = Gateway::load(config.max_tasks_hint()).map_err(EnvironmentError::ClassifierLoad)?;
    info!(max_tasks = config.max_tasks_hint(), "loaded kernel classifier");

    gateway_handle
        .gateway
        .attach(&config.interfaces)
        .map_err(EnvironmentError::InterfaceAttach)?;
    info!(interfaces = ?config.interfaces, "attached classifier to interfaces");

    let fetcher = KubeFetcher::new(client);
    let cache = Arc::new(PodCache::new(fetcher));
    let sweeper = tokio::spawn(Arc::clone(&cache).run_sweeper());

    let handler = Arc::new(HookHandler::new(cache, gateway_handle.gateway.clone()));
    let listen_path = Path::new(&config.listen);
    let server = HookServer::bind(listen_path, handler).map_err(|e| EnvironmentError::SocketBind {
        path: config.listen.clone(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let serve_task = tokio::spawn(server.serve(shutdown_rx));

    shutdown_signal().await;
    info!("shutdown signal received, draining");

    let _ = shutdown_tx.send(true);
    let _ = serve_task.await;
    sweeper.abort();
    gateway_handle.close().await;

    info!("shutdown complete");
    Ok(())
}

/// Waits for SIGINT or SIGTERM. Ported from the teacher's
/// `shutdown_signal` in `main.rs`.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
