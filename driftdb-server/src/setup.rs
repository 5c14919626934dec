//! Component construction and teardown
//!
//! Builds each component from the parsed options. Components start in
//! dependency order and shut down in reverse; every shutdown step runs
//! under its own deadline, and an expired deadline is logged but never
//! blocks the rest of the teardown.

use log::{error, info, LevelFilter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use driftdb_cluster::{ClusterConfig, SwimCluster};
use driftdb_core::Result;
use driftdb_net::TcpDialer;
use driftdb_replication::ReplicationConfig;
use driftdb_storage::{Engine, MemoryEngine};

use crate::api::{create_router, ApiState};
use crate::opts::Opts;

/// Deadline applied to each component's shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub fn setup_logger(opts: &Opts) {
    let level = if opts.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

pub fn setup_engine() -> Arc<dyn Engine> {
    info!("using in-memory storage engine");
    Arc::new(MemoryEngine::new())
}

pub fn setup_cluster(opts: &Opts) -> Arc<SwimCluster> {
    let config = ClusterConfig {
        node_id: opts.node_id,
        node_name: opts.node_name.clone(),
        public_addr: opts.rpc_public_addr.clone(),
        local_addr: opts.rpc_local_addr.clone(),
        probe_timeout: Duration::from_millis(opts.probe_timeout_ms),
        probe_interval: Duration::from_millis(opts.probe_interval_ms),
        indirect_nodes: opts.probe_indirect_nodes,
        ..ClusterConfig::default()
    };

    Arc::new(SwimCluster::new(config, Arc::new(TcpDialer)))
}

pub fn replication_config(opts: &Opts) -> ReplicationConfig {
    ReplicationConfig {
        replication_factor: opts.replication_factor,
        read_quorum: opts.read_quorum,
        write_quorum: opts.write_quorum,
        request_timeout: Duration::from_millis(opts.probe_timeout_ms),
    }
}

/// Running REST facade
pub struct ApiServer {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ApiServer {
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

pub async fn setup_api_server(opts: &Opts, state: ApiState) -> Result<ApiServer> {
    let listener = tokio::net::TcpListener::bind(&opts.restapi_bind_addr).await?;
    info!("REST API listening on {}", listener.local_addr()?);

    let (stop, mut stop_rx) = watch::channel(false);
    let router = create_router(state);

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = stop_rx.changed().await;
    });

    let handle = tokio::spawn(async move {
        if let Err(err) = server.await {
            error!("REST API server failed: {}", err);
        }
    });

    Ok(ApiServer { stop, handle })
}

/// Runs one shutdown step under [`SHUTDOWN_TIMEOUT`]
pub async fn shutdown_step<F>(name: &str, step: F)
where
    F: Future<Output = ()>,
{
    info!("shutting down {}", name);

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, step).await.is_err() {
        error!("timed out shutting down {}", name);
    }
}
