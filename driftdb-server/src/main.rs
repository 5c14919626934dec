use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;

use driftdb_core::{Error, Result};
use driftdb_net::NodeServer;
use driftdb_replication::Coordinator;

use driftdb_server::api::ApiState;
use driftdb_server::setup::{
    replication_config, setup_api_server, setup_cluster, setup_engine, setup_logger,
    shutdown_step,
};
use driftdb_server::{LocalClient, NodeService, Opts};

#[tokio::main]
async fn main() {
    // A parse failure exits with code 2 before anything is initialized.
    let opts = Opts::parse();

    setup_logger(&opts);

    if let Err(err) = run(opts).await {
        error!("fatal: {}", err);
        std::process::exit(1);
    }
}

async fn run(opts: Opts) -> Result<()> {
    let engine = setup_engine();
    let cluster = setup_cluster(&opts);

    let service = NodeService::new(cluster.clone(), engine);
    cluster.set_local_conn(LocalClient::new(service.clone()));

    let node_server = NodeServer::bind(&opts.rpc_bind_addr, service).await?;
    info!(
        "node RPC listening on {} (advertised as {})",
        node_server.local_addr(),
        opts.rpc_public_addr
    );

    // A single reachable seed is enough: state spreads from there. With
    // no seeds at all this node simply bootstraps a new cluster.
    let mut joined = opts.join_addrs.is_empty();
    for addr in &opts.join_addrs {
        match cluster.join(addr).await {
            Ok(()) => joined = true,
            Err(err) => warn!("failed to join via {}: {}", addr, err),
        }
    }
    if !joined {
        return Err(Error::Unavailable(
            "could not join the cluster through any seed".to_string(),
        ));
    }

    cluster.start();

    let coordinator = Arc::new(Coordinator::new(cluster.clone(), replication_config(&opts)));

    let api_server = if opts.restapi_enabled {
        Some(
            setup_api_server(
                &opts,
                ApiState {
                    coordinator,
                    cluster: cluster.clone(),
                },
            )
            .await?,
        )
    } else {
        None
    };

    wait_for_signal().await;
    info!("received interrupt signal, shutting down");

    // Reverse of startup order.
    if let Some(api_server) = api_server {
        shutdown_step("REST API server", api_server.shutdown()).await;
    }
    shutdown_step("node RPC server", node_server.shutdown()).await;
    shutdown_step("cluster", cluster.shutdown()).await;

    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {}", err);
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
