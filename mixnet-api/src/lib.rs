//! gRPC transport: wires `mixnet-core`'s transport-agnostic server and
//! client runtimes to tonic.

pub mod error;
pub mod proto;
pub mod services;
pub mod transport;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use mixnet_core::client::ClientRuntime;
use mixnet_core::config::Config;
use mixnet_core::identity::PeerIdentity;
use mixnet_core::server::MixServer;
use mixnet_core::shutdown::ShutdownCoordinator;
use tonic::transport::Server;
use tracing::info;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runs a mix server identified by `id` until it receives a shutdown signal.
pub async fn run_mix_server(
    id: &str,
    config: Arc<Config>,
    config_dir: PathBuf,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let bind_address = config
        .mix_servers
        .iter()
        .find(|m| m.id == id)
        .map(|m| m.address.clone())
        .ok_or_else(|| anyhow!("unknown mix server id: {id}"))?;

    let identity = PeerIdentity::generate(id, &config_dir)?;
    let shutdown = Arc::new(ShutdownCoordinator::new(SHUTDOWN_GRACE));
    mixnet_core::shutdown::install_signal_handlers(shutdown.clone());

    let pool = Arc::new(transport::ChannelPool::new());
    let forwarder = Arc::new(transport::GrpcForwarder::new(pool));
    let server = Arc::new(MixServer::new(
        identity,
        config,
        output_dir,
        forwarder,
        shutdown.clone(),
    ));

    let release_worker = {
        let server = server.clone();
        tokio::spawn(async move { server.run_release_worker().await })
    };

    let addr: SocketAddr = bind_address.parse().context("parsing mix server bind address")?;
    info!(%addr, server_id = id, "mix server listening");

    let svc = services::MixServiceImpl::new(server.clone());
    Server::builder()
        .add_service(crate::proto::mix_service_server::MixServiceServer::new(svc))
        .serve_with_shutdown(addr, shutdown.wait_for_shutdown())
        .await?;

    server.stop().await;
    release_worker.await.ok();
    Ok(())
}

/// Connects a client to its entry and terminal mixes and returns a runtime
/// that has completed registration and the start handshake.
pub async fn connect_client(
    id: &str,
    config: Arc<Config>,
    config_dir: PathBuf,
) -> Result<(Arc<ClientRuntime>, f64)> {
    let entry_addr = config
        .mix_servers
        .first()
        .ok_or_else(|| anyhow!("config has no mix servers"))?
        .address
        .clone();
    let terminal_addr = config
        .mix_servers
        .last()
        .ok_or_else(|| anyhow!("config has no mix servers"))?
        .address
        .clone();

    let identity = PeerIdentity::generate(id, &config_dir)?;
    let transport = Arc::new(transport::GrpcClientTransport::connect(&entry_addr, &terminal_addr).await?);
    let shutdown = Arc::new(ShutdownCoordinator::new(SHUTDOWN_GRACE));

    let client = Arc::new(ClientRuntime::new(identity, config, config_dir, transport, shutdown));
    let round_duration = client.start().await?;
    Ok((client, round_duration))
}
