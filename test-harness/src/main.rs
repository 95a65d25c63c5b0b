//! In-process smoke test for the mix network: spins up a real chain of
//! three mix servers and two clients talking gRPC over loopback inside a
//! single process, then walks through the literal scenarios used to reason
//! about the system's anonymity properties.
//!
//! This binary is a developer smoke test, not part of the anonymity core;
//! it carries no mixing logic of its own, only wiring and assertions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use mixnet_api::services::MixServiceImpl;
use mixnet_api::transport::{ChannelPool, GrpcClientTransport, GrpcForwarder};
use mixnet_core::client::ClientRuntime;
use mixnet_core::config::{Config, LoggingConfig, PeerEntry};
use mixnet_core::identity::PeerIdentity;
use mixnet_core::onion::{build_onion, Hop};
use mixnet_core::server::MixServer;
use mixnet_core::shutdown::ShutdownCoordinator;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tonic::transport::{Channel, Server};

struct RunningMix {
    server: Arc<MixServer>,
    release_task: JoinHandle<()>,
    serve_task: JoinHandle<()>,
}

impl RunningMix {
    async fn stop(self) {
        self.server.stop().await;
        self.release_task.await.ok();
        self.serve_task.await.ok();
    }
}

async fn spawn_mix(id: &str, config: Arc<Config>, config_dir: &std::path::Path) -> Result<RunningMix> {
    let bind_address = config
        .mix_servers
        .iter()
        .find(|m| m.id == id)
        .map(|m| m.address.clone())
        .ok_or_else(|| anyhow!("unknown mix id: {id}"))?;

    let identity = PeerIdentity::generate(id, config_dir)?;
    let shutdown = Arc::new(ShutdownCoordinator::new(Duration::from_secs(2)));
    let pool = Arc::new(ChannelPool::new());
    let forwarder = Arc::new(GrpcForwarder::new(pool));
    let server = Arc::new(MixServer::new(identity, config, None, forwarder, shutdown.clone()));

    let release_task = {
        let server = server.clone();
        tokio::spawn(async move { server.run_release_worker().await })
    };

    let addr = bind_address.parse()?;
    let svc = MixServiceImpl::new(server.clone());
    let shutdown_for_serve = shutdown.clone();
    let serve_task = tokio::spawn(async move {
        Server::builder()
            .add_service(mixnet_api::proto::mix_service_server::MixServiceServer::new(svc))
            .serve_with_shutdown(addr, shutdown_for_serve.wait_for_shutdown())
            .await
            .ok();
    });

    // Give the listener a moment to bind before clients start dialing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Ok(RunningMix { server, release_task, serve_task })
}

/// Connects a client's transport without registering it. Kept separate from
/// `start()` so the harness can drive several clients' registration handshakes
/// concurrently instead of one at a time (see scenario 5 below: a lone
/// client's `start()` blocks on `WaitForStart` until the whole quorum
/// registers, so awaiting one client's `start()` before dialing the next
/// would deadlock the harness itself).
async fn connect_client(
    id: &str,
    config: Arc<Config>,
    config_dir: &std::path::Path,
    entry_addr: &str,
    terminal_addr: &str,
) -> Result<Arc<ClientRuntime>> {
    let identity = PeerIdentity::generate(id, config_dir)?;
    let transport = Arc::new(GrpcClientTransport::connect(entry_addr, terminal_addr).await?);
    let shutdown = Arc::new(ShutdownCoordinator::new(Duration::from_secs(2)));
    Ok(Arc::new(ClientRuntime::new(
        identity,
        config,
        config_dir.to_path_buf(),
        transport,
        shutdown,
    )))
}

fn harness_config() -> Config {
    Config {
        messages_per_round: 2,
        round_duration: 0.3,
        dummy_payload: "dummy".to_string(),
        mix_servers: vec![
            PeerEntry { id: "s1".to_string(), address: "127.0.0.1:47001".to_string() },
            PeerEntry { id: "s2".to_string(), address: "127.0.0.1:47002".to_string() },
            PeerEntry { id: "s3".to_string(), address: "127.0.0.1:47003".to_string() },
        ],
        clients: vec![
            PeerEntry { id: "c1".to_string(), address: "127.0.0.1:47011".to_string() },
            PeerEntry { id: "c2".to_string(), address: "127.0.0.1:47012".to_string() },
        ],
        logging: LoggingConfig::default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let config = Arc::new(harness_config());
    let config_dir: PathBuf = TempDir::new()?.into_path();

    let s1 = spawn_mix("s1", config.clone(), &config_dir).await?;
    let s2 = spawn_mix("s2", config.clone(), &config_dir).await?;
    let s3 = spawn_mix("s3", config.clone(), &config_dir).await?;

    let entry_addr = config.mix_servers[0].address.clone();
    let terminal_addr = config.mix_servers[2].address.clone();

    let c1_runtime = connect_client("c1", config.clone(), &config_dir, &entry_addr, &terminal_addr).await?;
    let c2_runtime = connect_client("c2", config.clone(), &config_dir, &entry_addr, &terminal_addr).await?;

    // Scenario 5: registration quorum. With messages_per_round=2, c1's
    // start() (register + WaitForStart) must not return until c2 has also
    // registered.
    let c1_start: JoinHandle<mixnet_core::error::Result<f64>> = {
        let runtime = c1_runtime.clone();
        tokio::spawn(async move { runtime.start().await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    check("scenario 5: c1 stays blocked on WaitForStart before c2 registers", !c1_start.is_finished());

    let c2_round_duration = c2_runtime.start().await?;
    let c1_round_duration = c1_start.await??;
    check(
        "scenario 5: c1 unblocks once c2 registers",
        c1_round_duration == c2_round_duration,
    );

    let c1_emission_task = {
        let runtime = c1_runtime.clone();
        tokio::spawn(async move { runtime.run_emission_loop(c1_round_duration).await })
    };
    let c2_emission_task = {
        let runtime = c2_runtime.clone();
        tokio::spawn(async move { runtime.run_emission_loop(c2_round_duration).await })
    };

    let round_wait = Duration::from_secs_f64(config.round_duration * 3.0);

    // Scenario 1: one message each way.
    let c1_addr = config.clients[0].address.clone();
    let c2_addr = config.clients[1].address.clone();
    let pk_c1 = PeerIdentity::read_public_key(&config_dir, "c1")?;
    let pk_c2 = PeerIdentity::read_public_key(&config_dir, "c2")?;

    c1_runtime
        .prepare_message(b"Hello, client2!", &pk_c2, &c2_addr)
        .await?;
    c2_runtime
        .prepare_message(b"Hello, client1!", &pk_c1, &c1_addr)
        .await?;
    tokio::time::sleep(round_wait).await;

    let c1_inbox = c1_runtime.poll_messages().await?;
    let c2_inbox = c2_runtime.poll_messages().await?;
    check("scenario 1: c1 received c2's message", c1_inbox == vec![b"Hello, client1!".to_vec()]);
    check("scenario 1: c2 received c1's message", c2_inbox == vec![b"Hello, client2!".to_vec()]);

    // Scenario 2: dummy-only rounds produce empty inboxes.
    tokio::time::sleep(round_wait).await;
    let c1_inbox = c1_runtime.poll_messages().await?;
    let c2_inbox = c2_runtime.poll_messages().await?;
    check("scenario 2: c1 inbox empty on dummy-only round", c1_inbox.is_empty());
    check("scenario 2: c2 inbox empty on dummy-only round", c2_inbox.is_empty());

    // Scenario 3: one real message, one dummy.
    c1_runtime.prepare_message(b"hi", &pk_c2, &c2_addr).await?;
    tokio::time::sleep(round_wait).await;
    let c1_inbox = c1_runtime.poll_messages().await?;
    let c2_inbox = c2_runtime.poll_messages().await?;
    check("scenario 3: c2 received the real message", c2_inbox == vec![b"hi".to_vec()]);
    check("scenario 3: c1 inbox stays empty", c1_inbox.is_empty());

    // Scenario 6: a ForwardMessage for a round s1 has long since released is
    // accepted by the RPC (no error), but its payload never reaches any
    // downstream delivery queue — it is dropped silently once peeled.
    let pk_s1 = PeerIdentity::read_public_key(&config_dir, "s1")?;
    let pk_s2 = PeerIdentity::read_public_key(&config_dir, "s2")?;
    let pk_s3 = PeerIdentity::read_public_key(&config_dir, "s3")?;
    let stale_onion = build_onion(
        b"too late",
        &[
            Hop { public_key: &pk_c2, address: &c2_addr },
            Hop { public_key: &pk_s3, address: &c2_addr },
            Hop { public_key: &pk_s2, address: &config.mix_servers[2].address },
            Hop { public_key: &pk_s1, address: &config.mix_servers[1].address },
        ],
    );

    let channel = Channel::from_shared(format!("http://{entry_addr}"))?.connect().await?;
    let mut raw_entry_client = mixnet_api::proto::mix_service_client::MixServiceClient::new(channel);
    let stale_forward = raw_entry_client
        .forward_message(mixnet_api::proto::ForwardMessageRequest { payload: stale_onion, round: 0 })
        .await;
    check("scenario 6: stale-round forward is accepted by the RPC", stale_forward.is_ok());

    tokio::time::sleep(round_wait).await;
    let c2_inbox = c2_runtime.poll_messages().await?;
    check("scenario 6: stale message never reaches delivery", c2_inbox.is_empty());

    c1_runtime.stop().await;
    c1_emission_task.await.ok();
    c2_runtime.stop().await;
    c2_emission_task.await.ok();
    s1.stop().await;
    s2.stop().await;
    s3.stop().await;

    println!("all scenarios passed");
    Ok(())
}

fn check(label: &str, ok: bool) {
    if ok {
        println!("ok   - {label}");
    } else {
        println!("FAIL - {label}");
        std::process::exit(1);
    }
}
