//! Mix server: registration quorum, the round barrier, and the release
//! worker that peels one layer per message and forwards or delivers it.
//!
//! ## Architecture
//!
//! ```text
//!   ForwardMessage(payload, round) ──► peel layer ──► pending[round].push
//!                                                         │
//!                                            len == messages_per_round?
//!                                                         │ notify
//!                                                         ▼
//!                                              round-release worker task
//!                                            (one per server, spawned by start())
//!                                                         │
//!                                     ┌───────────────────┴───────────────────┐
//!                                     ▼                                       ▼
//!                          next_addr is a known client            next_addr is another mix
//!                          → delivery[addr].push_back(payload)    → Forwarder::forward(..)
//! ```
//!
//! Only the entry mix in a chain is required to gate on registration; every
//! other mix accepts registrations unconditionally (see [`MixServer::register`]).

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{MixnetError, Result};
use crate::identity::PeerIdentity;
use crate::onion::{peel_layer, HopDescriptor};
use crate::shutdown::ShutdownCoordinator;

/// Delivers a peeled payload onward to the next hop over the network.
/// Implemented by the gRPC transport layer; the mixing core stays agnostic
/// of how bytes actually reach the next mix.
#[async_trait::async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, address: &str, payload: Vec<u8>, round: u64) -> Result<()>;
}

struct RoundState {
    pending: HashMap<u64, Vec<HopDescriptor>>,
    round_cursor: u64,
}

/// A single mix server's in-memory state.
pub struct MixServer {
    id: String,
    identity: PeerIdentity,
    config: Arc<Config>,
    is_entry_mix: bool,
    output_dir: Option<PathBuf>,
    forwarder: Arc<dyn Forwarder>,
    shutdown: Arc<ShutdownCoordinator>,

    registered: Mutex<HashSet<String>>,
    start_notify: Notify,
    started: AtomicU64, // 0 = not started, 1 = started

    rounds: Mutex<RoundState>,
    release_notify: Notify,

    delivery: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
}

impl MixServer {
    pub fn new(
        identity: PeerIdentity,
        config: Arc<Config>,
        output_dir: Option<PathBuf>,
        forwarder: Arc<dyn Forwarder>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        let id = identity.id().to_string();
        let is_entry_mix = config.mix_servers.first().map(|m| m.id == id).unwrap_or(false);

        Self {
            id,
            identity,
            config,
            is_entry_mix,
            output_dir,
            forwarder,
            shutdown,
            registered: Mutex::new(HashSet::new()),
            start_notify: Notify::new(),
            started: AtomicU64::new(0),
            rounds: Mutex::new(RoundState {
                pending: HashMap::new(),
                round_cursor: 0,
            }),
            release_notify: Notify::new(),
            delivery: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// `Register(client_id)`. Only the entry mix enforces the quorum; every
    /// downstream mix accepts unconditionally. A full quorum is a normal
    /// outcome, not an RPC error: it is reported as `Ok(false)` so the
    /// caller gets an ordinary `RegisterResponse{ok: false}` and aborts.
    pub async fn register(&self, client_id: &str) -> Result<bool> {
        if !self.is_entry_mix {
            return Ok(true);
        }

        let mut registered = self.registered.lock().await;
        if registered.contains(client_id) {
            return Ok(true);
        }
        if registered.len() >= self.config.messages_per_round {
            warn!(client_id, "registration rejected: quorum already full");
            return Ok(false);
        }
        registered.insert(client_id.to_string());
        let count = registered.len();
        drop(registered);

        info!(client_id, count, "client registered");
        if count == self.config.messages_per_round {
            self.started.store(1, Ordering::SeqCst);
            self.start_notify.notify_waiters();
            info!("registration quorum met, starting rounds");
        }
        Ok(true)
    }

    /// `WaitForStart(client_id)`. Blocks until the entry mix's quorum is
    /// met; downstream mixes have no quorum and return immediately.
    pub async fn wait_for_start(&self) -> f64 {
        if self.is_entry_mix {
            while self.started.load(Ordering::SeqCst) == 0 {
                self.start_notify.notified().await;
            }
        }
        self.config.round_duration
    }

    /// `ForwardMessage(payload, round)`. Peels one layer and accumulates it
    /// into the round's batch; releases the batch once it is full.
    ///
    /// A shutting-down server or a stale round are both benign outcomes at
    /// the RPC layer: the message is dropped and logged, but the call still
    /// returns `Ok(())` so the caller sees an ordinary accepted response.
    /// Only a genuine crypto/parse failure is a real RPC error.
    pub async fn forward_message(&self, payload: &[u8], round: u64) -> Result<()> {
        if self.shutdown.is_shutting_down().await {
            warn!(round, "dropping message: shutdown in progress");
            return Ok(());
        }

        let descriptor = match peel_layer(self.identity.secret_key(), payload) {
            Ok(d) => d,
            Err(e) => {
                warn!(round, error = %e, "dropping message: layer peel failed");
                return Err(e);
            }
        };

        let mut state = self.rounds.lock().await;
        if round < state.round_cursor {
            warn!(round, cursor = state.round_cursor, "dropping stale message");
            return Ok(());
        }

        let batch = state.pending.entry(round).or_default();
        batch.push(descriptor);
        let is_full = batch.len() == self.config.messages_per_round;
        drop(state);

        if is_full {
            self.release_notify.notify_one();
        }
        Ok(())
    }

    /// `PollMessages(client_addr)`. Drains and returns the delivery buffer
    /// for `client_addr`.
    pub async fn poll_messages(&self, client_addr: &str) -> Vec<Vec<u8>> {
        let mut delivery = self.delivery.lock().await;
        delivery
            .get_mut(client_addr)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Run the round-release worker until shutdown. Exactly one of these
    /// should be spawned per server.
    pub async fn run_release_worker(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = self.release_notify.notified() => {}
                _ = shutdown_rx.recv() => {
                    debug!("release worker observed shutdown signal");
                    break;
                }
            }

            loop {
                let batch = {
                    let mut state = self.rounds.lock().await;
                    let round = state.round_cursor;
                    let full = state
                        .pending
                        .get(&round)
                        .map(|b| b.len() == self.config.messages_per_round)
                        .unwrap_or(false);
                    if !full {
                        break;
                    }
                    let batch = state.pending.remove(&round).unwrap();
                    state.round_cursor += 1;
                    (round, batch)
                };
                self.release_round(batch.0, batch.1).await;
            }

            if self.shutdown.is_shutting_down().await {
                break;
            }
        }
    }

    async fn release_round(&self, round: u64, batch: Vec<HopDescriptor>) {
        let _op = crate::tracing::mix::trace_round_release(round, batch.len());
        for descriptor in batch {
            if self.config.is_client_address(&descriptor.address) {
                let _deliver_op = crate::tracing::mix::trace_deliver(round, &descriptor.address);
                self.deliver_locally(round, &descriptor).await;
            } else {
                let _forward_op = crate::tracing::mix::trace_forward(round, &descriptor.address);
                self.forward_onward(round, descriptor).await;
            }
        }
    }

    async fn deliver_locally(&self, round: u64, descriptor: &HopDescriptor) {
        {
            let mut delivery = self.delivery.lock().await;
            delivery
                .entry(descriptor.address.clone())
                .or_default()
                .push_back(descriptor.payload.clone());
        }

        if let Some(dir) = &self.output_dir {
            let sanitized = sanitize_address(&descriptor.address);
            let path = dir.join(format!("{}_round_{}_{}.txt", self.id, round, sanitized));
            if let Err(e) = std::fs::write(&path, &descriptor.payload) {
                warn!(error = %e, path = %path.display(), "failed to write delivered payload");
            }
        }
    }

    async fn forward_onward(&self, round: u64, descriptor: HopDescriptor) {
        let address = descriptor.address.clone();
        let payload = descriptor.payload;

        if let Err(e) = self.forwarder.forward(&address, payload.clone(), round).await {
            warn!(address, error = %e, "forward failed, retrying once");
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            if let Err(e) = self.forwarder.forward(&address, payload, round).await {
                warn!(address, error = %e, "forward failed again, dropping message for this session");
            }
        }
    }

    /// Graceful stop: signals the release worker to exit and removes this
    /// peer's published public key.
    pub async fn stop(&self) {
        info!(server_id = %self.id, "stopping mix server");
        self.shutdown.shutdown().await;
        self.release_notify.notify_one();
        if let Err(e) = self.identity.drop_public_key_file() {
            warn!(error = %e, "failed to remove public key file on shutdown");
        }
    }
}

fn sanitize_address(address: &str) -> String {
    address
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sample_config;
    use crate::onion::{build_onion, Hop};
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct RecordingForwarder {
        calls: Mutex<Vec<(String, u64)>>,
    }

    impl RecordingForwarder {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait::async_trait]
    impl Forwarder for RecordingForwarder {
        async fn forward(&self, address: &str, _payload: Vec<u8>, round: u64) -> Result<()> {
            self.calls.lock().await.push((address.to_string(), round));
            Ok(())
        }
    }

    struct FailingForwarder {
        attempts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Forwarder for FailingForwarder {
        async fn forward(&self, _address: &str, _payload: Vec<u8>, _round: u64) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(MixnetError::Transport("connection refused".to_string()))
        }
    }

    async fn make_server(dir: &TempDir, id: &str, config: Arc<Config>) -> (MixServer, Arc<RecordingForwarder>) {
        let identity = PeerIdentity::generate(id, dir.path()).unwrap();
        let forwarder = Arc::new(RecordingForwarder::new());
        let shutdown = Arc::new(ShutdownCoordinator::new(std::time::Duration::from_millis(10)));
        let server = MixServer::new(identity, config, None, forwarder.clone(), shutdown);
        (server, forwarder)
    }

    #[tokio::test]
    async fn entry_mix_enforces_quorum_then_releases() {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(sample_config());
        let (server, _fwd) = make_server(&dir, "s1", config.clone()).await;

        assert!(server.register("c1").await.unwrap());
        assert_eq!(server.started.load(Ordering::SeqCst), 0);
        assert!(server.register("c2").await.unwrap());
        assert_eq!(server.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn registration_full_rejects_extra_clients() {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(sample_config());
        let (server, _fwd) = make_server(&dir, "s1", config.clone()).await;

        server.register("c1").await.unwrap();
        server.register("c2").await.unwrap();
        assert!(!server.register("c3").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_registration_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(sample_config());
        let (server, _fwd) = make_server(&dir, "s1", config.clone()).await;

        server.register("c1").await.unwrap();
        server.register("c1").await.unwrap();
        assert_eq!(server.registered.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn stale_round_forward_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(sample_config());
        let (server, _fwd) = make_server(&dir, "s1", config.clone()).await;

        {
            let mut state = server.rounds.lock().await;
            state.round_cursor = 5;
        }

        let onion = build_onion(
            b"late",
            &[Hop { public_key: server.identity.public_key(), address: "whoever" }],
        );
        assert!(server.forward_message(&onion, 3).await.is_ok());

        let state = server.rounds.lock().await;
        assert!(!state.pending.contains_key(&3));
    }

    #[tokio::test]
    async fn full_batch_delivers_to_known_client() {
        let dir = TempDir::new().unwrap();
        let mut config = sample_config();
        config.messages_per_round = 1;
        config.clients.truncate(1);
        let config = Arc::new(config);
        let (server, _fwd) = make_server(&dir, "s1", config.clone()).await;

        let client_addr = config.clients[0].address.clone();
        let onion = build_onion(
            b"hi",
            &[Hop { public_key: server.identity.public_key(), address: &client_addr }],
        );
        server.forward_message(&onion, 0).await.unwrap();

        let worker = async {
            server.run_release_worker().await;
        };
        let drive = async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            server.stop().await;
        };
        tokio::join!(worker, drive);

        let delivered = server.poll_messages(&client_addr).await;
        assert_eq!(delivered, vec![b"hi".to_vec()]);
    }
}
