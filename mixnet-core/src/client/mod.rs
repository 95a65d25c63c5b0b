//! Client runtime: registration/start handshake, per-round onion emission,
//! and polling the terminal mix for delivered messages.
//!
//! ## Lifecycle
//!
//! ```text
//! INIT ──register()──► REGISTERED ──wait_for_start()──► RUNNING ──stop()──► STOPPED
//! ```
//!
//! While `RUNNING`, an emission loop ticks every `round_duration`: if the
//! client has nothing queued for the current round it synthesizes a dummy,
//! then sends whatever is queued to the entry mix and advances its round
//! counter. This keeps every round's batch at exactly `messages_per_round`
//! messages regardless of how much real traffic exists, which is what gives
//! the network its anonymity set.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use x25519_dalek::PublicKey;

use crate::config::Config;
use crate::error::{MixnetError, Result};
use crate::identity::PeerIdentity;
use crate::onion::{build_onion, peel_layer, Hop};
use crate::shutdown::ShutdownCoordinator;

/// RPC surface a client needs against the mix chain. Implemented by the
/// gRPC transport layer; kept abstract here so the runtime is testable
/// without a network.
#[async_trait::async_trait]
pub trait MixTransport: Send + Sync {
    async fn register(&self, client_id: &str) -> Result<bool>;
    async fn wait_for_start(&self, client_id: &str) -> Result<f64>;
    async fn forward_message(&self, payload: Vec<u8>, round: u64) -> Result<()>;
    async fn poll_messages(&self, client_addr: &str) -> Result<Vec<Vec<u8>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Init,
    Registered,
    Running,
    Stopped,
}

pub struct ClientRuntime {
    identity: PeerIdentity,
    config: Arc<Config>,
    config_dir: PathBuf,
    transport: Arc<dyn MixTransport>,
    shutdown: Arc<ShutdownCoordinator>,

    state: Mutex<ClientState>,
    outbox: Mutex<HashMap<u64, Vec<u8>>>,
    current_round: AtomicU64,
}

impl ClientRuntime {
    pub fn new(
        identity: PeerIdentity,
        config: Arc<Config>,
        config_dir: PathBuf,
        transport: Arc<dyn MixTransport>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            identity,
            config,
            config_dir,
            transport,
            shutdown,
            state: Mutex::new(ClientState::Init),
            outbox: Mutex::new(HashMap::new()),
            current_round: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> ClientState {
        *self.state.lock().await
    }

    pub fn own_address(&self) -> &str {
        self.config
            .clients
            .iter()
            .find(|c| c.id == self.identity.id())
            .map(|c| c.address.as_str())
            .unwrap_or_default()
    }

    /// `INIT -> REGISTERED -> RUNNING`. Registers with the entry mix, then
    /// blocks until the whole client set has registered. A full quorum is
    /// answered with `ok=false`, not an RPC error; the caller must abort.
    pub async fn start(&self) -> Result<f64> {
        let accepted = self.transport.register(self.identity.id()).await?;
        if !accepted {
            warn!(client_id = self.identity.id(), "registration rejected: quorum already full");
            return Err(MixnetError::RegistrationFull);
        }
        *self.state.lock().await = ClientState::Registered;
        info!(client_id = self.identity.id(), "registered with entry mix");

        let round_duration = self.transport.wait_for_start(self.identity.id()).await?;
        *self.state.lock().await = ClientState::Running;
        info!(client_id = self.identity.id(), round_duration, "session started");
        Ok(round_duration)
    }

    /// Queue a real message for delivery. Chooses the current round if its
    /// slot is free, otherwise the next one.
    pub async fn prepare_message(
        &self,
        plaintext: &[u8],
        recipient_public: &PublicKey,
        recipient_addr: &str,
    ) -> Result<()> {
        self.prepare(plaintext, recipient_public, recipient_addr, false)
            .await
    }

    async fn prepare(
        &self,
        plaintext: &[u8],
        recipient_public: &PublicKey,
        recipient_addr: &str,
        is_dummy: bool,
    ) -> Result<()> {
        let current = self.current_round.load(Ordering::SeqCst);
        let mut outbox = self.outbox.lock().await;

        let target_round = if !outbox.contains_key(&current) {
            current
        } else {
            current + 1
        };

        if is_dummy && outbox.contains_key(&target_round) {
            debug!(round = target_round, "dummy slot already occupied, dropping");
            return Ok(());
        }

        let onion = self.build_onion_for(plaintext, recipient_public, recipient_addr)?;
        outbox.insert(target_round, onion);

        let _op = crate::tracing::client::trace_prepare(target_round, is_dummy);
        Ok(())
    }

    /// Builds the hop list innermost-first (`build_onion`'s expected order):
    /// the recipient, then each mix from last to first. Every mix's
    /// embedded address is its successor's address; the last mix's is the
    /// recipient's, since that is who it delivers to.
    fn build_onion_for(
        &self,
        plaintext: &[u8],
        recipient_public: &PublicKey,
        recipient_addr: &str,
    ) -> Result<Vec<u8>> {
        let mix_servers = &self.config.mix_servers;
        let mut mix_pubkeys = Vec::with_capacity(mix_servers.len());
        for mix in mix_servers {
            mix_pubkeys.push(PeerIdentity::read_public_key(&self.config_dir, &mix.id)?);
        }

        let mut hops = Vec::with_capacity(mix_servers.len() + 1);
        hops.push(Hop { public_key: recipient_public, address: recipient_addr });

        for i in (0..mix_servers.len()).rev() {
            let address = if i == mix_servers.len() - 1 {
                recipient_addr
            } else {
                mix_servers[i + 1].address.as_str()
            };
            hops.push(Hop { public_key: &mix_pubkeys[i], address });
        }

        Ok(build_onion(plaintext, &hops))
    }

    /// One tick of the emission loop: synthesize a dummy if the current
    /// round's slot is empty, send whatever is queued, advance the round.
    async fn emit_round(&self) -> Result<()> {
        let current = self.current_round.load(Ordering::SeqCst);

        let has_entry = self.outbox.lock().await.contains_key(&current);
        if !has_entry {
            let own_public = self.identity.public_key();
            let own_addr = self.own_address().to_string();
            self.prepare(
                self.config.dummy_payload.as_bytes(),
                own_public,
                &own_addr,
                true,
            )
            .await?;
        }

        let onion = self.outbox.lock().await.remove(&current);
        if let Some(onion) = onion {
            self.transport.forward_message(onion, current).await?;
        }

        self.current_round.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Runs the emission loop until shutdown. Intended to be spawned as its
    /// own task once `start()` has returned `RUNNING`.
    pub async fn run_emission_loop(&self, round_duration: f64) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs_f64(round_duration));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.emit_round().await {
                        warn!(error = %e, "emission tick failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("emission loop observed shutdown signal");
                    break;
                }
            }
        }

        *self.state.lock().await = ClientState::Stopped;
    }

    /// `PollMessages`, decrypted and filtered: dummy-payload entries (cover
    /// traffic addressed to self) never reach the caller.
    pub async fn poll_messages(&self) -> Result<Vec<Vec<u8>>> {
        let sealed = self.transport.poll_messages(self.own_address()).await?;
        let mut out = Vec::with_capacity(sealed.len());
        for ciphertext in sealed {
            let descriptor = peel_layer(self.identity.secret_key(), &ciphertext)
                .map_err(|e| MixnetError::Crypto(format!("failed to open delivered message: {e}")))?;
            if descriptor.payload != self.config.dummy_payload.as_bytes() {
                out.push(descriptor.payload);
            }
        }
        let _op = crate::tracing::client::trace_poll(out.len());
        Ok(out)
    }

    pub async fn stop(&self) {
        self.shutdown.shutdown().await;
        if let Err(e) = self.identity.drop_public_key_file() {
            warn!(error = %e, "failed to remove public key file on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sample_config;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    struct RecordingTransport {
        sent: StdMutex<Vec<(Vec<u8>, u64)>>,
        delivered: StdMutex<Vec<Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl MixTransport for RecordingTransport {
        async fn register(&self, _client_id: &str) -> Result<bool> {
            Ok(true)
        }
        async fn wait_for_start(&self, _client_id: &str) -> Result<f64> {
            Ok(0.05)
        }
        async fn forward_message(&self, payload: Vec<u8>, round: u64) -> Result<()> {
            self.sent.lock().unwrap().push((payload, round));
            Ok(())
        }
        async fn poll_messages(&self, _client_addr: &str) -> Result<Vec<Vec<u8>>> {
            Ok(self.delivered.lock().unwrap().drain(..).collect())
        }
    }

    fn make_client(dir: &TempDir, id: &str) -> (ClientRuntime, Arc<RecordingTransport>) {
        let mut config = sample_config();
        config.clients[0].id = id.to_string();
        let config = Arc::new(config);
        let identity = PeerIdentity::generate(id, dir.path()).unwrap();
        let transport = Arc::new(RecordingTransport {
            sent: StdMutex::new(Vec::new()),
            delivered: StdMutex::new(Vec::new()),
        });
        let shutdown = Arc::new(ShutdownCoordinator::new(std::time::Duration::from_millis(10)));
        let client = ClientRuntime::new(identity, config, dir.path().to_path_buf(), transport.clone(), shutdown);
        (client, transport)
    }

    #[tokio::test]
    async fn start_transitions_through_states() {
        let dir = TempDir::new().unwrap();
        let (client, _t) = make_client(&dir, "c1");
        assert_eq!(client.state().await, ClientState::Init);
        client.start().await.unwrap();
        assert_eq!(client.state().await, ClientState::Running);
    }

    #[tokio::test]
    async fn poll_filters_dummy_payload() {
        let dir = TempDir::new().unwrap();
        let (client, transport) = make_client(&dir, "c1");

        let own_pub = *client.identity.public_key();
        let dummy_onion = build_onion(
            b"dummy",
            &[Hop { public_key: &own_pub, address: "self" }],
        );
        let real_onion = build_onion(
            b"hello",
            &[Hop { public_key: &own_pub, address: "self" }],
        );
        transport.delivered.lock().unwrap().push(dummy_onion);
        transport.delivered.lock().unwrap().push(real_onion);

        let messages = client.poll_messages().await.unwrap();
        assert_eq!(messages, vec![b"hello".to_vec()]);
    }

    #[tokio::test]
    async fn emit_round_sends_dummy_when_outbox_empty() {
        let dir = TempDir::new().unwrap();
        let (client, transport) = make_client(&dir, "c1");
        client.emit_round().await.unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
        assert_eq!(client.current_round.load(Ordering::SeqCst), 1);
    }
}
