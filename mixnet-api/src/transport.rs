//! gRPC transport adapters binding the transport-agnostic core traits
//! (`mixnet_core::server::Forwarder`, `mixnet_core::client::MixTransport`)
//! to tonic clients.

use std::collections::HashMap;
use std::sync::Arc;

use mixnet_core::client::MixTransport;
use mixnet_core::error::{MixnetError, Result};
use mixnet_core::server::Forwarder;
use tokio::sync::Mutex;
use tonic::transport::Channel;

use crate::proto::mix_service_client::MixServiceClient;
use crate::proto::{ForwardMessageRequest, PollMessagesRequest, RegisterRequest, WaitForStartRequest};

fn endpoint(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

/// Caches one gRPC channel per peer address so a mix server does not
/// reconnect on every forwarded message.
#[derive(Default)]
pub struct ChannelPool {
    clients: Mutex<HashMap<String, MixServiceClient<Channel>>>,
}

impl ChannelPool {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client_for(&self, address: &str) -> Result<MixServiceClient<Channel>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(address) {
            return Ok(client.clone());
        }

        let channel = Channel::from_shared(endpoint(address))
            .map_err(|e| MixnetError::Transport(e.to_string()))?
            .connect()
            .await
            .map_err(|e| MixnetError::Transport(format!("connecting to {address}: {e}")))?;
        let client = MixServiceClient::new(channel);
        clients.insert(address.to_string(), client.clone());
        Ok(client)
    }
}

/// Forwards a peeled onion layer to the next mix in the chain over gRPC.
pub struct GrpcForwarder {
    pool: Arc<ChannelPool>,
}

impl GrpcForwarder {
    pub fn new(pool: Arc<ChannelPool>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Forwarder for GrpcForwarder {
    async fn forward(&self, address: &str, payload: Vec<u8>, round: u64) -> Result<()> {
        let mut client = self.pool.client_for(address).await?;
        client
            .forward_message(ForwardMessageRequest { payload, round })
            .await
            .map_err(|e| MixnetError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Drives a client's `Register`/`WaitForStart`/`ForwardMessage` calls
/// against the entry mix and `PollMessages` against the terminal mix.
pub struct GrpcClientTransport {
    entry_mix_client: Mutex<MixServiceClient<Channel>>,
    terminal_mix_client: Mutex<MixServiceClient<Channel>>,
}

impl GrpcClientTransport {
    pub async fn connect(entry_mix_addr: &str, terminal_mix_addr: &str) -> Result<Self> {
        let entry = Channel::from_shared(endpoint(entry_mix_addr))
            .map_err(|e| MixnetError::Transport(e.to_string()))?
            .connect()
            .await
            .map_err(|e| MixnetError::Transport(format!("connecting to entry mix: {e}")))?;
        let terminal = Channel::from_shared(endpoint(terminal_mix_addr))
            .map_err(|e| MixnetError::Transport(e.to_string()))?
            .connect()
            .await
            .map_err(|e| MixnetError::Transport(format!("connecting to terminal mix: {e}")))?;

        Ok(Self {
            entry_mix_client: Mutex::new(MixServiceClient::new(entry)),
            terminal_mix_client: Mutex::new(MixServiceClient::new(terminal)),
        })
    }
}

#[async_trait::async_trait]
impl MixTransport for GrpcClientTransport {
    async fn register(&self, client_id: &str) -> Result<bool> {
        let mut client = self.entry_mix_client.lock().await;
        let resp = client
            .register(RegisterRequest { client_id: client_id.to_string() })
            .await
            .map_err(|e| MixnetError::Transport(e.to_string()))?;
        Ok(resp.into_inner().ok)
    }

    async fn wait_for_start(&self, client_id: &str) -> Result<f64> {
        let mut client = self.entry_mix_client.lock().await;
        let resp = client
            .wait_for_start(WaitForStartRequest { client_id: client_id.to_string() })
            .await
            .map_err(|e| MixnetError::Transport(e.to_string()))?;
        Ok(resp.into_inner().round_duration)
    }

    async fn forward_message(&self, payload: Vec<u8>, round: u64) -> Result<()> {
        let mut client = self.entry_mix_client.lock().await;
        client
            .forward_message(ForwardMessageRequest { payload, round })
            .await
            .map_err(|e| MixnetError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn poll_messages(&self, client_addr: &str) -> Result<Vec<Vec<u8>>> {
        let mut client = self.terminal_mix_client.lock().await;
        let resp = client
            .poll_messages(PollMessagesRequest { client_addr: client_addr.to_string() })
            .await
            .map_err(|e| MixnetError::Transport(e.to_string()))?;
        Ok(resp.into_inner().payloads)
    }
}
