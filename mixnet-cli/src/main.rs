//! Command-line entry point for running mix servers and driving clients
//! against a mix network described by a YAML session config.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use mixnet_core::config::Config;
use mixnet_core::identity::PeerIdentity;
use mixnet_core::logging::{init_logging_with_config, LogConfig, LogLevel};

#[derive(Parser)]
#[command(name = "mixnet", about = "Round-synchronized mix network")]
struct Args {
    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON instead of human-readable text
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a mix server from the chain.
    Server {
        /// This server's id, matching an entry in the config's mix_servers list.
        #[arg(long)]
        id: String,
        /// Path to the session's YAML config file.
        #[arg(long)]
        config: PathBuf,
        /// Directory holding peer public keys; created if missing.
        #[arg(long, default_value = ".")]
        config_dir: PathBuf,
        /// Optional directory to write delivered messages to, for inspection.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Run a persistent client session: register, wait for the chain to
    /// start, then emit one onion per round until interrupted.
    Client {
        /// This client's id, matching an entry in the config's clients list.
        #[arg(long)]
        id: String,
        /// Path to the session's YAML config file.
        #[arg(long)]
        config: PathBuf,
        /// Directory holding peer public keys; created if missing.
        #[arg(long, default_value = ".")]
        config_dir: PathBuf,
    },
    /// Queue a single message with a running client session. Connects,
    /// registers if needed, queues the message, and exits without waiting
    /// for delivery.
    PrepareMessage {
        /// Sending client's id.
        #[arg(long)]
        sender_id: String,
        /// Recipient client's id; must have an entry in config.clients and a
        /// published public key in config_dir.
        #[arg(long)]
        recipient_id: String,
        /// Plaintext message body.
        #[arg(long)]
        message: String,
        /// Path to the session's YAML config file.
        #[arg(long)]
        config: PathBuf,
        /// Directory holding peer public keys; created if missing.
        #[arg(long, default_value = ".")]
        config_dir: PathBuf,
    },
    /// Poll the terminal mix for messages delivered to a client, printing
    /// each decrypted plaintext and exiting.
    PollMessages {
        /// Client id to poll for.
        #[arg(long)]
        client_id: String,
        /// Path to the session's YAML config file.
        #[arg(long)]
        config: PathBuf,
        /// Directory holding peer public keys; created if missing.
        #[arg(long, default_value = ".")]
        config_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = LogLevel::from_str(&args.log_level)
        .ok_or_else(|| anyhow!("invalid log level: {}", args.log_level))?;
    let log_config = LogConfig::new(level).json_format(args.json_logs);
    init_logging_with_config(log_config).ok();

    match run(args.command).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            std::process::exit(1);
        }
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Server { id, config, config_dir, output_dir } => {
            let config = Arc::new(Config::from_file(&config).context("loading config")?);
            mixnet_api::run_mix_server(&id, config, config_dir, output_dir).await
        }
        Command::Client { id, config, config_dir } => {
            let config = Arc::new(Config::from_file(&config).context("loading config")?);
            let (client, round_duration) =
                mixnet_api::connect_client(&id, config, config_dir).await?;
            client.run_emission_loop(round_duration).await;
            Ok(())
        }
        Command::PrepareMessage { sender_id, recipient_id, message, config, config_dir } => {
            let config = Arc::new(Config::from_file(&config).context("loading config")?);
            let recipient_addr = config
                .clients
                .iter()
                .find(|c| c.id == recipient_id)
                .map(|c| c.address.clone())
                .ok_or_else(|| anyhow!("unknown recipient id: {recipient_id}"))?;
            let recipient_public = PeerIdentity::read_public_key(&config_dir, &recipient_id)
                .context("reading recipient public key")?;

            let (client, _round_duration) =
                mixnet_api::connect_client(&sender_id, config, config_dir).await?;
            client
                .prepare_message(message.as_bytes(), &recipient_public, &recipient_addr)
                .await?;
            client.stop().await;
            Ok(())
        }
        Command::PollMessages { client_id, config, config_dir } => {
            let config = Arc::new(Config::from_file(&config).context("loading config")?);
            let (client, _round_duration) =
                mixnet_api::connect_client(&client_id, config, config_dir).await?;
            let messages = client.poll_messages().await?;
            for message in &messages {
                println!("{}", String::from_utf8_lossy(message));
            }
            client.stop().await;
            Ok(())
        }
    }
}
