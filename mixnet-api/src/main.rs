use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use mixnet_core::config::Config;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let mut args = std::env::args().skip(1);
    let mut server_id = std::env::var("MIXNET_SERVER_ID").ok();
    let mut config_path = std::env::var("MIXNET_CONFIG").ok();
    let mut config_dir = std::env::var("MIXNET_CONFIG_DIR").ok();
    let mut output_dir = std::env::var("MIXNET_OUTPUT_DIR").ok();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--id" => server_id = args.next(),
            "--config" => config_path = args.next(),
            "--config-dir" => config_dir = args.next(),
            "--output-dir" => output_dir = args.next(),
            other => anyhow::bail!("unrecognized argument: {other}"),
        }
    }

    let server_id = server_id.context("missing --id (or MIXNET_SERVER_ID)")?;
    let config_path = config_path.context("missing --config (or MIXNET_CONFIG)")?;
    let config_dir = config_dir.unwrap_or_else(|| ".".to_string());
    let output_dir = output_dir.map(PathBuf::from);

    let config = Arc::new(Config::from_file(&config_path)?);
    info!(server_id, config_path, "starting mix server");

    mixnet_api::run_mix_server(&server_id, config, PathBuf::from(config_dir), output_dir).await
}
