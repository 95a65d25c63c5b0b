//! End-to-end CLI tests: spawn the built `mixnet` binary as child processes
//! to exercise the full server/client wire-up the way an operator would.

use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::time::sleep;

const BIN: &str = env!("CARGO_BIN_EXE_mixnet");

fn write_config(dir: &Path, mixes: &[(&str, u16)], clients: &[(&str, u16)]) -> std::path::PathBuf {
    let mut yaml = String::new();
    yaml.push_str(&format!("messages_per_round: {}\n", clients.len()));
    yaml.push_str("round_duration: 0.2\n");
    yaml.push_str("dummy_payload: dummy\n");
    yaml.push_str("mix_servers:\n");
    for (id, port) in mixes {
        yaml.push_str(&format!("  - id: {id}\n    address: \"127.0.0.1:{port}\"\n"));
    }
    yaml.push_str("clients:\n");
    for (id, port) in clients {
        yaml.push_str(&format!("  - id: {id}\n    address: \"127.0.0.1:{port}\"\n"));
    }

    let path = dir.join("config.yaml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    path
}

fn spawn_server(config: &Path, config_dir: &Path, id: &str) -> Child {
    Command::new(BIN)
        .args([
            "server",
            "--id",
            id,
            "--config",
            config.to_str().unwrap(),
            "--config-dir",
            config_dir.to_str().unwrap(),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("spawn mix server")
}

async fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(BIN)
        .args(args)
        .output()
        .await
        .expect("run mixnet cli")
}

#[tokio::test]
async fn server_rejects_missing_config() {
    let output = run_cli(&[
        "server",
        "--id",
        "s1",
        "--config",
        "/does/not/exist.yaml",
    ])
    .await;
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
}

#[tokio::test]
async fn three_mix_chain_delivers_message_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        &[("s1", 51001), ("s2", 51002), ("s3", 51003)],
        &[("c1", 51011), ("c2", 51012)],
    );

    let mut s1 = spawn_server(&config, dir.path(), "s1");
    let mut s2 = spawn_server(&config, dir.path(), "s2");
    let mut s3 = spawn_server(&config, dir.path(), "s3");

    // Let the servers bind and publish their public keys before clients dial in.
    sleep(Duration::from_millis(500)).await;

    let prepare = run_cli(&[
        "prepare-message",
        "--sender-id",
        "c1",
        "--recipient-id",
        "c2",
        "--message",
        "hello from c1",
        "--config",
        config.to_str().unwrap(),
        "--config-dir",
        dir.path().to_str().unwrap(),
    ])
    .await;
    assert!(prepare.status.success(), "{:?}", prepare);

    let c2_register = run_cli(&[
        "poll-messages",
        "--client-id",
        "c2",
        "--config",
        config.to_str().unwrap(),
        "--config-dir",
        dir.path().to_str().unwrap(),
    ])
    .await;
    assert!(c2_register.status.success(), "{:?}", c2_register);

    s1.kill().await.ok();
    s2.kill().await.ok();
    s3.kill().await.ok();
}
