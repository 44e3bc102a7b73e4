#![allow(dead_code)]

use anyhow::Context as _;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

pub use codemode_test_support::KillOnDrop;

pub fn pick_unused_port() -> anyhow::Result<u16> {
    codemode_test_support::pick_unused_port()
}

pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    codemode_test_support::wait_http_ok(url, timeout_dur).await
}

/// Command for the server binary with a clean environment: only `PATH` and `envs` are set.
pub fn server_command(reference: &Path, port: u16, envs: &[(&str, &str)]) -> Command {
    let bin = env!("CARGO_BIN_EXE_codemode-mcp-server");
    let mut cmd = Command::new(bin);
    cmd.env_clear()
        .env("PATH", std::env::var_os("PATH").unwrap_or_default())
        .env("OPENAPI_REFERENCE", reference)
        .env("HOST", "127.0.0.1")
        .env("PORT", port.to_string())
        .env("LOG_LEVEL", "info")
        .envs(envs.iter().copied());
    cmd
}

pub fn spawn_server(reference: &Path, port: u16, envs: &[(&str, &str)]) -> anyhow::Result<Child> {
    server_command(reference, port, envs)
        .spawn()
        .context("spawn codemode-mcp-server")
}

/// Start the server and wait for `/health`. Returns its base URL.
pub async fn start_server(
    reference: &Path,
    envs: &[(&str, &str)],
) -> anyhow::Result<(String, KillOnDrop)> {
    let port = pick_unused_port()?;
    let child = KillOnDrop(spawn_server(reference, port, envs)?);

    let base_url = format!("http://127.0.0.1:{port}");
    wait_http_ok(&format!("{base_url}/health"), Duration::from_secs(20)).await?;
    Ok((base_url, child))
}

/// Run the server to completion with captured stderr, as for a startup that should fail.
pub async fn run_to_exit(
    reference: &Path,
    envs: &[(&str, &str)],
    timeout_dur: Duration,
) -> anyhow::Result<std::process::Output> {
    let port = pick_unused_port()?;
    let mut cmd = server_command(reference, port, envs);
    cmd.stdout(Stdio::null()).stderr(Stdio::piped());
    let child = tokio::process::Command::from(cmd)
        .kill_on_drop(true)
        .spawn()
        .context("spawn codemode-mcp-server")?;
    tokio::time::timeout(timeout_dur, child.wait_with_output())
        .await
        .context("server did not exit")?
        .context("wait for server")
}
