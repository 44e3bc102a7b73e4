//! Process-based sandbox for local development.
//!
//! **Warning**: this provider runs code as a child process of the server, with the server's
//! privileges and network access. It provides NO isolation and is only meant for trying the
//! server out against a trusted API.

use crate::error::{Result, SandboxError};
use crate::provider::{ExecOutput, ExecRequest, SandboxHandle, SandboxProvider, SandboxSpec};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Provider that "creates" sandboxes by handing out local shell runners.
#[derive(Debug, Clone, Default)]
pub struct ProcessSandboxProvider {
    workdir: Option<PathBuf>,
}

impl ProcessSandboxProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run commands from `dir` instead of the server's working directory.
    #[must_use]
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

#[async_trait]
impl SandboxProvider for ProcessSandboxProvider {
    fn kind(&self) -> &'static str {
        "process"
    }

    async fn create_if_not_exists(&self, spec: &SandboxSpec) -> Result<Arc<dyn SandboxHandle>> {
        if let Some(dir) = &self.workdir {
            if !dir.is_dir() {
                return Err(SandboxError::Provision {
                    name: spec.name.clone(),
                    reason: format!("working directory {} does not exist", dir.display()),
                });
            }
        }
        Ok(Arc::new(ProcessSandbox {
            name: spec.name.clone(),
            workdir: self.workdir.clone(),
        }))
    }
}

/// A local "sandbox". Each exec is a fresh `sh -c` child, killed if the call is dropped.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    name: String,
    workdir: Option<PathBuf>,
}

impl ProcessSandbox {
    fn command(&self, request: &ExecRequest) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&request.command)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl SandboxHandle for ProcessSandbox {
    #[instrument(skip(self, request), fields(sandbox = %self.name, process = %request.name))]
    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput> {
        let mut cmd = self.command(&request);
        let output = tokio::time::timeout(request.timeout, cmd.output())
            .await
            .map_err(|_| SandboxError::Timeout(request.timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(exit_code, "process exited");

        Ok(ExecOutput {
            exit_code,
            logs: format!("{stdout}{stderr}"),
            stdout,
            stderr,
        })
    }

    async fn is_alive(&self) -> Result<bool> {
        Ok(true)
    }

    async fn kill(&self, _process_name: &str) -> Result<()> {
        // Children are killed when their exec future is dropped.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Lifecycle;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn spec() -> SandboxSpec {
        SandboxSpec {
            name: "code-mode-test".to_string(),
            labels: BTreeMap::new(),
            lifecycle: Lifecycle::idle_ttl("10m"),
        }
    }

    fn request(command: &str) -> ExecRequest {
        ExecRequest {
            name: "p".to_string(),
            env: BTreeMap::new(),
            command: command.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn runs_shell_command_with_env() {
        let sandbox = ProcessSandboxProvider::new()
            .create_if_not_exists(&spec())
            .await
            .unwrap();
        let mut req = request("printf '%s' \"$AUTH_TOKEN\"");
        req.env.insert("AUTH_TOKEN".to_string(), "s3cret".to_string());

        let out = sandbox.exec(req).await.unwrap();
        assert!(out.is_success());
        assert_eq!(out.stdout, "s3cret");
    }

    #[tokio::test]
    async fn reports_exit_code_and_stderr() {
        let sandbox = ProcessSandboxProvider::new()
            .create_if_not_exists(&spec())
            .await
            .unwrap();
        let out = sandbox.exec(request("echo boom >&2; exit 42")).await.unwrap();
        assert_eq!(out.exit_code, 42);
        assert_eq!(out.stderr.trim(), "boom");
    }

    #[tokio::test]
    async fn enforces_request_timeout() {
        let sandbox = ProcessSandboxProvider::new()
            .create_if_not_exists(&spec())
            .await
            .unwrap();
        let mut req = request("sleep 5");
        req.timeout = Duration::from_millis(200);
        let err = sandbox.exec(req).await.unwrap_err();
        assert!(matches!(err, SandboxError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_workdir_fails_provisioning() {
        let err = ProcessSandboxProvider::new()
            .with_workdir("/definitely/not/here")
            .create_if_not_exists(&spec())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SandboxError::Provision { .. }));
    }
}
