//! The seam between the executor and whatever actually runs the code.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// One expiration rule requested from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationPolicy {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    pub expiration_policies: Vec<ExpirationPolicy>,
}

impl Lifecycle {
    /// Delete the sandbox after `ttl` (e.g. `10m`) without activity.
    #[must_use]
    pub fn idle_ttl(ttl: &str) -> Self {
        Self {
            expiration_policies: vec![ExpirationPolicy {
                kind: "ttl-idle".to_string(),
                action: "delete".to_string(),
                value: ttl.to_string(),
            }],
        }
    }
}

/// What to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub lifecycle: Lifecycle,
}

/// A command to run inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Process name, used to kill the run later.
    pub name: String,
    pub env: BTreeMap<String, String>,
    pub command: String,
    pub timeout: Duration,
}

/// Captured result of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Combined log stream, when the provider keeps one.
    pub logs: String,
}

impl ExecOutput {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A provisioned sandbox.
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    /// Run a command to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the command could not be started or its result could not be read.
    /// A command that runs and exits non-zero is not an error.
    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput>;

    /// Whether the sandbox can still take work.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be asked.
    async fn is_alive(&self) -> Result<bool>;

    /// Terminate a running process by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the request.
    async fn kill(&self, process_name: &str) -> Result<()>;
}

/// Creates sandboxes.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Short provider name for logs.
    fn kind(&self) -> &'static str;

    /// Create the sandbox named in `spec`, or attach to it if it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SandboxError::Provision`] if the sandbox cannot be created.
    async fn create_if_not_exists(&self, spec: &SandboxSpec) -> Result<Arc<dyn SandboxHandle>>;
}
