//! Remote sandbox provider backed by an HTTP sandbox API.
//!
//! # API
//!
//! ```text
//! PUT    /sandboxes/{name}                    create (idempotent; 409 means it already exists)
//! GET    /sandboxes/{name}                    status
//! POST   /sandboxes/{name}/process            run a command
//! DELETE /sandboxes/{name}/process/{process}  kill a running command
//! ```
//!
//! Requests carry `Authorization: Bearer <key>` when an API key is configured.

use crate::error::{Result, SandboxError};
use crate::provider::{ExecOutput, ExecRequest, SandboxHandle, SandboxProvider, SandboxSpec};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Added to the execution timeout for the HTTP request deadline, to cover the provider's own
/// scheduling and response time.
const HTTP_TIMEOUT_BUFFER: Duration = Duration::from_secs(30);

/// Deadline for control calls (create, status, kill).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for [`RemoteSandboxProvider`].
#[derive(Debug, Clone)]
pub struct RemoteSandboxConfig {
    /// Base URL of the sandbox API (e.g. `https://sandbox.internal/v1`).
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessBody<'a> {
    name: &'a str,
    command: &'a str,
    env: &'a BTreeMap<String, String>,
    /// Whole seconds, rounded up.
    timeout: u64,
    wait_for_completion: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProcessResponse {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    logs: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusResponse {
    status: Option<String>,
}

#[derive(Debug, Clone)]
struct Connection {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl Connection {
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                SandboxError::Config(format!(
                    "sandbox API URL cannot be a base: {}",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

fn transport_error(e: &reqwest::Error) -> SandboxError {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        let mut redacted = u.clone();
        let _ = redacted.set_username("");
        let _ = redacted.set_password(None);
        redacted.set_query(None);
        msg = msg.replace(u.as_str(), redacted.as_str());
    }
    SandboxError::Transport(msg)
}

async fn error_body(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    }
}

/// The provider takes whole seconds. Rounding up keeps it from stopping a run the executor is
/// still waiting on.
fn whole_seconds(timeout: Duration) -> u64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    secs.max(1)
}

/// Creates sandboxes through the remote API.
#[derive(Debug, Clone)]
pub struct RemoteSandboxProvider {
    conn: Connection,
}

impl RemoteSandboxProvider {
    /// # Errors
    ///
    /// Returns [`SandboxError::Config`] if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(config: RemoteSandboxConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            SandboxError::Config(format!(
                "invalid sandbox API URL '{}': {e}",
                config.base_url
            ))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SandboxError::Config(format!(
                "sandbox API URL cannot be a base: {}",
                config.base_url
            )));
        }
        let client = Client::builder()
            .build()
            .map_err(|e| SandboxError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            conn: Connection {
                client,
                base_url,
                api_key: config.api_key.filter(|k| !k.is_empty()),
            },
        })
    }
}

#[async_trait]
impl SandboxProvider for RemoteSandboxProvider {
    fn kind(&self) -> &'static str {
        "remote"
    }

    #[instrument(skip(self, spec), fields(sandbox = %spec.name))]
    async fn create_if_not_exists(&self, spec: &SandboxSpec) -> Result<Arc<dyn SandboxHandle>> {
        let url = self.conn.url(&["sandboxes", &spec.name])?;
        let response = self
            .conn
            .authorize(self.conn.client.put(url).json(spec))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|e| SandboxError::Provision {
                name: spec.name.clone(),
                reason: transport_error(&e).to_string(),
            })?;

        let status = response.status();
        if !(status.is_success() || status == StatusCode::CONFLICT) {
            return Err(SandboxError::Provision {
                name: spec.name.clone(),
                reason: error_body(response).await,
            });
        }
        debug!(%status, "sandbox ready");

        Ok(Arc::new(RemoteSandbox {
            name: spec.name.clone(),
            conn: self.conn.clone(),
        }))
    }
}

/// A sandbox living behind the remote API.
#[derive(Debug, Clone)]
pub struct RemoteSandbox {
    name: String,
    conn: Connection,
}

#[async_trait]
impl SandboxHandle for RemoteSandbox {
    #[instrument(skip(self, request), fields(sandbox = %self.name, process = %request.name))]
    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput> {
        let url = self.conn.url(&["sandboxes", &self.name, "process"])?;
        let body = ProcessBody {
            name: &request.name,
            command: &request.command,
            env: &request.env,
            timeout: whole_seconds(request.timeout),
            wait_for_completion: true,
        };

        let response = self
            .conn
            .authorize(self.conn.client.post(url).json(&body))
            .timeout(request.timeout + HTTP_TIMEOUT_BUFFER)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
            return Err(SandboxError::Timeout(request.timeout));
        }
        if !status.is_success() {
            return Err(SandboxError::Exec(error_body(response).await));
        }

        let parsed: ProcessResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::Exec(format!("invalid process response: {e}")))?;

        Ok(ExecOutput {
            // A finished process without an exit code is treated as a failure.
            exit_code: parsed.exit_code.unwrap_or(-1),
            stdout: parsed.stdout,
            stderr: parsed.stderr,
            logs: parsed.logs,
        })
    }

    async fn is_alive(&self) -> Result<bool> {
        let url = self.conn.url(&["sandboxes", &self.name])?;
        let response = self
            .conn
            .authorize(self.conn.client.get(url))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(SandboxError::Transport(error_body(response).await));
        }

        let status: StatusResponse = response.json().await.unwrap_or_default();
        Ok(!matches!(
            status.status.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("terminated" | "terminating" | "deleted" | "deleting" | "failed")
        ))
    }

    async fn kill(&self, process_name: &str) -> Result<()> {
        let url = self
            .conn
            .url(&["sandboxes", &self.name, "process", process_name])?;
        let response = self
            .conn
            .authorize(self.conn.client.delete(url))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        // Already gone is fine.
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(SandboxError::Exec(error_body(response).await))
        }
    }
}
