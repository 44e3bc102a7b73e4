//! Command-line and environment configuration.
//!
//! Every flag can also be set through the environment variable named next to it, which is how
//! the server is normally configured in a container.

use crate::error::{Result, StartupError};
use crate::introspect::SearchLimits;
use clap::{ArgAction, Parser, ValueEnum};
use codemode_openapi_tools::{HashPolicy, LoadOptions};
use codemode_sandbox::executor::{DEFAULT_IDENTITY, DEFAULT_IDLE_TTL};
use codemode_sandbox::{ExecutorConfig, RemoteSandboxConfig};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Where `execute` runs code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SandboxProviderKind {
    /// HTTP sandbox API (`SANDBOX_API_URL`).
    Remote,
    /// Local child processes. No isolation; development only.
    Process,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "codemode-mcp-server",
    about = "Expose an OpenAPI-described API to MCP clients as two tools: search and execute",
    long_about = "Loads an OpenAPI spec and serves two MCP tools over streamable HTTP at /mcp.\n\n\
                  search runs JavaScript against the spec in-process; execute runs JavaScript\n\
                  against the live API inside a sandbox, with AUTH_<SCHEME> credentials in\n\
                  process.env.",
    version
)]
pub struct Config {
    /// OpenAPI reference: http(s) URL, base64-encoded JSON, or a file path
    #[arg(long, env = "OPENAPI_REFERENCE")]
    pub reference: Option<String>,

    /// Expected digest of the reference bytes (`sha256:<hex>`)
    #[arg(long, env = "OPENAPI_REFERENCE_SHA256")]
    pub reference_sha256: Option<String>,

    /// What to do when the reference digest does not match (warn, fail, ignore)
    #[arg(long, env = "OPENAPI_REFERENCE_HASH_POLICY", default_value = "warn")]
    pub hash_policy: HashPolicy,

    /// Inline local `$ref`s before exposing the spec
    #[arg(long, env = "OPENAPI_INLINE_REFS", default_value_t = true, action = ArgAction::Set)]
    pub inline_refs: bool,

    /// Deadline for loading the reference at startup
    #[arg(long, env = "STARTUP_TIMEOUT_SECS", default_value_t = 30)]
    pub startup_timeout_secs: u64,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 80)]
    pub port: u16,

    /// Log level (`RUST_LOG` takes precedence)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Serve MCP without sessions
    #[arg(long, env = "MCP_STATELESS")]
    pub stateless: bool,

    #[arg(long, env = "SANDBOX_PROVIDER", value_enum, default_value_t = SandboxProviderKind::Remote)]
    pub sandbox_provider: SandboxProviderKind,

    /// Base URL of the sandbox API (required for the remote provider)
    #[arg(long, env = "SANDBOX_API_URL")]
    pub sandbox_api_url: Option<String>,

    #[arg(long, env = "SANDBOX_API_KEY", hide_env_values = true)]
    pub sandbox_api_key: Option<String>,

    /// Logical caller identity; names the sandbox
    #[arg(long, env = "SANDBOX_IDENTITY", default_value = DEFAULT_IDENTITY)]
    pub sandbox_identity: String,

    /// Idle time after which the provider deletes the sandbox (e.g. 10m, 1h)
    #[arg(long, env = "SANDBOX_IDLE_TTL", default_value = DEFAULT_IDLE_TTL)]
    pub sandbox_idle_ttl: String,

    /// Give each MCP session its own sandbox
    #[arg(long, env = "SANDBOX_PER_SESSION")]
    pub sandbox_per_session: bool,

    /// Node.js binary inside the sandbox
    #[arg(long, env = "SANDBOX_NODE_BIN", default_value = "node")]
    pub sandbox_node_bin: String,

    /// Upper bound for the `timeout` argument of execute
    #[arg(long, env = "EXECUTE_MAX_TIMEOUT_SECS", default_value_t = 300)]
    pub execute_max_timeout_secs: u64,

    #[arg(long, env = "SEARCH_TIMEOUT_MS", default_value_t = 5000)]
    pub search_timeout_ms: u64,

    #[arg(long, env = "SEARCH_MAX_CONCURRENCY", default_value_t = 8)]
    pub search_max_concurrency: usize,

    /// Loop iterations a single search may run
    #[arg(long, env = "SEARCH_LOOP_LIMIT", default_value_t = 10_000_000)]
    pub search_loop_limit: u64,
}

impl Config {
    /// Reject combinations clap cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.sandbox_provider == SandboxProviderKind::Remote
            && self.sandbox_api_url.as_deref().is_none_or(|u| u.trim().is_empty())
        {
            return Err(StartupError::Config(
                "SANDBOX_API_URL is required when SANDBOX_PROVIDER=remote".to_string(),
            ));
        }
        if !is_valid_ttl(&self.sandbox_idle_ttl) {
            return Err(StartupError::Config(format!(
                "invalid SANDBOX_IDLE_TTL '{}': expected a number followed by s, m, h or d",
                self.sandbox_idle_ttl
            )));
        }
        if self.sandbox_identity.trim().is_empty() {
            return Err(StartupError::Config(
                "SANDBOX_IDENTITY must not be empty".to_string(),
            ));
        }
        if self.execute_max_timeout_secs == 0 {
            return Err(StartupError::Config(
                "EXECUTE_MAX_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        if self.search_max_concurrency == 0 {
            return Err(StartupError::Config(
                "SEARCH_MAX_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    #[must_use]
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            expected_sha256: self
                .reference_sha256
                .clone()
                .filter(|s| !s.trim().is_empty()),
            hash_policy: self.hash_policy,
            timeout: Duration::from_secs(self.startup_timeout_secs.max(1)),
            inline_refs: self.inline_refs,
        }
    }

    #[must_use]
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            identity: self.sandbox_identity.trim().to_string(),
            idle_ttl: self.sandbox_idle_ttl.clone(),
            node_bin: self.sandbox_node_bin.clone(),
            per_session: self.sandbox_per_session,
        }
    }

    /// Remote provider settings, if a sandbox API URL is configured.
    #[must_use]
    pub fn remote_sandbox(&self) -> Option<RemoteSandboxConfig> {
        let base_url = self.sandbox_api_url.as_deref()?.trim();
        if base_url.is_empty() {
            return None;
        }
        Some(RemoteSandboxConfig {
            base_url: base_url.to_string(),
            api_key: self.sandbox_api_key.clone(),
        })
    }

    #[must_use]
    pub fn execute_max_timeout(&self) -> Duration {
        Duration::from_secs(self.execute_max_timeout_secs)
    }

    #[must_use]
    pub fn search_limits(&self) -> SearchLimits {
        SearchLimits {
            timeout: Duration::from_millis(self.search_timeout_ms.max(1)),
            max_concurrency: self.search_max_concurrency,
            loop_iteration_limit: self.search_loop_limit,
            ..SearchLimits::default()
        }
    }
}

fn is_valid_ttl(ttl: &str) -> bool {
    let Some(unit) = ttl.chars().last() else {
        return false;
    };
    let digits = &ttl[..ttl.len() - unit.len_utf8()];
    matches!(unit, 's' | 'm' | 'h' | 'd')
        && !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
}
