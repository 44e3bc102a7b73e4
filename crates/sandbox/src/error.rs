//! Sandbox error types.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while provisioning a sandbox or running code in it.
///
/// All of these are per call: the server turns them into tool-level error results.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Invalid provider configuration (missing API URL, bad idle TTL).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The provider refused or failed to create the sandbox.
    #[error("failed to provision sandbox '{name}': {reason}")]
    Provision { name: String, reason: String },

    /// The provider could not run the command.
    #[error("execution failed: {0}")]
    Exec(String),

    /// The run exceeded its deadline and was terminated.
    #[error("execution timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// The caller gave up on the run.
    #[error("execution cancelled")]
    Cancelled,

    /// The sandbox API could not be reached.
    #[error("sandbox API request failed: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
