//! Error types for the MCP server.

use codemode_openapi_tools::OpenApiToolsError;
use codemode_sandbox::SandboxError;
use thiserror::Error;

/// Errors that stop the server from starting.
///
/// Per-call failures never surface here; they become tool results with `isError: true`.
#[derive(Error, Debug)]
pub enum StartupError {
    /// Configuration errors (conflicting or malformed settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The OpenAPI reference could not be loaded, or its credentials are missing
    #[error(transparent)]
    Reference(#[from] OpenApiToolsError),

    /// The sandbox provider could not be set up
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// IO errors (bind failures)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for server startup.
pub type Result<T> = std::result::Result<T, StartupError>;
