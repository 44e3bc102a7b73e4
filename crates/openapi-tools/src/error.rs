//! Error types for `codemode-openapi-tools`.

use thiserror::Error;

/// Main error type for reference loading and spec analysis.
///
/// Every variant is fatal at startup: the server must not come up with a spec it could not load or
/// with credentials it cannot use.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// Configuration errors (invalid digest pin, bad option values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The reference could not be fetched or read.
    #[error("{}", describe_load_failure(.reference, .reason, .status))]
    ReferenceLoad {
        reference: String,
        reason: String,
        status: Option<u16>,
    },

    /// The reference was obtained but is neither valid JSON nor valid YAML.
    #[error("failed to parse OpenAPI reference from '{location}': {message}")]
    ReferenceParse { location: String, message: String },

    /// The reference bytes do not match the pinned digest (policy `fail`).
    #[error("OpenAPI reference digest mismatch. Expected: {expected}, Got: {actual}")]
    HashMismatch { expected: String, actual: String },

    /// The spec declares security schemes but none of their `AUTH_*` variables are set.
    #[error(
        "No authentication environment variable set. The API reference defines the following auth schemes: {}. Set at least one of them before starting the server.",
        .expected.join(", ")
    )]
    NoCredentials { expected: Vec<String> },
}

fn describe_load_failure(reference: &str, reason: &str, status: &Option<u16>) -> String {
    match status {
        Some(status) => {
            format!("failed to load OpenAPI reference from '{reference}': {reason} (HTTP {status})")
        }
        None => format!("failed to load OpenAPI reference from '{reference}': {reason}"),
    }
}

/// Result type alias for `codemode-openapi-tools` operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;
