//! `OpenAPI` reference handling for the Code Mode MCP server.
//!
//! Loads a spec from a URL, inline base64 payload or file, builds a read-only view of it, works out
//! which credentials the environment supplies, and synthesizes the two tool descriptions.
//!
//! Nothing here talks MCP; the server crate wires these pieces into tools.

pub mod auth;
pub mod describe;
pub mod document;
pub mod error;
pub mod reference;
pub mod resolver;

pub use auth::{AuthResolution, AuthSnippet, scheme_env_var};
pub use describe::{SampleEndpoints, ToolDescriptions};
pub use document::SpecDocument;
pub use error::{OpenApiToolsError, Result};
pub use reference::{HashPolicy, LoadOptions, LoadedReference, Provenance, ReferenceLoader};
