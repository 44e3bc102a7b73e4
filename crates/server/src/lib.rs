//! Code Mode MCP server: one OpenAPI spec in, two MCP tools out.
//!
//! `search` evaluates JavaScript against the spec in-process; `execute` runs JavaScript against
//! the live API inside a sandbox, with the API's credentials in `process.env`.

pub mod config;
pub mod error;
pub mod introspect;
pub mod server;
pub mod session_manager;
pub mod startup;
pub mod telemetry;
pub mod tools;

pub use config::Config;
pub use error::{Result, StartupError};
pub use server::{CodeModeServer, router, serve, shutdown_on_signal};
pub use startup::CodeModeApp;
pub use tools::{ToolKind, ToolRegistry};
