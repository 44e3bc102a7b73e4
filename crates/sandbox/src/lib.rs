//! Sandboxed execution for the Code Mode MCP server.
//!
//! [`SandboxExecutor`] owns the per-caller sandbox lifecycle and the timeout/cancellation rules.
//! The sandboxes themselves come from a [`SandboxProvider`]:
//! - [`RemoteSandboxProvider`] talks to an HTTP sandbox API (the production setup);
//! - [`ProcessSandboxProvider`] runs code as a local child process (development only, no isolation).

pub mod error;
pub mod executor;
pub mod process;
pub mod provider;
pub mod remote;
pub mod script;

pub use error::{Result, SandboxError};
pub use executor::{CodeRun, ExecutorConfig, SandboxExecutor, sandbox_name};
pub use process::ProcessSandboxProvider;
pub use provider::{ExecOutput, ExecRequest, Lifecycle, SandboxHandle, SandboxProvider, SandboxSpec};
pub use remote::{RemoteSandboxConfig, RemoteSandboxProvider};
