//! The two tools this server exposes, and how a call to each is carried out.

use crate::introspect::SpecEvaluator;
use codemode_openapi_tools::ToolDescriptions;
use codemode_sandbox::{CodeRun, ExecOutput, SandboxError, SandboxExecutor};
use rmcp::model::{CallToolResult, Content, JsonObject, Tool, ToolAnnotations};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Text returned when `execute` succeeds without printing anything.
pub const EMPTY_OUTPUT_TEXT: &str = "Executed successfully";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Search,
    Execute,
}

impl ToolKind {
    pub const ALL: [Self; 2] = [Self::Search, Self::Execute];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Execute => "execute",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    fn annotations(self) -> ToolAnnotations {
        match self {
            Self::Search => ToolAnnotations {
                title: Some("Search the API spec".to_string()),
                read_only_hint: Some(true),
                destructive_hint: Some(false),
                idempotent_hint: Some(true),
                open_world_hint: Some(false),
            },
            // Code may call any endpoint, including writes.
            Self::Execute => ToolAnnotations {
                title: Some("Call the API".to_string()),
                read_only_hint: Some(false),
                destructive_hint: Some(true),
                idempotent_hint: Some(false),
                open_world_hint: Some(true),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchArgs {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteArgs {
    pub code: String,
    /// Seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
}

/// Parse tool arguments, reporting problems the way a failed call is reported.
fn parse_args<T: DeserializeOwned>(
    kind: ToolKind,
    arguments: Option<JsonObject>,
) -> Result<T, CallToolResult> {
    let value = Value::Object(arguments.unwrap_or_default());
    serde_json::from_value(value).map_err(|e| {
        error_result(format!("Error: invalid arguments for {}: {e}", kind.name()))
    })
}

/// Requested `execute` timeout, defaulted and clamped to `[1s, max]`.
#[must_use]
pub fn clamp_timeout(requested: Option<f64>, max: Duration) -> Duration {
    let default = codemode_sandbox::executor::DEFAULT_EXEC_TIMEOUT;
    let requested = match requested {
        Some(secs) if secs.is_finite() && secs > 0.0 => {
            Duration::try_from_secs_f64(secs).unwrap_or(max)
        }
        _ => default,
    };
    requested.clamp(Duration::from_secs(1), max.max(Duration::from_secs(1)))
}

fn error_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(text.into())])
}

/// Tool descriptors plus everything needed to serve calls to them.
pub struct ToolRegistry {
    tools: Vec<Tool>,
    evaluator: SpecEvaluator,
    executor: Arc<SandboxExecutor>,
    credentials: BTreeMap<String, String>,
    max_execute_timeout: Duration,
}

impl ToolRegistry {
    #[must_use]
    pub fn new(
        descriptions: &ToolDescriptions,
        evaluator: SpecEvaluator,
        executor: Arc<SandboxExecutor>,
        credentials: BTreeMap<String, String>,
        max_execute_timeout: Duration,
    ) -> Self {
        Self {
            tools: descriptors(descriptions),
            evaluator,
            executor,
            credentials,
            max_execute_timeout,
        }
    }

    #[must_use]
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<SandboxExecutor> {
        &self.executor
    }

    /// Run one tool call. Every failure ends up in the result with `isError: true`.
    pub async fn call(
        &self,
        kind: ToolKind,
        arguments: Option<JsonObject>,
        session_id: Option<String>,
        cancel: CancellationToken,
    ) -> CallToolResult {
        match kind {
            ToolKind::Search => match parse_args::<SearchArgs>(kind, arguments) {
                Ok(args) => self.search(&args).await,
                Err(result) => result,
            },
            ToolKind::Execute => match parse_args::<ExecuteArgs>(kind, arguments) {
                Ok(args) => self.execute(args, session_id, cancel).await,
                Err(result) => result,
            },
        }
    }

    async fn search(&self, args: &SearchArgs) -> CallToolResult {
        match self.evaluator.evaluate(&args.code).await {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(e) => {
                debug!(error = %e, "search failed");
                error_result(format!("Error: {e}"))
            }
        }
    }

    async fn execute(
        &self,
        args: ExecuteArgs,
        session_id: Option<String>,
        cancel: CancellationToken,
    ) -> CallToolResult {
        let timeout = clamp_timeout(args.timeout, self.max_execute_timeout);
        let run = CodeRun {
            code: args.code,
            env: self.credentials.clone(),
            timeout,
            session_id,
        };

        match self.executor.execute(run, cancel).await {
            Ok(output) => execute_result(&output),
            Err(e) => {
                match &e {
                    SandboxError::Timeout(_) | SandboxError::Cancelled => {
                        info!(error = %e, "execute stopped");
                    }
                    _ => warn!(error = %e, "execute failed"),
                }
                error_result(format!("Sandbox error: {e}"))
            }
        }
    }
}

/// Map a finished run onto a tool result.
#[must_use]
pub fn execute_result(output: &ExecOutput) -> CallToolResult {
    if !output.is_success() {
        let detail = if output.stderr.trim().is_empty() {
            output.logs.trim()
        } else {
            output.stderr.trim()
        };
        let text = if detail.is_empty() {
            format!("Error: process exited with code {}", output.exit_code)
        } else {
            format!("Error: {detail}")
        };
        return error_result(text);
    }
    if output.stdout.trim().is_empty() {
        return CallToolResult::success(vec![Content::text(EMPTY_OUTPUT_TEXT)]);
    }
    CallToolResult::success(vec![Content::text(output.stdout.clone())])
}

/// The advertised `search` and `execute` tools, in that order.
#[must_use]
pub fn descriptors(descriptions: &ToolDescriptions) -> Vec<Tool> {
    ToolKind::ALL
        .into_iter()
        .map(|kind| {
            let (description, schema) = match kind {
                ToolKind::Search => (
                    descriptions.search.clone(),
                    json!({
                        "type": "object",
                        "properties": {
                            "code": { "type": "string", "description": descriptions.search_code }
                        },
                        "required": ["code"]
                    }),
                ),
                ToolKind::Execute => (
                    descriptions.execute.clone(),
                    json!({
                        "type": "object",
                        "properties": {
                            "code": { "type": "string", "description": descriptions.execute_code },
                            "timeout": {
                                "type": "number",
                                "description": descriptions.execute_timeout
                            }
                        },
                        "required": ["code"]
                    }),
                ),
            };
            let schema = match schema {
                Value::Object(map) => map,
                _ => JsonObject::new(),
            };
            let mut tool = Tool::new(kind.name(), description, Arc::new(schema));
            tool.annotations = Some(kind.annotations());
            tool
        })
        .collect()
}
