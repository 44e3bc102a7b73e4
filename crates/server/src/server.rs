//! MCP handler and HTTP surface.

use crate::session_manager::CodeModeSessionManager;
use crate::startup::CodeModeApp;
use crate::tools::ToolKind;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use rmcp::ServerHandler;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, ErrorData, Implementation, ListToolsResult,
    PaginatedRequestParams, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const SERVER_NAME: &str = "CodeModeServer";

const SESSION_ID_HEADER: &str = "mcp-session-id";

#[derive(Clone)]
pub struct CodeModeServer {
    app: Arc<CodeModeApp>,
}

impl CodeModeServer {
    #[must_use]
    pub fn new(app: Arc<CodeModeApp>) -> Self {
        Self { app }
    }

    fn server_info(&self) -> ServerInfo {
        let document = &self.app.document;
        let instructions = format!(
            "Use search to explore the {api} OpenAPI spec with JavaScript (the document is bound \
             to `spec`), then use execute to call the live API with fetch() inside a sandbox.",
            api = document.api_name()
        );

        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                title: Some(format!("Code Mode: {}", document.api_name())),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(format!(
                    "search and execute tools for {} ({} endpoints)",
                    document.api_name(),
                    document.endpoint_count()
                )),
                icons: None,
                website_url: None,
            },
            instructions: Some(instructions),
        }
    }
}

/// MCP session id of the HTTP request behind `context`, if any.
fn session_id(context: &RequestContext<RoleServer>) -> Option<String> {
    context
        .extensions
        .get::<axum::http::request::Parts>()
        .and_then(|parts| parts.headers.get(SESSION_ID_HEADER))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl ServerHandler for CodeModeServer {
    fn get_info(&self) -> ServerInfo {
        self.server_info()
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult {
            tools: self.app.registry.tools().to_vec(),
            ..Default::default()
        }))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        let session_id = session_id(&context);
        let cancel = context.ct.clone();
        async move {
            let Some(kind) = ToolKind::from_name(&request.name) else {
                return Err(ErrorData::invalid_params(
                    format!("unknown tool: {}", request.name),
                    None,
                ));
            };
            debug!(tool = kind.name(), session = ?session_id, "tool call");
            Ok(self
                .app
                .registry
                .call(kind, request.arguments, session_id, cancel)
                .await)
        }
    }
}

async fn health(State(app): State<Arc<CodeModeApp>>) -> Json<Value> {
    let tools: Vec<&str> = app
        .registry
        .tools()
        .iter()
        .map(|t| t.name.as_ref())
        .collect();
    Json(json!({
        "status": "ok",
        "title": app.document.api_name(),
        "version": app.document.info.version,
        "endpoints": app.document.endpoint_count(),
        "provenance": app.provenance.to_string(),
        "sha256": app.sha256,
        "tools": tools,
    }))
}

/// `/mcp` (streamable HTTP) and `/health`.
pub fn router(app: Arc<CodeModeApp>, stateless: bool) -> Router {
    let server = CodeModeServer::new(Arc::clone(&app));
    let session_manager = Arc::new(CodeModeSessionManager::new(Arc::clone(
        app.registry.executor(),
    )));
    let mcp = StreamableHttpService::new(
        move || Ok(server.clone()),
        session_manager,
        StreamableHttpServerConfig {
            stateful_mode: !stateless,
            ..Default::default()
        },
    );

    Router::new()
        .route("/health", get(health))
        .nest_service("/mcp", mcp)
        .with_state(app)
}

/// Serve until `shutdown` fires.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{addr}/mcp");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Cancel `token` on Ctrl-C or SIGTERM.
pub async fn shutdown_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
    token.cancel();
}
