//! Sandboxed execution of model-authored code.
//!
//! One sandbox per logical caller, named `code-mode-<identity>` and created lazily on first use.
//! Handles are cached per name; concurrent calls for the same name wait on a per-name lock so at
//! most one create is in flight, while calls for different names proceed independently.

use crate::error::{Result, SandboxError};
use crate::provider::{ExecOutput, ExecRequest, Lifecycle, SandboxHandle, SandboxProvider, SandboxSpec};
use crate::script;
use parking_lot::Mutex;
use sha2::{Digest as _, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest sandbox name the provider accepts.
pub const MAX_SANDBOX_NAME_LEN: usize = 48;

pub const SANDBOX_NAME_PREFIX: &str = "code-mode-";
pub const DEFAULT_IDENTITY: &str = "local";
pub const DEFAULT_IDLE_TTL: &str = "10m";
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Hex characters of the session digest appended to per-session names.
const SESSION_DIGEST_LEN: usize = 12;

/// Sandbox name for `identity`, optionally scoped to an MCP session.
///
/// Always at most [`MAX_SANDBOX_NAME_LEN`] bytes. With a session, the digest suffix is kept intact
/// and the identity part is shortened instead.
#[must_use]
pub fn sandbox_name(identity: &str, session_id: Option<&str>) -> String {
    let base = format!("{SANDBOX_NAME_PREFIX}{identity}");
    match session_id {
        None => truncate(&base, MAX_SANDBOX_NAME_LEN).to_string(),
        Some(session) => {
            let digest = hex::encode(Sha256::digest(session.as_bytes()));
            let suffix = &digest[..SESSION_DIGEST_LEN];
            let room = MAX_SANDBOX_NAME_LEN - SESSION_DIGEST_LEN - 1;
            format!("{}-{suffix}", truncate(&base, room))
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Static executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Logical caller identity; names the sandbox.
    pub identity: String,
    /// Idle expiry requested from the provider (e.g. `10m`).
    pub idle_ttl: String,
    /// Node.js binary inside the sandbox.
    pub node_bin: String,
    /// Give each MCP session its own sandbox.
    pub per_session: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            identity: DEFAULT_IDENTITY.to_string(),
            idle_ttl: DEFAULT_IDLE_TTL.to_string(),
            node_bin: "node".to_string(),
            per_session: false,
        }
    }
}

/// One `execute` call.
#[derive(Debug, Clone)]
pub struct CodeRun {
    pub code: String,
    /// Injected into the process environment.
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    /// MCP session id, used only when sandboxes are per session.
    pub session_id: Option<String>,
}

type HandleCell = Arc<tokio::sync::Mutex<Option<Arc<dyn SandboxHandle>>>>;

pub struct SandboxExecutor {
    provider: Arc<dyn SandboxProvider>,
    config: ExecutorConfig,
    handles: Mutex<HashMap<String, HandleCell>>,
}

impl SandboxExecutor {
    #[must_use]
    pub fn new(provider: Arc<dyn SandboxProvider>, config: ExecutorConfig) -> Self {
        Self {
            provider,
            config,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Name of the sandbox a call from `session_id` runs in.
    #[must_use]
    pub fn sandbox_name_for(&self, session_id: Option<&str>) -> String {
        let session = session_id.filter(|_| self.config.per_session);
        sandbox_name(&self.config.identity, session)
    }

    /// Drop the cached handle of a closed session. The sandbox itself expires on its idle TTL.
    pub fn forget_session(&self, session_id: &str) {
        if !self.config.per_session {
            return;
        }
        let name = self.sandbox_name_for(Some(session_id));
        if self.handles.lock().remove(&name).is_some() {
            debug!(sandbox = %name, "released session sandbox handle");
        }
    }

    fn spec_for(&self, name: &str) -> SandboxSpec {
        let mut labels = BTreeMap::new();
        labels.insert("code-mode".to_string(), "true".to_string());
        labels.insert("code-mode-name".to_string(), self.config.identity.clone());
        SandboxSpec {
            name: name.to_string(),
            labels,
            lifecycle: Lifecycle::idle_ttl(&self.config.idle_ttl),
        }
    }

    /// Reuse the cached handle if it is alive, otherwise create one.
    async fn acquire(&self, name: &str) -> Result<Arc<dyn SandboxHandle>> {
        let cell = Arc::clone(self.handles.lock().entry(name.to_string()).or_default());
        let mut slot = cell.lock().await;

        if let Some(handle) = slot.as_ref() {
            match handle.is_alive().await {
                Ok(true) => return Ok(Arc::clone(handle)),
                Ok(false) => debug!(sandbox = %name, "cached sandbox is gone; recreating"),
                Err(e) => warn!(sandbox = %name, error = %e, "sandbox status check failed; recreating"),
            }
            *slot = None;
        }

        let handle = self.provider.create_if_not_exists(&self.spec_for(name)).await?;
        info!(sandbox = %name, provider = self.provider.kind(), "sandbox provisioned");
        *slot = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Run `run.code` in the caller's sandbox.
    ///
    /// A non-zero exit is returned as an [`ExecOutput`], not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Timeout`] when the run outlives `run.timeout`,
    /// [`SandboxError::Cancelled`] when `cancel` fires first, and provider errors for
    /// provisioning or transport failures. In the first two cases the process is killed
    /// (best-effort) before returning.
    pub async fn execute(&self, run: CodeRun, cancel: CancellationToken) -> Result<ExecOutput> {
        let name = self.sandbox_name_for(run.session_id.as_deref());

        let handle = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SandboxError::Cancelled),
            handle = self.acquire(&name) => handle?,
        };

        let process_name = format!("exec-{}", Uuid::new_v4().simple());
        let command = script::node_command(&self.config.node_bin, &script::wrap_script(&run.code));
        let request = ExecRequest {
            name: process_name.clone(),
            env: run.env,
            command,
            timeout: run.timeout,
        };

        debug!(sandbox = %name, process = %process_name, timeout_s = run.timeout.as_secs_f64(), "executing code");
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SandboxError::Cancelled),
            result = tokio::time::timeout(run.timeout, handle.exec(request)) => {
                result.unwrap_or(Err(SandboxError::Timeout(run.timeout)))
            }
        };

        if matches!(outcome, Err(SandboxError::Timeout(_) | SandboxError::Cancelled)) {
            if let Err(e) = handle.kill(&process_name).await {
                warn!(sandbox = %name, process = %process_name, error = %e, "failed to kill process");
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeState {
        creates: AtomicUsize,
        alive: AtomicBool,
        exec_delay: Mutex<Duration>,
        requests: Mutex<Vec<ExecRequest>>,
        kills: Mutex<Vec<String>>,
        specs: Mutex<Vec<SandboxSpec>>,
    }

    struct FakeProvider(Arc<FakeState>);

    struct FakeHandle {
        state: Arc<FakeState>,
    }

    #[async_trait]
    impl SandboxProvider for FakeProvider {
        fn kind(&self) -> &'static str {
            "fake"
        }

        async fn create_if_not_exists(&self, spec: &SandboxSpec) -> Result<Arc<dyn SandboxHandle>> {
            // Widen the race window for concurrent callers.
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.0.creates.fetch_add(1, Ordering::SeqCst);
            self.0.alive.store(true, Ordering::SeqCst);
            self.0.specs.lock().push(spec.clone());
            Ok(Arc::new(FakeHandle {
                state: Arc::clone(&self.0),
            }))
        }
    }

    #[async_trait]
    impl SandboxHandle for FakeHandle {
        async fn exec(&self, request: ExecRequest) -> Result<ExecOutput> {
            let delay = *self.state.exec_delay.lock();
            self.state.requests.lock().push(request);
            tokio::time::sleep(delay).await;
            Ok(ExecOutput {
                exit_code: 0,
                stdout: "{}".to_string(),
                ..ExecOutput::default()
            })
        }

        async fn is_alive(&self) -> Result<bool> {
            Ok(self.state.alive.load(Ordering::SeqCst))
        }

        async fn kill(&self, process_name: &str) -> Result<()> {
            self.state.kills.lock().push(process_name.to_string());
            Ok(())
        }
    }

    fn executor(config: ExecutorConfig) -> (Arc<SandboxExecutor>, Arc<FakeState>) {
        let state = Arc::new(FakeState::default());
        let exec = SandboxExecutor::new(Arc::new(FakeProvider(Arc::clone(&state))), config);
        (Arc::new(exec), state)
    }

    fn run(code: &str) -> CodeRun {
        CodeRun {
            code: code.to_string(),
            env: BTreeMap::new(),
            timeout: Duration::from_secs(5),
            session_id: None,
        }
    }

    #[test]
    fn names_are_bounded() {
        assert_eq!(sandbox_name("local", None), "code-mode-local");

        let long = "x".repeat(100);
        let name = sandbox_name(&long, None);
        assert_eq!(name.len(), MAX_SANDBOX_NAME_LEN);
        assert!(name.starts_with("code-mode-xxx"));

        let scoped = sandbox_name(&long, Some("session-1"));
        assert_eq!(scoped.len(), MAX_SANDBOX_NAME_LEN);
        assert_eq!(scoped, sandbox_name(&long, Some("session-1")));
        assert_ne!(scoped, sandbox_name(&long, Some("session-2")));
    }

    #[test]
    fn multibyte_identity_truncates_on_char_boundary() {
        let name = sandbox_name(&"é".repeat(40), None);
        assert!(name.len() <= MAX_SANDBOX_NAME_LEN);
    }

    #[tokio::test]
    async fn concurrent_calls_create_one_sandbox() {
        let (exec, state) = executor(ExecutorConfig::default());

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let exec = Arc::clone(&exec);
            tasks.spawn(async move { exec.execute(run("() => 1"), CancellationToken::new()).await });
        }
        while let Some(result) = tasks.join_next().await {
            assert!(result.unwrap().unwrap().is_success());
        }

        assert_eq!(state.creates.load(Ordering::SeqCst), 1);
        assert_eq!(state.requests.lock().len(), 8);
    }

    #[tokio::test]
    async fn sandbox_carries_labels_and_idle_policy() {
        let (exec, state) = executor(ExecutorConfig {
            identity: "agent-7".to_string(),
            ..ExecutorConfig::default()
        });
        exec.execute(run("() => 1"), CancellationToken::new())
            .await
            .unwrap();

        let specs = state.specs.lock();
        assert_eq!(specs[0].name, "code-mode-agent-7");
        assert_eq!(specs[0].labels["code-mode"], "true");
        assert_eq!(specs[0].labels["code-mode-name"], "agent-7");
        assert_eq!(specs[0].lifecycle, Lifecycle::idle_ttl("10m"));
    }

    #[tokio::test]
    async fn dead_sandbox_is_recreated() {
        let (exec, state) = executor(ExecutorConfig::default());
        exec.execute(run("() => 1"), CancellationToken::new())
            .await
            .unwrap();
        state.alive.store(false, Ordering::SeqCst);
        exec.execute(run("() => 2"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state.creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn passes_env_and_wrapped_command() {
        let (exec, state) = executor(ExecutorConfig::default());
        let mut r = run("async () => 1");
        r.env.insert("AUTH_TOKEN".to_string(), "t".to_string());
        exec.execute(r, CancellationToken::new()).await.unwrap();

        let requests = state.requests.lock();
        assert_eq!(requests[0].env["AUTH_TOKEN"], "t");
        assert!(requests[0].command.starts_with("node -e "));
    }

    #[tokio::test]
    async fn timeout_kills_process() {
        let (exec, state) = executor(ExecutorConfig::default());
        *state.exec_delay.lock() = Duration::from_secs(10);
        let mut r = run("() => new Promise(() => {})");
        r.timeout = Duration::from_millis(100);

        let err = exec.execute(r, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SandboxError::Timeout(_)));

        let kills = state.kills.lock();
        let requests = state.requests.lock();
        assert_eq!(kills.as_slice(), &[requests[0].name.clone()]);
    }

    #[tokio::test]
    async fn cancellation_kills_process() {
        let (exec, state) = executor(ExecutorConfig::default());
        *state.exec_delay.lock() = Duration::from_secs(10);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let err = exec.execute(run("() => 1"), cancel).await.unwrap_err();
        assert!(matches!(err, SandboxError::Cancelled));
        assert_eq!(state.kills.lock().len(), 1);
    }

    #[tokio::test]
    async fn per_session_sandboxes_are_separate() {
        let (exec, state) = executor(ExecutorConfig {
            per_session: true,
            ..ExecutorConfig::default()
        });
        for session in ["a", "b", "a"] {
            let mut r = run("() => 1");
            r.session_id = Some(session.to_string());
            exec.execute(r, CancellationToken::new()).await.unwrap();
        }
        assert_eq!(state.creates.load(Ordering::SeqCst), 2);

        exec.forget_session("a");
        let mut r = run("() => 1");
        r.session_id = Some("a".to_string());
        exec.execute(r, CancellationToken::new()).await.unwrap();
        assert_eq!(state.creates.load(Ordering::SeqCst), 3);
    }
}
