//! In-process JavaScript evaluation for the `search` tool.
//!
//! Each call gets a fresh interpreter whose only addition to the standard globals is a read-only
//! `spec` holding the raw OpenAPI document. Evaluation runs on the blocking pool behind a
//! semaphore, bounded by loop-iteration and recursion limits plus a wall-clock timeout. Waiting
//! for a permit counts against that timeout.
//!
//! The document is converted to JS objects on every call, so call cost grows with document size.
//! A fresh conversion keeps one call's mutations of `spec` from leaking into the next.

use boa_engine::property::Attribute;
use boa_engine::{Context, JsString, JsValue, Source, js_string};
use codemode_sandbox::script::as_expression;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

const OUTCOME_GLOBAL: &str = "__codeModeOutcome";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchLimits {
    pub timeout: Duration,
    pub max_concurrency: usize,
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_concurrency: 8,
            loop_iteration_limit: 10_000_000,
            recursion_limit: 512,
        }
    }
}

/// Why a `search` evaluation produced no value.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Syntax error, thrown error, rejected promise, or a value JSON cannot represent.
    #[error("{0}")]
    Script(String),

    #[error("search timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The code finished without its promise settling, or hit a runtime limit.
    #[error("code did not settle: a promise never resolved or a runtime limit was exceeded")]
    Unsettled,

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Deserialize)]
struct Outcome {
    ok: bool,
    text: String,
}

pub struct SpecEvaluator {
    spec: Arc<Value>,
    limits: SearchLimits,
    permits: Arc<Semaphore>,
}

impl SpecEvaluator {
    #[must_use]
    pub fn new(spec: Arc<Value>, limits: SearchLimits) -> Self {
        let permits = Arc::new(Semaphore::new(limits.max_concurrency.max(1)));
        Self {
            spec,
            limits,
            permits,
        }
    }

    /// Evaluate `code` against the spec and return the result as pretty JSON.
    ///
    /// # Errors
    ///
    /// See [`EvalError`]. None of them affect later calls.
    pub async fn evaluate(&self, code: &str) -> Result<String, EvalError> {
        let spec = Arc::clone(&self.spec);
        let limits = self.limits.clone();
        let script = wrap_search_script(code);
        let permits = Arc::clone(&self.permits);

        // The blocking task keeps its permit until it returns, even after a timeout, so runaway
        // scripts still count against the concurrency cap. Callers queued behind them time out.
        let run = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|e| EvalError::Internal(e.to_string()))?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                run_script(&spec, &script, &limits)
            })
            .await
            .map_err(|join| EvalError::Internal(join.to_string()))?
        };

        match tokio::time::timeout(self.limits.timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                debug!(timeout_ms = self.limits.timeout.as_millis(), "search timed out");
                Err(EvalError::Timeout(self.limits.timeout))
            }
        }
    }
}

fn wrap_search_script(code: &str) -> String {
    [
        format!("var {OUTCOME_GLOBAL};"),
        "(async () => {".to_string(),
        format!("  const __codeMode = {};", as_expression(code)),
        "  const result = await (typeof __codeMode === 'function' ? __codeMode() : __codeMode);"
            .to_string(),
        "  if (typeof result === 'function' || typeof result === 'symbol') {".to_string(),
        "    throw new TypeError('result is not JSON-serializable');".to_string(),
        "  }".to_string(),
        "  const text = result === undefined ? 'null' : JSON.stringify(result, null, 2);"
            .to_string(),
        format!("  {OUTCOME_GLOBAL} = JSON.stringify({{ ok: true, text: String(text) }});"),
        "})().catch((e) => {".to_string(),
        format!(
            "  {OUTCOME_GLOBAL} = JSON.stringify({{ ok: false, text: e instanceof Error ? e.message : String(e) }});"
        ),
        "});".to_string(),
    ]
    .join("\n")
}

fn run_script(spec: &Value, script: &str, limits: &SearchLimits) -> Result<String, EvalError> {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(limits.loop_iteration_limit);
    context
        .runtime_limits_mut()
        .set_recursion_limit(limits.recursion_limit);

    let spec_value = JsValue::from_json(spec, &mut context)
        .map_err(|e| EvalError::Internal(format!("failed to expose spec: {e}")))?;
    context
        .register_global_property(js_string!("spec"), spec_value, Attribute::READONLY)
        .map_err(|e| EvalError::Internal(format!("failed to expose spec: {e}")))?;

    context
        .eval(Source::from_bytes(script))
        .map_err(|e| EvalError::Script(e.to_string()))?;
    context.run_jobs();

    let outcome = context
        .global_object()
        .get(JsString::from(OUTCOME_GLOBAL), &mut context)
        .map_err(|e| EvalError::Internal(e.to_string()))?;
    let Some(raw) = outcome.as_string().map(|s| s.to_std_string_escaped()) else {
        return Err(EvalError::Unsettled);
    };

    let outcome: Outcome =
        serde_json::from_str(&raw).map_err(|e| EvalError::Internal(e.to_string()))?;
    if outcome.ok {
        Ok(outcome.text)
    } else {
        Err(EvalError::Script(outcome.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluator() -> SpecEvaluator {
        let spec = json!({
            "info": { "title": "Pet Store", "version": "1.0.0" },
            "paths": {
                "/pets": {
                    "get": { "summary": "List pets", "tags": ["pets"] },
                    "post": { "summary": "Create pet", "tags": ["pets"] }
                },
                "/stores": { "get": { "summary": "List stores", "tags": ["stores"] } }
            }
        });
        SpecEvaluator::new(Arc::new(spec), SearchLimits::default())
    }

    #[tokio::test]
    async fn arrow_function_sees_spec() {
        let out = evaluator()
            .evaluate("async () => Object.keys(spec.paths)")
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value, json!(["/pets", "/stores"]));
        assert!(out.contains('\n'), "result is pretty-printed");
    }

    #[tokio::test]
    async fn bare_expressions_and_blocks_work() {
        let eval = evaluator();
        assert_eq!(eval.evaluate("spec.info.title").await.unwrap(), "\"Pet Store\"");
        assert_eq!(
            eval.evaluate("{ return Object.keys(spec.paths['/pets']).length; }")
                .await
                .unwrap(),
            "2"
        );
    }

    #[tokio::test]
    async fn undefined_becomes_null() {
        assert_eq!(evaluator().evaluate("() => undefined").await.unwrap(), "null");
    }

    #[tokio::test]
    async fn thrown_errors_report_their_message() {
        let err = evaluator()
            .evaluate("() => { throw new Error('nope'); }")
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Script(ref m) if m == "nope"));
    }

    #[tokio::test]
    async fn rejected_promises_are_errors() {
        let err = evaluator()
            .evaluate("async () => Promise.reject('bad')")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "bad");
    }

    #[tokio::test]
    async fn syntax_errors_are_reported() {
        let err = evaluator().evaluate("async () => {{").await.unwrap_err();
        assert!(matches!(err, EvalError::Script(_)));
    }

    #[tokio::test]
    async fn functions_are_not_serializable() {
        let err = evaluator().evaluate("() => () => 1").await.unwrap_err();
        assert!(err.to_string().contains("not JSON-serializable"));
    }

    #[tokio::test]
    async fn spec_binding_is_read_only() {
        let eval = evaluator();
        eval.evaluate("() => { spec = null; return 1; }").await.ok();
        assert_eq!(eval.evaluate("spec.info.version").await.unwrap(), "\"1.0.0\"");
    }

    #[tokio::test]
    async fn runaway_loops_are_stopped() {
        let limits = SearchLimits {
            loop_iteration_limit: 10_000,
            ..SearchLimits::default()
        };
        let eval = SpecEvaluator::new(Arc::new(json!({})), limits);
        assert!(eval.evaluate("() => { while (true) {} }").await.is_err());
    }

    #[tokio::test]
    async fn never_settling_promises_are_reported() {
        let err = evaluator()
            .evaluate("() => new Promise(() => {})")
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Unsettled));
    }

    #[tokio::test]
    async fn waiting_for_a_permit_counts_against_the_timeout() {
        let limits = SearchLimits {
            timeout: Duration::from_millis(200),
            max_concurrency: 1,
            ..SearchLimits::default()
        };
        let eval = SpecEvaluator::new(Arc::new(json!({})), limits);

        // Stands in for a runaway call still holding the only permit.
        let busy = Arc::clone(&eval.permits).acquire_owned().await.unwrap();
        let started = std::time::Instant::now();
        let err = eval.evaluate("1 + 1").await.unwrap_err();
        assert!(matches!(err, EvalError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(2));

        drop(busy);
        assert_eq!(eval.evaluate("1 + 1").await.unwrap(), "2");
    }

    #[tokio::test]
    async fn large_documents_stay_within_the_default_timeout() {
        let mut paths = serde_json::Map::new();
        for i in 0..2_000 {
            paths.insert(
                format!("/resource{i}/{{id}}"),
                json!({
                    "get": { "summary": format!("Get resource {i}"), "tags": [format!("t{}", i % 40)] },
                    "delete": { "summary": format!("Delete resource {i}") }
                }),
            );
        }
        let eval = SpecEvaluator::new(Arc::new(json!({ "paths": paths })), SearchLimits::default());
        assert_eq!(
            eval.evaluate("Object.keys(spec.paths).length").await.unwrap(),
            "2000"
        );
    }

    #[tokio::test]
    async fn mutations_of_spec_do_not_leak_between_calls() {
        let eval = evaluator();
        eval.evaluate("() => { spec.info.title = 'changed'; return 1; }")
            .await
            .unwrap();
        assert_eq!(eval.evaluate("spec.info.title").await.unwrap(), "\"Pet Store\"");
    }

    #[tokio::test]
    async fn one_failure_does_not_poison_the_next_call() {
        let eval = evaluator();
        assert!(eval.evaluate("() => { throw 1 }").await.is_err());
        assert_eq!(eval.evaluate("1 + 1").await.unwrap(), "2");
    }
}
