//! Call dispatch: validate, invoke, extract, wrap.
//!
//! Every call walks the same path: arguments are validated against the
//! tool's schema, the engine runs under a deadline, the result document is
//! extracted from its output, and the outcome is wrapped in a response
//! envelope. No failure from the invoker or the extractor escapes as a
//! fault — the transport only ever sees a well-formed envelope.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::extract::{excerpt_of, extract};
use crate::invoker::{InvokeError, Invoker, ProcessInvoker};
use crate::registry::{ToolRegistry, ToolSchema, ToolSummary};
use crate::schema::validate_arguments;

/// Stable failure classification surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unknown tool name or RPC method.
    NotFound,
    /// Arguments failed schema validation; the engine was never invoked.
    InvalidArgument,
    /// Engine executable missing, not executable, or not spawnable.
    BackendUnavailable,
    /// Engine did not exit within the deadline and was terminated.
    Timeout,
    /// Engine exited non-zero and no valid result could be extracted.
    EngineFailure,
    /// Output could not be parsed into the expected result shape.
    MalformedOutput,
}

/// Diagnostic detail attached to failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Bounded excerpt of raw engine output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// Timing metadata attached to successful calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMeta {
    pub tool: String,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// The uniform success/failure wrapper returned for every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseEnvelope {
    Success {
        result: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        meta: Option<CallMeta>,
    },
    Failure {
        kind: FailureKind,
        message: String,
        #[serde(default)]
        detail: FailureDetail,
    },
}

impl ResponseEnvelope {
    pub fn success(result: Value) -> Self {
        Self::Success { result, meta: None }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
            detail: FailureDetail::default(),
        }
    }

    fn failure_with(kind: FailureKind, message: impl Into<String>, detail: FailureDetail) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
            detail,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Orchestrates registry lookup, validation, invocation, and extraction
/// for every call.
///
/// Generic over the invoker so tests can substitute mocks; production code
/// uses [`ProcessInvoker`].
pub struct Dispatcher<I = ProcessInvoker> {
    registry: Arc<ToolRegistry>,
    config: Arc<BridgeConfig>,
    invoker: I,
    limiter: Arc<Semaphore>,
}

impl Dispatcher<ProcessInvoker> {
    pub fn new(registry: Arc<ToolRegistry>, config: Arc<BridgeConfig>) -> Self {
        Self::with_invoker(registry, config, ProcessInvoker)
    }
}

impl<I: Invoker> Dispatcher<I> {
    pub fn with_invoker(
        registry: Arc<ToolRegistry>,
        config: Arc<BridgeConfig>,
        invoker: I,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            registry,
            config,
            invoker,
            limiter,
        }
    }

    /// List all tools. Never touches the invoker.
    pub fn list_tools(&self) -> Vec<ToolSummary> {
        self.registry.list()
    }

    /// Fetch a single tool's schema. Never touches the invoker.
    pub fn get_schema(&self, name: &str) -> Option<ToolSchema> {
        self.registry.get(name).map(|tool| tool.schema())
    }

    /// Execute one tool call end to end.
    ///
    /// State machine per call: Validating -> Invoking -> Extracting ->
    /// Completed. The invoker's deadline upper-bounds the Invoking state,
    /// so a terminal envelope is always reached.
    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> ResponseEnvelope {
        let Some(tool) = self.registry.get(name) else {
            return ResponseEnvelope::failure(
                FailureKind::NotFound,
                format!("unknown tool: {name}"),
            );
        };

        // Validating: the engine never sees unvalidated input.
        if let Err(e) = validate_arguments(tool.input, &arguments) {
            debug!(tool = name, "argument validation failed: {e}");
            return ResponseEnvelope::failure(FailureKind::InvalidArgument, e.to_string());
        }

        // Bound concurrent engine processes; excess calls queue here.
        let _permit = match self.limiter.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return ResponseEnvelope::failure(
                    FailureKind::BackendUnavailable,
                    "concurrency limiter closed",
                )
            }
        };

        // Invoking.
        let cmd = tool.invocation.resolve(&self.config, tool.name, &arguments);
        let raw = match self.invoker.run(cmd, self.config.timeout()).await {
            Ok(raw) => raw,
            Err(e @ InvokeError::BackendUnavailable { .. }) => {
                warn!(tool = name, "engine unavailable: {e}");
                return ResponseEnvelope::failure(FailureKind::BackendUnavailable, e.to_string());
            }
            Err(e @ InvokeError::Io(_)) => {
                warn!(tool = name, "engine I/O failure: {e}");
                return ResponseEnvelope::failure(FailureKind::BackendUnavailable, e.to_string());
            }
        };

        if raw.duration_exceeded {
            return ResponseEnvelope::failure_with(
                FailureKind::Timeout,
                format!(
                    "engine did not complete within {}s and was terminated",
                    self.config.timeout_secs
                ),
                FailureDetail {
                    exit_code: None,
                    excerpt: Some(excerpt_of(&raw)),
                },
            );
        }

        // Extracting. A non-zero exit alone is not fatal: some engine
        // failure modes still emit a valid result alongside warnings.
        match extract(&raw, &tool.output) {
            Ok(result) => {
                info!(
                    tool = name,
                    elapsed_ms = raw.elapsed.as_millis() as u64,
                    exit_code = ?raw.exit_code,
                    "tool call completed"
                );
                ResponseEnvelope::Success {
                    result,
                    meta: Some(CallMeta {
                        tool: name.to_string(),
                        elapsed_ms: raw.elapsed.as_millis() as u64,
                        completed_at: Utc::now(),
                    }),
                }
            }
            Err(e) => {
                let (kind, message) = match raw.exit_code {
                    Some(0) => (
                        FailureKind::MalformedOutput,
                        format!("engine output could not be parsed: {}", e.reason),
                    ),
                    code => (
                        FailureKind::EngineFailure,
                        format!(
                            "engine exited with status {} and no valid result: {}",
                            code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                            e.reason
                        ),
                    ),
                };
                warn!(tool = name, exit_code = ?raw.exit_code, "{message}");
                ResponseEnvelope::failure_with(
                    kind,
                    message,
                    FailureDetail {
                        exit_code: raw.exit_code,
                        excerpt: Some(e.excerpt),
                    },
                )
            }
        }
    }

    /// Thin JSON-RPC-style dispatch over the typed operations.
    ///
    /// Supported methods: `tools/list`, `tools/get_schema`, `tools/call`,
    /// and `system.ping`. Tool failures are envelopes; the `Err` variant
    /// covers only internal serialization faults, which the transport
    /// reports as a JSON-RPC internal error.
    pub async fn handle_rpc(
        &self,
        method: &str,
        params: Value,
    ) -> Result<ResponseEnvelope, serde_json::Error> {
        let envelope = match method {
            "tools/list" => ResponseEnvelope::success(serde_json::json!({
                "tools": self.list_tools(),
            })),
            "tools/get_schema" => {
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return Ok(ResponseEnvelope::failure(
                        FailureKind::InvalidArgument,
                        "tools/get_schema requires a 'name' parameter",
                    ));
                };
                match self.get_schema(name) {
                    Some(schema) => ResponseEnvelope::success(serde_json::to_value(schema)?),
                    None => ResponseEnvelope::failure(
                        FailureKind::NotFound,
                        format!("unknown tool: {name}"),
                    ),
                }
            }
            "tools/call" => {
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return Ok(ResponseEnvelope::failure(
                        FailureKind::InvalidArgument,
                        "tools/call requires a 'name' parameter",
                    ));
                };
                let arguments = match params.get("arguments") {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(map)) => map.clone(),
                    Some(_) => {
                        return Ok(ResponseEnvelope::failure(
                            FailureKind::InvalidArgument,
                            "'arguments' must be an object",
                        ))
                    }
                };
                self.call_tool(name, arguments).await
            }
            "system.ping" => ResponseEnvelope::success(serde_json::json!({ "pong": true })),
            other => ResponseEnvelope::failure(
                FailureKind::NotFound,
                format!("unknown method: {other}"),
            ),
        };
        Ok(envelope)
    }
}
