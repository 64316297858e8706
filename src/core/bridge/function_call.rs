//! Function-call forwarding.
//!
//! Tracks tool invocations issued by the upstream model and resolves each
//! call id at most once, either through an external HTTP handler or through
//! the client's `FunctionCallResponse`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::BridgeError;

/// Correlation header sent to the external handler.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Resolved call ids remembered for duplicate detection.
const RESOLVED_HISTORY: usize = 256;

/// One outstanding tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFunctionCall {
    pub call_id: String,
    pub name: String,
    /// JSON-encoded arguments, as produced by the model
    pub arguments: String,
    pub issued_at: Instant,
}

/// Body posted to the external handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl From<&PendingFunctionCall> for FunctionCallRequest {
    fn from(call: &PendingFunctionCall) -> Self {
        Self {
            id: call.call_id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        }
    }
}

/// Reply from the external handler: `{ "content": ... }` or `{ "error": ... }`.
#[derive(Debug, Clone, Deserialize)]
struct FunctionCallReply {
    #[serde(default)]
    content: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Output item content used when a call could not be resolved.
pub fn synthetic_error_output(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

/// Flatten a result value into the string carried by `function_call_output`.
pub fn output_from_value(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Resolves function calls outside the bridge.
#[async_trait]
pub trait FunctionCallHandler: Send + Sync {
    /// Resolve one call. `Ok` carries the output content; `Err` is turned
    /// into a synthetic error output by the caller.
    async fn call(&self, request: &FunctionCallRequest, trace_id: &str) -> Result<String, BridgeError>;
}

/// Handler that posts calls to an HTTP endpoint.
pub struct HttpFunctionHandler {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpFunctionHandler {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl FunctionCallHandler for HttpFunctionHandler {
    async fn call(&self, request: &FunctionCallRequest, trace_id: &str) -> Result<String, BridgeError> {
        debug!(
            call_id = %request.id,
            function = %request.name,
            url = %self.url,
            "Forwarding function call"
        );

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header(TRACE_ID_HEADER, trace_id)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BridgeError::Handler(format!("timed out after {}ms", self.timeout.as_millis()))
                } else {
                    BridgeError::Handler(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(BridgeError::Handler(format!("HTTP {status} - {error_text}")));
        }

        let reply: FunctionCallReply = response
            .json()
            .await
            .map_err(|e| BridgeError::Handler(format!("Failed to parse response: {e}")))?;

        match reply {
            FunctionCallReply {
                error: Some(error), ..
            } => Err(BridgeError::Handler(error)),
            FunctionCallReply {
                content: Some(content),
                ..
            } => Ok(output_from_value(content)),
            _ => Err(BridgeError::Handler(
                "response has neither 'content' nor 'error'".to_string(),
            )),
        }
    }
}

/// Per-connection function-call bookkeeping.
#[derive(Debug, Default)]
pub struct FunctionCallRegistry {
    pending: HashMap<String, PendingFunctionCall>,
    resolved: HashSet<String>,
    /// Resolution order of `resolved`, oldest first
    resolved_order: VecDeque<String>,
}

impl FunctionCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call issued by the upstream. Returns `None` for an id that was
    /// already seen.
    pub fn register(
        &mut self,
        call_id: &str,
        name: &str,
        arguments: &str,
    ) -> Option<PendingFunctionCall> {
        if self.pending.contains_key(call_id) || self.resolved.contains(call_id) {
            debug!(call_id = %call_id, "Duplicate function call request ignored");
            return None;
        }

        let call = PendingFunctionCall {
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
            issued_at: Instant::now(),
        };
        self.pending.insert(call_id.to_string(), call.clone());
        Some(call)
    }

    /// Resolve a call id.
    ///
    /// `Ok(Some)` the first time, `Ok(None)` for an id already resolved and
    /// `Err(UnknownFunctionCall)` for an id never issued.
    pub fn resolve(&mut self, call_id: &str) -> Result<Option<PendingFunctionCall>, BridgeError> {
        if let Some(call) = self.pending.remove(call_id) {
            self.remember_resolved(call_id);
            debug!(
                call_id = %call_id,
                elapsed_ms = call.issued_at.elapsed().as_millis() as u64,
                "Function call resolved"
            );
            return Ok(Some(call));
        }

        if self.resolved.contains(call_id) {
            tracing::info!(call_id = %call_id, "Duplicate function call result dropped");
            return Ok(None);
        }

        Err(BridgeError::UnknownFunctionCall(call_id.to_string()))
    }

    pub fn is_pending(&self, call_id: &str) -> bool {
        self.pending.contains_key(call_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    fn remember_resolved(&mut self, call_id: &str) {
        if self.resolved_order.len() == RESOLVED_HISTORY
            && let Some(oldest) = self.resolved_order.pop_front()
        {
            self.resolved.remove(&oldest);
        }
        self.resolved.insert(call_id.to_string());
        self.resolved_order.push_back(call_id.to_string());
    }

    /// Forget outstanding calls (connection teardown).
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
