/// Structured audit log of every client-to-upstream exchange.
///
/// Exactly one [`AuditRecord`] is emitted per logical exchange, regardless of
/// how many retry attempts it took, plus auxiliary events for retries and
/// errors. The sink is an injected handle so handlers and the relay engine
/// never touch global state, and tests can substitute a recording sink.
use std::sync::Arc;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

use crate::stream::extract::ChoiceDetail;
use crate::stream::tool_calls::ToolCallRecord;

/// The single structured record summarizing one logical exchange.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditRecord {
    pub model: Option<String>,
    pub streaming: bool,
    pub cancelled_by_client: bool,
    pub content_length: usize,
    pub truncated: bool,
    pub content_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    pub has_tool_calls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_processing_ms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices_details: Option<Vec<ChoiceDetail>>,
}

/// One retry decision, logged before sleeping.
#[derive(Debug, Clone, Serialize)]
pub struct RetryEvent {
    pub status: u16,
    /// 1-based attempt number, matching human-readable logs.
    pub attempt: u32,
    pub will_retry: bool,
    pub wait_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_request_id: Option<String>,
    pub retry_reason: &'static str,
}

/// Summary of an accepted inbound request.
#[derive(Debug, Clone, Serialize)]
pub struct IncomingRequest {
    pub model: Option<String>,
    pub message_count: usize,
    pub has_tool_results: bool,
    pub stream: bool,
    pub tools_available: bool,
    pub full_payload: Value,
}

/// Everything the relay reports to the audit log.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    IncomingRequest(IncomingRequest),
    RetryScheduled(RetryEvent),
    Response(Box<AuditRecord>),
    UpstreamError {
        status: u16,
        body: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        upstream_request_id: Option<String>,
    },
    StreamErrorRetry {
        error: String,
        attempt: u32,
    },
    StreamErrorFinal {
        error: String,
        attempt: u32,
    },
}

impl AuditEvent {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::IncomingRequest(_) => "incoming_request",
            AuditEvent::RetryScheduled(_) => "retry_scheduled",
            AuditEvent::Response(_) => "response",
            AuditEvent::UpstreamError { .. } => "error",
            AuditEvent::StreamErrorRetry { .. } => "stream_error_retry",
            AuditEvent::StreamErrorFinal { .. } => "stream_error_final",
        }
    }
}

/// Append-only audit event sink; must tolerate concurrent writers.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

pub type SharedAuditSink = Arc<dyn AuditSink>;

/// Default sink: one JSON line per event through `tracing`, target `audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AuditSink for LogSink {
    fn emit(&self, event: AuditEvent) {
        let kind = event.kind();
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::info!(target: "audit", event = kind, %payload),
            Err(err) => tracing::error!(target: "audit", event = kind, "failed to serialize audit event: {err}"),
        }
    }
}

/// In-memory sink used by tests to assert on emitted events.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit sink lock").clone()
    }

    #[must_use]
    pub fn count_of(&self, kind: &str) -> usize {
        self.events
            .lock()
            .expect("audit sink lock")
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }
}

impl AuditSink for RecordingSink {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().expect("audit sink lock").push(event);
    }
}

/// Truncate response text for logging.
///
/// Counts characters, not bytes, so multi-byte text is never split inside a
/// code point. `max_log_text == 0` disables truncation.
#[must_use]
pub fn prepare_text_for_log(full_text: &str, max_log_text: usize) -> (String, bool) {
    if max_log_text == 0 {
        return (full_text.to_string(), false);
    }
    match full_text.char_indices().nth(max_log_text) {
        Some((byte_idx, _)) => (full_text[..byte_idx].to_string(), true),
        None => (full_text.to_string(), false),
    }
}

/// Redact an API token, keeping only the first 6 and last 4 characters.
#[must_use]
pub fn redact_token(token: &str) -> String {
    let trimmed = token
        .trim()
        .strip_prefix("Bearer ")
        .or_else(|| token.trim().strip_prefix("bearer "))
        .unwrap_or(token.trim());
    if trimmed.len() <= 10 {
        return "Bearer ****".to_string();
    }
    let head: String = trimmed.chars().take(6).collect();
    let tail: String = trimmed
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("Bearer {head}\u{2026}{tail}")
}

const SENSITIVE_HEADERS: [&str; 4] = [
    "authorization",
    "x-openai-api-key",
    "openai-api-key",
    "x-api-key",
];

/// Copy outbound headers into a loggable map, redacting credential values.
#[must_use]
pub fn redact_headers(headers: &http::HeaderMap) -> Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        let value = value.to_str().unwrap_or("<binary>");
        let logged = if SENSITIVE_HEADERS.contains(&name.as_str()) {
            redact_token(value)
        } else {
            value.to_string()
        };
        map.insert(name.as_str().to_string(), Value::String(logged));
    }
    Value::Object(map)
}
