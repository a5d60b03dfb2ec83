/// Streaming relay engine.
///
/// Opens the upstream connection (retrying retryable statuses), then drives
/// the SSE byte stream from a spawned task: every forwardable line goes to
/// the downstream client through a bounded channel with no reordering, while
/// the same line feeds the audit accumulator. A drop guard flushes exactly
/// one audit record on every exit path, including client disconnects and
/// task panics.
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::audit::{prepare_text_for_log, AuditEvent, AuditRecord, SharedAuditSink};
use crate::error::RelayError;
use crate::stream::extract::{extract_finish_reason, extract_text, extract_tool_call_fragments};
use crate::stream::sse::{LineBuffer, SseDecoder, SseLine};
use crate::stream::tool_calls::ToolCallAggregator;

use super::{RelayEngine, RelayRequest, UpstreamMeta};

const FORWARD_CHANNEL_CAPACITY: usize = 16;

/// Everything observed over one logical stream, across all retry attempts.
#[derive(Default)]
pub(crate) struct StreamAccumulator {
    model: Option<String>,
    text: String,
    usage: Option<Value>,
    finish_reason: Option<String>,
    tool_calls: ToolCallAggregator,
    request_id: Option<String>,
    processing_ms: Option<String>,
    cancelled_by_client: bool,
}

impl StreamAccumulator {
    fn new(model: Option<String>) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }

    fn apply_meta(&mut self, meta: UpstreamMeta) {
        self.request_id = meta.request_id;
        self.processing_ms = meta.processing_ms;
    }

    /// Fold one parsed data chunk into the accumulated state.
    ///
    /// First usage wins; last non-null finish reason wins; text and
    /// tool-call argument pieces append in arrival order.
    fn record_chunk(&mut self, chunk: &Value, current_event: Option<&str>) {
        if self.usage.is_none() {
            if let Some(usage) = chunk.get("usage").filter(|value| !value.is_null()) {
                self.usage = Some(usage.clone());
            }
        }
        if let Some(finish_reason) = extract_finish_reason(chunk) {
            self.finish_reason = Some(finish_reason);
        }
        for fragment in extract_tool_call_fragments(chunk) {
            self.tool_calls.merge(fragment);
        }
        if let Some(piece) = extract_text(chunk, current_event) {
            self.text.push_str(&piece);
        }
    }

    fn into_record(self, max_log_text: usize) -> AuditRecord {
        let content_length = self.text.chars().count();
        let (content_text, mut truncated) = prepare_text_for_log(&self.text, max_log_text);
        // A model stopped by its length limit is truncated output even when
        // the full text fits within the log budget.
        if self.finish_reason.as_deref() == Some("length") {
            truncated = true;
        }
        let tool_calls = self.tool_calls.finalize();
        let has_tool_calls = !tool_calls.is_empty();
        AuditRecord {
            model: self.model,
            streaming: true,
            cancelled_by_client: self.cancelled_by_client,
            content_length,
            truncated,
            content_text,
            usage: self.usage,
            finish_reason: self.finish_reason,
            has_tool_calls,
            tool_calls: has_tool_calls.then_some(tool_calls),
            upstream_request_id: self.request_id,
            upstream_processing_ms: self.processing_ms,
            ..AuditRecord::default()
        }
    }
}

/// Flushes the accumulated audit record exactly once when dropped.
struct FlushGuard {
    acc: StreamAccumulator,
    sink: SharedAuditSink,
    max_log_text: usize,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let acc = std::mem::take(&mut self.acc);
        self.sink
            .emit(AuditEvent::Response(Box::new(acc.into_record(self.max_log_text))));
    }
}

/// Lazy, forward-only sequence of raw SSE lines for the downstream client.
#[derive(Debug)]
pub struct RelayStream {
    rx: mpsc::Receiver<Result<Bytes, RelayError>>,
}

impl Stream for RelayStream {
    type Item = Result<Bytes, RelayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

enum LineOutcome {
    Continue,
    Done,
    Cancelled,
}

impl RelayEngine {
    /// Open a streaming upstream call.
    ///
    /// Returns once the upstream has answered with a usable status so a
    /// fatal failure can still be surfaced as a plain error response. The
    /// body is then relayed line by line from a background task.
    ///
    /// # Errors
    ///
    /// [`RelayError::Upstream`] with the upstream's status and body on a
    /// fatal status or retry exhaustion during connection.
    pub async fn relay_stream(
        &self,
        request: RelayRequest,
        model: Option<String>,
    ) -> Result<RelayStream, RelayError> {
        let mut guard = FlushGuard {
            acc: StreamAccumulator::new(model),
            sink: Arc::clone(self.sink()),
            max_log_text: self.max_log_text(),
        };
        // Until handoff to the forwarding task, the only way this future can
        // die without reaching an explicit return is the caller dropping it,
        // which is a client disconnect. The guard drop still flushes an audit
        // record even when no byte ever flowed.
        guard.acc.cancelled_by_client = true;
        let mut attempt = 0u32;
        let response = match self.connect_upstream(&request, &mut attempt).await {
            Ok(response) => response,
            Err(err) => {
                guard.acc.cancelled_by_client = false;
                return Err(err);
            }
        };
        guard.acc.cancelled_by_client = false;
        guard
            .acc
            .apply_meta(UpstreamMeta::from_headers(response.headers()));

        let (tx, rx) = mpsc::channel(FORWARD_CHANNEL_CAPACITY);
        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive_stream(request, response, attempt, guard, tx).await;
        });
        Ok(RelayStream { rx })
    }

    async fn drive_stream(
        self,
        request: RelayRequest,
        response: reqwest::Response,
        mut attempt: u32,
        mut guard: FlushGuard,
        tx: mpsc::Sender<Result<Bytes, RelayError>>,
    ) {
        let mut response = response;
        let mut decoder = SseDecoder::new();
        let mut lines = Vec::new();
        'attempts: loop {
            let mut line_buf = LineBuffer::new();
            let mut body = Box::pin(response.bytes_stream());
            loop {
                let next = tokio::select! {
                    next = body.next() => next,
                    // Downstream hung up while the upstream was quiet: abort
                    // the in-flight read instead of holding the connection.
                    () = tx.closed() => {
                        guard.acc.cancelled_by_client = true;
                        return;
                    }
                };
                match next {
                    Some(Ok(chunk)) => {
                        line_buf.push(&chunk, &mut lines);
                        for line in lines.drain(..) {
                            match process_line(&line, &mut decoder, &mut guard.acc, &tx).await {
                                LineOutcome::Continue => {}
                                LineOutcome::Done => return,
                                LineOutcome::Cancelled => {
                                    guard.acc.cancelled_by_client = true;
                                    return;
                                }
                            }
                        }
                    }
                    Some(Err(err)) => {
                        drop(body);
                        let message = err.to_string();
                        if self.policy().should_retry(attempt) {
                            self.sink().emit(AuditEvent::StreamErrorRetry {
                                error: message,
                                attempt: attempt + 1,
                            });
                            attempt += 1;
                            match self.connect_upstream(&request, &mut attempt).await {
                                Ok(next_response) => {
                                    // Accumulated text and tool calls survive the
                                    // reconnect: partial output from the failed
                                    // attempt stays in the audit record and is
                                    // concatenated with the replayed stream.
                                    guard.acc.apply_meta(UpstreamMeta::from_headers(
                                        next_response.headers(),
                                    ));
                                    response = next_response;
                                    decoder = SseDecoder::new();
                                    continue 'attempts;
                                }
                                Err(err) => {
                                    let _ = tx.send(Err(err)).await;
                                    return;
                                }
                            }
                        }
                        self.sink().emit(AuditEvent::StreamErrorFinal {
                            error: message.clone(),
                            attempt: attempt + 1,
                        });
                        let _ = tx.send(Err(RelayError::Transport(message))).await;
                        return;
                    }
                    None => {
                        // Upstream ended without a [DONE] marker; flush any
                        // unterminated tail line and finish normally.
                        if let Some(tail) = line_buf.finish() {
                            if let LineOutcome::Cancelled =
                                process_line(&tail, &mut decoder, &mut guard.acc, &tx).await
                            {
                                guard.acc.cancelled_by_client = true;
                            }
                        }
                        return;
                    }
                }
            }
        }
    }
}

async fn process_line(
    raw: &str,
    decoder: &mut SseDecoder,
    acc: &mut StreamAccumulator,
    tx: &mpsc::Sender<Result<Bytes, RelayError>>,
) -> LineOutcome {
    match decoder.decode(raw) {
        SseLine::Blank | SseLine::Comment | SseLine::Event(_) => LineOutcome::Continue,
        SseLine::Done => LineOutcome::Done,
        SseLine::Data(payload) => {
            // Unparseable payloads are forwarded untouched and skipped for
            // extraction; a malformed chunk is never fatal.
            if let Ok(chunk) = serde_json::from_str::<Value>(payload) {
                acc.record_chunk(&chunk, decoder.current_event());
            }
            forward(raw, tx).await
        }
        SseLine::Other => forward(raw, tx).await,
    }
}

async fn forward(raw: &str, tx: &mpsc::Sender<Result<Bytes, RelayError>>) -> LineOutcome {
    let mut line = String::with_capacity(raw.len() + 1);
    line.push_str(raw);
    line.push('\n');
    if tx.send(Ok(Bytes::from(line))).await.is_err() {
        LineOutcome::Cancelled
    } else {
        LineOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk_with_content(text: &str) -> Value {
        json!({"choices": [{"delta": {"content": text}}]})
    }

    #[test]
    fn test_accumulator_concatenates_text_in_order() {
        let mut acc = StreamAccumulator::new(Some("gpt-5".to_string()));
        for piece in ["Hel", "lo", ", ", "world"] {
            acc.record_chunk(&chunk_with_content(piece), None);
        }
        let record = acc.into_record(1_000);
        assert_eq!(record.content_text, "Hello, world");
        assert_eq!(record.content_length, 12);
        assert!(!record.truncated);
        assert!(record.streaming);
    }

    #[test]
    fn test_accumulator_first_usage_wins() {
        let mut acc = StreamAccumulator::new(None);
        acc.record_chunk(&json!({"usage": null}), None);
        acc.record_chunk(&json!({"usage": {"total_tokens": 7}}), None);
        acc.record_chunk(&json!({"usage": {"total_tokens": 99}}), None);
        let record = acc.into_record(0);
        assert_eq!(record.usage, Some(json!({"total_tokens": 7})));
    }

    #[test]
    fn test_accumulator_last_finish_reason_wins() {
        let mut acc = StreamAccumulator::new(None);
        acc.record_chunk(&json!({"choices": [{"finish_reason": "tool_calls"}]}), None);
        acc.record_chunk(&json!({"choices": [{"finish_reason": null}]}), None);
        acc.record_chunk(&json!({"choices": [{"finish_reason": "stop"}]}), None);
        let record = acc.into_record(0);
        assert_eq!(record.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_accumulator_truncates_logged_text_only() {
        let mut acc = StreamAccumulator::new(None);
        acc.record_chunk(&chunk_with_content("abcdefghijklmnopqrstuvwxy"), None);
        let record = acc.into_record(10);
        assert_eq!(record.content_text, "abcdefghij");
        assert_eq!(record.content_length, 25);
        assert!(record.truncated);
    }

    #[test]
    fn test_accumulator_length_finish_reason_forces_truncated() {
        let mut acc = StreamAccumulator::new(None);
        acc.record_chunk(&chunk_with_content("short"), None);
        acc.record_chunk(&json!({"choices": [{"finish_reason": "length"}]}), None);
        let record = acc.into_record(1_000);
        assert_eq!(record.content_text, "short");
        assert!(record.truncated);
    }

    #[test]
    fn test_accumulator_merges_tool_call_fragments() {
        let mut acc = StreamAccumulator::new(None);
        acc.record_chunk(
            &json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "type": "function",
                 "function": {"name": "search", "arguments": "{\"q\":"}}
            ]}}]}),
            None,
        );
        acc.record_chunk(
            &json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"rust\"}"}}
            ]}}]}),
            None,
        );
        let record = acc.into_record(0);
        assert!(record.has_tool_calls);
        let tool_calls = record.tool_calls.expect("tool calls");
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].function_args, "{\"q\":\"rust\"}");
    }

    #[test]
    fn test_accumulator_without_tool_calls_logs_none() {
        let acc = StreamAccumulator::new(None);
        let record = acc.into_record(0);
        assert!(!record.has_tool_calls);
        assert!(record.tool_calls.is_none());
    }
}
