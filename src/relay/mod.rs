/// The relay core: attempt loop, backoff, and the streaming engine.
pub mod engine;
pub mod non_stream;

pub use engine::RelayStream;

use crate::audit::{AuditEvent, RetryEvent, SharedAuditSink};
use crate::config::RetryConfig;
use crate::error::RelayError;
use crate::transport::retry_policy::{
    retry_reason, should_retry_status, suggested_delay, RetryPolicy,
};
use crate::transport::HttpTransport;

/// One outbound upstream call, replayed verbatim on every retry attempt.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub url: String,
    /// Outbound headers, bearer credential already resolved.
    pub headers: http::HeaderMap,
    pub body: serde_json::Value,
}

/// Optional signals the upstream attaches to a response.
#[derive(Debug, Clone, Default)]
pub(crate) struct UpstreamMeta {
    pub request_id: Option<String>,
    pub processing_ms: Option<String>,
}

impl UpstreamMeta {
    pub(crate) fn from_headers(headers: &http::HeaderMap) -> Self {
        Self {
            request_id: header_str(headers, "x-request-id"),
            processing_ms: header_str(headers, "openai-processing-ms"),
        }
    }
}

fn header_str(headers: &http::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Orchestrator owning the upstream connection lifecycle.
///
/// One engine is shared by all handlers; each relay call is an independent
/// operation with no shared mutable state beyond the audit sink.
#[derive(Clone)]
pub struct RelayEngine {
    transport: HttpTransport,
    policy: RetryPolicy,
    sink: SharedAuditSink,
    max_log_text: usize,
}

impl RelayEngine {
    #[must_use]
    pub fn new(
        transport: HttpTransport,
        retry: RetryConfig,
        max_log_text: usize,
        sink: SharedAuditSink,
    ) -> Self {
        Self {
            transport,
            policy: RetryPolicy::new(retry),
            sink,
            max_log_text,
        }
    }

    #[must_use]
    pub(crate) fn policy(&self) -> RetryPolicy {
        self.policy
    }

    #[must_use]
    pub(crate) fn sink(&self) -> &SharedAuditSink {
        &self.sink
    }

    #[must_use]
    pub(crate) fn max_log_text(&self) -> usize {
        self.max_log_text
    }

    /// Issue the upstream request, replaying it on retryable statuses until
    /// a usable response arrives or attempts run out.
    ///
    /// `attempt` is shared with the caller so mid-stream reconnects count
    /// against the same per-call budget.
    ///
    /// # Errors
    ///
    /// [`RelayError::Upstream`] carries the final status and body on a
    /// non-retryable status or retry exhaustion; [`RelayError::Transport`]
    /// surfaces connection-level failures.
    pub(crate) async fn connect_upstream(
        &self,
        request: &RelayRequest,
        attempt: &mut u32,
    ) -> Result<reqwest::Response, RelayError> {
        loop {
            let response = self
                .transport
                .client()
                .post(&request.url)
                .headers(request.headers.clone())
                .json(&request.body)
                .send()
                .await?;
            let status = response.status().as_u16();

            if should_retry_status(status) {
                let headers = response.headers().clone();
                let request_id = header_str(&headers, "x-request-id");
                let body_text = response.text().await.unwrap_or_default();
                if self
                    .log_and_wait_retry(status, *attempt, &headers, &body_text, request_id.clone())
                    .await
                {
                    *attempt += 1;
                    continue;
                }
                self.sink.emit(AuditEvent::UpstreamError {
                    status,
                    body: body_text.clone(),
                    upstream_request_id: request_id,
                });
                return Err(RelayError::Upstream {
                    status,
                    body: body_text,
                });
            }

            if status >= 400 {
                let request_id = header_str(response.headers(), "x-request-id");
                let body_text = response.text().await.unwrap_or_default();
                self.sink.emit(AuditEvent::UpstreamError {
                    status,
                    body: body_text.clone(),
                    upstream_request_id: request_id,
                });
                return Err(RelayError::Upstream {
                    status,
                    body: body_text,
                });
            }

            return Ok(response);
        }
    }

    /// Log one retry decision and sleep when another attempt is allowed.
    /// Returns whether to retry.
    async fn log_and_wait_retry(
        &self,
        status: u16,
        attempt: u32,
        headers: &http::HeaderMap,
        body_text: &str,
        upstream_request_id: Option<String>,
    ) -> bool {
        let suggested = suggested_delay(headers, body_text);
        let wait = self.policy.compute_delay(attempt, suggested);
        let will_retry = self.policy.should_retry(attempt);
        self.sink.emit(AuditEvent::RetryScheduled(RetryEvent {
            status,
            attempt: attempt + 1,
            will_retry,
            wait_seconds: (wait.as_secs_f64() * 100.0).round() / 100.0,
            upstream_request_id,
            retry_reason: retry_reason(status),
        }));
        if will_retry {
            tokio::time::sleep(wait).await;
        }
        will_retry
    }
}
