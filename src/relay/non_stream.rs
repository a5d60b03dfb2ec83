/// Non-streaming relay: the attempt loop without incremental parsing.
use serde_json::Value;

use crate::audit::{AuditEvent, AuditRecord};
use crate::error::RelayError;
use crate::stream::extract::{extract_choices_details, extract_response_details};

use super::{RelayEngine, RelayRequest, UpstreamMeta};

impl RelayEngine {
    /// Relay a single-shot JSON call.
    ///
    /// Retry and backoff semantics match the streaming connect loop. On
    /// success the complete response body is parsed, one audit record is
    /// emitted, and the parsed body is returned for the downstream reply.
    ///
    /// # Errors
    ///
    /// [`RelayError::Upstream`] with the final status and body on a fatal
    /// status or retry exhaustion; [`RelayError::Transport`] on network
    /// failures or an unreadable body.
    pub async fn relay_json(
        &self,
        request: RelayRequest,
        model: Option<String>,
    ) -> Result<Value, RelayError> {
        let mut attempt = 0u32;
        let response = self.connect_upstream(&request, &mut attempt).await?;
        let meta = UpstreamMeta::from_headers(response.headers());
        let data: Value = response
            .json()
            .await
            .map_err(|err| RelayError::Transport(format!("Unreadable upstream body: {err}")))?;

        self.sink()
            .emit(AuditEvent::Response(Box::new(build_record(&data, model, meta))));
        Ok(data)
    }
}

fn build_record(data: &Value, model: Option<String>, meta: UpstreamMeta) -> AuditRecord {
    let details = extract_response_details(data);
    let choices_details = extract_choices_details(data);
    AuditRecord {
        model,
        streaming: false,
        cancelled_by_client: false,
        content_length: 0,
        truncated: false,
        // The complete body is the logged content for single-shot calls.
        content_text: serde_json::to_string(data).unwrap_or_default(),
        usage: data.get("usage").filter(|value| !value.is_null()).cloned(),
        finish_reason: details.finish_reason,
        has_tool_calls: details.has_tool_calls,
        tool_calls: details.has_tool_calls.then_some(details.tool_calls),
        upstream_request_id: meta.request_id,
        upstream_processing_ms: meta.processing_ms,
        response_id: data
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string),
        object_type: data
            .get("object")
            .and_then(Value::as_str)
            .map(str::to_string),
        choices_count: Some(
            data.get("choices")
                .and_then(Value::as_array)
                .map_or(0, Vec::len),
        ),
        choices_details: Some(choices_details),
    }
}
