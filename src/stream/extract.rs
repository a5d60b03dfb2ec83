/// Semantic extraction from upstream response payloads.
///
/// Two shapes are supported: the choice-based chat-completion delta shape
/// (`choices[0].delta`) and the generic typed-event shape used by the
/// responses API (`type` tag or carried SSE event name, `delta` field).
///
/// All extractors are pure, total functions: malformed or missing structure
/// yields "nothing extracted", never an error.
use serde::Serialize;
use serde_json::Value;

use super::tool_calls::{ToolCallFragment, ToolCallRecord};

/// Typed-event names whose `delta` field carries output text.
const DELTA_EVENT_NAMES: [&str; 4] = [
    "response.output_text.delta",
    "output_text.delta",
    "message.delta",
    "response.delta",
];

#[inline]
fn first_choice(chunk: &Value) -> Option<&Value> {
    chunk.get("choices")?.get(0)
}

/// Extract a text delta from one streaming chunk, if any.
#[must_use]
pub fn extract_text(chunk: &Value, current_event: Option<&str>) -> Option<String> {
    if let Some(content) = first_choice(chunk)
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
    {
        return Some(content.to_string());
    }

    let event = chunk
        .get("type")
        .and_then(Value::as_str)
        .or(current_event)?;
    if !DELTA_EVENT_NAMES.contains(&event) {
        return None;
    }
    match chunk.get("delta") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Object(delta)) => {
            let text = delta
                .get("text")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .or_else(|| {
                    delta
                        .get("output_text")
                        .and_then(Value::as_str)
                        .filter(|text| !text.is_empty())
                })
                .unwrap_or("");
            Some(text.to_string())
        }
        _ => None,
    }
}

/// Extract tool-call delta fragments from one streaming chunk.
#[must_use]
pub fn extract_tool_call_fragments(chunk: &Value) -> Vec<ToolCallFragment> {
    let Some(tool_calls) = first_choice(chunk)
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("tool_calls"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    tool_calls
        .iter()
        .map(|tool_call| ToolCallFragment {
            index: tool_call.get("index").and_then(Value::as_u64),
            id: json_string(tool_call.get("id")),
            call_type: json_string(tool_call.get("type")),
            function_name: json_string(
                tool_call.get("function").and_then(|func| func.get("name")),
            ),
            function_args: json_string(
                tool_call
                    .get("function")
                    .and_then(|func| func.get("arguments")),
            ),
        })
        .collect()
}

/// Extract `choices[0].finish_reason` from one streaming chunk.
#[must_use]
pub fn extract_finish_reason(chunk: &Value) -> Option<String> {
    json_string(first_choice(chunk).and_then(|choice| choice.get("finish_reason")))
}

#[inline]
fn json_string(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

// ---------------------------------------------------------------------------
// Complete (non-streaming) response extraction
// ---------------------------------------------------------------------------

/// Tool-call and finish-reason summary of a complete response body.
#[derive(Debug, Default)]
pub struct ResponseDetails {
    pub has_tool_calls: bool,
    pub tool_calls: Vec<ToolCallRecord>,
    pub finish_reason: Option<String>,
}

/// Derive tool-call records and finish reason from a complete response.
///
/// Supports the message `tool_calls` array and the legacy `function_call`
/// object as a fallback.
#[must_use]
pub fn extract_response_details(data: &Value) -> ResponseDetails {
    let mut details = ResponseDetails::default();
    let Some(choice) = first_choice(data) else {
        return details;
    };
    details.finish_reason = json_string(choice.get("finish_reason"));

    let message = choice.get("message");
    if let Some(tool_calls) = message
        .and_then(|message| message.get("tool_calls"))
        .and_then(Value::as_array)
        .filter(|calls| !calls.is_empty())
    {
        details.has_tool_calls = true;
        details.tool_calls = tool_calls
            .iter()
            .map(|tool_call| ToolCallRecord {
                id: json_string(tool_call.get("id")),
                call_type: json_string(tool_call.get("type")),
                function_name: json_string(
                    tool_call.get("function").and_then(|func| func.get("name")),
                ),
                function_args: json_string(
                    tool_call
                        .get("function")
                        .and_then(|func| func.get("arguments")),
                )
                .unwrap_or_default(),
            })
            .collect();
    } else if let Some(function_call) = message.and_then(|message| message.get("function_call")) {
        details.has_tool_calls = true;
        details.tool_calls = vec![ToolCallRecord {
            id: None,
            call_type: Some("function_call".to_string()),
            function_name: json_string(function_call.get("name")),
            function_args: json_string(function_call.get("arguments")).unwrap_or_default(),
        }];
    }
    details
}

/// Per-choice metadata logged for complete responses.
#[derive(Debug, Clone, Serialize)]
pub struct ChoiceDetail {
    pub index: u64,
    pub finish_reason: Option<String>,
    pub has_content: bool,
    pub has_tool_calls: bool,
    pub content_length: usize,
}

/// Summarize every choice of a complete response.
#[must_use]
pub fn extract_choices_details(data: &Value) -> Vec<ChoiceDetail> {
    let Some(choices) = data.get("choices").and_then(Value::as_array) else {
        return Vec::new();
    };
    choices
        .iter()
        .enumerate()
        .map(|(position, choice)| {
            let message = choice.get("message");
            let content = message
                .and_then(|message| message.get("content"))
                .and_then(Value::as_str)
                .unwrap_or("");
            ChoiceDetail {
                index: choice
                    .get("index")
                    .and_then(Value::as_u64)
                    .unwrap_or(position as u64),
                finish_reason: json_string(choice.get("finish_reason")),
                has_content: !content.is_empty(),
                has_tool_calls: message
                    .and_then(|message| message.get("tool_calls"))
                    .and_then(Value::as_array)
                    .is_some_and(|calls| !calls.is_empty()),
                content_length: content.chars().count(),
            }
        })
        .collect()
}
