/// Model resolution and payload sanitizing ahead of the upstream call.
use serde_json::Value;

use crate::config::UpstreamConfig;

/// Parameters some upstream models reject outright.
const UNSUPPORTED_PARAMS: [&str; 4] = [
    "temperature",
    "top_p",
    "presence_penalty",
    "frequency_penalty",
];

/// Map the requested model through configured aliases, falling back to the
/// configured default when the request names none.
#[must_use]
pub fn resolve_model(requested: Option<&str>, upstream: &UpstreamConfig) -> String {
    match requested {
        Some(name) => upstream
            .model_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string()),
        None => upstream.default_model.clone(),
    }
}

/// Strip sampling parameters the upstream rejects and rename the legacy
/// token-limit field.
pub fn sanitize_payload(payload: &mut Value) {
    let Some(map) = payload.as_object_mut() else {
        return;
    };
    for param in UNSUPPORTED_PARAMS {
        map.remove(param);
    }
    if let Some(limit) = map.remove("max_tokens") {
        map.entry("max_completion_tokens").or_insert(limit);
    }
}

/// True when the request declares callable tools, in either the current
/// `tools` shape or the legacy `functions` shape.
#[must_use]
pub fn tools_available(payload: &Value) -> bool {
    payload.get("tools").is_some() || payload.get("functions").is_some()
}

/// True when any message carries tool output back to the model.
#[must_use]
pub fn has_tool_results(payload: &Value) -> bool {
    payload
        .get("messages")
        .and_then(Value::as_array)
        .is_some_and(|messages| {
            messages.iter().any(|message| {
                message.get("role").and_then(Value::as_str) == Some("tool")
                    || message.get("tool_call_id").is_some()
            })
        })
}
