/// HTTP ingress: route table and the relay endpoint handlers.
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::audit::{redact_headers, AuditEvent, IncomingRequest};
use crate::auth::resolve_auth;
use crate::error::RelayError;
use crate::relay::RelayRequest;
use crate::state::AppState;

pub mod models;

use self::models::{has_tool_results, resolve_model, sanitize_payload, tools_available};

#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/v1/responses", post(responses_handler))
        .with_state(state)
}

async fn health_handler() -> Response {
    Json(json!({"status": "ok", "proxy": "relaygate"})).into_response()
}

async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    match relay_endpoint(state, headers, body, "/v1/chat/completions").await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn responses_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    match relay_endpoint(state, headers, body, "/v1/responses").await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// Shared relay path for every completion endpoint.
///
/// Resolves credentials and the model name, records the accepted request,
/// then hands off to the streaming or JSON relay depending on the payload's
/// `stream` flag.
async fn relay_endpoint(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: bytes::Bytes,
    path: &str,
) -> Result<Response, RelayError> {
    let mut payload: Value = serde_json::from_slice(&body)
        .map_err(|err| RelayError::InvalidRequest(format!("Invalid JSON body: {err}")))?;

    let auth = resolve_auth(&headers, &payload, state.config.upstream.api_key.as_deref())?;
    tracing::debug!(headers = %redact_headers(&headers), path, "inbound request");

    let requested = payload
        .get("model")
        .and_then(Value::as_str)
        .map(str::to_string);
    let model = resolve_model(requested.as_deref(), &state.config.upstream);
    if let Some(map) = payload.as_object_mut() {
        map.insert("model".to_string(), Value::String(model.clone()));
    }
    if state.config.upstream.sanitize_payload {
        sanitize_payload(&mut payload);
    }

    let streaming = payload
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    state.sink.emit(AuditEvent::IncomingRequest(IncomingRequest {
        model: Some(model.clone()),
        message_count: payload
            .get("messages")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
        has_tool_results: has_tool_results(&payload),
        stream: streaming,
        tools_available: tools_available(&payload),
        full_payload: payload.clone(),
    }));

    let mut outbound = HeaderMap::new();
    outbound.insert(
        http::header::AUTHORIZATION,
        http::HeaderValue::from_str(&auth)
            .map_err(|_| RelayError::Auth("API key is not a valid header value".to_string()))?,
    );
    outbound.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );

    let request = RelayRequest {
        url: format!(
            "{}{path}",
            state.config.upstream.base_url.trim_end_matches('/')
        ),
        headers: outbound,
        body: payload,
    };

    if streaming {
        let stream = state.engine.relay_stream(request, Some(model)).await?;
        Ok(sse_response(Body::from_stream(stream)))
    } else {
        let data = state.engine.relay_json(request, Some(model)).await?;
        Ok(Json(data).into_response())
    }
}

fn sse_response(body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
