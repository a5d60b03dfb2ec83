use axum::response::{IntoResponse, Response};

/// Canonical error type used across all modules.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}")]
    Upstream { status: u16, body: String },
    #[error("Transport error: {0}")]
    Transport(String),
}

impl RelayError {
    /// HTTP status to answer the downstream client with.
    ///
    /// Upstream failures reuse the upstream's own status so the client sees
    /// exactly what it would have seen talking to the upstream directly.
    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            RelayError::Auth(_) => http::StatusCode::UNAUTHORIZED,
            RelayError::InvalidRequest(_) => http::StatusCode::BAD_REQUEST,
            RelayError::Upstream { status, .. } => {
                http::StatusCode::from_u16(*status).unwrap_or(http::StatusCode::BAD_GATEWAY)
            }
            RelayError::Transport(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Transport(err.to_string())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            // The upstream body is relayed verbatim; it is already the
            // provider's own error JSON (or plain text).
            RelayError::Upstream { body, .. } => (status, body).into_response(),
            other => {
                let body = serde_json::json!({ "detail": other.to_string() });
                (status, axum::Json(body)).into_response()
            }
        }
    }
}
