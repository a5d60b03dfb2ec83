/// Bearer credential resolution for outbound upstream calls.
use http::header::AUTHORIZATION;
use serde_json::Value;

use crate::error::RelayError;

const HEADER_KEYS: [&str; 4] = [
    "authorization",
    "x-openai-api-key",
    "openai-api-key",
    "x-api-key",
];
const BODY_KEYS: [&str; 4] = ["api_key", "openai_api_key", "key", "token"];

/// Normalize an API key to `Bearer <key>` form.
#[must_use]
pub fn normalize_bearer(value: &str) -> String {
    let value = value.trim();
    // Slicing by byte range would panic on multi-byte keys; `get` declines
    // instead when byte 7 is not a char boundary.
    let has_scheme = value
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("bearer "));
    if has_scheme {
        value.to_string()
    } else {
        format!("Bearer {value}")
    }
}

/// Resolve the upstream credential for one request.
///
/// Sources, in order: the `Authorization` header, alternate API-key headers,
/// well-known body fields, then the configured fallback key.
///
/// # Errors
///
/// Returns `RelayError::Auth` when no source yields a key.
pub fn resolve_auth(
    headers: &http::HeaderMap,
    body: &Value,
    configured_key: Option<&str>,
) -> Result<String, RelayError> {
    if let Some(value) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        return Ok(normalize_bearer(value));
    }
    for key in &HEADER_KEYS[1..] {
        if let Some(value) = headers.get(*key).and_then(|value| value.to_str().ok()) {
            return Ok(normalize_bearer(value));
        }
    }
    for key in BODY_KEYS {
        if let Some(value) = body.get(key).and_then(Value::as_str) {
            return Ok(normalize_bearer(value));
        }
    }
    if let Some(key) = configured_key {
        return Ok(normalize_bearer(key));
    }
    Err(RelayError::Auth("Missing API key".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_bearer_adds_prefix_once() {
        assert_eq!(normalize_bearer("sk-abc"), "Bearer sk-abc");
        assert_eq!(normalize_bearer("Bearer sk-abc"), "Bearer sk-abc");
        assert_eq!(normalize_bearer("bearer sk-abc"), "bearer sk-abc");
        assert_eq!(normalize_bearer("  sk-abc  "), "Bearer sk-abc");
    }

    #[test]
    fn test_normalize_bearer_multibyte_key() {
        assert_eq!(normalize_bearer("aaaaaaé-key"), "Bearer aaaaaaé-key");
        assert_eq!(normalize_bearer("ééééééé"), "Bearer ééééééé");
    }

    #[test]
    fn test_resolve_auth_multibyte_body_key() {
        let auth = resolve_auth(
            &http::HeaderMap::new(),
            &json!({"api_key": "aaaaaaé-key"}),
            None,
        )
        .expect("auth resolved");
        assert_eq!(auth, "Bearer aaaaaaé-key");
    }

    #[test]
    fn test_authorization_header_wins() {
        let mut headers = http::HeaderMap::new();
        headers.insert(AUTHORIZATION, http::HeaderValue::from_static("sk-header"));
        headers.insert("x-api-key", http::HeaderValue::from_static("sk-alt"));
        let auth = resolve_auth(&headers, &json!({"api_key": "sk-body"}), Some("sk-cfg"))
            .expect("auth resolved");
        assert_eq!(auth, "Bearer sk-header");
    }

    #[test]
    fn test_alternate_headers_checked_in_order() {
        let mut headers = http::HeaderMap::new();
        headers.insert("openai-api-key", http::HeaderValue::from_static("sk-alt"));
        let auth = resolve_auth(&headers, &json!({}), None).expect("auth resolved");
        assert_eq!(auth, "Bearer sk-alt");
    }

    #[test]
    fn test_body_fields_before_configured_fallback() {
        let headers = http::HeaderMap::new();
        let auth = resolve_auth(&headers, &json!({"token": "sk-body"}), Some("sk-cfg"))
            .expect("auth resolved");
        assert_eq!(auth, "Bearer sk-body");
    }

    #[test]
    fn test_configured_fallback() {
        let auth =
            resolve_auth(&http::HeaderMap::new(), &json!({}), Some("sk-cfg")).expect("auth");
        assert_eq!(auth, "Bearer sk-cfg");
    }

    #[test]
    fn test_missing_key_is_auth_error() {
        let err = resolve_auth(&http::HeaderMap::new(), &json!({}), None).unwrap_err();
        assert!(matches!(err, RelayError::Auth(_)));
    }
}
