/// Backoff policy for transient upstream failures.
///
/// Pure: maps (status, attempt, response headers, response body) to a
/// retry decision and a wait duration. Logging and sleeping live with the
/// relay attempt loops.
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;
use regex_lite::Regex;

use crate::config::RetryConfig;

/// A retry never fires sooner than this.
pub const RETRY_FLOOR_SECONDS: f64 = 0.25;

const RATE_LIMIT_RESET_HEADERS: [&str; 2] =
    ["x-ratelimit-reset-tokens", "x-ratelimit-reset-requests"];

static BODY_HINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)try again in ([0-9.]+)s").expect("valid body hint regex"));

/// True exactly for the transient upstream statuses worth replaying.
#[inline]
#[must_use]
pub fn should_retry_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Reason tag attached to retry log events.
#[inline]
#[must_use]
pub fn retry_reason(status: u16) -> &'static str {
    if status == 429 {
        "rate_limit"
    } else {
        "server_error"
    }
}

/// Upstream-suggested wait in seconds, if any signal is present.
///
/// Checked in order: standard `Retry-After` (seconds or HTTP-date),
/// provider rate-limit reset headers, then a "try again in <seconds>s"
/// hint inside the error body.
#[must_use]
pub fn suggested_delay(headers: &http::HeaderMap, body_text: &str) -> Option<f64> {
    parse_retry_after(headers)
        .or_else(|| parse_rate_limit_reset(headers))
        .or_else(|| parse_body_hint(body_text))
}

fn parse_retry_after(headers: &http::HeaderMap) -> Option<f64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<f64>() {
        return Some(seconds);
    }
    let target = httpdate::parse_http_date(raw).ok()?;
    let delay = target
        .duration_since(SystemTime::now())
        .unwrap_or_default();
    Some(delay.as_secs_f64())
}

fn parse_rate_limit_reset(headers: &http::HeaderMap) -> Option<f64> {
    RATE_LIMIT_RESET_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)?
            .to_str()
            .ok()?
            .trim()
            .parse::<f64>()
            .ok()
    })
}

fn parse_body_hint(body_text: &str) -> Option<f64> {
    BODY_HINT_RE
        .captures(body_text)?
        .get(1)?
        .as_str()
        .parse::<f64>()
        .ok()
}

/// Configured backoff computation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_seconds: f64,
    max_seconds: f64,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_seconds: config.base_seconds,
            max_seconds: config.max_seconds,
        }
    }

    /// Whether another attempt may follow the given 0-based attempt.
    ///
    /// `max_attempts` caps the total number of upstream attempts.
    #[inline]
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    #[inline]
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait duration for one retry.
    ///
    /// Base is the upstream suggestion when positive, else exponential
    /// `base_seconds * 2^attempt`; 0..+20% jitter is added, the result is
    /// clamped to `max_seconds` and floored at [`RETRY_FLOOR_SECONDS`].
    #[must_use]
    pub fn compute_delay(&self, attempt: u32, suggested: Option<f64>) -> Duration {
        let base = suggested
            .filter(|seconds| *seconds > 0.0)
            .unwrap_or_else(|| self.base_seconds * 2f64.powi(attempt.min(16) as i32));
        let jitter = base * 0.2 * fastrand::f64();
        let wait = (base + jitter).min(self.max_seconds).max(RETRY_FLOOR_SECONDS);
        Duration::from_secs_f64(wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig::default())
    }

    #[test]
    fn test_retry_status_set() {
        for status in [429, 500, 502, 503, 504] {
            assert!(should_retry_status(status), "{status} should retry");
        }
        for status in (100..600).filter(|s| ![429, 500, 502, 503, 504].contains(s)) {
            assert!(!should_retry_status(status), "{status} should not retry");
        }
    }

    #[test]
    fn test_retry_reason_tags() {
        assert_eq!(retry_reason(429), "rate_limit");
        assert_eq!(retry_reason(500), "server_error");
        assert_eq!(retry_reason(503), "server_error");
    }

    #[test]
    fn test_delay_bounds_hold_for_any_attempt() {
        let policy = policy();
        for attempt in 0..12 {
            let delay = policy.compute_delay(attempt, None).as_secs_f64();
            assert!(delay >= RETRY_FLOOR_SECONDS, "attempt {attempt}: {delay}");
            assert!(delay <= 20.0, "attempt {attempt}: {delay}");
        }
    }

    #[test]
    fn test_delay_floor_applies_to_tiny_suggestions() {
        let delay = policy().compute_delay(0, Some(0.001)).as_secs_f64();
        assert!(delay >= RETRY_FLOOR_SECONDS);
    }

    #[test]
    fn test_suggested_delay_overrides_exponential_base() {
        let delay = policy().compute_delay(5, Some(2.0)).as_secs_f64();
        // 2.0 base plus at most 20% jitter.
        assert!((2.0..=2.4).contains(&delay), "{delay}");
    }

    #[test]
    fn test_non_positive_suggestion_falls_back_to_exponential() {
        let delay = policy().compute_delay(1, Some(0.0)).as_secs_f64();
        // 1.5 * 2^1 = 3.0 plus at most 20% jitter.
        assert!((3.0..=3.6).contains(&delay), "{delay}");
    }

    #[test]
    fn test_should_retry_caps_attempts() {
        let policy = policy();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = http::HeaderMap::new();
        headers.insert(RETRY_AFTER, http::HeaderValue::from_static("2"));
        assert_eq!(suggested_delay(&headers, ""), Some(2.0));
    }

    #[test]
    fn test_parse_retry_after_fractional_seconds() {
        let mut headers = http::HeaderMap::new();
        headers.insert(RETRY_AFTER, http::HeaderValue::from_static("6.13"));
        assert_eq!(suggested_delay(&headers, ""), Some(6.13));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let target = SystemTime::now() + Duration::from_secs(3);
        let mut headers = http::HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            http::HeaderValue::from_str(&httpdate::fmt_http_date(target)).expect("header value"),
        );
        let delay = suggested_delay(&headers, "").expect("delay");
        assert!(delay <= 3.0);
    }

    #[test]
    fn test_parse_rate_limit_reset_headers() {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            "x-ratelimit-reset-tokens",
            http::HeaderValue::from_static("1.5"),
        );
        assert_eq!(suggested_delay(&headers, ""), Some(1.5));

        let mut headers = http::HeaderMap::new();
        headers.insert(
            "x-ratelimit-reset-requests",
            http::HeaderValue::from_static("4"),
        );
        assert_eq!(suggested_delay(&headers, ""), Some(4.0));
    }

    #[test]
    fn test_parse_body_hint() {
        let body = r#"{"error":{"message":"Rate limit reached. Please try again in 6.13s."}}"#;
        assert_eq!(suggested_delay(&http::HeaderMap::new(), body), Some(6.13));
    }

    #[test]
    fn test_retry_after_wins_over_body_hint() {
        let mut headers = http::HeaderMap::new();
        headers.insert(RETRY_AFTER, http::HeaderValue::from_static("1"));
        assert_eq!(
            suggested_delay(&headers, "please try again in 9s"),
            Some(1.0)
        );
    }

    #[test]
    fn test_no_signal_yields_none() {
        assert!(suggested_delay(&http::HeaderMap::new(), "some other error").is_none());
        let mut headers = http::HeaderMap::new();
        headers.insert(RETRY_AFTER, http::HeaderValue::from_static("not-a-delay"));
        assert!(suggested_delay(&headers, "").is_none());
    }
}
