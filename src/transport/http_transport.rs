use std::time::Duration;

use crate::error::RelayError;

const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(15);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP transport client for the upstream API.
///
/// No overall request deadline is set: a streamed exchange is bounded only
/// by retry/backoff and downstream cancellation. Only connection
/// establishment is time-limited.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the shared upstream client.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the TLS backend cannot be
    /// initialized.
    pub fn new() -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .tcp_nodelay(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| RelayError::Transport(format!("Failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}
