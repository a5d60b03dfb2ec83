use crate::audit::SharedAuditSink;
use crate::config::AppConfig;
use crate::relay::RelayEngine;
use crate::transport::HttpTransport;

/// Shared per-process state handed to every request handler.
pub struct AppState {
    pub config: AppConfig,
    pub engine: RelayEngine,
    pub sink: SharedAuditSink,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, transport: HttpTransport, sink: SharedAuditSink) -> Self {
        let engine = RelayEngine::new(
            transport,
            config.retry,
            config.logging.max_log_text,
            sink.clone(),
        );
        Self {
            config,
            engine,
            sink,
        }
    }
}
