use std::sync::Arc;

use relaygate::api::router;
use relaygate::audit::{LogSink, SharedAuditSink};
use relaygate::config::load_config;
use relaygate::observability::init_tracing;
use relaygate::state::AppState;
use relaygate::transport::HttpTransport;

fn main() {
    let config = load_config("config.yaml").unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.logging.level, config.logging.json_logs);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    runtime.block_on(async move {
        let host = config.server.host.clone();
        let port = config.server.port;

        let transport = HttpTransport::new().unwrap_or_else(|e| {
            eprintln!("Failed to build upstream client: {e}");
            std::process::exit(1);
        });
        let sink: SharedAuditSink = Arc::new(LogSink);
        let state = Arc::new(AppState::new(config, transport, sink));
        let app = router(state);

        tracing::info!("relaygate starting on {}:{}", host, port);

        let listener = tokio::net::TcpListener::bind((host.as_str(), port))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Failed to bind {host}:{port}: {e}");
                std::process::exit(1);
            });
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("Server error: {e}");
            std::process::exit(1);
        }
    });
}
