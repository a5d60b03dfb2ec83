use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Config level names follow conventional logger spellings, so "WARNING"
/// and "CRITICAL" are mapped onto tracing's WARN and ERROR; "DISABLED"
/// skips installation entirely. With `json_logs` every line is a single
/// JSON object, which keeps the `audit` target machine-readable end to end.
pub fn init_tracing(log_level: &str, json_logs: bool) {
    let level = log_level.to_uppercase();
    if level == "DISABLED" {
        return;
    }

    let directive = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}
