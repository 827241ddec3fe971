use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "sitemap_server=info,request=info";

/// Installs the global subscriber. `RUST_LOG` takes precedence over the default filter.
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

pub fn log_request(method: &str, path: &str, status: u16, duration: std::time::Duration) {
    info!(
        target: "request",
        method = %method,
        path = %path,
        status = status,
        duration_ms = %duration.as_millis(),
        "Request completed"
    );
}
