use syncbox_types::LogLevel;
use tracing_subscriber::EnvFilter;

/// Initialize structured logging with tracing-subscriber.
///
/// Logs go to stderr so stdout stays free for source output. Uses the
/// `RUST_LOG` env var if set, otherwise falls back to the provided level.
pub fn init(log_level: LogLevel) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
