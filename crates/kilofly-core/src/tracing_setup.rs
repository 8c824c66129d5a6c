use std::fs::OpenOptions;
use std::io;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Env var holding the stderr filter directive (EnvFilter syntax)
pub const LOG_FILTER_ENV: &str = "KILOFLY_LOG";
/// Env var naming a file that receives debug-level logs
pub const LOG_FILE_ENV: &str = "KILOFLY_LOG_FILE";

pub fn init_tracing() -> io::Result<()> {
    init_tracing_with_default("info")
}

pub fn init_tracing_with_default(default_filter: &str) -> io::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(filter);

    let registry = tracing_subscriber::registry().with(stderr_layer);

    // Optional file logging for debugging listener churn
    let Some(log_path) = std::env::var(LOG_FILE_ENV).ok() else {
        let _ = registry.try_init();
        return Ok(());
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_filter(tracing_subscriber::filter::LevelFilter::DEBUG);

    let _ = registry.with(file_layer).try_init();
    eprintln!("File logging enabled: {}", log_path);
    Ok(())
}
