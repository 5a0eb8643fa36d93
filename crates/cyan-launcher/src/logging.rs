use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Default filter when `RUST_LOG` is unset. Server output lines are logged at
/// debug under `cyan::server`.
pub const DEFAULT_FILTER: &str = "info";

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Colored stderr output plus an optional plain-text log file.
///
/// The returned guards must live until exit so buffered lines are flushed.
pub fn init(log_file: Option<&Path>) -> anyhow::Result<Vec<WorkerGuard>> {
    let (nb_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(nb_stderr);

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(stderr_layer)
            .try_init()?;
        return Ok(vec![stderr_guard]);
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let (nb_file, file_guard) = tracing_appender::non_blocking(file);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(nb_file);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(vec![stderr_guard, file_guard])
}
