use crate::config::ServerConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber: JSON lines on stderr (stdout carries
/// JSON-RPC) plus a per-process file in the log directory.
///
/// The returned guard flushes the file writer on drop and must live as long
/// as the process.
pub fn init_logging(cfg: &ServerConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(std::io::stderr);

    let dir = cfg.resolved_log_dir();
    let file_name = format!(
        "mcp-server-{}.log",
        chrono::Local::now().format("%Y-%m-%d-%H-%M-%S")
    );
    let appender = std::fs::create_dir_all(&dir)
        .map_err(|e| e.to_string())
        .and_then(|_| {
            RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(file_name.as_str())
                .build(&dir)
                .map_err(|e| e.to_string())
        });

    let (file_layer, guard, file_error) = match appender {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_target(true)
                .with_current_span(false)
                .with_span_list(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard), None)
        }
        Err(e) => (None, None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    match file_error {
        None => tracing::info!(event = "log_file_opened", dir = %dir.display(), file = %file_name),
        Some(e) => tracing::warn!(event = "log_file_unavailable", dir = %dir.display(), error = %e),
    }
    guard
}
