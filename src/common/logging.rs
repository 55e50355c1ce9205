//! Logging and tracing configuration
//!
//! The CLI logs to stderr. The agent can additionally keep a log file,
//! which is the only place command diagnostics survive once the
//! orchestration server has gone away.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// Initialize tracing for the CLI (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("testbridge=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for the agent (file + stderr logging)
///
/// The file defaults to `<data_dir>/testbridge/logs/agent.log` and gets
/// debug-level output so envelope traffic can be reconstructed. Returns
/// the log path together with the writer guard, which must be kept alive
/// for buffered lines to be flushed.
pub fn init_agent(log_file: Option<&Path>) -> Option<(PathBuf, WorkerGuard)> {
    let (dir, file_name) = match log_file {
        Some(path) => match split_log_path(path) {
            Some(parts) => parts,
            None => {
                eprintln!("Warning: Invalid log file path: {}", path.display());
                init_cli();
                return None;
            }
        },
        None => match paths::ensure_log_dir() {
            Ok(Some(dir)) => (dir, "agent.log".into()),
            Ok(None) => {
                init_cli();
                return None;
            }
            Err(e) => {
                eprintln!("Warning: Could not create log directory: {}", e);
                init_cli();
                return None;
            }
        },
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("testbridge=debug,info"));

    let appender = tracing_appender::rolling::never(&dir, &file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Some((dir.join(file_name), guard))
}

/// Directory and file name of an explicit log path, creating the directory
fn split_log_path(path: &Path) -> Option<(PathBuf, PathBuf)> {
    let file_name = PathBuf::from(path.file_name()?);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).ok()?;
    Some((dir, file_name))
}
