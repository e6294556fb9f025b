//! Tracing setup for applications embedding buildbox.
//!
//! The library itself never installs a global subscriber: components log
//! through the span handed to their constructors. Applications that want
//! buildbox's log files call [`init_logging`] once at startup.

use std::path::{Path, PathBuf};

use buildbox_shared::constants::envs;
use buildbox_shared::errors::{BuildboxError, BuildboxResult};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Log file name inside the logs directory.
pub const LOG_FILE: &str = "buildbox.log";

/// Default logs directory: `<cache dir>/buildbox/logs`.
pub fn default_log_dir() -> BuildboxResult<PathBuf> {
    dirs::cache_dir()
        .map(|dir| dir.join("buildbox").join("logs"))
        .ok_or_else(|| BuildboxError::Storage("Unable to determine cache directory".into()))
}

/// Initialize tracing with file logging.
///
/// Logs are written to `{log_dir}/buildbox.log` with daily rotation. The
/// filter comes from `BUILDBOX_LOG`, defaulting to `info`.
/// Returns a WorkerGuard that must be kept alive to flush the background writer.
pub fn init_logging(log_dir: &Path) -> BuildboxResult<WorkerGuard> {
    std::fs::create_dir_all(log_dir).map_err(|e| {
        BuildboxError::Storage(format!(
            "Failed to create logs directory {}: {}",
            log_dir.display(),
            e
        ))
    })?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    register_to_tracing(non_blocking, env_filter());

    Ok(guard)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(envs::BUILDBOX_LOG).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_creates_directory_and_is_repeatable() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("logs");

        let _guard = init_logging(&log_dir).unwrap();
        assert!(log_dir.is_dir());

        // Second registration is ignored rather than panicking.
        let _guard2 = init_logging(&log_dir).unwrap();
    }
}
