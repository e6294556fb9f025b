//! Error types shared across the buildbox crates.

use thiserror::Error;

/// Result alias used throughout buildbox.
pub type BuildboxResult<T> = Result<T, BuildboxError>;

/// Every failure the provisioning layer can report.
///
/// Readiness polling that runs out of attempts is deliberately absent here:
/// it degrades to a logged warning and setup carries on.
#[derive(Debug, Error)]
pub enum BuildboxError {
    /// The target's persisted state does not match the requesting image.
    ///
    /// Carries a human-readable reason. A provider with auto-clean enabled
    /// recovers by deleting the instance; otherwise it reaches the caller.
    #[error("{0}")]
    Compatibility(String),

    /// A command run with `check` enabled exited non-zero.
    #[error("command '{command}' failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The executor variant cannot perform the requested capability.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A sync source, binary or backend object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A named backend object exists with different connection parameters.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    /// Spawning or talking to a process failed before it produced a status.
    #[error("execution error: {0}")]
    Execution(String),

    /// Local filesystem failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Malformed document or value (YAML, os-release, versions).
    #[error("parse error: {0}")]
    Parse(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BuildboxError {
    /// True for [`BuildboxError::Compatibility`].
    pub fn is_compatibility(&self) -> bool {
        matches!(self, BuildboxError::Compatibility(_))
    }

    /// True for [`BuildboxError::CommandFailed`].
    pub fn is_command_failure(&self) -> bool {
        matches!(self, BuildboxError::CommandFailed { .. })
    }
}
