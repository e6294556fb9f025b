//! Executor trait - the command/file contract for a build target.
//!
//! Implementations:
//! - `HostExecutor`: runs commands in the host process namespace
//! - `LxdInstance`: runs commands inside an LXD container
//!
//! Executors are thin, non-retrying transports. Every command may be slow or
//! fail; timeouts and retries belong to the callers (images, providers).

mod command;
mod process;

pub use command::{ExecCommand, ExecOutput, FileSpec, Redirect};
pub use process::ExecProcess;

pub(crate) use process::{exit_code, run_to_completion};

use async_trait::async_trait;
use buildbox_shared::errors::BuildboxResult;
use std::path::Path;

/// Runs commands and moves files against one target.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a command to completion.
    ///
    /// A non-zero exit is only an error when the command is `check`ed.
    async fn execute_run(&self, command: &ExecCommand) -> BuildboxResult<ExecOutput>;

    /// Start a command and return a live handle to it.
    async fn execute_streaming(&self, command: &ExecCommand) -> BuildboxResult<ExecProcess>;

    /// Write a file into the target with explicit mode and ownership.
    ///
    /// Backends without a safe way to do this return
    /// [`buildbox_shared::BuildboxError::Unsupported`].
    async fn create_file(&self, file: &FileSpec) -> BuildboxResult<()>;

    /// Best-effort bind of a host path into the target.
    ///
    /// `Ok(false)` means the backend cannot do it; callers proceed without it.
    async fn mount(&self, source: &Path, destination: &Path) -> BuildboxResult<bool>;

    /// Copy a host file or directory tree into the target.
    async fn sync_to(&self, source: &Path, destination: &Path) -> BuildboxResult<()>;

    /// Copy a target file or directory tree onto the host.
    async fn sync_from(&self, source: &Path, destination: &Path) -> BuildboxResult<()>;
}
