//! Executor that runs commands directly in the host namespace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use buildbox_shared::errors::{BuildboxError, BuildboxResult};
use tokio::process::Command;
use tracing::Span;

use crate::executor::{
    ExecCommand, ExecOutput, ExecProcess, Executor, FileSpec, run_to_completion,
};
use crate::util::copy_path;

/// Runs commands on the host, optionally through `sudo -H -u <user>`.
///
/// There is no isolation: this exists for local, non-isolated builds and to
/// exercise the executor contract without a container backend.
#[derive(Clone, Debug)]
pub struct HostExecutor {
    sudo_user: Option<String>,
    span: Span,
}

impl HostExecutor {
    pub fn new(sudo_user: Option<String>) -> Self {
        Self {
            sudo_user,
            span: tracing::debug_span!("host_executor"),
        }
    }

    /// Log events under `span` instead of the executor's own span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn sudo_user(&self) -> Option<&str> {
        self.sudo_user.as_deref()
    }

    /// Full argv with the privilege-escalation prefix applied.
    ///
    /// sudo resets the environment, so under sudo the command's variables
    /// travel inside the argv through `env K=V`.
    pub fn prepare_argv(&self, command: &ExecCommand) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(user) = &self.sudo_user {
            argv.extend(["sudo".into(), "-H".into(), "-u".into(), user.clone()]);
            if !command.get_env().is_empty() {
                argv.push("env".into());
                argv.extend(command.get_env().iter().map(|(k, v)| format!("{}={}", k, v)));
            }
        }
        argv.extend(command.argv());
        argv
    }

    fn build_command(&self, command: &ExecCommand) -> Command {
        let argv = self.prepare_argv(command);
        let quoted =
            shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" "));
        tracing::info!(parent: &self.span, command = %quoted, "Executing");

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        if self.sudo_user.is_none() {
            cmd.envs(command.get_env().iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        if let Some(dir) = command.get_working_dir() {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn copy(&self, source: &Path, destination: &Path) -> BuildboxResult<()> {
        let source: PathBuf = source.to_path_buf();
        let destination: PathBuf = destination.to_path_buf();
        tokio::task::spawn_blocking(move || copy_path(&source, &destination))
            .await
            .map_err(|e| BuildboxError::Internal(format!("copy task failed: {}", e)))?
    }
}

#[async_trait]
impl Executor for HostExecutor {
    async fn execute_run(&self, command: &ExecCommand) -> BuildboxResult<ExecOutput> {
        let cmd = self.build_command(command);
        run_to_completion(cmd, command).await?.checked(command)
    }

    async fn execute_streaming(&self, command: &ExecCommand) -> BuildboxResult<ExecProcess> {
        let cmd = self.build_command(command);
        ExecProcess::spawn(cmd, command)
    }

    async fn create_file(&self, file: &FileSpec) -> BuildboxResult<()> {
        // No ownership-correct way to write through sudo from here.
        Err(BuildboxError::Unsupported(format!(
            "create_file is not implemented for the host executor ({})",
            file.destination.display()
        )))
    }

    async fn mount(&self, source: &Path, destination: &Path) -> BuildboxResult<bool> {
        tracing::debug!(
            parent: &self.span,
            source = %source.display(),
            destination = %destination.display(),
            "Host executor does not support mounts"
        );
        Ok(false)
    }

    async fn sync_to(&self, source: &Path, destination: &Path) -> BuildboxResult<()> {
        self.copy(source, destination).await
    }

    async fn sync_from(&self, source: &Path, destination: &Path) -> BuildboxResult<()> {
        self.copy(source, destination).await
    }
}
