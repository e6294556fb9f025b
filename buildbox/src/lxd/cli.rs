//! [`LxcClient`] implementation driving the `lxc` command-line tool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use buildbox_shared::constants::{envs, lxd};
use buildbox_shared::errors::{BuildboxError, BuildboxResult};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::Span;

use super::client::{
    ImageEntry, InstanceEntry, InstanceRef, LaunchRequest, LxcClient, PublishRequest,
    PushOptions, RemoteConfig,
};
use crate::executor::{ExecCommand, ExecOutput, ExecProcess, Redirect, run_to_completion};
use crate::util::which_required;

#[derive(Deserialize)]
struct ProjectEntry {
    name: String,
}

/// Runs `lxc` subcommands and parses their `--format=yaml` output.
#[derive(Clone, Debug)]
pub struct LxcCli {
    lxc_path: PathBuf,
    span: Span,
}

impl LxcCli {
    /// Locate `lxc` via `BUILDBOX_LXC`, falling back to `PATH`.
    pub fn new() -> BuildboxResult<Self> {
        let lxc_path = match std::env::var_os(envs::BUILDBOX_LXC) {
            Some(path) => PathBuf::from(path),
            None => which_required(lxd::LXC_BINARY)?,
        };
        Ok(Self::with_path(lxc_path))
    }

    pub fn with_path(lxc_path: impl Into<PathBuf>) -> Self {
        Self {
            lxc_path: lxc_path.into(),
            span: tracing::debug_span!("lxc"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn lxc_path(&self) -> &Path {
        &self.lxc_path
    }

    fn lxc_command(&self, args: Vec<String>) -> ExecCommand {
        ExecCommand::new(self.lxc_path.to_string_lossy())
            .args(args)
            .check(true)
    }

    fn to_process(&self, command: &ExecCommand) -> Command {
        let mut cmd = Command::new(command.program());
        cmd.args(command.get_args());
        cmd
    }

    /// Run an lxc subcommand, failing on non-zero exit.
    async fn run(&self, args: Vec<String>) -> BuildboxResult<ExecOutput> {
        let command = self.lxc_command(args);
        tracing::debug!(parent: &self.span, command = %command, "Running lxc");
        run_to_completion(self.to_process(&command), &command)
            .await?
            .checked(&command)
    }

    /// Run an lxc subcommand with `input` on stdin.
    async fn run_with_input(&self, args: Vec<String>, input: &[u8]) -> BuildboxResult<ExecOutput> {
        let command = self.lxc_command(args);
        tracing::debug!(parent: &self.span, command = %command, "Running lxc");

        let mut cmd = self.to_process(&command);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|e| {
            BuildboxError::Execution(format!("Failed to spawn '{}': {}", command, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await.map_err(|e| {
                BuildboxError::Execution(format!("Failed to write to '{}': {}", command, e))
            })?;
        }

        let output = child.wait_with_output().await.map_err(|e| {
            BuildboxError::Execution(format!("Failed to wait for '{}': {}", command, e))
        })?;
        ExecOutput {
            exit_code: crate::executor::exit_code(output.status),
            stdout: output.stdout,
            stderr: output.stderr,
        }
        .checked(&command)
    }

    async fn run_yaml<T: DeserializeOwned>(&self, args: Vec<String>) -> BuildboxResult<T> {
        let output = self.run(args).await?;
        serde_yaml::from_slice(&output.stdout)
            .map_err(|e| BuildboxError::Parse(format!("Unexpected lxc output: {}", e)))
    }

    /// Full `lxc exec` argument vector for `command` inside `instance`.
    pub fn exec_args(instance: &InstanceRef, command: &ExecCommand) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            instance.qualified_name(),
            "--project".to_string(),
            instance.project.clone(),
        ];
        if let Some(dir) = command.get_working_dir() {
            args.push("--cwd".to_string());
            args.push(dir.display().to_string());
        }
        for (key, value) in command.get_env() {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push("--".to_string());
        args.extend(command.argv());
        args
    }

    /// `lxc exec` wrapper carrying the inner command's redirects.
    fn exec_command(&self, instance: &InstanceRef, command: &ExecCommand) -> ExecCommand {
        self.lxc_command(Self::exec_args(instance, command))
            .check(false)
            .stdout(command.stdout_redirect())
            .stderr(command.stderr_redirect())
    }
}

fn instance_path(instance: &InstanceRef, path: &Path) -> String {
    format!("{}{}", instance.qualified_name(), path.display())
}

#[async_trait]
impl LxcClient for LxcCli {
    async fn ensure_available(&self) -> BuildboxResult<()> {
        let command = self
            .lxc_command(vec!["info".into()])
            .stdout(Redirect::Null);
        run_to_completion(self.to_process(&command), &command)
            .await
            .and_then(|output| output.checked(&command))
            .map(|_| ())
            .map_err(|e| BuildboxError::NotFound(format!("LXD is not available: {}", e)))
    }

    async fn remote_list(&self) -> BuildboxResult<HashMap<String, RemoteConfig>> {
        self.run_yaml(vec!["remote".into(), "list".into(), "--format=yaml".into()])
            .await
    }

    async fn remote_add(&self, name: &str, config: &RemoteConfig) -> BuildboxResult<()> {
        self.run(vec![
            "remote".into(),
            "add".into(),
            name.into(),
            config.addr.clone(),
            format!("--protocol={}", config.protocol),
        ])
        .await
        .map(|_| ())
    }

    async fn project_list(&self, remote: &str) -> BuildboxResult<Vec<String>> {
        let projects: Vec<ProjectEntry> = self
            .run_yaml(vec![
                "project".into(),
                "list".into(),
                format!("{}:", remote),
                "--format=yaml".into(),
            ])
            .await?;
        Ok(projects.into_iter().map(|p| p.name).collect())
    }

    async fn project_create(&self, remote: &str, project: &str) -> BuildboxResult<()> {
        self.run(vec![
            "project".into(),
            "create".into(),
            format!("{}:{}", remote, project),
        ])
        .await
        .map(|_| ())
    }

    async fn profile_show(
        &self,
        remote: &str,
        project: &str,
        profile: &str,
    ) -> BuildboxResult<serde_yaml::Value> {
        self.run_yaml(vec![
            "profile".into(),
            "show".into(),
            format!("{}:{}", remote, profile),
            "--project".into(),
            project.into(),
        ])
        .await
    }

    async fn profile_edit(
        &self,
        remote: &str,
        project: &str,
        profile: &str,
        config: &serde_yaml::Value,
    ) -> BuildboxResult<()> {
        let document = serde_yaml::to_string(config)
            .map_err(|e| BuildboxError::Internal(format!("Failed to encode profile: {}", e)))?;
        self.run_with_input(
            vec![
                "profile".into(),
                "edit".into(),
                format!("{}:{}", remote, profile),
                "--project".into(),
                project.into(),
            ],
            document.as_bytes(),
        )
        .await
        .map(|_| ())
    }

    async fn image_list(&self, remote: &str, project: &str) -> BuildboxResult<Vec<ImageEntry>> {
        self.run_yaml(vec![
            "image".into(),
            "list".into(),
            format!("{}:", remote),
            "--project".into(),
            project.into(),
            "--format=yaml".into(),
        ])
        .await
    }

    async fn publish(&self, request: &PublishRequest) -> BuildboxResult<()> {
        let instance = &request.instance;
        let mut args = vec![
            "publish".to_string(),
            instance.qualified_name(),
            format!("{}:", instance.remote),
            "--alias".into(),
            request.alias.clone(),
            "--project".into(),
            instance.project.clone(),
        ];
        if request.force {
            args.push("--force".into());
        }
        self.run(args).await.map(|_| ())
    }

    async fn list(&self, remote: &str, project: &str) -> BuildboxResult<Vec<InstanceEntry>> {
        self.run_yaml(vec![
            "list".into(),
            format!("{}:", remote),
            "--project".into(),
            project.into(),
            "--format=yaml".into(),
        ])
        .await
    }

    async fn launch(&self, request: &LaunchRequest) -> BuildboxResult<()> {
        let instance = &request.instance;
        let mut args = vec![
            "launch".to_string(),
            format!("{}:{}", request.image_remote, request.image),
            instance.qualified_name(),
            "--project".into(),
            instance.project.clone(),
        ];
        if request.ephemeral {
            args.push("--ephemeral".into());
        }
        self.run(args).await.map(|_| ())
    }

    async fn start(&self, instance: &InstanceRef) -> BuildboxResult<()> {
        self.run(vec![
            "start".into(),
            instance.qualified_name(),
            "--project".into(),
            instance.project.clone(),
        ])
        .await
        .map(|_| ())
    }

    async fn stop(&self, instance: &InstanceRef) -> BuildboxResult<()> {
        self.run(vec![
            "stop".into(),
            instance.qualified_name(),
            "--project".into(),
            instance.project.clone(),
        ])
        .await
        .map(|_| ())
    }

    async fn delete(&self, instance: &InstanceRef, force: bool) -> BuildboxResult<()> {
        let mut args = vec![
            "delete".to_string(),
            instance.qualified_name(),
            "--project".into(),
            instance.project.clone(),
        ];
        if force {
            args.push("--force".into());
        }
        self.run(args).await.map(|_| ())
    }

    async fn exec(
        &self,
        instance: &InstanceRef,
        command: &ExecCommand,
    ) -> BuildboxResult<ExecOutput> {
        let lxc_exec = self.exec_command(instance, command);
        run_to_completion(self.to_process(&lxc_exec), &lxc_exec).await
    }

    async fn exec_streaming(
        &self,
        instance: &InstanceRef,
        command: &ExecCommand,
    ) -> BuildboxResult<ExecProcess> {
        let lxc_exec = self.exec_command(instance, command);
        ExecProcess::spawn(self.to_process(&lxc_exec), &lxc_exec)
    }

    async fn file_push(
        &self,
        instance: &InstanceRef,
        source: &Path,
        destination: &Path,
        options: &PushOptions,
    ) -> BuildboxResult<()> {
        let mut args = vec![
            "file".to_string(),
            "push".into(),
            source.display().to_string(),
            instance_path(instance, destination),
            "--project".into(),
            instance.project.clone(),
        ];
        if options.recursive {
            args.push("--recursive".into());
        }
        if options.create_dirs {
            args.push("--create-dirs".into());
        }
        if let Some(mode) = options.mode {
            args.push(format!("--mode={:04o}", mode & 0o7777));
        }
        if let Some(uid) = options.uid {
            args.push(format!("--uid={}", uid));
        }
        if let Some(gid) = options.gid {
            args.push(format!("--gid={}", gid));
        }
        self.run(args).await.map(|_| ())
    }

    async fn file_pull(
        &self,
        instance: &InstanceRef,
        source: &Path,
        destination: &Path,
        recursive: bool,
    ) -> BuildboxResult<()> {
        let mut args = vec![
            "file".to_string(),
            "pull".into(),
            instance_path(instance, source),
            destination.display().to_string(),
            "--project".into(),
            instance.project.clone(),
        ];
        if recursive {
            args.push("--recursive".into());
        }
        self.run(args).await.map(|_| ())
    }

    async fn config_device_add_disk(
        &self,
        instance: &InstanceRef,
        device: &str,
        source: &Path,
        destination: &Path,
    ) -> BuildboxResult<()> {
        self.run(vec![
            "config".into(),
            "device".into(),
            "add".into(),
            instance.qualified_name(),
            device.into(),
            "disk".into(),
            format!("source={}", source.display()),
            format!("path={}", destination.display()),
            "--project".into(),
            instance.project.clone(),
        ])
        .await
        .map(|_| ())
    }
}
