//! Local process plumbing shared by the host executor and the lxc client.
//!
//! Both run a program on this machine (either the command itself or
//! `lxc exec ...` wrapping it), so spawning, stream wiring and exit-code
//! decoding live here once.

use std::process::{ExitStatus, Stdio};

use buildbox_shared::errors::{BuildboxError, BuildboxResult};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use super::command::{ExecCommand, ExecOutput};

/// Handle to a live process started by [`crate::Executor::execute_streaming`].
///
/// Similar to `tokio::process::Child`: the streams can be taken once each,
/// and the caller decides when to wait or kill.
pub struct ExecProcess {
    child: Child,
    command: String,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ExecProcess {
    /// Spawn `cmd` with streams wired per `command`'s redirects.
    ///
    /// stdin is always piped so callers can feed long-running processes.
    /// Public so out-of-tree [`crate::LxcClient`] implementations can hand
    /// out the same handle type.
    pub fn spawn(mut cmd: Command, command: &ExecCommand) -> BuildboxResult<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(command.stdout_redirect().to_stdio())
            .stderr(command.stderr_redirect().to_stdio())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            BuildboxError::Execution(format!("Failed to spawn '{}': {}", command, e))
        })?;

        Ok(Self {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
            command: command.to_string(),
        })
    }

    /// OS pid of the local process, if it has not been reaped yet.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Command line this process was started from.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Take the stdin pipe (can only be called once).
    pub fn stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Take the stdout pipe (can only be called once).
    pub fn stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Take the stderr pipe (can only be called once).
    pub fn stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Wait for the process to exit and return its exit code.
    pub async fn wait(&mut self) -> BuildboxResult<i32> {
        // Close our end of stdin so readers waiting for EOF can finish.
        drop(self.stdin.take());
        let status = self.child.wait().await.map_err(|e| {
            BuildboxError::Execution(format!("Failed to wait for '{}': {}", self.command, e))
        })?;
        Ok(exit_code(status))
    }

    /// Kill the process (SIGKILL) and reap it.
    pub async fn kill(&mut self) -> BuildboxResult<()> {
        self.child.kill().await.map_err(|e| {
            BuildboxError::Execution(format!("Failed to kill '{}': {}", self.command, e))
        })
    }
}

/// Run `cmd` to completion and collect its output.
///
/// `command` supplies the redirects and the display form for errors; its
/// `check` flag is not applied here.
pub(crate) async fn run_to_completion(
    mut cmd: Command,
    command: &ExecCommand,
) -> BuildboxResult<ExecOutput> {
    // `Command::output` would force both streams to pipes.
    cmd.stdin(Stdio::null())
        .stdout(command.stdout_redirect().to_stdio())
        .stderr(command.stderr_redirect().to_stdio())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| BuildboxError::Execution(format!("Failed to run '{}': {}", command, e)))?;
    let output = child.wait_with_output().await.map_err(|e| {
        BuildboxError::Execution(format!("Failed to wait for '{}': {}", command, e))
    })?;

    Ok(ExecOutput {
        exit_code: exit_code(output.status),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Exit code, or the negative signal number for signal-terminated processes.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Redirect;

    #[tokio::test]
    async fn run_to_completion_captures_streams() {
        let command = ExecCommand::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);

        let output = run_to_completion(cmd, &command).await.unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout_str(), "out\n");
        assert_eq!(output.stderr_str(), "err\n");
    }

    #[tokio::test]
    async fn null_redirect_discards_output() {
        let command = ExecCommand::new("echo").arg("hidden").stdout(Redirect::Null);
        let mut cmd = Command::new("echo");
        cmd.arg("hidden");

        let output = run_to_completion(cmd, &command).await.unwrap();
        assert!(output.success());
        assert!(output.stdout.is_empty());
    }

    #[tokio::test]
    async fn redirects_apply_per_stream() {
        let command = ExecCommand::new("sh")
            .args(["-c", "echo out; echo err >&2"])
            .stderr(Redirect::Null);
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2"]);

        let output = run_to_completion(cmd, &command).await.unwrap();
        assert_eq!(output.stdout_str(), "out\n");
        assert!(output.stderr.is_empty());
    }

    #[tokio::test]
    async fn missing_program_is_an_execution_error() {
        let command = ExecCommand::new("buildbox-definitely-missing-binary");
        let cmd = Command::new("buildbox-definitely-missing-binary");

        let err = run_to_completion(cmd, &command).await.unwrap_err();
        assert!(matches!(err, BuildboxError::Execution(_)));
    }
}
