//! Command and file descriptions passed to executors.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use buildbox_shared::errors::{BuildboxError, BuildboxResult};

/// Where a stream of the remote process goes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Redirect {
    /// Collect into [`ExecOutput`] (or a pipe for streaming executions).
    #[default]
    Capture,
    /// Discard.
    Null,
    /// Share the caller's stream.
    Inherit,
}

impl Redirect {
    pub(crate) fn to_stdio(self) -> Stdio {
        match self {
            Redirect::Capture => Stdio::piped(),
            Redirect::Null => Stdio::null(),
            Redirect::Inherit => Stdio::inherit(),
        }
    }
}

/// Command builder for programs run against a target.
///
/// # Examples
///
/// ```rust
/// # use buildbox::executor::{ExecCommand, Redirect};
/// let cmd = ExecCommand::new("apt-get")
///     .args(["install", "--yes", "snapd"])
///     .env("DEBIAN_FRONTEND", "noninteractive")
///     .working_dir("/root")
///     .stdout(Redirect::Null)
///     .check(true);
/// assert_eq!(cmd.to_string(), "apt-get install --yes snapd");
/// ```
#[derive(Clone, Debug)]
pub struct ExecCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
    check: bool,
    stdout: Redirect,
    stderr: Redirect,
}

impl ExecCommand {
    /// Create a new command. Not checked, both streams captured.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            env: vec![],
            working_dir: None,
            check: false,
            stdout: Redirect::Capture,
            stderr: Redirect::Capture,
        }
    }

    /// Build from a full argument vector (`argv[0]` is the program).
    pub fn from_argv<I, S>(argv: I) -> BuildboxResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv
            .next()
            .ok_or_else(|| BuildboxError::Internal("empty command".into()))?;
        Ok(Self::new(program).args(argv))
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.env.push((key.into(), val.into()));
        self
    }

    /// Set working directory inside the target.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Treat a non-zero exit as a hard failure.
    pub fn check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    pub fn stdout(mut self, redirect: Redirect) -> Self {
        self.stdout = redirect;
        self
    }

    pub fn stderr(mut self, redirect: Redirect) -> Self {
        self.stderr = redirect;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn get_working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn is_checked(&self) -> bool {
        self.check
    }

    pub fn stdout_redirect(&self) -> Redirect {
        self.stdout
    }

    pub fn stderr_redirect(&self) -> Redirect {
        self.stderr
    }
}

impl fmt::Display for ExecCommand {
    /// Shell-quoted command line, for logs and error messages.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let argv = self.argv();
        match shlex::try_join(argv.iter().map(String::as_str)) {
            Ok(quoted) => f.write_str(&quoted),
            Err(_) => f.write_str(&argv.join(" ")),
        }
    }
}

/// Result of a command that ran to completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code (0 = success). If terminated by signal, the negative signal number.
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Captured stdout, lossily decoded.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Apply the command's `check` flag to this output.
    ///
    /// Returns [`BuildboxError::CommandFailed`] when the command was checked
    /// and exited non-zero; otherwise hands the output back unchanged.
    pub fn checked(self, command: &ExecCommand) -> BuildboxResult<Self> {
        if command.is_checked() && !self.success() {
            return Err(BuildboxError::CommandFailed {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr_str().trim().to_string(),
            });
        }
        Ok(self)
    }
}

/// A file to create inside a target with explicit permissions and ownership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSpec {
    pub destination: PathBuf,
    pub content: Vec<u8>,
    /// Permission bits, e.g. `0o644`.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl FileSpec {
    /// Root-owned file with mode 0644.
    pub fn new(destination: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            destination: destination.into(),
            content: content.into(),
            mode: 0o644,
            uid: 0,
            gid: 0,
        }
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Mode as the four-digit octal string lxc and chmod expect.
    pub fn mode_octal(&self) -> String {
        format!("{:04o}", self.mode & 0o7777)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let cmd = ExecCommand::new("sh").args(["-c", "echo hello world"]);
        assert_eq!(cmd.to_string(), "sh -c 'echo hello world'");
    }

    #[test]
    fn from_argv_rejects_empty_vector() {
        assert!(ExecCommand::from_argv(Vec::<String>::new()).is_err());

        let cmd = ExecCommand::from_argv(["systemctl", "is-system-running"]).unwrap();
        assert_eq!(cmd.program(), "systemctl");
        assert_eq!(cmd.get_args(), ["is-system-running"]);
        assert!(!cmd.is_checked());
    }

    #[test]
    fn checked_only_fails_checked_commands() {
        let failed = ExecOutput {
            exit_code: 2,
            stdout: vec![],
            stderr: b"boom\n".to_vec(),
        };

        let unchecked = ExecCommand::new("false");
        assert!(failed.clone().checked(&unchecked).is_ok());

        let checked = ExecCommand::new("false").check(true);
        match failed.checked(&checked) {
            Err(BuildboxError::CommandFailed {
                command,
                exit_code,
                stderr,
            }) => {
                assert_eq!(command, "false");
                assert_eq!(exit_code, 2);
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_mode_octal_format_with_leading_zeros() {
        let test_cases = vec![
            (0o644, "0644"),
            (0o755, "0755"),
            (0o600, "0600"),
            (0o4755, "4755"),
            (0o100644, "0644"),
        ];

        for (mode, expected) in test_cases {
            let file = FileSpec::new("/etc/hostname", "x").mode(mode);
            assert_eq!(file.mode_octal(), expected, "mode {:o}", mode);
        }
    }
}
