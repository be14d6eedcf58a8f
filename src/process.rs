//! External command execution.
//!
//! Every host tool the build touches (debootstrap, apt-get inside the chroot,
//! mksquashfs, grub-mkstandalone, xorriso, mount) is described by a [`Cmd`]
//! and executed through a [`Runner`]. The real build uses [`HostRunner`];
//! tests substitute a recording stub so the whole pipeline can run without
//! root or network.
//!
//! # Example
//!
//! ```rust,ignore
//! use aetheros_builder::process::{Cmd, HostRunner};
//! use std::path::Path;
//!
//! Cmd::new("mksquashfs")
//!     .arg_path(Path::new("chroot"))
//!     .arg_path(Path::new("image/casper/filesystem.squashfs"))
//!     .args(["-comp", "xz"])
//!     .error_msg("mksquashfs failed. Install squashfs-tools.")
//!     .run_interactive(&HostRunner)?;
//! ```

use anyhow::{bail, Context, Result};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::Command;

/// How a command's stdio is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Capture stdout/stderr for inspection.
    Captured,
    /// Inherit the terminal so the user sees progress (long-running tools).
    Inherited,
}

/// Outcome of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    /// A result with the given exit code and no output.
    #[cfg(test)]
    pub(crate) fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Default::default()
        }
    }

    /// Replace captured stdout.
    #[cfg(test)]
    pub(crate) fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Executes [`Cmd`] descriptions.
pub trait Runner {
    fn execute(&self, cmd: &Cmd, mode: OutputMode) -> Result<CommandResult>;
}

/// Runs commands on the host via `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostRunner;

impl Runner for HostRunner {
    fn execute(&self, cmd: &Cmd, mode: OutputMode) -> Result<CommandResult> {
        let mut command = Command::new(cmd.program());
        command.args(cmd.get_args());
        for (key, value) in cmd.get_envs() {
            command.env(key, value);
        }

        tracing::debug!("exec: {}", cmd.display());

        match mode {
            OutputMode::Captured => {
                let output = command
                    .output()
                    .with_context(|| format!("spawning '{}'", cmd.program()))?;
                Ok(CommandResult {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            OutputMode::Inherited => {
                let status = command
                    .status()
                    .with_context(|| format!("spawning '{}'", cmd.program()))?;
                Ok(CommandResult {
                    code: status.code(),
                    ..Default::default()
                })
            }
        }
    }
}

/// Builder for an external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            error_msg: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Message reported when the command exits non-zero.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn get_envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// Arguments as lossy UTF-8 strings.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Shell-like rendering of the command line, for logs and errors.
    pub fn display(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run with captured output, failing on non-zero exit.
    pub fn run(&self, runner: &dyn Runner) -> Result<CommandResult> {
        let result = runner.execute(self, OutputMode::Captured)?;
        self.check(result)
    }

    /// Run with inherited stdio, failing on non-zero exit.
    pub fn run_interactive(&self, runner: &dyn Runner) -> Result<CommandResult> {
        let result = runner.execute(self, OutputMode::Inherited)?;
        self.check(result)
    }

    /// Run with captured output and return the result whatever the exit code.
    ///
    /// Only a failure to spawn is an error.
    pub fn run_status(&self, runner: &dyn Runner) -> Result<CommandResult> {
        runner.execute(self, OutputMode::Captured)
    }

    fn check(&self, result: CommandResult) -> Result<CommandResult> {
        if result.success() {
            return Ok(result);
        }

        let msg = self
            .error_msg
            .clone()
            .unwrap_or_else(|| format!("{} failed", self.program));
        let exit = match result.code {
            Some(code) => format!("exit code {}", code),
            None => "killed by signal".to_string(),
        };
        let stderr = result.stderr.trim();
        if stderr.is_empty() {
            bail!("{}\n  command: {}\n  {}", msg, self.display(), exit);
        }
        bail!(
            "{}\n  command: {}\n  {}\n  stderr: {}",
            msg,
            self.display(),
            exit,
            stderr
        )
    }
}

/// Locate a command in PATH.
pub fn which(cmd: &str) -> Option<String> {
    which::which(cmd).ok().map(|p| p.display().to_string())
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingRunner;
    use super::*;

    #[test]
    fn test_which() {
        // 'ls' should exist on any Unix system
        assert!(which("ls").is_some());
        assert!(which("definitely_not_a_real_command_12345").is_none());
    }

    #[test]
    fn test_display_renders_command_line() {
        let cmd = Cmd::new("mount")
            .arg("--bind")
            .arg_path(Path::new("/dev"))
            .arg_path(Path::new("/work/chroot/dev"));
        assert_eq!(cmd.display(), "mount --bind /dev /work/chroot/dev");
    }

    #[test]
    fn test_host_runner_captures_output() {
        let result = Cmd::new("echo").arg("hello").run(&HostRunner).unwrap();
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[test]
    fn test_host_runner_passes_env() {
        let result = Cmd::new("sh")
            .args(["-c", "printf %s \"$AETHER_TEST\""])
            .env("AETHER_TEST", "value")
            .run(&HostRunner)
            .unwrap();
        assert_eq!(result.stdout, "value");
    }

    #[test]
    fn test_nonzero_exit_is_error_with_message() {
        let err = Cmd::new("false")
            .error_msg("false always fails")
            .run(&HostRunner)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("false always fails"));
        assert!(msg.contains("exit code 1"));
    }

    #[test]
    fn test_run_status_does_not_fail_on_exit_code() {
        let result = Cmd::new("false").run_status(&HostRunner).unwrap();
        assert!(!result.success());
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let result = Cmd::new("definitely_not_a_real_command_12345").run_status(&HostRunner);
        assert!(result.is_err());
    }

    #[test]
    fn test_recording_runner_records_calls() {
        let runner = RecordingRunner::new();
        Cmd::new("debootstrap").arg("noble").run(&runner).unwrap();
        Cmd::new("xorriso").run(&runner).unwrap();
        assert_eq!(runner.command_lines(), vec!["debootstrap noble", "xorriso"]);
        assert_eq!(runner.count_program("xorriso"), 1);
    }

    #[test]
    fn test_recording_runner_responder_failure_propagates() {
        let runner = RecordingRunner::with_responder(|_| Ok(CommandResult::exited(100)));
        let err = Cmd::new("apt-get")
            .error_msg("apt-get failed")
            .run(&runner)
            .unwrap_err();
        assert!(err.to_string().contains("apt-get failed"));
    }
}
