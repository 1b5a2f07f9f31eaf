//! Subprocess runner shared by every external tool the updater drives.
//!
//! Output handling mirrors a shell `cmd 2>&1`: stdout and stderr are
//! returned together.  A non-zero exit status and a failure to spawn are
//! both reported as [`ToolFailure`], which is the only failure signal the
//! update loop consumes from external tools.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

/// Prefix used to run a command at the lowest CPU scheduling priority.
pub const NICE_LOW_PRIORITY: [&str; 3] = ["nice", "-n", "19"];

/// An external command exited non-zero or could not be started.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{}` failed ({}): {}", .cmd.join(" "), ExitCode(.exit_code), .output.trim())]
pub struct ToolFailure {
    pub cmd: Vec<String>,
    pub output: String,
    /// `None` when the process never ran or was killed by a signal.
    pub exit_code: Option<i32>,
}

impl ToolFailure {
    pub fn command_line(&self) -> String {
        self.cmd.join(" ")
    }
}

struct ExitCode<'a>(&'a Option<i32>);

impl fmt::Display for ExitCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("no exit code"),
        }
    }
}

/// Builder for one external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    low_priority: bool,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            low_priority: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn low_priority(mut self, enabled: bool) -> Self {
        self.low_priority = enabled;
        self
    }

    /// Full argv as executed, including the `nice` prefix when enabled.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 4);
        if self.low_priority {
            argv.extend(NICE_LOW_PRIORITY.iter().map(|s| s.to_string()));
        }
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Run to completion and return combined stdout + stderr.
    pub async fn run(&self) -> Result<String, ToolFailure> {
        let argv = self.argv();
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        debug!(cmd = %argv.join(" "), cwd = ?self.cwd, "running tool");

        let output = match command.output().await {
            Ok(output) => output,
            Err(err) => {
                return Err(ToolFailure {
                    cmd: argv,
                    output: err.to_string(),
                    exit_code: None,
                });
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(ToolFailure {
                cmd: argv,
                output: combined,
                exit_code: output.status.code(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_includes_nice_prefix_only_when_low_priority() {
        let cmd = ToolCommand::new("git").args(["reset", "--hard", "@{u}"]);
        assert_eq!(cmd.argv(), vec!["git", "reset", "--hard", "@{u}"]);

        let cmd = cmd.low_priority(true);
        assert_eq!(
            cmd.argv(),
            vec!["nice", "-n", "19", "git", "reset", "--hard", "@{u}"]
        );
    }

    #[tokio::test]
    async fn run_returns_combined_output() {
        let out = ToolCommand::new("sh")
            .args(["-c", "echo out; echo err 1>&2"])
            .run()
            .await
            .unwrap();
        assert!(out.contains("out"));
        assert!(out.contains("err"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_tool_failure() {
        let err = ToolCommand::new("sh")
            .args(["-c", "echo broken; exit 3"])
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.exit_code, Some(3));
        assert!(err.output.contains("broken"));
        assert_eq!(err.command_line(), "sh -c echo broken; exit 3");
        assert!(err.to_string().contains("exit code 3"));
    }

    #[tokio::test]
    async fn missing_program_is_tool_failure_without_exit_code() {
        let err = ToolCommand::new("definitely-not-a-real-binary-xyz")
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.exit_code, None);
        assert!(err.to_string().contains("no exit code"));
    }

    #[tokio::test]
    async fn runs_in_requested_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = ToolCommand::new("pwd")
            .current_dir(dir.path())
            .run()
            .await
            .unwrap();
        let reported = std::fs::canonicalize(out.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }
}
