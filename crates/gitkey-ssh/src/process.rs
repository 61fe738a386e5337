// ABOUTME: External process execution with bounded timeouts.
// ABOUTME: ProcessRunner trait, tokio-backed SystemRunner, and tool availability probing.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// A single external command: program, arguments, optional working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Value following `flag`, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

/// Shell-like rendering with the `-N` passphrase value masked.
impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        let mut redact_next = false;
        for arg in &self.args {
            if redact_next {
                write!(f, " ***")?;
                redact_next = false;
                continue;
            }
            if arg.is_empty() {
                write!(f, " \"\"")?;
            } else if arg.contains(' ') || arg.contains('=') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
            redact_next = arg == "-N";
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stderr followed by stdout, trimmed, joined by a newline when both are present.
    pub fn combined(&self) -> String {
        let err = self.stderr.trim();
        let out = self.stdout.trim();
        match (err.is_empty(), out.is_empty()) {
            (false, false) => format!("{}\n{}", err, out),
            (false, true) => err.to_string(),
            (true, false) => out.to_string(),
            (true, true) => String::new(),
        }
    }
}

/// Failure to run a process to completion.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("{program}: command not found")]
    NotFound { program: String },

    #[error("{program} timed out after {}s", timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    fn from_io(program: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            RunError::NotFound {
                program: program.to_string(),
            }
        } else {
            RunError::Io {
                program: program.to_string(),
                source,
            }
        }
    }
}

/// Executes external commands on behalf of the key lifecycle components.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, capturing output. The child is killed if `timeout` elapses.
    async fn run(&self, invocation: &Invocation, timeout: Duration)
        -> Result<ProcessOutput, RunError>;

    /// Start a process and return without waiting for it.
    fn spawn_detached(&self, invocation: &Invocation) -> Result<(), RunError>;
}

/// Runs real processes through `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<ProcessOutput, RunError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| RunError::from_io(&invocation.program, e))?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| RunError::from_io(&invocation.program, e))?,
            Err(_) => {
                tracing::warn!(command = %invocation, timeout_secs = timeout.as_secs(), "Command timed out");
                return Err(RunError::TimedOut {
                    program: invocation.program.clone(),
                    timeout,
                });
            }
        };

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn_detached(&self, invocation: &Invocation) -> Result<(), RunError> {
        let mut cmd = std::process::Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        let child = cmd
            .spawn()
            .map_err(|e| RunError::from_io(&invocation.program, e))?;
        tracing::info!(command = %invocation, pid = child.id(), "Spawned detached process");
        Ok(())
    }
}

/// Probes whether external tools are installed, via `which` or `where`.
#[derive(Clone)]
pub struct ToolLocator {
    runner: Arc<dyn ProcessRunner>,
    probe: String,
    timeout: Duration,
}

impl ToolLocator {
    pub fn new(runner: Arc<dyn ProcessRunner>, probe: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            probe: probe.into(),
            timeout,
        }
    }

    /// True when the probe exits 0. Timeouts and spawn failures count as unavailable.
    pub async fn is_available(&self, tool: &str) -> bool {
        tracing::debug!(tool, "Checking command availability");
        let invocation = Invocation::new(&self.probe).arg(tool);
        match self.runner.run(&invocation, self.timeout).await {
            Ok(output) => {
                let available = output.success();
                tracing::debug!(tool, available, "Command availability");
                available
            }
            Err(RunError::TimedOut { .. }) => {
                tracing::warn!(tool, "Timeout checking command availability");
                false
            }
            Err(e) => {
                tracing::error!(tool, error = %e, "Error checking command availability");
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeRunner;
    use super::*;

    #[test]
    fn test_display_redacts_passphrase() {
        let inv = Invocation::new("ssh-keygen")
            .args(["-t", "ed25519", "-C", "a@b.com", "-f", "/tmp/k", "-N", "hunter2"]);
        let shown = inv.to_string();
        assert!(!shown.contains("hunter2"));
        assert!(shown.ends_with("-N ***"));
        assert!(shown.starts_with("ssh-keygen -t ed25519"));
    }

    #[test]
    fn test_display_quotes_empty_and_spaced_args() {
        let inv = Invocation::new("ssh").args(["-o", "BatchMode=yes", "", "two words"]);
        assert_eq!(inv.to_string(), "ssh -o \"BatchMode=yes\" \"\" \"two words\"");
    }

    #[test]
    fn test_flag_value() {
        let inv = Invocation::new("ssh-keygen").args(["-t", "rsa", "-f", "/k"]);
        assert_eq!(inv.flag_value("-t"), Some("rsa"));
        assert_eq!(inv.flag_value("-f"), Some("/k"));
        assert_eq!(inv.flag_value("-N"), None);
    }

    #[test]
    fn test_combined_output_orders_stderr_first() {
        let output = ProcessOutput {
            exit_code: Some(1),
            stdout: "out\n".to_string(),
            stderr: "  err ".to_string(),
        };
        assert_eq!(output.combined(), "err\nout");
        assert!(!output.success());
        assert_eq!(ProcessOutput::default().combined(), "");
    }

    #[tokio::test]
    async fn test_system_runner_missing_program() {
        let runner = SystemRunner;
        let inv = Invocation::new("definitely-not-a-real-binary-8d1f");
        let err = runner
            .run(&inv, Duration::from_secs(5))
            .await
            .expect_err("should fail");
        assert!(matches!(err, RunError::NotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let runner = SystemRunner;
        let inv = Invocation::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = runner
            .run(&inv, Duration::from_secs(5))
            .await
            .expect("should run");
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_times_out() {
        let runner = SystemRunner;
        let inv = Invocation::new("sleep").arg("5");
        let err = runner
            .run(&inv, Duration::from_millis(100))
            .await
            .expect_err("should time out");
        assert!(matches!(err, RunError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_locator_reports_availability() {
        let mut runner = FakeRunner::default();
        runner.missing.insert("ssh-keygen".to_string());
        let locator = ToolLocator::new(Arc::new(runner), "which", Duration::from_secs(10));

        assert!(!locator.is_available("ssh-keygen").await);
        assert!(locator.is_available("ssh").await);
    }

    #[tokio::test]
    async fn test_locator_timeout_is_unavailable() {
        let mut runner = FakeRunner::default();
        runner.timeouts.insert("which".to_string());
        let locator = ToolLocator::new(Arc::new(runner), "which", Duration::from_secs(10));

        assert!(!locator.is_available("ssh-keygen").await);
    }
}
