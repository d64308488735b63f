//! Bounded git subprocess execution
//!
//! Every mutation the engine performs goes through [`GitCommand`] so that each
//! call carries its own timeout. Expiry kills the child and is reported as
//! [`Error::OperationTimeout`], the same as any other failure of the call.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::{Error, Result};

/// Builder for a single `git` invocation
#[derive(Debug, Clone)]
pub struct GitCommand {
    dir: Option<PathBuf>,
    config: Vec<(String, String)>,
    args: Vec<OsString>,
    timeout: Duration,
}

/// Captured result of a finished invocation
#[derive(Debug)]
pub struct GitOutput {
    /// Exit status
    pub status: ExitStatus,
    /// Wall-clock duration
    pub duration: Duration,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl GitOutput {
    /// Whether git exited zero
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

impl GitCommand {
    /// Start a command that runs inside `dir` (`git -C <dir> ...`)
    pub fn new(dir: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            dir: Some(dir.as_ref().to_path_buf()),
            config: Vec::new(),
            args: Vec::new(),
            timeout,
        }
    }

    /// Start a command with no working directory override
    pub fn bare(timeout: Duration) -> Self {
        Self {
            dir: None,
            config: Vec::new(),
            args: Vec::new(),
            timeout,
        }
    }

    /// Add a `-c key=value` setting
    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.push((key.into(), value.into()));
        self
    }

    /// Add one argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Replace the time budget
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human-readable command line, used in logs and errors
    pub fn display(&self) -> String {
        let mut parts = vec!["git".to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    /// Run to completion and capture output; a non-zero exit is not an error
    pub fn output(&self) -> Result<GitOutput> {
        let mut cmd = Command::new("git");
        if let Some(ref dir) = self.dir {
            cmd.arg("-C").arg(dir);
        }
        for (key, value) in &self.config {
            cmd.arg("-c").arg(format!("{}={}", key, value));
        }
        cmd.args(&self.args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        run_bounded(cmd, &self.display(), self.timeout)
    }

    /// Run and fail with [`Error::CommandFailed`] on a non-zero exit
    pub fn run(&self) -> Result<GitOutput> {
        let output = self.output()?;
        if !output.success() {
            return Err(Error::CommandFailed {
                command: self.display(),
                status: output.status.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Run and return trimmed stdout
    pub fn stdout(&self) -> Result<String> {
        Ok(self.run()?.stdout.trim().to_string())
    }

    /// Run and report whether git exited zero
    pub fn succeeds(&self) -> Result<bool> {
        Ok(self.output()?.success())
    }
}

/// Spawn `cmd` and wait at most `timeout` for it
///
/// Stdout and stderr must already be piped. Both are drained on helper threads
/// so a chatty child cannot block on a full pipe while we wait. The budget also
/// covers draining: a grandchild still holding the pipes after the child exits
/// counts as a timeout.
pub(crate) fn run_bounded(mut cmd: Command, command_line: &str, timeout: Duration) -> Result<GitOutput> {
    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::Other(format!("Executable not found while running `{}`", command_line))
        } else {
            Error::Io(e)
        }
    })?;

    let (tx, rx) = mpsc::channel();
    let mut pending = 0;
    if let Some(out) = child.stdout.take() {
        drain(out, Stream::Stdout, tx.clone());
        pending += 1;
    }
    if let Some(err) = child.stderr.take() {
        drain(err, Stream::Stderr, tx.clone());
        pending += 1;
    }
    drop(tx);

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(timed_out(command_line, timeout));
        }
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Io(e));
        }
    };

    let mut stdout = String::new();
    let mut stderr = String::new();
    while pending > 0 {
        let remaining = timeout.saturating_sub(started.elapsed());
        match rx.recv_timeout(remaining) {
            Ok((Stream::Stdout, text)) => stdout = text,
            Ok((Stream::Stderr, text)) => stderr = text,
            Err(RecvTimeoutError::Timeout) => return Err(timed_out(command_line, timeout)),
            Err(RecvTimeoutError::Disconnected) => break,
        }
        pending -= 1;
    }

    let duration = started.elapsed();
    let output = GitOutput {
        status,
        duration,
        stdout,
        stderr,
    };
    tracing::debug!(command = %command_line, status = %output.status, ?duration, "command finished");
    Ok(output)
}

fn timed_out(command_line: &str, timeout: Duration) -> Error {
    tracing::warn!(command = %command_line, ?timeout, "command timed out");
    Error::OperationTimeout {
        command: command_line.to_string(),
        timeout,
    }
}

enum Stream {
    Stdout,
    Stderr,
}

fn drain<R: Read + Send + 'static>(mut reader: R, stream: Stream, tx: Sender<(Stream, String)>) {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send((stream, String::from_utf8_lossy(&buf).into_owned()));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_display_includes_args() {
        let cmd = GitCommand::bare(Duration::from_secs(1)).args(["fetch", "--tags", "origin"]);
        assert_eq!(cmd.display(), "git fetch --tags origin");
    }

    #[test]
    fn test_run_captures_stdout() {
        let out = GitCommand::bare(Duration::from_secs(30))
            .arg("--version")
            .stdout()
            .unwrap();
        assert!(out.starts_with("git version"));
    }

    #[test]
    fn test_non_zero_exit_is_command_failed() {
        let dir = TempDir::new().unwrap();
        let result = GitCommand::new(dir.path(), Duration::from_secs(30))
            .args(["rev-parse", "HEAD"])
            .run();
        assert!(matches!(result, Err(Error::CommandFailed { .. })));

        let ok = GitCommand::new(dir.path(), Duration::from_secs(30))
            .args(["rev-parse", "HEAD"])
            .succeeds()
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_timeout_kills_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5").stdout(Stdio::piped()).stderr(Stdio::piped());

        let started = Instant::now();
        let result = run_bounded(cmd, "sleep 5", Duration::from_millis(200));
        assert!(matches!(result, Err(Error::OperationTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_timeout_covers_inherited_pipes() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "(sleep 4 >&2 &); exit 0"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let started = Instant::now();
        let result = run_bounded(cmd, "sh background", Duration::from_millis(300));
        assert!(matches!(result, Err(Error::OperationTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_zero_budget_times_out() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5").stdout(Stdio::piped()).stderr(Stdio::piped());

        let started = Instant::now();
        let result = run_bounded(cmd, "sleep 5", Duration::ZERO);
        assert!(matches!(result, Err(Error::OperationTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
