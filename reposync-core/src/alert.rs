//! Alert delivery for fatal conditions
//!
//! The protocols return values; turning them into alerts happens here, in one
//! place, so the side effect can be tested with a fake [`Alerter`].

use std::fmt;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::git::command::run_bounded;
use crate::Result;

const ALERT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// How urgently a human needs to look
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational
    Info,
    /// Something degraded but the operation finished
    Warning,
    /// The operation failed
    Error,
    /// The operation failed and needs manual intervention
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Sink for alerts
///
/// Implementations must swallow their own failures: alerting runs on the way
/// out of a failed operation and must not replace its outcome.
pub trait Alerter {
    /// Deliver one alert
    fn alert(&self, severity: Severity, message: &str);
}

/// Alerter that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlerter;

impl Alerter for TracingAlerter {
    fn alert(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!(%severity, "{}", message),
            Severity::Warning => tracing::warn!(%severity, "{}", message),
            Severity::Error | Severity::Critical => tracing::error!(%severity, "{}", message),
        }
    }
}

/// Alerter that runs a shell command with the severity and message appended
///
/// `command` is run as `sh -c '<command> "$@"' reposync-alert <severity> <message>`,
/// so it may carry its own arguments.
#[derive(Debug, Clone)]
pub struct CommandAlerter {
    command: String,
    timeout: Duration,
}

impl CommandAlerter {
    /// Create an alerter for `command`
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: ALERT_COMMAND_TIMEOUT,
        }
    }
}

impl Alerter for CommandAlerter {
    fn alert(&self, severity: Severity, message: &str) {
        // Always logged, whatever the command does
        TracingAlerter.alert(severity, message);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("{} \"$@\"", self.command))
            .arg("reposync-alert")
            .arg(severity.to_string())
            .arg(message)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match run_bounded(cmd, &self.command, self.timeout) {
            Ok(out) if out.success() => {}
            Ok(out) => tracing::warn!(
                command = %self.command,
                status = %out.status,
                stderr = %out.stderr.trim(),
                "alert command failed"
            ),
            Err(e) => tracing::warn!(command = %self.command, error = %e, "alert command failed"),
        }
    }
}

/// Alert on a failed entry point and report whether it succeeded
///
/// Returns `true` for `Ok`. For `Err` the error is sent to `alerter` at its
/// severity and `false` is returned; callers exit non-zero on `false`.
pub fn report<T>(result: &Result<T>, alerter: &dyn Alerter) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            alerter.alert(e.severity(), &e.to_string());
            false
        }
    }
}
