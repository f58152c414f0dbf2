use crate::error::{ErrorKind, ExecError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Default interval between two `/proc` probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A program to launch: path, ordered arguments, optional working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandDescriptor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
            env: Vec::new(),
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

    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The command line as it would be typed into a POSIX shell.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Options for a single command run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RunOptions {
    /// Zero disables the timeout.
    #[serde(default, rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl RunOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }
}

/// Options for waiting on a foreign PID.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WaitOptions {
    #[serde(
        default = "default_poll_interval",
        rename = "poll_interval_ms",
        with = "duration_ms"
    )]
    pub poll_interval: Duration,

    /// Zero waits forever.
    #[serde(default, rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: Duration::ZERO,
        }
    }
}

impl WaitOptions {
    pub fn poll_interval(&self) -> Duration {
        if self.poll_interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            self.poll_interval
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }
}

/// Short random token correlating the log events of one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecId(String);

impl ExecId {
    pub const LEN: usize = 5;

    pub fn new() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(Self::LEN);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Summary of one finished run
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommandReport {
    pub exec_id: ExecId,
    pub command: String,
    pub dir: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    pub output: String,
}

impl CommandReport {
    pub fn new(
        exec_id: ExecId,
        descriptor: &CommandDescriptor,
        started_at: DateTime<Utc>,
        duration: Duration,
        result: &Result<String, ExecError>,
    ) -> Self {
        let (output, error_kind, error) = match result {
            Ok(output) => (output.clone(), None, None),
            Err(e) => (e.output().to_string(), Some(e.kind()), Some(e.to_string())),
        };

        Self {
            exec_id,
            command: descriptor.command_line(),
            dir: descriptor.dir.clone(),
            started_at,
            duration_ms: duration.as_millis() as u64,
            success: result.is_ok(),
            error_kind,
            error,
            output,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_joins_program_and_args() {
        let cmd = CommandDescriptor::new("echo").arg("hello");
        assert_eq!(cmd.command_line(), "echo hello");
        assert_eq!(cmd.to_string(), "echo hello");
    }

    #[test]
    fn test_command_line_quotes_unsafe_words() {
        let cmd = CommandDescriptor::new("sh").args(["-c", "echo it's done", ""]);
        assert_eq!(cmd.command_line(), r"sh -c 'echo it'\''s done' ''");
    }

    #[test]
    fn test_descriptor_builder() {
        let cmd = CommandDescriptor::new("git")
            .args(vec!["status", "--short"])
            .current_dir("/tmp")
            .env("GIT_PAGER", "cat");
        assert_eq!(cmd.args, vec!["status", "--short"]);
        assert_eq!(cmd.dir, Some(PathBuf::from("/tmp")));
        assert_eq!(cmd.env, vec![("GIT_PAGER".to_string(), "cat".to_string())]);
    }

    #[test]
    fn test_zero_timeout_is_disabled() {
        assert_eq!(RunOptions::default().timeout(), None);
        assert_eq!(
            RunOptions::with_timeout(Duration::from_millis(250)).timeout(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_wait_options_defaults() {
        let opts = WaitOptions::default();
        assert_eq!(opts.poll_interval(), Duration::from_secs(1));
        assert_eq!(opts.timeout(), None);

        let zero_interval = WaitOptions {
            poll_interval: Duration::ZERO,
            timeout: Duration::from_secs(3),
        };
        assert_eq!(zero_interval.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(zero_interval.timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_exec_id_is_short_hex() {
        let id = ExecId::new();
        assert_eq!(id.as_str().len(), ExecId::LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_report_from_timeout() {
        let cmd = CommandDescriptor::new("sleep").arg("5");
        let result = Err(ExecError::Timeout {
            command: cmd.command_line(),
            timeout: Duration::from_secs(1),
            output: "partial".to_string(),
        });
        let report = CommandReport::new(
            ExecId::new(),
            &cmd,
            Utc::now(),
            Duration::from_millis(1003),
            &result,
        );

        assert!(!report.success);
        assert_eq!(report.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(report.output, "partial");
        assert_eq!(report.duration_ms, 1003);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["error_kind"], "timeout");
        assert_eq!(json["command"], "sleep 5");
    }
}
