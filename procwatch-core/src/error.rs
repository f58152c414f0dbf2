use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single command run.
///
/// Every variant except `Spawn` carries the trimmed stdout captured up to the
/// point of failure.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("`{command}` could not be started: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timeout after {timeout:?}")]
    Timeout {
        command: String,
        timeout: Duration,
        output: String,
    },

    #[error("`{command}` failed: {stderr}")]
    Failed {
        command: String,
        stderr: String,
        exit_code: Option<i32>,
        output: String,
    },
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::Spawn { .. } => ErrorKind::SpawnFailed,
            ExecError::Timeout { .. } => ErrorKind::Timeout,
            ExecError::Failed { .. } => ErrorKind::CommandFailed,
        }
    }

    /// Partial stdout captured before the failure.
    pub fn output(&self) -> &str {
        match self {
            ExecError::Spawn { .. } => "",
            ExecError::Timeout { output, .. } | ExecError::Failed { output, .. } => output,
        }
    }

    pub fn command(&self) -> &str {
        match self {
            ExecError::Spawn { command, .. }
            | ExecError::Timeout { command, .. }
            | ExecError::Failed { command, .. } => command,
        }
    }
}

/// Failure of a PID wait.
#[derive(Error, Debug)]
pub enum WaitError {
    #[error("Platform '{0}' unsupported")]
    UnsupportedPlatform(String),

    #[error("Timed out waiting for PID to complete")]
    Timeout,

    #[error("failed to probe process {pid} at {}: {source}", .path.display())]
    Probe {
        pid: u32,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WaitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WaitError::UnsupportedPlatform(_) => ErrorKind::PlatformUnsupported,
            WaitError::Timeout => ErrorKind::WaitTimeout,
            WaitError::Probe { .. } => ErrorKind::ProbeFailed,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Distinguishable failure kinds, stable for reporting.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SpawnFailed,
    Timeout,
    CommandFailed,
    PlatformUnsupported,
    WaitTimeout,
    ProbeFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_embeds_command_and_duration() {
        let err = ExecError::Timeout {
            command: "sleep 5".to_string(),
            timeout: Duration::from_secs(1),
            output: String::new(),
        };
        assert_eq!(err.to_string(), "`sleep 5` timeout after 1s");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_failed_message_carries_stderr() {
        let err = ExecError::Failed {
            command: "ls /nope".to_string(),
            stderr: "No such file or directory".to_string(),
            exit_code: Some(2),
            output: "partial".to_string(),
        };
        assert_eq!(err.to_string(), "`ls /nope` failed: No such file or directory");
        assert_eq!(err.output(), "partial");
        assert_eq!(err.command(), "ls /nope");
    }

    #[test]
    fn test_spawn_error_has_no_output() {
        let err = ExecError::Spawn {
            command: "missing".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(err.output(), "");
        assert_eq!(err.kind(), ErrorKind::SpawnFailed);
    }

    #[test]
    fn test_wait_error_messages() {
        assert_eq!(
            WaitError::UnsupportedPlatform("macos".to_string()).to_string(),
            "Platform 'macos' unsupported"
        );
        assert_eq!(
            WaitError::Timeout.to_string(),
            "Timed out waiting for PID to complete"
        );
        assert_eq!(WaitError::Timeout.kind(), ErrorKind::WaitTimeout);
    }
}
