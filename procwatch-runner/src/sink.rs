//! Logging collaborator for `CommandRunner`.
//!
//! Events carry the `execID`, `dir` and `duration` fields; log scrapers rely
//! on those names.

use procwatch_core::ExecId;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Error,
}

/// Structured fields attached to one event.
#[derive(Debug, Clone, Copy)]
pub struct LogFields<'a> {
    pub exec_id: &'a ExecId,
    pub dir: Option<&'a Path>,
    pub duration: Option<Duration>,
}

impl<'a> LogFields<'a> {
    pub fn new(exec_id: &'a ExecId) -> Self {
        Self {
            exec_id,
            dir: None,
            duration: None,
        }
    }

    /// Attach `dir`; `None` is logged as an empty value.
    pub fn with_dir(mut self, dir: Option<&'a Path>) -> Self {
        self.dir = Some(dir.unwrap_or_else(|| Path::new("")));
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

pub trait LogSink: Send + Sync {
    fn record(&self, level: LogLevel, fields: &LogFields<'_>, message: &str);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

macro_rules! emit {
    ($level:ident, $fields:ident, $message:ident) => {
        match ($fields.dir, $fields.duration) {
            (Some(dir), Some(duration)) => tracing::$level!(
                execID = %$fields.exec_id,
                dir = %dir.display(),
                duration = ?duration,
                "{}",
                $message
            ),
            (Some(dir), None) => tracing::$level!(
                execID = %$fields.exec_id,
                dir = %dir.display(),
                "{}",
                $message
            ),
            (None, Some(duration)) => tracing::$level!(
                execID = %$fields.exec_id,
                duration = ?duration,
                "{}",
                $message
            ),
            (None, None) => tracing::$level!(execID = %$fields.exec_id, "{}", $message),
        }
    };
}

impl LogSink for TracingSink {
    fn record(&self, level: LogLevel, fields: &LogFields<'_>, message: &str) {
        match level {
            LogLevel::Debug => emit!(debug, fields, message),
            LogLevel::Info => emit!(info, fields, message),
            LogLevel::Error => emit!(error, fields, message),
        }
    }
}
