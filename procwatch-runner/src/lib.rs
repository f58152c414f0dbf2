pub mod executor;
pub mod process;
pub mod sink;

pub use executor::{run_command, CommandRunner};
pub use process::{wait_pid, PidWatcher};
pub use sink::{LogFields, LogLevel, LogSink, TracingSink};

use std::time::Duration;

/// Completes after `timeout`, or never when there is none.
pub(crate) async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}
