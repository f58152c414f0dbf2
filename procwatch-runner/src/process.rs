//! Waiting on processes this program did not spawn.
//!
//! A wait syscall only works for children, so exit is detected by polling
//! the process metadata directory (`/proc/<pid>`) until it disappears. PID
//! reuse between two polls goes unnoticed.

use crate::deadline;
use procwatch_core::{WaitError, WaitOptions};
use std::io;
use std::path::{Path, PathBuf};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

pub const PROC_ROOT: &str = "/proc";

#[derive(Debug, Clone)]
pub struct PidWatcher {
    proc_root: PathBuf,
}

impl PidWatcher {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from(PROC_ROOT),
        }
    }

    pub fn with_proc_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.proc_root = root.as_ref().to_path_buf();
        self
    }

    /// Wait for `pid` to exit.
    ///
    /// Only supported on Linux; elsewhere this fails without polling.
    pub async fn wait_for_exit(&self, pid: u32, options: &WaitOptions) -> Result<(), WaitError> {
        if !cfg!(target_os = "linux") {
            return Err(WaitError::UnsupportedPlatform(
                std::env::consts::OS.to_string(),
            ));
        }

        let path = self.proc_root.join(pid.to_string());
        let poll_interval = options.poll_interval();
        debug!(pid, path = %path.display(), poll_interval = ?poll_interval, "Waiting for process to exit");

        let mut ticker = time::interval_at(Instant::now() + poll_interval, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let timeout = deadline(options.timeout());
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                _ = ticker.tick() => match tokio::fs::metadata(&path).await {
                    Ok(_) => trace!(pid, "Process still present"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        debug!(pid, "Process exited");
                        return Ok(());
                    }
                    Err(source) => {
                        return Err(WaitError::Probe {
                            pid,
                            path: path.clone(),
                            source,
                        })
                    }
                },
                _ = &mut timeout => return Err(WaitError::Timeout),
            }
        }
    }
}

impl Default for PidWatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for a non-child process to exit, probing `/proc`.
pub async fn wait_pid(pid: u32, options: &WaitOptions) -> Result<(), WaitError> {
    PidWatcher::new().wait_for_exit(pid, options).await
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use procwatch_core::ErrorKind;
    use std::time::Duration;

    fn opts(poll_ms: u64, timeout_ms: u64) -> WaitOptions {
        WaitOptions {
            poll_interval: Duration::from_millis(poll_ms),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test]
    async fn test_missing_pid_returns_on_first_tick() {
        let root = tempfile::tempdir().unwrap();
        let watcher = PidWatcher::new().with_proc_root(root.path());

        let start = std::time::Instant::now();
        watcher.wait_for_exit(4242, &opts(100, 5000)).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_missing_pid_in_real_proc() {
        wait_pid(u32::MAX, &opts(20, 2000)).await.unwrap();
    }

    #[tokio::test]
    async fn test_live_pid_times_out() {
        let err = wait_pid(std::process::id(), &opts(50, 300))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Timeout));
        assert_eq!(err.kind(), ErrorKind::WaitTimeout);
    }

    #[tokio::test]
    async fn test_detects_exit_of_running_process() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("0.3")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        // reap it so the /proc entry goes away
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        let start = std::time::Instant::now();
        wait_pid(pid, &opts(50, 5000)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_detects_metadata_removal() {
        let root = tempfile::tempdir().unwrap();
        let entry = root.path().join("4242");
        std::fs::create_dir(&entry).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            std::fs::remove_dir(&entry).unwrap();
        });

        let watcher = PidWatcher::new().with_proc_root(root.path());
        let start = std::time::Instant::now();
        watcher.wait_for_exit(4242, &opts(50, 5000)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_probe_failure_is_propagated() {
        let root = tempfile::NamedTempFile::new().unwrap();
        let watcher = PidWatcher::new().with_proc_root(root.path());

        let err = watcher.wait_for_exit(4242, &opts(20, 2000)).await.unwrap_err();
        match err {
            WaitError::Probe { pid, path, .. } => {
                assert_eq!(pid, 4242);
                assert_eq!(path, root.path().join("4242"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
