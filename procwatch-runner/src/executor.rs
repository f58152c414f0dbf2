use crate::deadline;
use crate::sink::{LogFields, LogLevel, LogSink, TracingSink};
use chrono::Utc;
use procwatch_core::{CommandDescriptor, CommandReport, ExecError, ExecId, RunOptions};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Runs commands to completion, enforcing an optional timeout
#[derive(Clone)]
pub struct CommandRunner {
    sink: Arc<dyn LogSink>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self {
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Run a command and return its trimmed stdout.
    ///
    /// Non-zero exit and timeout are reported as distinct `ExecError`
    /// variants, both carrying the stdout captured so far. On timeout the
    /// process is killed and reaped in the background.
    pub async fn run(
        &self,
        descriptor: &CommandDescriptor,
        options: &RunOptions,
    ) -> Result<String, ExecError> {
        self.execute(descriptor, options, &ExecId::new()).await
    }

    /// Like [`CommandRunner::run`], summarised as a report.
    pub async fn run_report(
        &self,
        descriptor: &CommandDescriptor,
        options: &RunOptions,
    ) -> CommandReport {
        let exec_id = ExecId::new();
        let started_at = Utc::now();
        let start = Instant::now();

        let result = self.execute(descriptor, options, &exec_id).await;

        CommandReport::new(exec_id, descriptor, started_at, start.elapsed(), &result)
    }

    async fn execute(
        &self,
        descriptor: &CommandDescriptor,
        options: &RunOptions,
        exec_id: &ExecId,
    ) -> Result<String, ExecError> {
        let fields = LogFields::new(exec_id);
        // log in a way that can be pasted into a terminal
        let command_line = descriptor.command_line();
        self.sink.record(
            LogLevel::Info,
            &fields.with_dir(descriptor.dir.as_deref()),
            &command_line,
        );

        let mut command = build_command(descriptor);
        let start = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = ExecError::Spawn {
                    command: command_line,
                    source,
                };
                self.sink.record(LogLevel::Error, &fields, &err.to_string());
                return Err(err);
            }
        };

        let stdout = CaptureBuffer::default();
        let stderr = CaptureBuffer::default();
        let mut stdout_task = stdout.capture(child.stdout.take());
        let mut stderr_task = stderr.capture(child.stderr.take());

        let completion = tokio::select! {
            status = self.wait_with_output(
                &mut child,
                &mut stdout_task,
                &mut stderr_task,
                &fields,
            ) => Some(status),
            _ = deadline(options.timeout()) => None,
        };

        let Some(status) = completion else {
            if let Err(e) = child.start_kill() {
                self.sink.record(
                    LogLevel::Debug,
                    &fields,
                    &format!("failed to kill timed out process: {}", e),
                );
            }
            stdout_task.abort();
            stderr_task.abort();
            // the killed child still has to be reaped
            tokio::spawn(async move {
                let _ = child.wait().await;
            });

            self.report_read_errors(&stdout, &stderr, &fields);
            let output = stdout.contents();
            self.sink.record(
                LogLevel::Debug,
                &fields.with_duration(start.elapsed()),
                &output,
            );
            let err = ExecError::Timeout {
                command: command_line,
                timeout: options.timeout,
                output: output.trim().to_string(),
            };
            self.sink.record(LogLevel::Error, &fields, &err.to_string());
            return Err(err);
        };

        self.report_read_errors(&stdout, &stderr, &fields);
        let output = stdout.contents();
        self.sink.record(
            LogLevel::Debug,
            &fields.with_duration(start.elapsed()),
            &output,
        );

        match status {
            Ok(status) if status.success() => Ok(output.trim().to_string()),
            status => {
                let err = ExecError::Failed {
                    command: command_line,
                    stderr: stderr.contents().trim().to_string(),
                    exit_code: status.ok().and_then(|s| s.code()),
                    output: output.trim().to_string(),
                };
                self.sink.record(LogLevel::Error, &fields, &err.to_string());
                Err(err)
            }
        }
    }

    /// Child exit followed by both streams reaching EOF.
    async fn wait_with_output(
        &self,
        child: &mut Child,
        stdout_task: &mut JoinHandle<()>,
        stderr_task: &mut JoinHandle<()>,
        fields: &LogFields<'_>,
    ) -> io::Result<ExitStatus> {
        let status = child.wait().await;
        self.join_capture(stdout_task, "stdout", fields).await;
        self.join_capture(stderr_task, "stderr", fields).await;
        status
    }

    async fn join_capture(
        &self,
        task: &mut JoinHandle<()>,
        stream: &str,
        fields: &LogFields<'_>,
    ) {
        if let Err(e) = task.await {
            self.sink.record(
                LogLevel::Debug,
                fields,
                &format!("{} capture task failed: {}", stream, e),
            );
        }
    }

    fn report_read_errors(
        &self,
        stdout: &CaptureBuffer,
        stderr: &CaptureBuffer,
        fields: &LogFields<'_>,
    ) {
        for (stream, buffer) in [("stdout", stdout), ("stderr", stderr)] {
            if let Some(e) = buffer.read_error() {
                self.sink.record(
                    LogLevel::Debug,
                    fields,
                    &format!("{} truncated by read error: {}", stream, e),
                );
            }
        }
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `program` with `args` using the tracing sink.
pub async fn run_command<I, S>(
    program: &str,
    args: I,
    options: &RunOptions,
) -> Result<String, ExecError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let descriptor = CommandDescriptor::new(program).args(args);
    CommandRunner::new().run(&descriptor, options).await
}

fn build_command(descriptor: &CommandDescriptor) -> Command {
    let mut command = Command::new(&descriptor.program);
    command
        .args(&descriptor.args)
        .envs(descriptor.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &descriptor.dir {
        command.current_dir(dir);
    }
    command
}

/// In-memory sink for one output stream of one invocation.
#[derive(Clone, Default)]
struct CaptureBuffer(Arc<Mutex<Captured>>);

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    read_error: Option<String>,
}

impl CaptureBuffer {
    fn capture<R>(&self, reader: Option<R>) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = self.clone();
        tokio::spawn(async move {
            let Some(mut reader) = reader else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => buffer.append(&chunk[..n]),
                    Err(e) => {
                        buffer.set_read_error(e);
                        break;
                    }
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, Captured> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, bytes: &[u8]) {
        self.lock().bytes.extend_from_slice(bytes);
    }

    fn set_read_error(&self, e: io::Error) {
        self.lock().read_error = Some(e.to_string());
    }

    fn read_error(&self) -> Option<String> {
        self.lock().read_error.clone()
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.lock().bytes).into_owned()
    }
}
