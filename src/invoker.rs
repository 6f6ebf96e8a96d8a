//! External engine process invocation and supervision.
//!
//! Each call spawns exactly one child process with piped stdout/stderr,
//! enforces a hard wall-clock deadline, and guarantees the child is killed
//! and reaped before returning. Dropping the in-flight future (transport
//! cancellation) kills the child too via `kill_on_drop`, so cancellation
//! and timeout share the same termination path.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A fully resolved engine command for a single call.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Payload written to the engine's stdin, if any.
    pub stdin: Option<String>,
}

/// Captured outcome of one engine invocation.
///
/// Owned exclusively by the call that produced it. A non-zero exit code is
/// not an error at this level; callers interpret it.
#[derive(Debug)]
pub struct InvocationResult {
    /// Exit code; `None` when killed by the deadline or a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// True when the deadline fired and the process was terminated.
    /// Partial output collected up to termination is still present.
    pub duration_exceeded: bool,
    pub elapsed: Duration,
}

/// Invocation failure modes.
///
/// Timeouts are not represented here — they are reported through
/// `InvocationResult::duration_exceeded` with best-effort partial output.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The engine executable is missing, not executable, or could not be
    /// spawned.
    #[error("engine could not be started: {program}: {source}")]
    BackendUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure talking to an already-spawned engine process.
    #[error("engine I/O failed: {0}")]
    Io(#[source] std::io::Error),
}

/// Abstraction over engine invocation.
///
/// Lets the dispatch layer be tested with mock invokers (spawn counters,
/// canned outputs) without touching a real process.
pub trait Invoker {
    fn run(
        &self,
        cmd: EngineCommand,
        timeout: Duration,
    ) -> impl Future<Output = Result<InvocationResult, InvokeError>> + Send;
}

/// The real invoker: spawns the engine as an OS child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker;

impl Invoker for ProcessInvoker {
    async fn run(
        &self,
        mut cmd: EngineCommand,
        timeout: Duration,
    ) -> Result<InvocationResult, InvokeError> {
        let started = Instant::now();

        debug!(
            program = %cmd.program.display(),
            args = ?cmd.args,
            "spawning engine process"
        );

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .current_dir(&cmd.working_dir)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| InvokeError::BackendUnavailable {
                program: cmd.program.display().to_string(),
                source,
            })?;

        // Write stdin from a task so the deadline below also bounds a write
        // blocked on a full pipe against an engine that never reads it.
        // Killing the child closes the pipe, which unblocks the writer.
        let stdin_task = match (cmd.stdin.take(), child.stdin.take()) {
            (Some(payload), Some(mut stdin)) => Some(tokio::spawn(async move {
                match stdin.write_all(payload.as_bytes()).await {
                    Ok(()) => Ok(()),
                    // The engine may exit before reading stdin; that is the
                    // engine's business, not a bridge failure.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                    Err(e) => Err(e),
                }
                // Dropping the handle closes the pipe so the engine sees EOF.
            })),
            _ => None,
        };

        // Drain pipes concurrently with waiting; on timeout the readers hit
        // EOF once the child is killed, so partial output is preserved.
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(drain(stdout_pipe));
        let stderr_task = tokio::spawn(drain(stderr_pipe));

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let (exit_code, duration_exceeded) = tokio::select! {
            status = child.wait() => {
                let status = status.map_err(InvokeError::Io)?;
                (status.code(), false)
            }
            _ = &mut deadline => {
                warn!(
                    program = %cmd.program.display(),
                    timeout_secs = timeout.as_secs(),
                    "engine exceeded deadline, killing"
                );
                if let Err(e) = child.start_kill() {
                    warn!("failed to kill timed-out engine: {e}");
                }
                // Reap so no zombie outlives this call.
                let _ = child.wait().await;
                (None, true)
            }
        };

        if let Some(task) = stdin_task {
            match task.await {
                Ok(Ok(())) => {}
                // The pipe is gone once the child is killed; a late write
                // error carries no signal beyond the timeout itself.
                Ok(Err(e)) if duration_exceeded => {
                    debug!("stdin write failed after timeout kill: {e}");
                }
                Ok(Err(e)) => return Err(InvokeError::Io(e)),
                Err(e) => warn!("stdin writer task failed: {e}"),
            }
        }

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(InvocationResult {
            exit_code,
            stdout,
            stderr,
            duration_exceeded,
            elapsed: started.elapsed(),
        })
    }
}

/// Read a pipe to completion, lossily decoding as UTF-8.
async fn drain<R>(pipe: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        warn!("failed to drain engine pipe: {e}");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
