//! Process execution abstraction.
//!
//! Everything the coordinator knows about the package manager comes from
//! running it: exit code plus captured output. [`ProcessRunner`] is the only
//! seam between the task gate and the operating system, so tests can swap in
//! a deterministic fake.

use crate::error::TaskError;
use crate::task::{CANCELLED_EXIT_CODE, Invocation, SIGNALLED_EXIT_CODE};
use async_trait::async_trait;
use std::pin::pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{Notify, mpsc};

/// Result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub output: String,
    /// True if the process was terminated through its [`CancelHandle`].
    pub cancelled: bool,
}

impl ProcessOutput {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
            cancelled: false,
        }
    }

    /// Output of a run that was terminated early, keeping what was captured.
    pub fn cancelled(partial_output: impl Into<String>) -> Self {
        Self {
            exit_code: CANCELLED_EXIT_CODE,
            output: partial_output.into(),
            cancelled: true,
        }
    }
}

/// Cooperative cancellation signal shared between a gate and a runner.
///
/// # Examples
///
/// ```
/// use swiftdeps_core::process::CancelHandle;
///
/// # tokio_test::block_on(async {
/// let handle = CancelHandle::new();
/// let observer = handle.clone();
///
/// handle.cancel();
/// observer.cancelled().await;
/// assert!(observer.is_cancelled());
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut notified = pin!(self.inner.notify.notified());
        // Register before checking the flag so a concurrent cancel is not lost.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Executes external commands on behalf of the task gate.
///
/// Implementations must resolve once the process has exited, including when
/// it was terminated through `cancel`; in that case the partial output is
/// returned with [`ProcessOutput::cancelled`] set.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        invocation: &Invocation,
        cancel: CancelHandle,
    ) -> Result<ProcessOutput, TaskError>;
}

/// Runs commands as child processes of the current process.
///
/// stdout and stderr are read line by line as they arrive and merged into a
/// single transcript, the way a terminal would show them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        cancel: CancelHandle,
    ) -> Result<ProcessOutput, TaskError> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TaskError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx.clone());
        }
        drop(tx);

        let mut output = String::new();
        let mut streams_open = true;
        let status = loop {
            tokio::select! {
                line = rx.recv(), if streams_open => match line {
                    Some(line) => push_line(&mut output, &line),
                    None => streams_open = false,
                },
                status = child.wait() => break Some(status?),
                () = cancel.cancelled() => break None,
            }
        };

        let result = match status {
            Some(status) => ProcessOutput {
                // No exit code means the process died from a signal.
                exit_code: status.code().unwrap_or(SIGNALLED_EXIT_CODE),
                output: String::new(),
                cancelled: false,
            },
            None => {
                tracing::warn!(command = %invocation, "terminating process");
                if let Err(e) = child.start_kill() {
                    tracing::debug!("kill failed, process already exited: {}", e);
                }
                child.wait().await?;
                ProcessOutput::cancelled(String::new())
            }
        };

        while let Some(line) = rx.recv().await {
            push_line(&mut output, &line);
        }

        Ok(ProcessOutput { output, ..result })
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: "swiftdeps::process", "{}", line);
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

fn push_line(output: &mut String, line: &str) {
    output.push_str(line);
    output.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_before_wait_completes_immediately() {
        let handle = CancelHandle::new();
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle.cancelled())
            .await
            .expect("cancelled() should resolve after cancel()");
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let handle = CancelHandle::new();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.cancelled().await })
        };
        tokio::task::yield_now().await;
        assert!(!handle.is_cancelled());

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[test]
    fn test_cancelled_output() {
        let output = ProcessOutput::cancelled("Fetching https://github.com/apple/swift-markdown\n");
        assert!(output.cancelled);
        assert_eq!(output.exit_code, CANCELLED_EXIT_CODE);
        assert!(output.output.starts_with("Fetching"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_runner_captures_both_streams() {
        let invocation = Invocation::new("sh", std::env::temp_dir())
            .args(["-c", "echo resolved; echo 'warning: stale' >&2; exit 3"]);

        let output = TokioProcessRunner
            .run(&invocation, CancelHandle::new())
            .await
            .unwrap();

        assert_eq!(output.exit_code, 3);
        assert!(!output.cancelled);
        assert!(output.output.contains("resolved\n"));
        assert!(output.output.contains("warning: stale\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_runner_terminates_on_cancel() {
        let invocation = Invocation::new("sh", std::env::temp_dir())
            .args(["-c", "echo started; exec sleep 30"]);
        let cancel = CancelHandle::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                cancel.cancel();
            })
        };

        let output = tokio::time::timeout(
            Duration::from_secs(10),
            TokioProcessRunner.run(&invocation, cancel),
        )
        .await
        .expect("cancelled process should exit promptly")
        .unwrap();
        canceller.await.unwrap();

        assert!(output.cancelled);
        assert_eq!(output.exit_code, CANCELLED_EXIT_CODE);
        assert!(output.output.contains("started"));
    }

    #[tokio::test]
    async fn test_tokio_runner_reports_spawn_failure() {
        let invocation = Invocation::new("swiftdeps-no-such-binary", std::env::temp_dir());
        let err = TokioProcessRunner
            .run(&invocation, CancelHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Spawn { ref program, .. } if program == "swiftdeps-no-such-binary"));
    }
}
