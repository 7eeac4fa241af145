//! Executor process management
//!
//! Spawns the executor adapter, writes the payload to its stdin, and
//! streams stdout/stderr lines back over a channel. Stop handling is
//! two-phase: [`ExecutorChild::terminate`] asks nicely, a later
//! [`ExecutorChild::kill`] does not.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};

const LINE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

/// A spawned executor. Readers drain both pipes into the line channel;
/// the channel closes when both pipes hit EOF.
#[derive(Debug)]
pub struct ExecutorChild {
    child: Child,
    stdout_handle: tokio::task::JoinHandle<()>,
    stderr_handle: tokio::task::JoinHandle<()>,
}

/// Spawn `command` in `working_dir`, write `payload` (plus a trailing
/// newline) to its stdin, and close stdin so the executor sees EOF.
pub async fn spawn(
    command: &str,
    working_dir: &Path,
    env: &[(String, String)],
    payload: &str,
) -> Result<(ExecutorChild, mpsc::Receiver<OutputLine>)> {
    debug!(command, working_dir = %working_dir.display(), "Spawning executor");

    let mut cmd = Command::new(command);
    cmd.current_dir(working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|e| {
        RunnerError::spawn_failed_with_source(format!("Failed to spawn {command}: {e}"), e)
    })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| RunnerError::spawn_failed("Failed to capture stdin"))?;
    stdin.write_all(payload.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.shutdown().await?;
    drop(stdin);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RunnerError::spawn_failed("Failed to capture stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RunnerError::spawn_failed("Failed to capture stderr"))?;

    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);

    let stdout_tx = tx.clone();
    let stdout_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let out = OutputLine {
                stream: OutputStream::Stdout,
                line,
            };
            if stdout_tx.send(out).await.is_err() {
                warn!("Line channel closed, stopping stdout reader");
                break;
            }
        }
    });

    let stderr_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let out = OutputLine {
                stream: OutputStream::Stderr,
                line,
            };
            if tx.send(out).await.is_err() {
                warn!("Line channel closed, stopping stderr reader");
                break;
            }
        }
    });

    Ok((
        ExecutorChild {
            child,
            stdout_handle,
            stderr_handle,
        },
        rx,
    ))
}

impl ExecutorChild {
    /// Soft stop: signal the process without waiting for it to exit.
    pub fn terminate(&mut self) -> Result<()> {
        self.child.start_kill()?;
        Ok(())
    }

    /// Hard stop. The readers drain whatever the pipes still hold.
    pub async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }

    /// Wait for exit and for both readers to finish. Returns the exit
    /// code, `-1` when the process died to a signal.
    pub async fn wait(mut self) -> Result<i32> {
        let status = self.child.wait().await?;
        let _ = self.stdout_handle.await;
        let _ = self.stderr_handle.await;
        Ok(status.code().unwrap_or(-1))
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}
