//! Subprocess transport: owns the server child process and its standard I/O
//! streams.
//!
//! The transport spawns `<interpreter> -m <module>` with piped stdin/stdout,
//! redirects stderr to a log file and runs a reader task that forwards every
//! inbound frame to the session. It knows nothing about LSP semantics; it
//! moves `JsonRpcMessage`s and reports when the stream closes.

use std::path::Path;
use std::process::Stdio;

use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::error::ClientError;
use crate::jsonrpc::{self, JsonRpcMessage};
use crate::resolver::ServerConfig;

/// Events produced by the reader task.
#[derive(Debug)]
pub enum TransportEvent {
    /// One inbound frame.
    Message(JsonRpcMessage),
    /// The stdout stream closed; `error` carries a reason when the close was
    /// not a plain EOF.
    Closed { error: Option<String> },
}

/// A running server subprocess with framed message I/O.
#[derive(Debug)]
pub struct Transport {
    writer: tokio::sync::Mutex<ChildStdin>,
    child: std::sync::Mutex<Option<Child>>,
    pid: Option<u32>,
}

impl Transport {
    /// Spawn the server process described by `config` and start the reader
    /// task. Returns the transport and the channel the reader feeds.
    pub fn spawn(
        config: &ServerConfig,
        stderr_log: &Path,
    ) -> Result<(std::sync::Arc<Transport>, mpsc::Receiver<TransportEvent>), ClientError> {
        let stderr_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(stderr_log)
            .map_err(|e| {
                ClientError::Spawn(format!(
                    "failed to open stderr log {}: {e}",
                    stderr_log.display()
                ))
            })?;

        let mut child = Command::new(&config.interpreter)
            .arg("-m")
            .arg(&config.server_module)
            .args(&config.args)
            .current_dir(&config.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ClientError::Spawn(format!(
                    "failed to spawn {} -m {}: {e}",
                    config.interpreter.display(),
                    config.server_module
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Spawn("child stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Spawn("child stdout was not captured".to_string()))?;

        let pid = child.id();
        tracing::info!(
            pid = ?pid,
            interpreter = %config.interpreter.display(),
            module = %config.server_module,
            "spawned server process"
        );

        let (events_tx, events_rx) = mpsc::channel(64);
        tokio::spawn(read_loop(BufReader::new(stdout), events_tx));

        let transport = std::sync::Arc::new(Transport {
            writer: tokio::sync::Mutex::new(stdin),
            child: std::sync::Mutex::new(Some(child)),
            pid,
        });

        Ok((transport, events_rx))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write one framed message to the server's stdin.
    pub async fn send<T: serde::Serialize>(&self, message: &T) -> Result<(), ClientError> {
        let mut writer = self.writer.lock().await;
        jsonrpc::write_message(&mut *writer, message).await
    }

    /// Reap the child: wait up to `grace` for it to exit on its own, then
    /// kill it. Returns the exit status when one was collected. Subsequent
    /// calls are no-ops.
    pub async fn close(&self, grace: Duration) -> Option<std::process::ExitStatus> {
        let child = self.child.lock().unwrap_or_else(|e| e.into_inner()).take();
        let mut child = child?;

        if !grace.is_zero() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(pid = ?self.pid, %status, "server exited within grace period");
                    return Some(status);
                }
                Ok(Err(e)) => {
                    tracing::warn!(pid = ?self.pid, "failed to wait for server: {}", e);
                    return None;
                }
                Err(_) => {
                    tracing::warn!(pid = ?self.pid, "server did not exit in time, killing");
                }
            }
        }

        if let Err(e) = child.kill().await {
            tracing::warn!(pid = ?self.pid, "failed to kill server: {}", e);
        }
        match child.wait().await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(pid = ?self.pid, "failed to reap server: {}", e);
                None
            }
        }
    }
}

async fn read_loop(
    mut reader: BufReader<tokio::process::ChildStdout>,
    events: mpsc::Sender<TransportEvent>,
) {
    loop {
        match jsonrpc::read_message(&mut reader).await {
            Ok(message) => {
                if events.send(TransportEvent::Message(message)).await.is_err() {
                    // Session dropped its receiver; nothing left to notify.
                    return;
                }
            }
            Err(e) => {
                let text = e.to_string();
                let error = if text.contains("EOF") { None } else { Some(text) };
                let _ = events.send(TransportEvent::Closed { error }).await;
                return;
            }
        }
    }
}
