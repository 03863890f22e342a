//! One protocol session over one server process.
//!
//! A `Session` owns the transport for exactly one subprocess generation: it
//! performs the initialize handshake, correlates requests with responses
//! through a pending map, routes `window/*` notifications to the controller
//! and reports process exit. When the session is torn down every outstanding
//! request completes with `Cancelled`.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lsp_types::{ClientCapabilities, InitializeParams, InitializeResult, ServerCapabilities, Uri};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

use crate::error::ClientError;
use crate::jsonrpc::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::notify::{NotificationEvent, Severity};
use crate::resolver::{workspace_uri, ServerConfig};
use crate::transport::{Transport, TransportEvent};

/// Lifecycle of a single session, tracked independently of the controller's
/// own state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake in flight.
    Starting,
    /// Handshake complete; requests are accepted.
    Ready,
    /// Quiesced ahead of a restart; no new requests.
    Restarting,
    /// Shut down deliberately.
    Stopped,
    /// The process died or the handshake failed.
    Failed,
}

/// Timeouts governing one session.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub kill_grace: Duration,
}

/// Events a session reports up to the controller.
#[derive(Debug)]
pub enum SessionEvent {
    /// A `window/showMessage` or `window/logMessage` from the server.
    Notification(NotificationEvent),
    /// The server process went away outside of a deliberate shutdown.
    Exited { generation: u64, message: String },
}

struct PendingRequest {
    method: String,
    created: Instant,
    tx: oneshot::Sender<Result<Value, ClientError>>,
}

struct SessionInner {
    transport: Arc<Transport>,
    pending: Mutex<HashMap<i64, PendingRequest>>,
    next_id: AtomicI64,
    state: Mutex<SessionState>,
    options: SessionOptions,
    generation: u64,
    shutting_down: AtomicBool,
    capabilities: Mutex<Option<ServerCapabilities>>,
}

impl SessionInner {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Complete every outstanding request with `Cancelled`.
    fn fail_all_pending(&self) {
        let drained: Vec<(i64, PendingRequest)> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (id, pending) in drained {
            tracing::debug!(
                id,
                method = %pending.method,
                elapsed_ms = pending.created.elapsed().as_millis() as u64,
                "cancelling outstanding request"
            );
            let _ = pending.tx.send(Err(ClientError::Cancelled));
        }
    }

    fn complete(&self, response: JsonRpcResponse) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&response.id);
        let Some(pending) = pending else {
            tracing::warn!(id = response.id, "response for unknown request id");
            return;
        };

        let outcome = match response.error {
            Some(error) => Err(ClientError::Rpc {
                code: error.code,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        tracing::trace!(
            id = response.id,
            method = %pending.method,
            elapsed_ms = pending.created.elapsed().as_millis() as u64,
            "request completed"
        );
        let _ = pending.tx.send(outcome);
    }
}

/// Handle for issuing requests and notifications on a running session.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<SessionInner>,
}

impl SessionClient {
    /// Send a request and wait for its response, bounded by the per-request
    /// timeout. Rejected unless the session is `Ready`.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        if self.inner.state() != SessionState::Ready {
            return Err(ClientError::Cancelled);
        }
        request_on(&self.inner, method, params, self.inner.options.request_timeout).await
    }

    /// Send a notification; silently dropped unless the session is `Ready`.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        if self.inner.state() != SessionState::Ready {
            tracing::debug!(method, "dropping notification, session not ready");
            return Ok(());
        }
        self.inner
            .transport
            .send(&JsonRpcNotification::new(method, params))
            .await
    }
}

async fn request_on(
    inner: &Arc<SessionInner>,
    method: &str,
    params: Option<Value>,
    timeout: Duration,
) -> Result<Value, ClientError> {
    let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
    let (tx, rx) = oneshot::channel();
    inner.pending.lock().unwrap_or_else(|e| e.into_inner()).insert(
        id,
        PendingRequest {
            method: method.to_string(),
            created: Instant::now(),
            tx,
        },
    );

    let request = JsonRpcRequest::new(id, method, params);
    if let Err(e) = inner.transport.send(&request).await {
        inner.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
        return Err(e);
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(outcome)) => outcome,
        // Sender dropped: the session failed all pending requests.
        Ok(Err(_)) => Err(ClientError::Cancelled),
        Err(_) => {
            inner.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
            Err(ClientError::Timeout(timeout))
        }
    }
}

/// A live session; owned by the controller.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Spawn the server, run the initialize handshake and start dispatching.
    ///
    /// On handshake failure the subprocess is reaped before the error is
    /// returned, so a failed start never leaks a process.
    pub async fn start(
        config: &ServerConfig,
        options: SessionOptions,
        generation: u64,
        events: mpsc::Sender<SessionEvent>,
        stderr_log: &Path,
    ) -> Result<Session, ClientError> {
        let (transport, transport_events) = Transport::spawn(config, stderr_log)?;

        let inner = Arc::new(SessionInner {
            transport,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            state: Mutex::new(SessionState::Starting),
            options,
            generation,
            shutting_down: AtomicBool::new(false),
            capabilities: Mutex::new(None),
        });

        tokio::spawn(dispatch_loop(inner.clone(), transport_events, events));

        let session = Session {
            inner: inner.clone(),
        };
        if let Err(e) = session.handshake(config).await {
            inner.shutting_down.store(true, Ordering::SeqCst);
            inner.fail_all_pending();
            inner.set_state(SessionState::Failed);
            inner.transport.close(options.kill_grace).await;
            return Err(match e {
                ClientError::Handshake(_) => e,
                other => ClientError::Handshake(other.to_string()),
            });
        }

        inner.set_state(SessionState::Ready);
        tracing::info!(generation, pid = ?inner.transport.pid(), "session ready");
        Ok(session)
    }

    async fn handshake(&self, config: &ServerConfig) -> Result<(), ClientError> {
        #[allow(deprecated)]
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Uri::from_str(&workspace_uri(&config.cwd)).ok(),
            initialization_options: Some(config.initialization_options.clone()),
            capabilities: ClientCapabilities::default(),
            ..Default::default()
        };
        let params = serde_json::to_value(params)
            .map_err(|e| ClientError::Handshake(format!("failed to encode initialize: {e}")))?;

        let result = request_on(
            &self.inner,
            "initialize",
            Some(params),
            self.inner.options.handshake_timeout,
        )
        .await?;

        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Handshake(format!("malformed initialize result: {e}")))?;
        *self
            .inner
            .capabilities
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(result.capabilities);

        self.inner
            .transport
            .send(&JsonRpcNotification::new(
                "initialized",
                Some(serde_json::json!({})),
            ))
            .await
    }

    pub fn client(&self) -> SessionClient {
        SessionClient {
            inner: self.inner.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.inner
            .capabilities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Stop accepting new requests ahead of a restart. Outstanding requests
    /// keep running until shutdown.
    pub fn quiesce(&self) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == SessionState::Ready {
            *state = SessionState::Restarting;
        }
    }

    /// Orderly teardown: shutdown request, exit notification, then reap the
    /// process. Outstanding requests complete with `Cancelled`.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let state = self.inner.state();
        if state == SessionState::Ready || state == SessionState::Restarting {
            match request_on(
                &self.inner,
                "shutdown",
                None,
                self.inner.options.shutdown_timeout,
            )
            .await
            {
                Ok(_) => {
                    let _ = self
                        .inner
                        .transport
                        .send(&JsonRpcNotification::new("exit", None))
                        .await;
                }
                Err(e) => {
                    tracing::debug!(generation = self.inner.generation, "shutdown request failed: {}", e);
                }
            }
        }

        self.inner.fail_all_pending();
        self.inner.set_state(SessionState::Stopped);
        self.inner.transport.close(self.inner.options.kill_grace).await;
        tracing::info!(generation = self.inner.generation, "session stopped");
    }

    /// Immediate teardown without the shutdown exchange.
    pub async fn force_close(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner.fail_all_pending();
        self.inner.set_state(SessionState::Stopped);
        self.inner.transport.close(Duration::ZERO).await;
        tracing::info!(generation = self.inner.generation, "session force-closed");
    }
}

async fn dispatch_loop(
    inner: Arc<SessionInner>,
    mut transport_events: mpsc::Receiver<TransportEvent>,
    events: mpsc::Sender<SessionEvent>,
) {
    while let Some(event) = transport_events.recv().await {
        match event {
            TransportEvent::Message(JsonRpcMessage::Response(response)) => {
                inner.complete(response);
            }
            TransportEvent::Message(JsonRpcMessage::Notification(notification)) => {
                handle_notification(notification, &events).await;
            }
            TransportEvent::Message(JsonRpcMessage::Request(request)) => {
                // Server-to-client requests are not part of this client's
                // surface; acknowledging them would require routing into the
                // host, so they are logged and dropped.
                tracing::warn!(
                    id = request.id,
                    method = %request.method,
                    "ignoring server-to-client request"
                );
            }
            TransportEvent::Closed { error } => {
                if inner.shutting_down.load(Ordering::SeqCst) {
                    tracing::debug!(
                        generation = inner.generation,
                        "transport closed during shutdown"
                    );
                } else {
                    let message = match error {
                        Some(e) => format!("server connection failed: {e}"),
                        None => "server process exited unexpectedly".to_string(),
                    };
                    inner.fail_all_pending();
                    inner.set_state(SessionState::Failed);
                    let _ = events
                        .send(SessionEvent::Exited {
                            generation: inner.generation,
                            message,
                        })
                        .await;
                }
                return;
            }
        }
    }
}

async fn handle_notification(
    notification: JsonRpcNotification,
    events: &mpsc::Sender<SessionEvent>,
) {
    match notification.method.as_str() {
        "window/showMessage" | "window/logMessage" => {
            let params = notification.params.unwrap_or(Value::Null);
            let severity =
                Severity::from_message_type(params["type"].as_i64().unwrap_or(0));
            let message = params["message"].as_str().unwrap_or("").to_string();
            let _ = events
                .send(SessionEvent::Notification(NotificationEvent::server(
                    severity, message,
                )))
                .await;
        }
        other => {
            tracing::trace!(method = other, "ignoring server notification");
        }
    }
}
