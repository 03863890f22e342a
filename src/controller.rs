//! Lifecycle controller: the single owner of the server session.
//!
//! The controller runs as one task consuming a command channel, so lifecycle
//! transitions are serialized by construction. Rapid restart requests
//! coalesce into a single restart, failures surface exactly one notification
//! through the policy, and a dead server is never restarted automatically.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

use crate::config::Settings;
use crate::error::ClientError;
use crate::notify::{NotificationEvent, NotificationPolicy, Severity};
use crate::resolver::{InterpreterResolver, ServerConfig};
use crate::session::{Session, SessionEvent, SessionOptions};

/// Commands accepted by the controller task.
pub enum Command {
    Start,
    Restart,
    Shutdown,
    ConfigChanged(Settings),
    InterpreterChanged,
    Request {
        method: String,
        params: Option<Value>,
        reply: oneshot::Sender<Result<Value, ClientError>>,
    },
    Notify {
        method: String,
        params: Option<Value>,
    },
}

/// What a drained batch of commands collapses into.
enum LifecycleAction {
    Start,
    Restart,
    Shutdown,
}

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Starting,
    Ready,
    Restarting,
    Stopping,
    Failed,
}

/// Tunables for the controller and its sessions.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Deadline for the initialize exchange.
    pub handshake_timeout: Duration,
    /// Deadline for an ordinary request.
    pub request_timeout: Duration,
    /// Deadline for the shutdown request during teardown.
    pub shutdown_timeout: Duration,
    /// How long a closing process may take to exit before it is killed.
    pub kill_grace: Duration,
    /// How long a restart waits for orderly teardown of the old session.
    pub restart_quiesce: Duration,
    /// Python module launched with `-m`.
    pub server_module: String,
    /// File receiving the server's stderr.
    pub stderr_log: PathBuf,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(2),
            kill_grace: Duration::from_secs(2),
            restart_quiesce: Duration::from_secs(3),
            server_module: crate::resolver::SERVER_MODULE.to_string(),
            stderr_log: std::env::temp_dir()
                .join(format!("liku-server-{}.log", std::process::id())),
        }
    }
}

/// Cloneable host-facing handle to the controller task.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    state: Arc<Mutex<ControllerState>>,
    current_config: Arc<Mutex<Option<ServerConfig>>>,
}

impl ControllerHandle {
    pub fn start(&self) {
        self.send(Command::Start);
    }

    pub fn restart(&self) {
        self.send(Command::Restart);
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn config_changed(&self, settings: Settings) {
        self.send(Command::ConfigChanged(settings));
    }

    pub fn interpreter_changed(&self) {
        self.send(Command::InterpreterChanged);
    }

    pub fn notify(&self, method: impl Into<String>, params: Option<Value>) {
        self.send(Command::Notify {
            method: method.into(),
            params,
        });
    }

    /// Issue a request against the running session.
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<Value, ClientError> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Request {
            method: method.into(),
            params,
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return Err(ClientError::Cancelled);
        }
        rx.await.unwrap_or(Err(ClientError::Cancelled))
    }

    pub fn state(&self) -> ControllerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current_config(&self) -> Option<ServerConfig> {
        self.current_config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn send(&self, command: Command) {
        match self.commands.try_send(command) {
            Ok(()) => {}
            // Queue full: hand off to an async send so lifecycle commands
            // (shutdown in particular) are never lost under a burst.
            Err(mpsc::error::TrySendError::Full(command)) => {
                let commands = self.commands.clone();
                tokio::spawn(async move {
                    if commands.send(command).await.is_err() {
                        tracing::warn!("controller gone, command dropped");
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("controller gone, command dropped");
            }
        }
    }
}

/// The controller task and the state it owns.
pub struct LifecycleController {
    workspace: PathBuf,
    settings: Settings,
    resolver: InterpreterResolver,
    policy: NotificationPolicy,
    options: ClientOptions,

    state: Arc<Mutex<ControllerState>>,
    current_config: Arc<Mutex<Option<ServerConfig>>>,
    session: Option<Session>,
    next_generation: u64,
    events_tx: mpsc::Sender<SessionEvent>,
}

impl LifecycleController {
    /// Spawn the controller task on the given runtime and return its handle.
    pub fn spawn(
        runtime: &tokio::runtime::Handle,
        workspace: impl AsRef<Path>,
        settings: Settings,
        resolver: InterpreterResolver,
        mut policy: NotificationPolicy,
        options: ClientOptions,
    ) -> ControllerHandle {
        policy.set_level(settings.show_notifications);

        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (events_tx, events_rx) = mpsc::channel(32);
        let state = Arc::new(Mutex::new(ControllerState::Idle));
        let current_config = Arc::new(Mutex::new(None));

        let controller = LifecycleController {
            workspace: workspace.as_ref().to_path_buf(),
            settings,
            resolver,
            policy,
            options,
            state: state.clone(),
            current_config: current_config.clone(),
            session: None,
            next_generation: 0,
            events_tx,
        };
        runtime.spawn(controller.run(commands_rx, events_rx));

        ControllerHandle {
            commands: commands_tx,
            state,
            current_config,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<SessionEvent>,
    ) {
        loop {
            tokio::select! {
                biased;

                Some(event) = events.recv() => {
                    self.handle_session_event(event);
                }
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    match self.coalesce(command, &mut commands).await {
                        Some(LifecycleAction::Start) => self.do_start_if_stopped().await,
                        Some(LifecycleAction::Restart) => self.do_restart().await,
                        Some(LifecycleAction::Shutdown) => self.do_shutdown().await,
                        None => {}
                    }
                }
            }
        }

        // Host dropped every handle; tear the session down.
        self.teardown().await;
    }

    /// Drain the command queue and collapse it into at most one lifecycle
    /// action: a burst of restart-inducing commands runs the restart once
    /// ("run once more", not once per request), and a queued `Shutdown` wins
    /// outright. Settings updates are applied while draining; requests and
    /// notifications run in arrival order.
    async fn coalesce(
        &mut self,
        first: Command,
        commands: &mut mpsc::Receiver<Command>,
    ) -> Option<LifecycleAction> {
        let mut want_start = false;
        let mut want_restart = false;
        let mut next = Some(first);

        loop {
            let command = match next.take() {
                Some(command) => command,
                None => match commands.try_recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };
            match command {
                Command::Shutdown => return Some(LifecycleAction::Shutdown),
                Command::Start => want_start = true,
                Command::Restart => want_restart = true,
                Command::ConfigChanged(settings) => {
                    if self.apply_settings(settings) {
                        want_restart = true;
                    }
                }
                Command::InterpreterChanged => {
                    if self.interpreter_config_changed() {
                        want_restart = true;
                    }
                }
                Command::Request {
                    method,
                    params,
                    reply,
                } => self.do_request(method, params, reply).await,
                Command::Notify { method, params } => self.do_notify(method, params).await,
            }
        }

        if want_restart && (self.session.is_some() || self.state() == ControllerState::Failed) {
            Some(LifecycleAction::Restart)
        } else if want_start {
            Some(LifecycleAction::Start)
        } else {
            if want_restart {
                tracing::debug!("ignoring restart, no server running");
            }
            None
        }
    }

    /// Apply new settings; returns true when the running server must be
    /// restarted to pick them up.
    fn apply_settings(&mut self, settings: Settings) -> bool {
        let needs_restart = self.settings.requires_restart(&settings);
        if self.settings.show_notifications != settings.show_notifications {
            tracing::debug!(level = ?settings.show_notifications, "retuning notification policy");
            self.policy.set_level(settings.show_notifications);
        }
        self.settings = settings;
        needs_restart && self.session.is_some()
    }

    /// Whether an environment interpreter change yields a different launch
    /// configuration than the one currently running.
    fn interpreter_config_changed(&self) -> bool {
        let current = self
            .current_config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(current) = current else {
            return false;
        };
        match self.resolver.resolve(&self.settings, &self.workspace) {
            Ok(resolved) => resolved != current,
            Err(e) => {
                tracing::debug!("interpreter change resolution failed: {}", e);
                false
            }
        }
    }

    async fn do_start_if_stopped(&mut self) {
        match self.state() {
            ControllerState::Idle | ControllerState::Failed => self.do_start().await,
            state => {
                tracing::debug!(?state, "ignoring start, server already managed");
            }
        }
    }

    async fn do_restart(&mut self) {
        if self.session.is_none() && self.state() == ControllerState::Idle {
            tracing::debug!("ignoring restart, no server running");
            return;
        }

        self.set_state(ControllerState::Restarting);
        if let Some(session) = self.session.take() {
            session.quiesce();
            let teardown = session.shutdown();
            if tokio::time::timeout(self.options.restart_quiesce, teardown)
                .await
                .is_err()
            {
                tracing::warn!("restart teardown timed out, force-closing old session");
                session.force_close().await;
            }
        }
        self.clear_config();
        self.do_start().await;
    }

    async fn do_shutdown(&mut self) {
        if self.session.is_none() && self.state() == ControllerState::Idle {
            return;
        }
        self.set_state(ControllerState::Stopping);
        self.teardown().await;
        self.set_state(ControllerState::Idle);
    }

    async fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown().await;
        }
        self.clear_config();
    }

    async fn do_start(&mut self) {
        self.set_state(ControllerState::Starting);
        match self.try_start().await {
            Ok(session) => {
                self.session = Some(session);
                self.set_state(ControllerState::Ready);
            }
            Err(e) => {
                self.session = None;
                self.clear_config();
                self.set_state(ControllerState::Failed);
                self.policy.handle(NotificationEvent::client(
                    Severity::Error,
                    format!("liku language server failed to start: {e}"),
                ));
            }
        }
    }

    async fn try_start(&mut self) -> Result<Session, ClientError> {
        let mut config = self.resolver.resolve(&self.settings, &self.workspace)?;
        config.server_module = self.options.server_module.clone();

        self.next_generation += 1;
        let session = Session::start(
            &config,
            SessionOptions {
                handshake_timeout: self.options.handshake_timeout,
                request_timeout: self.options.request_timeout,
                shutdown_timeout: self.options.shutdown_timeout,
                kill_grace: self.options.kill_grace,
            },
            self.next_generation,
            self.events_tx.clone(),
            &self.options.stderr_log,
        )
        .await?;

        *self
            .current_config
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(config);
        Ok(session)
    }

    async fn do_request(
        &mut self,
        method: String,
        params: Option<Value>,
        reply: oneshot::Sender<Result<Value, ClientError>>,
    ) {
        let Some(session) = &self.session else {
            let _ = reply.send(Err(ClientError::Cancelled));
            return;
        };
        let client = session.client();
        // Run off the controller task so a slow request cannot stall
        // lifecycle commands.
        tokio::spawn(async move {
            let outcome = client.request(&method, params).await;
            let _ = reply.send(outcome);
        });
    }

    async fn do_notify(&mut self, method: String, params: Option<Value>) {
        let Some(session) = &self.session else {
            tracing::debug!(method, "dropping notification, no server running");
            return;
        };
        if let Err(e) = session.client().notify(&method, params).await {
            tracing::warn!(method, "failed to send notification: {}", e);
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Notification(notification) => {
                self.policy.handle(notification);
            }
            SessionEvent::Exited {
                generation,
                message,
            } => {
                let current = self.session.as_ref().map(Session::generation);
                if current != Some(generation) {
                    tracing::debug!(generation, "ignoring exit of superseded session");
                    return;
                }
                self.session = None;
                self.clear_config();
                self.set_state(ControllerState::Failed);
                self.policy.handle(NotificationEvent::client(
                    Severity::Error,
                    format!("liku language server stopped: {message}"),
                ));
            }
        }
    }

    fn state(&self) -> ControllerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ControllerState) {
        let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *current != state {
            tracing::debug!(from = ?*current, to = ?state, "controller state change");
            *current = state;
        }
    }

    fn clear_config(&self) {
        *self
            .current_config
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
    }
}
