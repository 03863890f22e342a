//! Notification policy: filters server-originated messages by the configured
//! verbosity before surfacing them to the user.
//!
//! Every event is appended to the persistent log sink regardless of the
//! filter, so a dropped notification is still diagnosable after the fact.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::config::NotificationLevel;

/// Severity of a server- or client-originated message, matching the LSP
/// `MessageType` numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Log,
}

impl Severity {
    /// Map an LSP `MessageType` number; anything unknown is treated as Log.
    pub fn from_message_type(value: i64) -> Self {
        match value {
            1 => Severity::Error,
            2 => Severity::Warning,
            3 => Severity::Info,
            _ => Severity::Log,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
            Severity::Log => "LOG",
        }
    }
}

/// A single message on its way to the user, consumed once by the policy.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub severity: Severity,
    pub message: String,
    pub source: &'static str,
}

impl NotificationEvent {
    /// An event originating from the server process.
    pub fn server(severity: Severity, message: String) -> Self {
        Self {
            severity,
            message,
            source: "liku-server",
        }
    }

    /// An event originating from the client itself (lifecycle failures).
    pub fn client(severity: Severity, message: String) -> Self {
        Self {
            severity,
            message,
            source: "liku-client",
        }
    }
}

/// Host collaborator that shows a message to the user.
pub trait UserNotifier: Send + Sync {
    fn notify(&self, event: &NotificationEvent);
}

/// Persistent sink receiving every event, filtered or not.
pub trait LogSink: Send + Sync {
    fn append(&self, event: &NotificationEvent);
}

/// Log sink appending one line per event to a file.
pub struct FileLogSink {
    file: Mutex<std::fs::File>,
}

impl FileLogSink {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileLogSink {
    fn append(&self, event: &NotificationEvent) {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(
            file,
            "[{}] {}: {}",
            event.severity.label(),
            event.source,
            event.message
        ) {
            tracing::warn!("failed to append to log sink: {}", e);
        }
    }
}

impl NotificationLevel {
    /// Whether an event of the given severity is surfaced at this level.
    ///
    /// Levels select the severity they name: `onError` surfaces errors,
    /// `onWarning` surfaces warnings, `always` surfaces everything except
    /// pure log traffic.
    pub fn surfaces(self, severity: Severity) -> bool {
        match self {
            NotificationLevel::Off => false,
            NotificationLevel::OnError => severity == Severity::Error,
            NotificationLevel::OnWarning => severity == Severity::Warning,
            NotificationLevel::Always => severity != Severity::Log,
        }
    }
}

/// Filter in front of the host's user-facing notifier.
pub struct NotificationPolicy {
    level: NotificationLevel,
    notifier: Arc<dyn UserNotifier>,
    log: Arc<dyn LogSink>,
}

impl NotificationPolicy {
    pub fn new(
        level: NotificationLevel,
        notifier: Arc<dyn UserNotifier>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            level,
            notifier,
            log,
        }
    }

    /// Retune the filter without touching the running server.
    pub fn set_level(&mut self, level: NotificationLevel) {
        self.level = level;
    }

    pub fn level(&self) -> NotificationLevel {
        self.level
    }

    /// Consume one event: always log it, surface it if the filter matches.
    pub fn handle(&self, event: NotificationEvent) {
        self.log.append(&event);

        match event.severity {
            Severity::Error => tracing::error!(source = event.source, "{}", event.message),
            Severity::Warning => tracing::warn!(source = event.source, "{}", event.message),
            Severity::Info => tracing::info!(source = event.source, "{}", event.message),
            Severity::Log => tracing::trace!(source = event.source, "{}", event.message),
        }

        if self.level.surfaces(event.severity) {
            self.notifier.notify(&event);
        }
    }
}
