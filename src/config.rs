//! Workspace settings consumed by the client.
//!
//! The host pushes a fresh `Settings` value into the lifecycle controller
//! whenever the workspace configuration changes; settings are never polled.

use serde::{Deserialize, Serialize};

/// How the server locates the liku libraries it imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportStrategy {
    /// Prefer the libraries bundled with the client.
    UseBundled,
    /// Prefer the interpreter environment selected in the host.
    FromEnvironment,
}

impl Default for ImportStrategy {
    fn default() -> Self {
        ImportStrategy::UseBundled
    }
}

/// Which server-originated messages are surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationLevel {
    Off,
    OnError,
    OnWarning,
    Always,
}

impl Default for NotificationLevel {
    fn default() -> Self {
        NotificationLevel::Off
    }
}

/// Per-workspace settings for the liku language server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Name of the html-producing function, passed to the server as an
    /// initialization option.
    #[serde(default = "default_html_function")]
    pub html_function: String,

    /// Import strategy forwarded to the server and used during interpreter
    /// resolution.
    #[serde(default)]
    pub import_strategy: ImportStrategy,

    /// Explicit interpreter override; the first entry that exists on disk
    /// wins.
    #[serde(default)]
    pub interpreter: Vec<String>,

    /// Explicit server launch path override, forwarded to the server.
    #[serde(default)]
    pub path: Vec<String>,

    /// Extra arguments appended to the server command line.
    #[serde(default)]
    pub args: Vec<String>,

    /// Verbosity filter applied by the notification policy.
    #[serde(default)]
    pub show_notifications: NotificationLevel,
}

fn default_html_function() -> String {
    "html".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            html_function: default_html_function(),
            import_strategy: ImportStrategy::default(),
            interpreter: Vec::new(),
            path: Vec::new(),
            args: Vec::new(),
            show_notifications: NotificationLevel::default(),
        }
    }
}

impl Settings {
    /// Whether moving from `self` to `next` requires a server restart.
    ///
    /// `showNotifications` only retunes the notification policy, so it is
    /// deliberately excluded here.
    pub fn requires_restart(&self, next: &Settings) -> bool {
        self.html_function != next.html_function
            || self.import_strategy != next.import_strategy
            || self.interpreter != next.interpreter
            || self.path != next.path
            || self.args != next.args
    }
}
