//! Interpreter resolution: decides which Python executable launches the
//! server and assembles the launch configuration.
//!
//! Resolution order: explicit `interpreter` setting entries first, then the
//! interpreter selected in the host environment when `importStrategy` is
//! `fromEnvironment`, then the interpreter bundled with the client. The
//! resolver never touches the subprocess; it only produces a `ServerConfig`
//! for the lifecycle controller to act on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::{ImportStrategy, Settings};
use crate::error::ClientError;

/// Module the server is started from: `<interpreter> -m liku_server`.
pub const SERVER_MODULE: &str = "liku_server";

/// Host collaborator reporting the interpreter currently selected in the
/// editor environment.
pub trait PythonEnvironment: Send + Sync {
    fn active_interpreter(&self) -> Option<PathBuf>;
}

/// Environment provider for hosts without interpreter discovery.
pub struct NoEnvironment;

impl PythonEnvironment for NoEnvironment {
    fn active_interpreter(&self) -> Option<PathBuf> {
        None
    }
}

/// Resolved launch specification for one server instance.
///
/// Immutable once constructed; a new value is built whenever settings or the
/// environment change, and compared against the running one to decide whether
/// a restart is needed.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub interpreter: PathBuf,
    pub server_module: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub initialization_options: Value,
}

/// Resolves the interpreter and builds `ServerConfig`s.
pub struct InterpreterResolver {
    environment: Arc<dyn PythonEnvironment>,
    bundled_interpreter: Option<PathBuf>,
}

impl InterpreterResolver {
    pub fn new(
        environment: Arc<dyn PythonEnvironment>,
        bundled_interpreter: Option<PathBuf>,
    ) -> Self {
        Self {
            environment,
            bundled_interpreter,
        }
    }

    /// Resolve the interpreter for the given settings and build the launch
    /// configuration for the workspace.
    pub fn resolve(
        &self,
        settings: &Settings,
        workspace: &Path,
    ) -> Result<ServerConfig, ClientError> {
        let interpreter = self.pick_interpreter(settings)?;
        tracing::debug!(interpreter = %interpreter.display(), "resolved interpreter");

        Ok(ServerConfig {
            interpreter,
            server_module: SERVER_MODULE.to_string(),
            args: settings.args.clone(),
            cwd: workspace.to_path_buf(),
            initialization_options: initialization_options(settings, workspace),
        })
    }

    fn pick_interpreter(&self, settings: &Settings) -> Result<PathBuf, ClientError> {
        for entry in &settings.interpreter {
            let candidate = PathBuf::from(entry);
            if candidate.is_file() {
                return Ok(candidate);
            }
            tracing::debug!(entry = %entry, "skipping missing interpreter entry");
        }

        if settings.import_strategy == ImportStrategy::FromEnvironment {
            if let Some(active) = self.environment.active_interpreter() {
                if active.is_file() {
                    return Ok(active);
                }
                tracing::debug!(
                    interpreter = %active.display(),
                    "environment interpreter does not exist"
                );
            }
        }

        if let Some(bundled) = &self.bundled_interpreter {
            if bundled.is_file() {
                return Ok(bundled.clone());
            }
            tracing::debug!(
                interpreter = %bundled.display(),
                "bundled interpreter does not exist"
            );
        }

        Err(ClientError::Resolution(
            "no interpreter setting, environment interpreter or bundled interpreter is usable"
                .to_string(),
        ))
    }
}

/// Initialization options in the shape the server reads them: global
/// defaults plus one settings block per workspace.
fn initialization_options(settings: &Settings, workspace: &Path) -> Value {
    let import_strategy = serde_json::to_value(settings.import_strategy)
        .unwrap_or_else(|_| Value::String("useBundled".to_string()));
    let show_notifications = serde_json::to_value(settings.show_notifications)
        .unwrap_or_else(|_| Value::String("off".to_string()));

    let workspace_settings = json!({
        "cwd": workspace.to_string_lossy(),
        "workspace": workspace_uri(workspace),
        "path": settings.path,
        "interpreter": settings.interpreter,
        "args": settings.args,
        "importStrategy": import_strategy,
        "showNotifications": show_notifications,
        "htmlFunction": settings.html_function,
    });

    json!({
        "globalSettings": {
            "path": [],
            "interpreter": [],
            "args": [],
            "importStrategy": "useBundled",
            "showNotifications": "off",
            "htmlFunction": "html",
        },
        "settings": [workspace_settings],
    })
}

pub(crate) fn workspace_uri(workspace: &Path) -> String {
    format!("file://{}", workspace.to_string_lossy())
}
