//! Client-side lifecycle management for the liku language server.
//!
//! The crate launches the Python server as `<interpreter> -m liku_server`,
//! speaks JSON-RPC over its standard I/O streams and supervises the process:
//! explicit start, restart and shutdown, settings-driven restarts, and a
//! notification policy that decides which server messages reach the user.
//! All lifecycle transitions run on a single controller task, so the host
//! only ever talks to a [`controller::ControllerHandle`].

pub mod config;
pub mod controller;
pub mod error;
pub mod jsonrpc;
pub mod notify;
pub mod resolver;
pub mod session;
pub mod transport;

pub use config::{ImportStrategy, NotificationLevel, Settings};
pub use controller::{ClientOptions, ControllerHandle, ControllerState, LifecycleController};
pub use error::ClientError;
pub use notify::{
    FileLogSink, LogSink, NotificationEvent, NotificationPolicy, Severity, UserNotifier,
};
pub use resolver::{InterpreterResolver, NoEnvironment, PythonEnvironment, ServerConfig};
pub use session::SessionState;
