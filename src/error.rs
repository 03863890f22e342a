//! Error taxonomy for the liku client.

use std::time::Duration;
use thiserror::Error;

/// Errors produced while resolving, launching or talking to the server.
///
/// Lifecycle failures (`Resolution`, `Spawn`, `Handshake`) abort the current
/// start or restart attempt and are surfaced through the notification policy;
/// they are never returned through the host's command invocation. Per-request
/// failures (`Timeout`, `Cancelled`, `Rpc`) go to the caller that issued the
/// request and do not affect the controller state.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No usable Python interpreter could be located.
    #[error("no usable Python interpreter: {0}")]
    Resolution(String),

    /// The server process could not be created.
    #[error("failed to launch server process: {0}")]
    Spawn(String),

    /// The initialize/initialized exchange did not complete.
    #[error("initialize handshake failed: {0}")]
    Handshake(String),

    /// A response did not arrive within the per-request deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The request was outstanding when its session was torn down.
    #[error("request cancelled: session was torn down")]
    Cancelled,

    /// Unexpected process exit or stream corruption.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server answered with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },
}
