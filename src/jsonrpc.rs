//! JSON-RPC 2.0 envelope types and the Content-Length framing used over the
//! server's standard I/O streams.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ClientError;

pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

/// A JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    pub params: Option<Value>,
}

/// A JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC notification (no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Value>,
}

/// A JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Write one framed message to the stream.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_string(message)
        .map_err(|e| ClientError::Transport(format!("failed to serialize message: {e}")))?;

    let framed = format!("Content-Length: {}\r\n\r\n{}", json.len(), json);

    writer
        .write_all(framed.as_bytes())
        .await
        .map_err(|e| ClientError::Transport(format!("failed to write to stdin: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| ClientError::Transport(format!("failed to flush stdin: {e}")))?;

    tracing::trace!(bytes = framed.len(), "sent message");

    Ok(())
}

/// Read one framed message from the stream.
///
/// Headers other than `Content-Length` are skipped; partial reads are
/// buffered by the underlying `AsyncBufRead` until a full frame is available.
/// A clean EOF before any header byte is reported as a transport error so the
/// reader loop can observe the stream closing.
pub async fn read_message<R>(reader: &mut R) -> Result<JsonRpcMessage, ClientError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| ClientError::Transport(format!("failed to read from stdout: {e}")))?;

        if bytes_read == 0 {
            return Err(ClientError::Transport(
                "server closed stdout (EOF)".to_string(),
            ));
        }

        if line == "\r\n" {
            break;
        }

        if line.starts_with("Content-Length: ") {
            content_length = Some(
                line[16..]
                    .trim()
                    .parse()
                    .map_err(|e| ClientError::Transport(format!("invalid Content-Length: {e}")))?,
            );
        }
    }

    let content_length = content_length
        .ok_or_else(|| ClientError::Transport("missing Content-Length header".to_string()))?;

    let mut content = vec![0u8; content_length];
    reader
        .read_exact(&mut content)
        .await
        .map_err(|e| ClientError::Transport(format!("failed to read message body: {e}")))?;

    let json = String::from_utf8(content)
        .map_err(|e| ClientError::Transport(format!("message body is not UTF-8: {e}")))?;

    tracing::trace!(body = %json, "received message");

    serde_json::from_str(&json)
        .map_err(|e| ClientError::Transport(format!("failed to deserialize message: {e}")))
}
