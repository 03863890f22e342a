//! Fake liku server for lifecycle testing.
//!
//! Each fake is a Bash script speaking framed JSON-RPC on stdin/stdout,
//! written into a per-test temporary directory. The scripts ignore the
//! `-m liku_server` arguments the client passes, append one line to a spawn
//! log per launch and record every inbound message, so tests can count
//! process launches and inspect what the client sent.

use std::path::{Path, PathBuf};

const RPC_HELPERS: &str = r#"
# Function to read a message
read_message() {
    local content_length=0
    while IFS=: read -r key value; do
        key=$(echo "$key" | tr -d '\r\n')
        value=$(echo "$value" | tr -d '\r\n ')
        if [ "$key" = "Content-Length" ]; then
            content_length=$value
        fi
        # Empty line marks end of headers
        if [ -z "$key" ]; then
            break
        fi
    done

    if [ $content_length -gt 0 ]; then
        dd bs=1 count=$content_length 2>/dev/null
    fi
}

# Function to send a message
send_message() {
    local message="$1"
    local length=${#message}
    echo -en "Content-Length: $length\r\n\r\n$message"
}
"#;

/// A fake server script plus the logs it writes.
pub struct FakeServer {
    dir: tempfile::TempDir,
    script: PathBuf,
}

impl FakeServer {
    /// A well-behaved server: answers initialize and shutdown, acknowledges
    /// every other request, logs every launch, exit and message.
    pub fn responsive() -> anyhow::Result<Self> {
        Self::write(&format!(
            r#"#!/bin/bash
SPAWN_LOG="$(dirname "$0")/spawn.log"
MSG_LOG="$(dirname "$0")/messages.log"
echo "started" >> "$SPAWN_LOG"
trap 'echo "stopped" >> "$SPAWN_LOG"' EXIT
{RPC_HELPERS}
while true; do
    msg=$(read_message)
    if [ -z "$msg" ]; then
        break
    fi
    echo "$msg" >> "$MSG_LOG"

    method=$(echo "$msg" | grep -o '"method":"[^"]*"' | cut -d'"' -f4)
    msg_id=$(echo "$msg" | grep -o '"id":[0-9]*' | head -1 | cut -d':' -f2)

    case "$method" in
        "initialize")
            send_message '{{"jsonrpc":"2.0","id":'$msg_id',"result":{{"capabilities":{{"textDocumentSync":1,"hoverProvider":true}}}}}}'
            ;;
        "initialized")
            ;;
        "shutdown")
            send_message '{{"jsonrpc":"2.0","id":'$msg_id',"result":null}}'
            break
            ;;
        *)
            if [ -n "$msg_id" ]; then
                send_message '{{"jsonrpc":"2.0","id":'$msg_id',"result":{{"ok":true}}}}'
            fi
            ;;
    esac
done
"#
        ))
    }

    /// A server that never writes anything; initialize hangs until the
    /// client gives up.
    pub fn unresponsive() -> anyhow::Result<Self> {
        Self::write(&format!(
            r#"#!/bin/bash
SPAWN_LOG="$(dirname "$0")/spawn.log"
echo "started" >> "$SPAWN_LOG"
{RPC_HELPERS}
while true; do
    msg=$(read_message)
    if [ -z "$msg" ]; then
        break
    fi
done
"#
        ))
    }

    /// A server that completes the handshake and then goes silent: no
    /// response to any later request, shutdown included.
    pub fn blocking_after_init() -> anyhow::Result<Self> {
        Self::write(&format!(
            r#"#!/bin/bash
SPAWN_LOG="$(dirname "$0")/spawn.log"
echo "started" >> "$SPAWN_LOG"
{RPC_HELPERS}
while true; do
    msg=$(read_message)
    if [ -z "$msg" ]; then
        break
    fi

    method=$(echo "$msg" | grep -o '"method":"[^"]*"' | cut -d'"' -f4)
    msg_id=$(echo "$msg" | grep -o '"id":[0-9]*' | head -1 | cut -d':' -f2)

    case "$method" in
        "initialize")
            send_message '{{"jsonrpc":"2.0","id":'$msg_id',"result":{{"capabilities":{{"textDocumentSync":1}}}}}}'
            ;;
        *)
            # Stuck server: swallow everything after the handshake.
            ;;
    esac
done
"#
        ))
    }

    /// A server that handshakes normally and crashes with a non-zero exit
    /// once it receives a `liku/crash` notification.
    pub fn crash_on_command() -> anyhow::Result<Self> {
        Self::write(&format!(
            r#"#!/bin/bash
SPAWN_LOG="$(dirname "$0")/spawn.log"
echo "started" >> "$SPAWN_LOG"
{RPC_HELPERS}
while true; do
    msg=$(read_message)
    if [ -z "$msg" ]; then
        break
    fi

    method=$(echo "$msg" | grep -o '"method":"[^"]*"' | cut -d'"' -f4)
    msg_id=$(echo "$msg" | grep -o '"id":[0-9]*' | head -1 | cut -d':' -f2)

    case "$method" in
        "initialize")
            send_message '{{"jsonrpc":"2.0","id":'$msg_id',"result":{{"capabilities":{{"textDocumentSync":1}}}}}}'
            ;;
        "liku/crash")
            exit 7
            ;;
        "shutdown")
            send_message '{{"jsonrpc":"2.0","id":'$msg_id',"result":null}}'
            break
            ;;
    esac
done
"#
        ))
    }

    /// A server that sends one `window/showMessage` per severity right after
    /// the handshake, then behaves like the responsive server.
    pub fn chatty() -> anyhow::Result<Self> {
        Self::write(&format!(
            r#"#!/bin/bash
SPAWN_LOG="$(dirname "$0")/spawn.log"
echo "started" >> "$SPAWN_LOG"
{RPC_HELPERS}
while true; do
    msg=$(read_message)
    if [ -z "$msg" ]; then
        break
    fi

    method=$(echo "$msg" | grep -o '"method":"[^"]*"' | cut -d'"' -f4)
    msg_id=$(echo "$msg" | grep -o '"id":[0-9]*' | head -1 | cut -d':' -f2)

    case "$method" in
        "initialize")
            send_message '{{"jsonrpc":"2.0","id":'$msg_id',"result":{{"capabilities":{{"textDocumentSync":1}}}}}}'
            ;;
        "initialized")
            send_message '{{"jsonrpc":"2.0","method":"window/showMessage","params":{{"type":1,"message":"fake error"}}}}'
            send_message '{{"jsonrpc":"2.0","method":"window/showMessage","params":{{"type":2,"message":"fake warning"}}}}'
            send_message '{{"jsonrpc":"2.0","method":"window/logMessage","params":{{"type":4,"message":"fake log"}}}}'
            ;;
        "shutdown")
            send_message '{{"jsonrpc":"2.0","id":'$msg_id',"result":null}}'
            break
            ;;
    esac
done
"#
        ))
    }

    fn write(script: &str) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fake_liku_server.sh");
        std::fs::write(&path, script)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path)?.permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms)?;
        }

        Ok(Self { dir, script: path })
    }

    /// Path tests pass as the explicit `interpreter` setting.
    pub fn script_path(&self) -> &Path {
        &self.script
    }

    pub fn workspace(&self) -> &Path {
        self.dir.path()
    }

    pub fn stderr_log(&self) -> PathBuf {
        self.dir.path().join("stderr.log")
    }

    /// Number of times the script was launched.
    pub fn spawn_count(&self) -> usize {
        match std::fs::read_to_string(self.dir.path().join("spawn.log")) {
            Ok(contents) => contents.lines().filter(|l| *l == "started").count(),
            Err(_) => 0,
        }
    }

    /// Highest number of simultaneously running instances, replayed from the
    /// started/stopped lines of the spawn log. Only the responsive variant
    /// writes the stopped marker.
    pub fn max_concurrent(&self) -> usize {
        let contents =
            std::fs::read_to_string(self.dir.path().join("spawn.log")).unwrap_or_default();
        let mut live = 0usize;
        let mut high_water = 0usize;
        for line in contents.lines() {
            match line {
                "started" => {
                    live += 1;
                    high_water = high_water.max(live);
                }
                "stopped" => live = live.saturating_sub(1),
                _ => {}
            }
        }
        high_water
    }

    /// Raw messages received by responsive servers, one per line.
    pub fn received_messages(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("messages.log")).unwrap_or_default()
    }
}
