//! stdio Transport
//!
//! Newline-delimited JSON-RPC frames on stdin/stdout. All logging goes to
//! stderr; stdout carries nothing but protocol frames. A shutdown signal
//! stops frame intake, lets the in-flight handler finish under the drain
//! deadline, and returns.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::McpServer;

/// How long in-flight work may run after a shutdown signal.
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

const FALLBACK_ERROR: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// stdio transport for the MCP server.
pub struct StdioTransport {
    shutdown: watch::Receiver<bool>,
}

impl StdioTransport {
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self { shutdown }
    }

    /// Serve frames until stdin closes or shutdown is signalled.
    pub async fn run(mut self, mut server: McpServer) -> std::io::Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        let mut lines = stdin.lines();

        loop {
            // Once shutdown is signalled, no new frames are accepted.
            if *self.shutdown.borrow() {
                debug!("Shutdown signalled; stopping frame intake");
                break;
            }

            let line = tokio::select! {
                biased;
                _ = self.shutdown.changed() => continue,
                line = lines.next_line() => line?,
            };

            let Some(line) = line else {
                debug!("stdin closed");
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            debug!("Received frame: {} bytes", line.len());

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Unparseable frame: {}", e);
                    write_response(
                        &mut stdout,
                        &JsonRpcResponse::failure(None, JsonRpcError::parse_error()),
                    )
                    .await?;
                    continue;
                }
            };

            // The in-flight handler finishes normally, but once shutdown is
            // signalled it only gets the drain deadline.
            let mut drain_watch = self.shutdown.clone();
            let response = tokio::select! {
                response = server.handle_request(request) => response,
                _ = async move {
                    if !*drain_watch.borrow() {
                        let _ = drain_watch.changed().await;
                    }
                    tokio::time::sleep(DRAIN_DEADLINE).await;
                } => {
                    warn!("In-flight handler exceeded the drain deadline");
                    break;
                }
            };

            if let Some(response) = response {
                write_response(&mut stdout, &response).await?;
            }
        }

        stdout.flush().await?;
        Ok(())
    }
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    response: &JsonRpcResponse,
) -> std::io::Result<()> {
    let frame = match serde_json::to_string(response) {
        Ok(frame) => frame,
        Err(e) => {
            // Emit a minimal error frame so the client never hangs.
            error!("Failed to serialize response: {}", e);
            FALLBACK_ERROR.to_string()
        }
    };
    debug!("Sending frame: {} bytes", frame.len());
    stdout.write_all(frame.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
