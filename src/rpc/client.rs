//! JSON-RPC client for the bridge socket.
//!
//! Used by the integration tests and by front ends that consume the bridge
//! over its native transport. Every call carries an automatic timeout so a
//! stuck server cannot hang the caller.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::rpc::framing::{read_message, write_message};

/// Default request timeout in seconds.
///
/// Generous on purpose: a tools/call request includes the engine's own
/// wall-clock budget.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Client-side transport errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to connect to the server socket.
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),

    /// No response within the client-side deadline.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// Framing or encoding failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered with a JSON-RPC protocol error.
    #[error("server error {code}: {message}")]
    Rpc {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },
}

/// Client for one connection to the bridge server.
pub struct BridgeClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    request_id: AtomicU64,
    timeout: Duration,
}

impl BridgeClient {
    /// Connect to the bridge server at the given socket path.
    pub async fn connect(socket_path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(ClientError::ConnectionFailed)?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            request_id: AtomicU64::new(1),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Connect with retry and exponential backoff (100ms, 200ms, 400ms, ...).
    ///
    /// Useful at startup when the server may still be binding its socket.
    pub async fn connect_with_retry(
        socket_path: &Path,
        max_attempts: u32,
    ) -> Result<Self, ClientError> {
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match Self::connect(socket_path).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < max_attempts {
                        let delay = Duration::from_millis(100 * (1 << (attempt - 1)));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(ClientError::Timeout(0)))
    }

    /// Override the per-request timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request and wait for the response envelope.
    ///
    /// The returned value is the bridge's response envelope as raw JSON;
    /// a JSON-RPC protocol error becomes `ClientError::Rpc`.
    pub async fn call(
        &mut self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(method, params, id);

        let result = timeout(self.timeout, self.send_receive(&request)).await;
        match result {
            Ok(Ok(response)) => Self::unwrap_response(response),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ClientError::Timeout(self.timeout.as_secs())),
        }
    }

    async fn send_receive(
        &mut self,
        request: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, ClientError> {
        let request_json = serde_json::to_string(request)
            .map_err(|e| ClientError::Protocol(format!("failed to serialize request: {e}")))?;

        write_message(&mut self.writer, &request_json)
            .await
            .map_err(|e| ClientError::Protocol(format!("failed to send request: {e}")))?;

        let response_json = read_message(&mut self.reader)
            .await
            .map_err(|e| ClientError::Protocol(format!("failed to read response: {e}")))?;

        serde_json::from_str(&response_json)
            .map_err(|e| ClientError::Protocol(format!("failed to parse response: {e}")))
    }

    fn unwrap_response(response: JsonRpcResponse) -> Result<serde_json::Value, ClientError> {
        if let Some(err) = response.error {
            return Err(ClientError::Rpc {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        response
            .result
            .ok_or_else(|| ClientError::Protocol("response missing both result and error".into()))
    }
}
