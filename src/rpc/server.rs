//! Unix-socket JSON-RPC server fronting the dispatcher.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::invoker::Invoker;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_REQUEST, PARSE_ERROR};
use crate::rpc::framing::{read_message, write_message};

/// Server-side transport errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind the listening socket.
    #[error("failed to bind socket {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Accept loop failed.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),
}

/// JSON-RPC server bound to a Unix domain socket.
///
/// Each accepted connection is served on its own task, so a slow engine
/// invocation on one connection never delays another.
pub struct BridgeServer<I> {
    dispatcher: Arc<Dispatcher<I>>,
    listener: UnixListener,
    socket_path: PathBuf,
}

impl<I> BridgeServer<I>
where
    I: Invoker + Send + Sync + 'static,
{
    /// Bind the server socket, replacing a stale socket file if present.
    pub fn bind(socket_path: &Path, dispatcher: Arc<Dispatcher<I>>) -> Result<Self, ServerError> {
        if socket_path.exists() {
            debug!("removing stale socket file {}", socket_path.display());
            let _ = std::fs::remove_file(socket_path);
        }

        let listener = UnixListener::bind(socket_path).map_err(|source| ServerError::Bind {
            path: socket_path.to_path_buf(),
            source,
        })?;

        info!("listening on {}", socket_path.display());
        Ok(Self {
            dispatcher,
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// Accept and serve connections until the accept loop fails.
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            let (stream, _addr) = self.listener.accept().await.map_err(ServerError::Accept)?;
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move {
                serve_connection(dispatcher, stream).await;
            });
        }
    }

    /// Path this server is bound to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Serve framed requests on one connection until the peer disconnects.
async fn serve_connection<I: Invoker>(dispatcher: Arc<Dispatcher<I>>, stream: UnixStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let message = match read_message(&mut reader).await {
            Ok(message) => message,
            Err(e) => {
                // Normal disconnect also lands here; log at debug only.
                debug!("connection closed: {e}");
                return;
            }
        };

        let response = match serde_json::from_str::<JsonRpcRequest>(&message) {
            Ok(request) if request.jsonrpc == "2.0" => {
                let envelope = dispatcher
                    .handle_rpc(&request.method, request.params)
                    .await;
                match envelope.and_then(serde_json::to_value) {
                    Ok(result) => JsonRpcResponse::result(result, request.id),
                    Err(e) => JsonRpcResponse::error(
                        INTERNAL_ERROR,
                        format!("internal serialization failure: {e}"),
                        request.id,
                    ),
                }
            }
            Ok(request) => JsonRpcResponse::error(
                INVALID_REQUEST,
                format!("unsupported jsonrpc version: {}", request.jsonrpc),
                request.id,
            ),
            Err(e) => JsonRpcResponse::error(PARSE_ERROR, format!("invalid request: {e}"), None),
        };

        let body = match serde_json::to_string(&response) {
            Ok(body) => body,
            Err(e) => {
                warn!("failed to serialize response: {e}");
                return;
            }
        };

        if let Err(e) = write_message(&mut write_half, &body).await {
            warn!("failed to write response: {e}");
            return;
        }
    }
}
