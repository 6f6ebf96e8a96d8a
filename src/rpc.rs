//! JSON-RPC 2.0 transport over Unix domain sockets.
//!
//! Messages use HTTP-style Content-Length framing (same as LSP):
//!
//! ```text
//! Content-Length: 47\r\n
//! \r\n
//! {"jsonrpc":"2.0","method":"tools/list","id":1}
//! ```
//!
//! The server serves one connection per task; each request is dispatched
//! through the bridge and answered with a response envelope in the JSON-RPC
//! `result` field. The client side is used by integration tests and by
//! front ends that speak the same protocol.

mod client;
mod framing;
mod server;

pub use client::{BridgeClient, ClientError};
pub use framing::{read_message, write_message};
pub use server::{BridgeServer, ServerError};
