//! expr-bridge: a tool-execution bridge for the ExprPredictor engine.
//!
//! The bridge exposes a fixed set of gene-expression computations —
//! implemented by an external, pre-built engine executable — as named
//! tools behind a uniform JSON-RPC request/response protocol:
//!
//! - `registry` - compiled-in table of tools and their schemas
//! - `schema` - declarative input schemas and argument validation
//! - `invoker` - child-process execution with deadline enforcement
//! - `extract` - structured-result extraction from raw engine output
//! - `dispatch` - per-call orchestration and the response envelope
//! - `protocol` - JSON-RPC 2.0 wire types
//! - `rpc` - Unix-socket transport (server and client)
//! - `config` - startup configuration with env overrides
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use expr_bridge::config::BridgeConfig;
//! use expr_bridge::dispatch::Dispatcher;
//! use expr_bridge::registry::ToolRegistry;
//!
//! let config = Arc::new(BridgeConfig::load()?);
//! let dispatcher = Dispatcher::new(Arc::new(ToolRegistry::builtin()), config);
//! let envelope = dispatcher.handle_rpc("tools/list", serde_json::json!({})).await?;
//! ```

pub mod config;
pub mod dispatch;
pub mod extract;
pub mod invoker;
pub mod protocol;
pub mod registry;
pub mod rpc;
pub mod schema;
