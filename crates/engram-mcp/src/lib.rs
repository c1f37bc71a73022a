//! Engram MCP Server
//!
//! Exposes the cognitive memory engine as an MCP server over stdio JSON-RPC:
//! typed tools for ingestion, retrieval, graph operations, and evaluation,
//! plus read-only memory:// resources. All logging goes to stderr; stdout is
//! reserved for protocol frames.

pub mod error;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod state;
pub mod tools;

pub use error::{ErrorKind, ToolError};
pub use server::McpServer;
pub use state::Services;
