//! Stdio Protocol
//!
//! JSON-RPC 2.0 over stdin/stdout.

pub mod messages;
pub mod stdio;
pub mod types;
