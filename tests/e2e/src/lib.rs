//! End-to-end test support
//!
//! Builds the full service graph over a temporary database with scripted
//! stand-ins for the embeddings and judge APIs, so every scenario runs
//! hermetically.

pub mod harness;
pub mod mocks;
