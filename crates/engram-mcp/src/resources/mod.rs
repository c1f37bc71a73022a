//! Read-only resources under the memory:// URI scheme.

pub mod memory;
