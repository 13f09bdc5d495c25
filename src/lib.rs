//! tcp-to-http - HTTP/1.1 over raw byte streams
//!
//! Incremental request parsing, a state-machine response writer with chunked
//! and compressed output, and a task-per-connection server with graceful
//! shutdown.

pub mod config;
pub mod http;
pub mod server;
