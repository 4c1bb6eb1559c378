//! Network layer for ghfixture
//!
//! Serves stubs over HTTP/1.1 with bounded concurrency and forwards proxied
//! requests upstream.

mod client;
mod connection_pool;
mod http;
mod server;

pub use client::UpstreamClient;
pub use connection_pool::{ConnectionGuard, ConnectionPool};
pub use http::HttpHandler;
pub use server::{MockServer, ServerState};

/// Upstream connection setup timeout
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
