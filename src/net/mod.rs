//! Connection establishment.
//!
//! This module provides:
//! - Endpoint and proxy URL types
//! - DNS resolution, TCP connect and `CONNECT` tunnelling
//! - TLS session setup
//! - The connection factory and its reconnect-once policy

mod connector;
mod endpoint;
mod proxy;
pub mod tls;
pub mod tunnel;

// Re-export public API
pub use connector::{with_reconnect, Attempt, Connection, ConnectionFactory, Connector};
pub use endpoint::Endpoint;
pub use proxy::ProxyConfig;
pub use tls::TlsMode;
