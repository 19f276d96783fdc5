//! Configuration constants.
//!
//! This module defines the defaults and limits used throughout the client:
//! timeouts, buffer sizes, channel capacity and worker pool sizing.

// Network operation timeouts
/// Connect-phase timeout in seconds.
/// Bounds DNS resolution plus the TCP connect (to the target or to the proxy).
/// Once connected, the TLS handshake and data phases are not time-boxed.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;
/// DNS query timeout in seconds (per resolver attempt)
pub const DNS_TIMEOUT_SECS: u64 = 5;
/// Number of attempts the resolver makes per query
pub const DNS_ATTEMPTS: usize = 2;

// Relay channel
/// Default capacity of a relay channel (number of queued fragments).
/// `send` waits once this many fragments are queued; `try_send` drops.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

// Response parsing limits
/// Maximum size of a response head (status line plus headers) in bytes
pub const MAX_RESPONSE_HEAD_SIZE: usize = 64 * 1024;
/// Maximum number of headers parsed from a single response head
pub const MAX_RESPONSE_HEADERS: usize = 100;
/// Maximum size of a whole-response body, before and after decompression
pub const MAX_SNAPSHOT_BODY_SIZE: usize = 16 * 1024 * 1024;
/// Maximum length of a chunk-size line (size, extensions and CRLF)
pub const MAX_CHUNK_LINE_SIZE: usize = 4096;
/// Read buffer growth step in bytes
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

// Worker pool
/// The blocking worker pool holds `available cores * BLOCKING_POOL_MULTIPLIER` permits
pub const BLOCKING_POOL_MULTIPLIER: usize = 2;

/// Default User-Agent added by the CLI when the caller did not set one.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Status code a streaming exchange expects unless told otherwise.
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;
