//! HTTP/1.1 over an established connection.
//!
//! This module provides:
//! - Request encoding and response head parsing
//! - Incremental body decoding (chunked, length-delimited, close-delimited)
//! - The streaming engine that relays body segments as they arrive
//! - Whole-body snapshots with decompression

pub mod chunked;
mod decompress;
pub mod engine;
mod request;
mod response;
mod snapshot;
mod utf8;

// Re-export public API
pub use decompress::decompress;
pub use request::Request;
pub use response::{read_head, ResponseHead};
pub use snapshot::{fetch_whole, header_group, parse_header_blocks, HeaderGroup, HttpResponseSnapshot};
pub use utf8::Utf8Carry;
