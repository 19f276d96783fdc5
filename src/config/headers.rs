//! HTTP header name constants.
//!
//! Header names the client reads or writes itself. Lookups against response
//! heads are case-insensitive, so the canonical spelling here is only what
//! goes on the wire.

/// Request target host
pub const HEADER_HOST: &str = "Host";
/// Request/response body length
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
/// Body framing (`chunked`)
pub const HEADER_TRANSFER_ENCODING: &str = "Transfer-Encoding";
/// Body compression (`gzip`, `deflate`)
pub const HEADER_CONTENT_ENCODING: &str = "Content-Encoding";
/// Basic credentials for the CONNECT request
pub const HEADER_PROXY_AUTHORIZATION: &str = "Proxy-Authorization";
/// Client identification
pub const HEADER_USER_AGENT: &str = "User-Agent";

/// Pseudo-header carrying the status code inside a [`HeaderGroup`].
///
/// Header dumps produced by proxy tunnelling contain one status line per
/// block; the code is recorded under this key so every group is
/// self-describing.
///
/// [`HeaderGroup`]: crate::http::HeaderGroup
pub const STATUS_CODE_KEY: &str = "http_response_code";
