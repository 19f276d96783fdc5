//! Error type definitions.
//!
//! This module defines the errors produced while connecting, tunnelling,
//! streaming and decoding, plus the coarse `ErrorKind` taxonomy used for
//! statistics and the `Status` outcome of an exchange.

use std::io;

use log::SetLoggerError;
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error building the connector (TLS configuration).
    #[error("Connector initialization error: {0}")]
    ConnectorError(#[from] ClientError),

    /// The configuration did not validate.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
}

/// Error types for configuration and CLI option values.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A field holds a value outside its accepted range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// The target URL cannot be used.
    #[error("invalid target url: {0}")]
    InvalidUrl(String),

    /// A request header is not of the form `Name: value`.
    #[error("invalid header '{0}', expected 'Name: value'")]
    InvalidHeader(String),
}

/// Errors raised by a single request/response exchange.
///
/// Every variant maps onto a [`Status`] through [`ClientError::status`] and
/// onto an [`ErrorKind`] through [`ClientError::kind`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// The proxy URL could not be parsed.
    #[error("invalid proxy url '{url}': {reason}")]
    InvalidProxy { url: String, reason: String },

    /// The request or target cannot be written on the wire as given.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// DNS resolution failed or returned no address.
    #[error("failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    /// TCP connect failed on every resolved address.
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    /// DNS plus TCP connect did not finish in time.
    #[error("connect to {target} timed out after {secs}s")]
    ConnectTimeout { target: String, secs: u64 },

    /// I/O failure or premature close while talking CONNECT to the proxy.
    #[error("proxy handshake with {proxy} failed: {reason}")]
    ProxyHandshake { proxy: String, reason: String },

    /// The proxy refused the tunnel.
    #[error("proxy refused tunnel to {target}: {status}({reason})")]
    ProxyTunnel {
        target: String,
        status: u16,
        reason: String,
    },

    /// The host is not usable as a TLS server name.
    #[error("invalid TLS server name '{host}'")]
    InvalidServerName { host: String },

    /// The TLS client configuration could not be built.
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] rustls::Error),

    /// The TLS handshake failed.
    #[error("TLS handshake with {host} failed: {source}")]
    TlsHandshake {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Writing the request failed.
    #[error("failed to write request: {0}")]
    Write(#[source] io::Error),

    /// The peer closed the connection before sending a response head.
    #[error("connection closed before a response was received")]
    UnexpectedClose,

    /// The response status differs from the expected one.
    #[error("return unexpected http status code: {status}({reason})")]
    UnexpectedStatus { status: u16, reason: String },

    /// Reading the response failed.
    #[error("failed to read response: {0}")]
    Read(#[source] io::Error),

    /// The response head or framing headers are invalid.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The chunked body is invalid.
    #[error("chunk decode error: {0}")]
    ChunkDecode(String),

    /// The body could not be decompressed.
    #[error("failed to decompress {encoding} body: {reason}")]
    Decompression { encoding: String, reason: String },

    /// A blocking producer failed or panicked.
    #[error("worker error: {0}")]
    Worker(String),
}

/// Outcome of a streaming exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The body was fully delivered.
    Ok,
    /// The peer closed before any response byte; eligible for one reconnect.
    Closed,
    /// Any other failure.
    HasError,
    /// The response status was not the expected one.
    UnexpectedStatusCode,
}

impl Status {
    /// Derives the status of an exchange from its result.
    pub fn of<T>(result: &Result<T, ClientError>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(e) => e.status(),
        }
    }
}

/// Coarse categories of failures, used for statistics and log labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum ErrorKind {
    ResolutionError,
    ConnectError,
    ProxyTunnelError,
    TlsHandshakeError,
    WriteError,
    UnexpectedCloseError,
    UnexpectedStatusCodeError,
    ReadError,
    ChunkDecodeError,
    BodyDecompressionError,
    ConfigurationError,
    WorkerError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ResolutionError => "DNS resolution error",
            ErrorKind::ConnectError => "Connect error",
            ErrorKind::ProxyTunnelError => "Proxy tunnel error",
            ErrorKind::TlsHandshakeError => "TLS handshake error",
            ErrorKind::WriteError => "Request write error",
            ErrorKind::UnexpectedCloseError => "Unexpected close",
            ErrorKind::UnexpectedStatusCodeError => "Unexpected status code",
            ErrorKind::ReadError => "Response read error",
            ErrorKind::ChunkDecodeError => "Chunk decode error",
            ErrorKind::BodyDecompressionError => "Body decompression error",
            ErrorKind::ConfigurationError => "Configuration error",
            ErrorKind::WorkerError => "Worker error",
        }
    }
}

impl ClientError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::InvalidProxy { .. } | ClientError::InvalidRequest(_) => {
                ErrorKind::ConfigurationError
            }
            ClientError::Resolution { .. } => ErrorKind::ResolutionError,
            ClientError::Connect { .. } | ClientError::ConnectTimeout { .. } => {
                ErrorKind::ConnectError
            }
            ClientError::ProxyHandshake { .. } | ClientError::ProxyTunnel { .. } => {
                ErrorKind::ProxyTunnelError
            }
            ClientError::InvalidServerName { .. }
            | ClientError::TlsConfig(_)
            | ClientError::TlsHandshake { .. } => ErrorKind::TlsHandshakeError,
            ClientError::Write(_) => ErrorKind::WriteError,
            ClientError::UnexpectedClose => ErrorKind::UnexpectedCloseError,
            ClientError::UnexpectedStatus { .. } => ErrorKind::UnexpectedStatusCodeError,
            ClientError::Read(_) | ClientError::MalformedResponse(_) => ErrorKind::ReadError,
            ClientError::ChunkDecode(_) => ErrorKind::ChunkDecodeError,
            ClientError::Decompression { .. } => ErrorKind::BodyDecompressionError,
            ClientError::Worker(_) => ErrorKind::WorkerError,
        }
    }

    /// Exchange status this error corresponds to.
    pub fn status(&self) -> Status {
        match self {
            ClientError::UnexpectedClose => Status::Closed,
            ClientError::UnexpectedStatus { .. } => Status::UnexpectedStatusCode,
            _ => Status::HasError,
        }
    }

    /// Whether the exchange may be retried on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::UnexpectedClose)
    }
}
