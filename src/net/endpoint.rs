//! Target host and port.

use std::fmt;
use std::str::FromStr;

use crate::error_handling::{ClientError, ConfigError};

/// A `host:port` pair the client connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Checks that the host can be written into a request line or header.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidRequest` if the host is empty or holds a
    /// control character or whitespace.
    pub fn validate(&self) -> Result<(), ClientError> {
        match host_problem(&self.host) {
            Some(reason) => Err(ClientError::InvalidRequest(format!(
                "target host {:?} {reason}",
                self.host
            ))),
            None => Ok(()),
        }
    }

    /// Renders `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    /// Parses `host:port` or `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            field: "endpoint",
            reason: format!("'{s}': {reason}"),
        };
        let (host, port) = s.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if let Some(reason) = host_problem(host) {
            return Err(invalid(reason));
        }
        let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
        Ok(Endpoint::new(host, port))
    }
}

fn host_problem(host: &str) -> Option<&'static str> {
    if host.is_empty() {
        Some("missing host")
    } else if host.chars().any(|c| c.is_control() || c.is_whitespace()) {
        Some("contains a control or whitespace character")
    } else {
        None
    }
}
