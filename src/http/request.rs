//! HTTP/1.1 request builder and encoder.

use crate::config::{HEADER_CONTENT_LENGTH, HEADER_HOST, HEADER_TRANSFER_ENCODING};
use crate::error_handling::ClientError;
use crate::net::Endpoint;

/// An HTTP/1.1 request to be written on a fresh connection.
///
/// Header order is preserved on the wire. `Host` and `Content-Length` are
/// filled in when the caller did not set them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            method: method.into(),
            target: if target.is_empty() {
                "/".to_string()
            } else {
                target
            },
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new("GET", target)
    }

    pub fn post(target: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new("POST", target).body(body)
    }

    /// Appends a header; repeated names are kept in order.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// First value of `name`, compared case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Sets `Host` from the endpoint unless the caller already did.
    ///
    /// The port is omitted when it is the https default.
    pub fn with_default_host(mut self, endpoint: &Endpoint) -> Self {
        if self.header_value(HEADER_HOST).is_none() {
            let authority = endpoint.authority();
            let host = match authority.strip_suffix(":443") {
                Some(host) if endpoint.port() == 443 => host.to_string(),
                _ => authority,
            };
            self.headers.insert(0, (HEADER_HOST.to_string(), host));
        }
        self
    }

    /// Checks that every part of the request head is safe to put on the wire.
    ///
    /// Header values may not contain CR, LF or NUL. Methods, targets and
    /// header names may not contain whitespace or control characters, and
    /// header names may not contain `:`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidRequest` naming the first offending part.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.method.is_empty() || !is_token(&self.method) {
            return Err(invalid("method", &self.method));
        }
        if !is_token(&self.target) {
            return Err(invalid("target", &self.target));
        }
        for (name, value) in &self.headers {
            if name.is_empty() || !is_token(name) || name.contains(':') {
                return Err(invalid("header name", name));
            }
            if value.chars().any(|c| matches!(c, '\r' | '\n' | '\0')) {
                return Err(invalid(&format!("value of header {name}"), value));
            }
        }
        Ok(())
    }

    /// Serializes the request line, headers and body.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidRequest` if [`Request::validate`] fails.
    pub fn encode(&self) -> Result<Vec<u8>, ClientError> {
        self.validate()?;
        let mut head = format!("{} {} HTTP/1.1\r\n", self.method, self.target);
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        let framed = self.header_value(HEADER_CONTENT_LENGTH).is_some()
            || self.header_value(HEADER_TRANSFER_ENCODING).is_some();
        if !self.body.is_empty() && !framed {
            head.push_str(&format!("{}: {}\r\n", HEADER_CONTENT_LENGTH, self.body.len()));
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        Ok(out)
    }
}

fn is_token(s: &str) -> bool {
    !s.chars().any(|c| c.is_control() || c.is_whitespace())
}

fn invalid(what: &str, raw: &str) -> ClientError {
    ClientError::InvalidRequest(format!("{what} {raw:?} contains a forbidden character"))
}
