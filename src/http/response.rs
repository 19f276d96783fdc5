//! Response head parsing.
//!
//! Reads a status line and headers off a stream with `httparse`, leaving any
//! bytes that follow the head in the caller's buffer.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::{
    HEADER_CONTENT_ENCODING, HEADER_CONTENT_LENGTH, HEADER_TRANSFER_ENCODING,
    MAX_RESPONSE_HEADERS, MAX_RESPONSE_HEAD_SIZE, READ_BUFFER_SIZE,
};
use crate::error_handling::ClientError;

/// Status line and headers of an HTTP/1.x response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    version: u8,
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn new(status: u16, reason: impl Into<String>, headers: Vec<(String, String)>) -> Self {
        Self {
            version: 1,
            status,
            reason: reason.into(),
            headers,
        }
    }

    fn from_parsed(resp: &httparse::Response<'_, '_>) -> Result<Self, ClientError> {
        let status = resp
            .code
            .ok_or_else(|| ClientError::MalformedResponse("missing status code".to_string()))?;
        let headers = resp
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).trim().to_string(),
                )
            })
            .collect();
        Ok(Self {
            version: resp.version.unwrap_or(1),
            status,
            reason: resp.reason.unwrap_or_default().to_string(),
            headers,
        })
    }

    /// Minor HTTP version (`0` or `1`).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the last transfer coding is `chunked`.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(HEADER_TRANSFER_ENCODING))
            .flat_map(|(_, v)| v.split(','))
            .last()
            .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
    }

    /// Declared body length.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::MalformedResponse` if the header is present but
    /// not a number, or repeated with different values.
    pub fn content_length(&self) -> Result<Option<u64>, ClientError> {
        let mut found: Option<u64> = None;
        for (_, value) in self
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(HEADER_CONTENT_LENGTH))
        {
            let len = value.trim().parse::<u64>().map_err(|_| {
                ClientError::MalformedResponse(format!("invalid Content-Length '{value}'"))
            })?;
            match found {
                Some(prev) if prev != len => {
                    return Err(ClientError::MalformedResponse(
                        "conflicting Content-Length headers".to_string(),
                    ))
                }
                _ => found = Some(len),
            }
        }
        Ok(found)
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.header(HEADER_CONTENT_ENCODING)
    }
}

/// Reads one response head from `stream`.
///
/// Bytes already in `buf` are parsed first; bytes read past the end of the
/// head stay in `buf`. Interim `1xx` heads other than `101` are skipped.
///
/// # Errors
///
/// - `ClientError::UnexpectedClose` if the peer closes before sending any byte
/// - `ClientError::MalformedResponse` if the head does not parse, exceeds the
///   size limit, or is cut short by a close
/// - `ClientError::Read` for any other I/O failure
pub async fn read_head<S>(stream: &mut S, buf: &mut BytesMut) -> Result<ResponseHead, ClientError>
where
    S: AsyncRead + Unpin,
{
    let mut received_any = !buf.is_empty();
    loop {
        if !buf.is_empty() {
            let parsed = {
                let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
                let mut resp = httparse::Response::new(&mut headers);
                match resp.parse(&buf[..]) {
                    Ok(httparse::Status::Complete(len)) => {
                        Some((ResponseHead::from_parsed(&resp)?, len))
                    }
                    Ok(httparse::Status::Partial) => None,
                    Err(e) => {
                        return Err(ClientError::MalformedResponse(format!(
                            "invalid response head: {e}"
                        )))
                    }
                }
            };
            if let Some((head, len)) = parsed {
                buf.advance(len);
                if (100..200).contains(&head.status()) && head.status() != 101 {
                    log::trace!("Skipping interim response {}", head.status());
                    continue;
                }
                return Ok(head);
            }
            if buf.len() > MAX_RESPONSE_HEAD_SIZE {
                return Err(ClientError::MalformedResponse(format!(
                    "response head exceeds {MAX_RESPONSE_HEAD_SIZE} bytes"
                )));
            }
        }

        buf.reserve(READ_BUFFER_SIZE);
        let n = match stream.read_buf(buf).await {
            Ok(n) => n,
            // TLS peers that skip close_notify surface as UnexpectedEof
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => 0,
            Err(e) => return Err(ClientError::Read(e)),
        };
        if n == 0 {
            return if received_any {
                Err(ClientError::MalformedResponse(
                    "connection closed in the middle of the response head".to_string(),
                ))
            } else {
                Err(ClientError::UnexpectedClose)
            };
        }
        received_any = true;
    }
}
