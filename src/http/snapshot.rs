//! Whole-response snapshots.
//!
//! A snapshot holds a response's final status, every header block seen on
//! the way (the proxy's CONNECT reply first, when tunnelled) and the
//! decompressed body.

use bytes::BytesMut;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{MAX_SNAPSHOT_BODY_SIZE, READ_BUFFER_SIZE, STATUS_CODE_KEY};
use crate::error_handling::ClientError;
use crate::http::chunked::{BodyDecoder, BodyEvent};
use crate::http::decompress::decompress_bounded;
use crate::http::response::read_head;
use crate::http::{Request, ResponseHead};
use crate::net::Connection;

/// One header block as an ordered multimap.
///
/// The first entry is always `(STATUS_CODE_KEY, code)`.
pub type HeaderGroup = Vec<(String, String)>;

/// A fully read response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpResponseSnapshot {
    pub status_code: u16,
    pub header_groups: Vec<HeaderGroup>,
    pub body: String,
}

impl HttpResponseSnapshot {
    /// First value of `name` in the final header block, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_groups
            .last()?
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Converts a parsed head into a header group.
pub fn header_group(head: &ResponseHead) -> HeaderGroup {
    let mut group = Vec::with_capacity(head.headers().len() + 1);
    group.push((STATUS_CODE_KEY.to_string(), head.status().to_string()));
    group.extend(head.headers().iter().cloned());
    group
}

/// Splits a raw header dump into header groups.
///
/// Blocks are separated by blank lines. A line without `": "` is a status
/// line and contributes its second word under `STATUS_CODE_KEY`; other lines
/// split on the first `": "`. Lines that fit neither shape are ignored.
pub fn parse_header_blocks(raw: &str) -> Vec<HeaderGroup> {
    let mut groups = Vec::new();
    let mut current: HeaderGroup = Vec::new();
    for line in raw.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
            continue;
        }
        match line.split_once(": ") {
            Some((name, value)) => current.push((name.to_string(), value.to_string())),
            None => {
                if let Some(code) = line.split(' ').nth(1) {
                    current.push((STATUS_CODE_KEY.to_string(), code.to_string()));
                }
            }
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Writes `request` and reads the whole response into a snapshot.
///
/// Any status is accepted. The body is decompressed per its
/// `Content-Encoding`.
///
/// # Errors
///
/// Same as the streaming engine for I/O and framing failures, plus
/// `ClientError::Decompression`. A body over `MAX_SNAPSHOT_BODY_SIZE` on the
/// wire is a `ClientError::MalformedResponse`; over it once decompressed, a
/// `ClientError::Decompression`.
pub async fn fetch_whole<S>(
    conn: &mut Connection<S>,
    request: &Request,
) -> Result<HttpResponseSnapshot, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    read_whole(conn, request, MAX_SNAPSHOT_BODY_SIZE).await
}

async fn read_whole<S>(
    conn: &mut Connection<S>,
    request: &Request,
    max_body: usize,
) -> Result<HttpResponseSnapshot, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let too_large = || ClientError::MalformedResponse(format!("body exceeds {max_body} bytes"));

    let wire = request.encode()?;
    let stream = &mut conn.stream;
    stream
        .write_all(&wire)
        .await
        .map_err(ClientError::Write)?;
    stream.flush().await.map_err(ClientError::Write)?;

    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let head = read_head(&mut *stream, &mut buf).await?;
    let mut decoder = BodyDecoder::for_response(&head, request.method())?;
    let mut body = Vec::new();
    'read: loop {
        while let Some(event) = decoder.decode(&mut buf)? {
            match event {
                BodyEvent::Data(segment) => {
                    if body.len() + segment.len() > max_body {
                        return Err(too_large());
                    }
                    body.extend_from_slice(&segment);
                }
                BodyEvent::Done => break 'read,
                BodyEvent::ChunkStart(_) | BodyEvent::ChunkEnd => {}
            }
        }
        buf.reserve(READ_BUFFER_SIZE);
        let n = match stream.read_buf(&mut buf).await {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => 0,
            Err(e) => return Err(ClientError::Read(e)),
        };
        if n == 0 {
            decoder.finish_on_eof()?;
            break;
        }
    }

    let mut header_groups = Vec::with_capacity(2);
    if let Some(tunnel_head) = &conn.tunnel_head {
        header_groups.push(header_group(tunnel_head));
    }
    header_groups.push(header_group(&head));

    Ok(HttpResponseSnapshot {
        status_code: head.status(),
        header_groups,
        body: decompress_bounded(&body, head.content_encoding(), max_body)?,
    })
}
