//! Chunk-streaming request engine.
//!
//! Writes one request on an established connection, validates the response
//! status, then decodes the body incrementally and hands each decoded text
//! segment to a callback as soon as it arrives. The engine never retries;
//! reconnecting is the connection factory's job.

use std::future::Future;

use bytes::BytesMut;
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::READ_BUFFER_SIZE;
use crate::error_handling::ClientError;
use crate::http::chunked::{BodyDecoder, BodyEvent};
use crate::http::response::read_head;
use crate::http::utf8::Utf8Carry;
use crate::http::{Request, ResponseHead};
use crate::net::Connection;

/// Runs one request/response exchange, streaming the body to `on_fragment`.
///
/// # Arguments
///
/// * `conn` - A freshly established connection (tunnelled or direct)
/// * `request` - The request to write; `Host` must already be set
/// * `expected_status` - The only status accepted as success
/// * `on_fragment` - Called with each non-empty decoded text segment, in order
///
/// # Returns
///
/// The response head once the body has been fully delivered.
///
/// # Errors
///
/// - `ClientError::InvalidRequest` if the request head holds forbidden characters
/// - `ClientError::Write` if the request cannot be written
/// - `ClientError::UnexpectedClose` if the peer closes before any response byte
/// - `ClientError::UnexpectedStatus` if the status differs from `expected_status`;
///   no fragment is delivered in that case
/// - `ClientError::ChunkDecode`, `ClientError::MalformedResponse` or
///   `ClientError::Read` if the body cannot be read
pub async fn stream<S, F, Fut>(
    conn: &mut Connection<S>,
    request: &Request,
    expected_status: u16,
    mut on_fragment: F,
) -> Result<ResponseHead, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    let wire = request.encode()?;
    let stream = &mut conn.stream;
    stream
        .write_all(&wire)
        .await
        .map_err(ClientError::Write)?;
    stream.flush().await.map_err(ClientError::Write)?;

    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let head = read_head(&mut *stream, &mut buf).await?;
    debug!(
        "{} {} -> {} {}",
        request.method(),
        request.target(),
        head.status(),
        head.reason()
    );
    if head.status() != expected_status {
        return Err(ClientError::UnexpectedStatus {
            status: head.status(),
            reason: head.reason().to_string(),
        });
    }

    let mut decoder = BodyDecoder::for_response(&head, request.method())?;
    let mut carry = Utf8Carry::default();
    loop {
        while let Some(event) = decoder.decode(&mut buf)? {
            match event {
                BodyEvent::ChunkStart(size) => trace!("Chunk of {size} bytes"),
                BodyEvent::Data(segment) => {
                    if let Some(text) = carry.push(&segment) {
                        on_fragment(text).await;
                    }
                }
                BodyEvent::ChunkEnd => trace!("Chunk complete"),
                BodyEvent::Done => {
                    if let Some(text) = carry.finish() {
                        on_fragment(text).await;
                    }
                    return Ok(head);
                }
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
            if let Some(text) = carry.finish() {
                on_fragment(text).await;
            }
            return Ok(head);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    /// Serves `response` to the first request read from the peer end.
    fn serve(response: &'static [u8]) -> Connection<DuplexStream> {
        let (client, mut server) = duplex(64 * 1024);
        tokio::spawn(async move {
            let mut req = vec![0u8; 4096];
            let _ = server.read(&mut req).await;
            let _ = server.write_all(response).await;
            let _ = server.shutdown().await;
        });
        Connection::direct(client)
    }

    async fn collect(
        conn: &mut Connection<DuplexStream>,
        expected: u16,
    ) -> (Result<ResponseHead, ClientError>, Vec<String>) {
        let mut fragments = Vec::new();
        let result = stream(conn, &Request::get("/").header("Host", "test"), expected, |f| {
            fragments.push(f);
            async {}
        })
        .await;
        (result, fragments)
    }

    #[tokio::test]
    async fn test_stream_chunked_delivers_each_chunk() {
        let mut conn = serve(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nhel\r\n2\r\nlo\r\n0\r\n\r\n",
        );
        let (result, fragments) = collect(&mut conn, 200).await;
        assert_eq!(result.unwrap().status(), 200);
        assert_eq!(fragments, vec!["hel", "lo"]);
    }

    #[tokio::test]
    async fn test_stream_unexpected_status_delivers_nothing() {
        let mut conn = serve(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 6\r\n\r\ndenied");
        let (result, fragments) = collect(&mut conn, 200).await;
        match result {
            Err(ClientError::UnexpectedStatus { status, reason }) => {
                assert_eq!(status, 403);
                assert_eq!(reason, "Forbidden");
            }
            other => panic!("expected UnexpectedStatus, got {other:?}"),
        }
        assert!(fragments.is_empty());
    }

    #[tokio::test]
    async fn test_stream_accepts_non_default_expected_status() {
        let mut conn = serve(b"HTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok");
        let (result, fragments) = collect(&mut conn, 201).await;
        assert!(result.is_ok());
        assert_eq!(fragments, vec!["ok"]);
    }

    #[tokio::test]
    async fn test_stream_close_before_head_is_unexpected_close() {
        let mut conn = serve(b"");
        let (result, _) = collect(&mut conn, 200).await;
        assert!(matches!(result, Err(ClientError::UnexpectedClose)));
    }

    #[tokio::test]
    async fn test_stream_close_delimited_body() {
        let mut conn = serve(b"HTTP/1.0 200 OK\r\n\r\nstreamed until close");
        let (result, fragments) = collect(&mut conn, 200).await;
        assert!(result.is_ok());
        assert_eq!(fragments.concat(), "streamed until close");
    }

    #[tokio::test]
    async fn test_stream_truncated_chunked_body_is_error() {
        let mut conn = serve(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhel");
        let (result, fragments) = collect(&mut conn, 200).await;
        assert!(matches!(result, Err(ClientError::ChunkDecode(_))));
        assert_eq!(fragments, vec!["hel"]);
    }

    #[tokio::test]
    async fn test_stream_write_failure_is_write_error() {
        let (client, server) = duplex(64);
        drop(server);
        let mut conn = Connection::direct(client);
        let (result, _) = collect(&mut conn, 200).await;
        assert!(matches!(result, Err(ClientError::Write(_))));
    }
}
