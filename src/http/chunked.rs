//! Incremental body decoding.
//!
//! `BodyDecoder` turns the raw bytes of a response body into a sequence of
//! [`BodyEvent`]s as they arrive, without waiting for the whole body. Chunked
//! bodies report chunk boundaries; every framing reports data segments and a
//! final `Done`.

use bytes::{Buf, Bytes, BytesMut};

use crate::config::MAX_CHUNK_LINE_SIZE;
use crate::error_handling::ClientError;
use crate::http::ResponseHead;

/// One step of body decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyEvent {
    /// A chunk header was read; carries the declared size.
    ChunkStart(u64),
    /// Body bytes, delivered as soon as they are available.
    Data(Bytes),
    /// The current chunk's declared size has been fully delivered.
    ChunkEnd,
    /// The body is complete.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data { remaining: u64 },
    ChunkEndPending,
    DataCrlf,
    Trailers,
    Done,
}

/// Decoder for `Transfer-Encoding: chunked`.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: ChunkState,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self {
            state: ChunkState::Size,
        }
    }
}

impl ChunkedDecoder {
    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    /// Returns the next event, or `None` when more input is needed.
    ///
    /// A data segment that exhausts the chunk's declared size is followed by
    /// `ChunkEnd` immediately; the chunk's trailing CRLF is consumed later.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<BodyEvent>, ClientError> {
        loop {
            match self.state {
                ChunkState::Size => match httparse::parse_chunk_size(&buf[..]) {
                    Ok(httparse::Status::Complete((consumed, size))) => {
                        buf.advance(consumed);
                        if size == 0 {
                            self.state = ChunkState::Trailers;
                            continue;
                        }
                        self.state = ChunkState::Data { remaining: size };
                        return Ok(Some(BodyEvent::ChunkStart(size)));
                    }
                    Ok(httparse::Status::Partial) => {
                        if buf.len() > MAX_CHUNK_LINE_SIZE {
                            return Err(ClientError::ChunkDecode(format!(
                                "chunk size line exceeds {MAX_CHUNK_LINE_SIZE} bytes"
                            )));
                        }
                        return Ok(None);
                    }
                    Err(_) => {
                        return Err(ClientError::ChunkDecode(format!(
                            "invalid chunk size line {:?}",
                            preview(buf)
                        )))
                    }
                },
                ChunkState::Data { remaining } => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let take = remaining.min(buf.len() as u64) as usize;
                    let segment = buf.split_to(take).freeze();
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        ChunkState::ChunkEndPending
                    } else {
                        ChunkState::Data { remaining }
                    };
                    return Ok(Some(BodyEvent::Data(segment)));
                }
                ChunkState::ChunkEndPending => {
                    self.state = ChunkState::DataCrlf;
                    return Ok(Some(BodyEvent::ChunkEnd));
                }
                ChunkState::DataCrlf => {
                    if buf.len() < 2 {
                        return Ok(None);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(ClientError::ChunkDecode(format!(
                            "missing CRLF after chunk data, found {:?}",
                            preview(buf)
                        )));
                    }
                    buf.advance(2);
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") else {
                        if buf.len() > MAX_CHUNK_LINE_SIZE {
                            return Err(ClientError::ChunkDecode(
                                "trailer line too long".to_string(),
                            ));
                        }
                        return Ok(None);
                    };
                    buf.advance(pos + 2);
                    if pos == 0 {
                        self.state = ChunkState::Done;
                        return Ok(Some(BodyEvent::Done));
                    }
                }
                ChunkState::Done => return Ok(None),
            }
        }
    }
}

fn preview(buf: &[u8]) -> String {
    String::from_utf8_lossy(&buf[..buf.len().min(16)]).into_owned()
}

#[derive(Debug)]
enum Framing {
    Chunked(ChunkedDecoder),
    Length { remaining: u64 },
    CloseDelimited,
    Empty { reported: bool },
}

/// Body decoder selected from the response head.
#[derive(Debug)]
pub struct BodyDecoder {
    framing: Framing,
}

impl BodyDecoder {
    /// Picks the framing for a response to a request made with `method`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::MalformedResponse` if `Content-Length` is invalid.
    pub fn for_response(head: &ResponseHead, method: &str) -> Result<Self, ClientError> {
        let status = head.status();
        let framing = if method.eq_ignore_ascii_case("HEAD")
            || (100..200).contains(&status)
            || status == 204
            || status == 304
        {
            Framing::Empty { reported: false }
        } else if head.is_chunked() {
            Framing::Chunked(ChunkedDecoder::default())
        } else if let Some(len) = head.content_length()? {
            Framing::Length { remaining: len }
        } else {
            Framing::CloseDelimited
        };
        log::trace!("Body framing for status {status}: {framing:?}");
        Ok(Self { framing })
    }

    /// Returns the next event, or `None` when more input is needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<BodyEvent>, ClientError> {
        match &mut self.framing {
            Framing::Chunked(decoder) => decoder.decode(buf),
            Framing::Length { remaining } => {
                if *remaining == 0 {
                    return Ok(Some(BodyEvent::Done));
                }
                if buf.is_empty() {
                    return Ok(None);
                }
                let take = (*remaining).min(buf.len() as u64) as usize;
                *remaining -= take as u64;
                Ok(Some(BodyEvent::Data(buf.split_to(take).freeze())))
            }
            Framing::CloseDelimited => {
                if buf.is_empty() {
                    return Ok(None);
                }
                Ok(Some(BodyEvent::Data(buf.split().freeze())))
            }
            Framing::Empty { reported } => {
                if *reported {
                    return Ok(None);
                }
                *reported = true;
                Ok(Some(BodyEvent::Done))
            }
        }
    }

    /// Accounts for the peer closing the connection.
    ///
    /// # Errors
    ///
    /// Returns an error unless the body is close-delimited or already complete.
    pub fn finish_on_eof(&self) -> Result<(), ClientError> {
        match &self.framing {
            Framing::CloseDelimited | Framing::Empty { .. } => Ok(()),
            Framing::Chunked(decoder) if decoder.is_done() => Ok(()),
            Framing::Chunked(_) => Err(ClientError::ChunkDecode(
                "connection closed in the middle of a chunked body".to_string(),
            )),
            Framing::Length { remaining } => Err(ClientError::Read(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("connection closed with {remaining} body bytes outstanding"),
            ))),
        }
    }
}
