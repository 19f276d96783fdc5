//! Whole-body decompression.
//!
//! Used by the snapshot path only; streamed fragments are relayed exactly as
//! they arrive.

use std::io::{self, Read};

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

use crate::config::MAX_SNAPSHOT_BODY_SIZE;
use crate::error_handling::ClientError;

/// Decodes `body` according to its `Content-Encoding` and returns it as text.
///
/// Supports `gzip` (`x-gzip`), `deflate` (zlib-wrapped, or raw as some
/// servers send it) and identity (absent, empty or `identity`). Non-UTF-8
/// bytes in the result are replaced with U+FFFD.
///
/// # Errors
///
/// Returns `ClientError::Decompression` for corrupt data, any other coding,
/// or output larger than `MAX_SNAPSHOT_BODY_SIZE`.
pub fn decompress(body: &[u8], content_encoding: Option<&str>) -> Result<String, ClientError> {
    decompress_bounded(body, content_encoding, MAX_SNAPSHOT_BODY_SIZE)
}

pub(crate) fn decompress_bounded(
    body: &[u8],
    content_encoding: Option<&str>,
    max_output: usize,
) -> Result<String, ClientError> {
    let encoding = content_encoding
        .map(|e| e.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let fail = |reason: String| ClientError::Decompression {
        encoding: encoding.clone(),
        reason,
    };

    let bytes = match encoding.as_str() {
        "" | "identity" => return Ok(String::from_utf8_lossy(body).into_owned()),
        "gzip" | "x-gzip" => {
            read_bounded(GzDecoder::new(body), max_output).map_err(|e| fail(e.to_string()))?
        }
        "deflate" => match read_bounded(ZlibDecoder::new(body), max_output) {
            Ok(out) => out,
            Err(e) if e.kind() == io::ErrorKind::OutOfMemory => return Err(fail(e.to_string())),
            Err(_) => read_bounded(DeflateDecoder::new(body), max_output)
                .map_err(|e| fail(e.to_string()))?,
        },
        _ => return Err(fail("unsupported content encoding".to_string())),
    };
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Reads `reader` to the end, failing once more than `max` bytes come out.
fn read_bounded<R: Read>(reader: R, max: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.take(max as u64 + 1).read_to_end(&mut out)?;
    if out.len() > max {
        return Err(io::Error::new(
            io::ErrorKind::OutOfMemory,
            format!("decompressed body exceeds {max} bytes"),
        ));
    }
    Ok(out)
}
