//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! [`FrameDecoder`] is the incremental parser: bytes are pushed as they
//! arrive and complete frames are pulled out, with any partial frame kept
//! buffered until the rest of it shows up. [`FrameReader`] and
//! [`FrameWriter`] wrap it for async pipes.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame header: {0}")]
    InvalidHeader(String),
    #[error("Content-Length {0} exceeds maximum {MAX_FRAME_BYTES}")]
    Oversized(usize),
    #[error("parsing JSON-RPC frame: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
        /// Lossy copy of the rejected body, mirrored to the debug log.
        body: String,
    },
    #[error("serializing JSON-RPC frame: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("frame I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the stream is still usable after this error.
    ///
    /// Header and body errors drop a single frame; I/O errors end the stream.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Encode(_))
    }
}

/// Incremental `Content-Length` frame parser.
///
/// Bytes go in through [`push`](Self::push) in whatever chunks the pipe
/// delivers; [`next_frame`](Self::next_frame) yields each complete frame
/// exactly once and returns `None` while the buffered frame is incomplete.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Body bytes of an oversized frame still to be discarded as they arrive.
    skip: usize,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let mut chunk = chunk;
        if self.skip > 0 {
            let skipped = self.skip.min(chunk.len());
            self.skip -= skipped;
            chunk = &chunk[skipped..];
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Number of bytes held back waiting for the rest of a frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pull the next complete frame out of the buffer.
    ///
    /// A frame whose header or body is malformed is consumed and reported as
    /// an error; the following frames are unaffected.
    pub fn next_frame(&mut self) -> Option<Result<Value, FrameError>> {
        let header_end = find_subslice(&self.buffer, HEADER_TERMINATOR)?;
        let body_start = header_end + HEADER_TERMINATOR.len();

        let content_length = match parse_content_length(&self.buffer[..header_end]) {
            Ok(len) => len,
            Err(e) => {
                self.buffer.drain(..body_start);
                return Some(Err(e));
            }
        };

        if content_length > MAX_FRAME_BYTES {
            let available = (self.buffer.len() - body_start).min(content_length);
            self.buffer.drain(..body_start + available);
            self.skip = content_length - available;
            return Some(Err(FrameError::Oversized(content_length)));
        }

        let body_end = body_start + content_length;
        if self.buffer.len() < body_end {
            return None;
        }

        let frame: Vec<u8> = self.buffer.drain(..body_end).collect();
        let body = &frame[body_start..];
        Some(
            serde_json::from_slice(body).map_err(|source| FrameError::Parse {
                source,
                body: String::from_utf8_lossy(body).into_owned(),
            }),
        )
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Extract `Content-Length` from a header block (without the blank line).
fn parse_content_length(header: &[u8]) -> Result<usize, FrameError> {
    let header = std::str::from_utf8(header)
        .map_err(|_| FrameError::InvalidHeader("header is not UTF-8".to_string()))?;

    let mut content_length = None;
    for line in header.split("\r\n") {
        // Header names are case-insensitive.
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("Content-Length") {
            let value = value.trim();
            let len = value.parse::<usize>().map_err(|_| {
                FrameError::InvalidHeader(format!("invalid Content-Length value {value:?}"))
            })?;
            content_length = Some(len);
        }
        // Ignore other headers (e.g. Content-Type)
    }

    content_length.ok_or_else(|| FrameError::InvalidHeader("missing Content-Length header".into()))
}

/// Serialize a message into a complete frame: header plus UTF-8 body.
///
/// The header carries the body's byte length, not its character count.
pub fn encode_frame(msg: &Value) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(msg).map_err(FrameError::Encode)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads JSON-RPC frames from an async reader.
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, READ_CHUNK_BYTES)
    }

    pub(crate) fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            chunk: vec![0u8; chunk_size.max(1)],
        }
    }

    /// Read the next JSON-RPC frame.
    ///
    /// Returns `Ok(None)` on EOF (clean shutdown). A recoverable
    /// [`FrameError`] drops one frame; calling again continues with the next.
    ///
    /// Cancel-safe: partial input stays in the decoder, so the future can be
    /// dropped in a `select!` without losing bytes.
    pub async fn read_frame(&mut self) -> Result<Option<Value>, FrameError> {
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return frame.map(Some);
            }

            let read = self.reader.read(&mut self.chunk).await?;
            if read == 0 {
                if self.decoder.buffered() > 0 {
                    tracing::debug!(
                        bytes = self.decoder.buffered(),
                        "EOF with a partial frame buffered"
                    );
                }
                return Ok(None);
            }
            self.decoder.push(&self.chunk[..read]);
        }
    }
}

/// Writes JSON-RPC frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a JSON-RPC frame, header and body in a single write.
    pub async fn write_frame(&mut self, msg: &Value) -> Result<(), FrameError> {
        let frame = encode_frame(msg)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn get_ref(&self) -> &W {
        &self.writer
    }
}
