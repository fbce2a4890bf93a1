//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! [`FrameDecoder`] is the incremental parser: bytes go in as they arrive
//! from the child's stdout, complete frame bodies come out. [`FrameReader`]
//! and [`FrameWriter`] drive it over async pipes.

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Longest header line we are willing to buffer while waiting for `\n`.
const MAX_HEADER_LINE_BYTES: usize = 8 * 1024;

const READ_CHUNK_BYTES: usize = 16 * 1024;

/// Serialize a body into a complete wire frame (header followed by body).
#[must_use]
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body);
    frame
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Scanning header lines until the blank separator.
    ReadingHeaders { content_length: Option<usize> },
    /// Accumulating exactly `len` body bytes.
    ReadingBody { len: usize },
    /// Dropping the body of a frame that exceeded [`MAX_FRAME_BYTES`].
    SkippingBody { remaining: usize },
}

impl DecodeState {
    const START: Self = Self::ReadingHeaders {
        content_length: None,
    };
}

/// Incremental `Content-Length` frame parser.
///
/// Header lines other than `Content-Length: <digits>` are ignored. A header
/// block that ends without a usable length produces no frame.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    buf: Vec<u8>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecodeState::START,
            buf: Vec::new(),
        }
    }

    /// Append raw bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Whether a frame has been started but not completed.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty() || self.state != DecodeState::START
    }

    /// Drop any buffered partial frame and return to header scanning.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = DecodeState::START;
    }

    /// Pop the next complete frame body, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.state {
                DecodeState::ReadingHeaders { content_length } => {
                    let Some(newline) = self.buf.iter().position(|&b| b == b'\n') else {
                        if self.buf.len() > MAX_HEADER_LINE_BYTES {
                            tracing::warn!(
                                bytes = self.buf.len(),
                                "Discarding oversized LSP header line"
                            );
                            self.buf.clear();
                        }
                        return None;
                    };
                    let line: Vec<u8> = self.buf.drain(..=newline).collect();
                    let line = trim_line_ending(&line);

                    if line.is_empty() {
                        self.state = match content_length {
                            Some(len) if len > MAX_FRAME_BYTES => {
                                tracing::warn!(
                                    "Content-Length {len} exceeds maximum {MAX_FRAME_BYTES}, skipping frame"
                                );
                                DecodeState::SkippingBody { remaining: len }
                            }
                            Some(len) => DecodeState::ReadingBody { len },
                            None => {
                                tracing::trace!("LSP header block without Content-Length ignored");
                                DecodeState::START
                            }
                        };
                        continue;
                    }

                    if let Some(len) = parse_content_length(line) {
                        self.state = DecodeState::ReadingHeaders {
                            content_length: Some(len),
                        };
                    }
                }
                DecodeState::ReadingBody { len } => {
                    if self.buf.len() < len {
                        return None;
                    }
                    let body: Vec<u8> = self.buf.drain(..len).collect();
                    self.state = DecodeState::START;
                    return Some(body);
                }
                DecodeState::SkippingBody { remaining } => {
                    let n = remaining.min(self.buf.len());
                    self.buf.drain(..n);
                    if n < remaining {
                        self.state = DecodeState::SkippingBody {
                            remaining: remaining - n,
                        };
                        return None;
                    }
                    self.state = DecodeState::START;
                }
            }
        }
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Extract `N` from a `Content-Length: N` line.
///
/// The key is matched case-insensitively; anything else returns `None`.
fn parse_content_length(line: &[u8]) -> Option<usize> {
    let line = std::str::from_utf8(line).ok()?;
    let (key, value) = line.split_once(':')?;
    if !key.trim().eq_ignore_ascii_case("Content-Length") {
        return None;
    }
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Reads frame bodies from an async reader.
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    chunk: Box<[u8]>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            chunk: vec![0u8; READ_CHUNK_BYTES].into_boxed_slice(),
        }
    }

    /// Read the next frame body.
    ///
    /// Returns `Ok(None)` on EOF. A frame cut off by EOF is discarded.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return Ok(Some(frame));
            }

            let n = self
                .reader
                .read(&mut self.chunk)
                .await
                .context("reading server output")?;

            if n == 0 {
                if self.decoder.has_partial() {
                    tracing::debug!("Discarding partial LSP frame at end of stream");
                }
                self.decoder.reset();
                return Ok(None);
            }
            self.decoder.push(&self.chunk[..n]);
        }
    }
}

/// Writes frames to an async writer.
///
/// Header and body go out in a single `write_all`, so one writer never
/// interleaves two messages.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one body with its `Content-Length` header.
    pub async fn write_frame(&mut self, body: &[u8]) -> Result<()> {
        let frame = encode_frame(body);
        self.writer
            .write_all(&frame)
            .await
            .context("writing frame")?;
        self.writer.flush().await.context("flushing frame")?;
        Ok(())
    }
}
