//! Incremental line accumulation over arbitrary read chunks.
//!
//! [`LineBuffer`] owns the receive buffer for one byte stream. Each
//! [`LineBuffer::push`] appends a chunk; [`LineBuffer::next_line`] then
//! yields complete lines one at a time, leaving any trailing partial line in
//! place for the next chunk. Framing and the length cap come from
//! [`PortCodec`].

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::port::codec::PortCodec;
use crate::Result;

/// Receive buffer holding at most one partial line between reads.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    codec: PortCodec,
}

impl LineBuffer {
    /// Empty buffer capping lines at `max_line_bytes`.
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            codec: PortCodec::with_max_length(max_line_bytes),
        }
    }

    /// Buffer seeded with bytes left over from a previous phase.
    #[must_use]
    pub fn with_remainder(remainder: &[u8], max_line_bytes: usize) -> Self {
        let mut this = Self::new(max_line_bytes);
        this.push(remainder);
        this
    }

    /// Append a freshly read chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete line, terminator stripped.
    ///
    /// Returns `Ok(None)` when only a partial line (or nothing) remains.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Decode`](crate::AppError::Decode) for an overlong
    /// or non-UTF-8 line. The offending bytes are dropped, so calling again
    /// continues with the following line.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        self.codec.decode(&mut self.buf)
    }

    /// Append `chunk` and drain every complete line it finishes.
    ///
    /// # Errors
    ///
    /// Stops at the first malformed line; see [`LineBuffer::next_line`].
    /// Lines decoded before it are dropped with the error, while lines after
    /// it stay buffered for the next [`LineBuffer::next_line`].
    pub fn extend(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.push(chunk);
        let mut lines = Vec::new();
        while let Some(line) = self.next_line()? {
            lines.push(line);
        }
        Ok(lines)
    }

    /// Bytes received after the last terminator.
    #[must_use]
    pub fn remainder(&self) -> &[u8] {
        &self.buf
    }

    /// Whether a partial line is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the buffer, returning the unprocessed bytes.
    #[must_use]
    pub fn into_remainder(self) -> BytesMut {
        self.buf
    }
}

/// Split `remainder ++ chunk` into complete lines and a new remainder.
///
/// Stateless form of [`LineBuffer::extend`] without a length cap.
///
/// # Errors
///
/// Returns [`AppError::Decode`](crate::AppError::Decode) if a complete line
/// is not valid UTF-8. The whole call fails: lines decoded before the bad
/// one are not returned, and neither is the remainder. Callers that must
/// keep every good line use [`LineBuffer::next_line`] instead.
pub fn split_lines(remainder: &[u8], chunk: &[u8]) -> Result<(Vec<String>, BytesMut)> {
    let mut buffer = LineBuffer::with_remainder(remainder, usize::MAX);
    let lines = buffer.extend(chunk)?;
    Ok((lines, buffer.into_remainder()))
}
