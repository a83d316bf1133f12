//! Line framing for the helper's stdout and duplex channel.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length so an unterminated or oversized line from a misbehaving helper
//! cannot grow the receive buffer without bound. The helper itself reads
//! commands into a 4096-byte buffer, so [`DEFAULT_MAX_LINE_BYTES`] mirrors that.
//!
//! Both directions use `\n` as terminator. A trailing `\r` is stripped from
//! decoded lines.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::{AppError, Result};

/// Default maximum inbound line length in bytes.
pub const DEFAULT_MAX_LINE_BYTES: usize = 4096;

/// Newline-delimited UTF-8 codec for the port protocol.
///
/// # Decoder
///
/// Returns `Ok(None)` while no complete line is buffered. Lines longer than
/// the configured limit return [`AppError::Decode`]`("line too long: …")`;
/// the codec then discards input up to the next terminator and resumes.
/// Invalid UTF-8 returns [`AppError::Decode`] after consuming the line.
///
/// # Encoder
///
/// Writes `item\n`. The length limit is a decoder-side concern.
#[derive(Debug)]
pub struct PortCodec {
    inner: LinesCodec,
    max_line_bytes: usize,
}

impl PortCodec {
    /// Codec with the [`DEFAULT_MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_BYTES)
    }

    /// Codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_line_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
        }
    }

    fn map_error(&self, e: LinesCodecError) -> AppError {
        match e {
            LinesCodecError::MaxLineLengthExceeded => AppError::Decode(format!(
                "line too long: exceeded {} bytes",
                self.max_line_bytes
            )),
            LinesCodecError::Io(io_err) if io_err.kind() == std::io::ErrorKind::InvalidData => {
                AppError::Decode(format!("line is not valid utf-8: {io_err}"))
            }
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Default for PortCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PortCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner.decode(src).map_err(|e| self.map_error(e))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner.decode_eof(src).map_err(|e| self.map_error(e))
    }
}

impl<T> Encoder<T> for PortCodec
where
    T: AsRef<str>,
{
    type Error = AppError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        self.inner.encode(item, dst).map_err(|e| self.map_error(e))
    }
}

/// Stream framing for [`FramedRead`](tokio_util::codec::FramedRead).
///
/// Yields each line as `Ok(line)` and each overlong or non-UTF-8 line as an
/// `Err(AppError::Decode)` item. Only I/O failures end the stream, so one bad
/// line from the helper never stalls the lines buffered behind it.
#[derive(Debug)]
pub struct LineFrames {
    codec: PortCodec,
    keep_tail: bool,
}

impl LineFrames {
    /// Frames capped at `max_line_bytes`. Bytes after the last terminator
    /// are dropped at EOF.
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            codec: PortCodec::with_max_length(max_line_bytes),
            keep_tail: false,
        }
    }

    /// Like [`LineFrames::new`], but an unterminated tail is yielded as a
    /// final line at EOF.
    #[must_use]
    pub fn keeping_tail(max_line_bytes: usize) -> Self {
        Self {
            keep_tail: true,
            ..Self::new(max_line_bytes)
        }
    }

    fn frame(decoded: Result<Option<String>>) -> Result<Option<Result<String>>> {
        match decoded {
            Ok(line) => Ok(line.map(Ok)),
            Err(AppError::Io(msg)) => Err(AppError::Io(msg)),
            Err(err) => Ok(Some(Err(err))),
        }
    }
}

impl Decoder for LineFrames {
    type Item = Result<String>;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        Self::frame(self.codec.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if self.keep_tail {
            return Self::frame(self.codec.decode_eof(src));
        }
        let frame = Self::frame(self.codec.decode(src))?;
        if frame.is_none() && !src.is_empty() {
            debug!(bytes = src.len(), "discarding unterminated trailing input");
            src.clear();
        }
        Ok(frame)
    }
}
