//! CRLF line framing for the FNAA control stream.
//!
//! Wire format: text lines terminated by `\r\n`. A decoded line has the
//! terminator removed plus, if present, exactly one more trailing `\r`.
//! A bare `\n` is ordinary line content.
//!
//! A line longer than [`MAX_LINE_LEN`] is not an error: the codec yields a
//! single [`Line::Overflow`] and drops input up to the next `\r\n`, so the
//! connection can answer it and keep going.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FnaaError;

/// Line terminator used in both directions.
pub const CRLF: &[u8] = b"\r\n";

/// Longest unterminated line the codec will buffer (64 KiB).
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// A line went past [`MAX_LINE_LEN`]; its bytes were discarded.
    Overflow,
}

/// Streaming CRLF codec for `tokio_util::codec::Framed`.
///
/// Output is independent of how the input is chunked.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Dropping the tail of an oversized line until its terminator.
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything buffered except a trailing `\r` that may be the
    /// first half of a split terminator.
    fn discard_pending(buf: &mut BytesMut) {
        let keep = usize::from(buf.last() == Some(&b'\r'));
        let skip = buf.len() - keep;
        buf.advance(skip);
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = FnaaError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, FnaaError> {
        loop {
            match find_crlf(buf) {
                Some(i) => {
                    let frame = buf.split_to(i + CRLF.len());
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    let text = String::from_utf8_lossy(drop_cr(&frame[..i])).into_owned();
                    return Ok(Some(Line::Text(text)));
                }
                None if self.discarding => {
                    Self::discard_pending(buf);
                    return Ok(None);
                }
                None if buf.len() > MAX_LINE_LEN => {
                    self.discarding = true;
                    Self::discard_pending(buf);
                    return Ok(Some(Line::Overflow));
                }
                None => return Ok(None),
            }
        }
    }

    /// Hand out the unterminated remainder once at end of stream.
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, FnaaError> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split();
        if std::mem::take(&mut self.discarding) {
            return Ok(None);
        }
        Ok(Some(Line::Text(
            String::from_utf8_lossy(drop_cr(&rest)).into_owned(),
        )))
    }
}

impl Encoder<String> for LineCodec {
    type Error = FnaaError;

    fn encode(&mut self, text: String, dst: &mut BytesMut) -> Result<(), FnaaError> {
        dst.reserve(text.len() + CRLF.len());
        dst.put_slice(text.as_bytes());
        dst.put_slice(CRLF);
        Ok(())
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(CRLF.len()).position(|w| w == CRLF)
}

fn drop_cr(data: &[u8]) -> &[u8] {
    match data.split_last() {
        Some((b'\r', rest)) => rest,
        _ => data,
    }
}
