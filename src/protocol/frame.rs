//! Streaming frame decoder.
//!
//! Consumes bytes from a growing `BytesMut` and yields a payload only once the
//! declared length has been fully buffered. Returns `Ok(None)` when more data
//! is needed, so callers can keep reading across short reads.

use bytes::{Buf, Bytes, BytesMut};

use super::{FrameError, Framing};

/// Longest decimal length prefix accepted before a space must appear.
pub const MAX_LENGTH_PREFIX: usize = 20;

/// Size of the binary length header.
const BINARY_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Looking for the end of the length prefix.
    ReadingLength,
    /// Length known, waiting for `declared` payload bytes.
    ReadingPayload { declared: usize },
}

/// Frame decoder for one connection.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    max_payload_size: usize,
    state: FrameState,
}

impl FrameDecoder {
    pub fn new(framing: Framing, max_payload_size: usize) -> Self {
        FrameDecoder {
            framing,
            max_payload_size,
            state: FrameState::ReadingLength,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Attempts to decode a frame from the buffer.
    ///
    /// On success the returned payload holds exactly the declared number of
    /// bytes; anything buffered past it is left in `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        loop {
            match self.state {
                FrameState::ReadingLength => {
                    let declared = match self.framing {
                        Framing::Text => match decode_text_length(buf)? {
                            Some(len) => len,
                            None => return Ok(None),
                        },
                        Framing::Binary => {
                            if buf.len() < BINARY_HEADER_LEN {
                                return Ok(None);
                            }
                            buf.get_u32() as usize
                        }
                    };
                    if declared > self.max_payload_size {
                        return Err(FrameError::PayloadTooLarge {
                            declared,
                            max: self.max_payload_size,
                        });
                    }
                    self.state = FrameState::ReadingPayload { declared };
                }
                FrameState::ReadingPayload { declared } => {
                    if buf.len() < declared {
                        return Ok(None);
                    }
                    self.state = FrameState::ReadingLength;
                    return Ok(Some(buf.split_to(declared).freeze()));
                }
            }
        }
    }
}

/// Reads `<digits><space>` off the front of `buf`.
fn decode_text_length(buf: &mut BytesMut) -> Result<Option<usize>, FrameError> {
    let space = match buf.iter().position(|&b| b == b' ') {
        Some(pos) => pos,
        None if buf.len() > MAX_LENGTH_PREFIX => return Err(FrameError::LengthPrefixTooLong),
        None => return Ok(None),
    };
    if space > MAX_LENGTH_PREFIX {
        return Err(FrameError::LengthPrefixTooLong);
    }

    let prefix = buf.split_to(space);
    buf.advance(1);
    parse_decimal(&prefix).map(Some)
}

fn parse_decimal(data: &[u8]) -> Result<usize, FrameError> {
    let invalid = || FrameError::InvalidLength(String::from_utf8_lossy(data).into_owned());
    if data.is_empty() {
        return Err(invalid());
    }
    let mut value: usize = 0;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(invalid());
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as usize))
            .ok_or_else(invalid)?;
    }
    Ok(value)
}
