//! Bet submission wire protocol.
//!
//! One request and one response per connection:
//!
//! ```text
//! Request (text framing):   37 1;Juan;Perez;30904465;1999-03-17;7723
//! Request (binary framing): <u32 big-endian length><payload>
//! Response:                 OK\n | ERROR SAVING BET\n
//! ```
//!
//! The text framing finds the end of the decimal length prefix by waiting for
//! the first space. The binary framing uses a fixed 4-byte header instead, so
//! payload content never affects where the header ends.

pub mod frame;
pub mod parser;
pub mod response;

use serde::Deserialize;
use std::fmt;

pub use frame::{FrameDecoder, FrameState};
pub use parser::{parse_bets, ParseError};
pub use response::Response;

/// How the payload length is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// `<decimal length><space><payload>`
    #[default]
    Text,
    /// `<u32 big-endian length><payload>`
    Binary,
}

/// Malformed frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// No space within the first bytes of a text frame
    LengthPrefixTooLong,
    /// Length prefix is not a decimal number
    InvalidLength(String),
    /// Declared payload exceeds the configured limit
    PayloadTooLarge { declared: usize, max: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::LengthPrefixTooLong => write!(
                f,
                "no length delimiter within {} bytes",
                frame::MAX_LENGTH_PREFIX
            ),
            FrameError::InvalidLength(prefix) => write!(f, "invalid length prefix: {:?}", prefix),
            FrameError::PayloadTooLarge { declared, max } => {
                write!(f, "declared payload of {} bytes exceeds limit of {}", declared, max)
            }
        }
    }
}

impl std::error::Error for FrameError {}
