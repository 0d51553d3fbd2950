//! Line framing for stream transports.
//!
//! The protocol is newline-free, so a byte stream carries one message per
//! `\n`-terminated line. `SimCodec` wraps [`LinesCodec`] with a length cap
//! and refuses to encode anything that would break framing.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::error::SimlinkError;

/// Longest line accepted in either direction.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Newline-delimited text codec for simulation messages.
#[derive(Debug)]
pub struct SimCodec {
    lines: LinesCodec,
}

impl SimCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }
}

impl Default for SimCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl From<LinesCodecError> for SimlinkError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => SimlinkError::FrameTooLarge {
                max: MAX_LINE_LENGTH,
            },
            LinesCodecError::Io(io) => SimlinkError::Connection(io),
        }
    }
}

impl Decoder for SimCodec {
    type Item = String;
    type Error = SimlinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.lines.decode(src)?)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.lines.decode_eof(src)?)
    }
}

impl Encoder<String> for SimCodec {
    type Error = SimlinkError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.contains(['\n', '\r']) {
            return Err(SimlinkError::InvalidMessage(
                "message contains a line break".into(),
            ));
        }
        if item.len() > MAX_LINE_LENGTH {
            return Err(SimlinkError::FrameTooLarge {
                max: MAX_LINE_LENGTH,
            });
        }
        self.lines.encode(item, dst)?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
