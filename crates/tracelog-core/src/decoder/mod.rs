//! # Frame Decoders
//!
//! Turn raw trace-port bytes into typed [`Frame`]s.
//!
//! Two wire encodings are supported:
//!
//! - [`ItmDecoder`]: the bit-packed instrumentation trace (ITM/SWO). Nothing
//!   is emitted until the reset token has been seen.
//! - [`UartDecoder`]: header-framed records where every record starts with
//!   the little-endian address of its log symbol.
//!
//! ## Buffer contract
//!
//! [`FrameDecoder::decode`] drains only the bytes belonging to complete
//! frames. A partial frame stays at the front of the buffer so the caller can
//! append the next read and call again.
//!
//! ## Errors
//!
//! Corrupt frames never reach the caller. They are logged as [`FrameError`]
//! and the decoder skips ahead to resynchronise.

mod itm;
mod uart;

pub use itm::{ports, ItmDecoder, OVERFLOW_HEADER, RESET_TOKEN, RESET_WORD};
use thiserror::Error;
pub use uart::{alternate_address, UartDecoder, LOG_DATA_BASE, MAX_BUFFER_LEN};

use crate::types::Frame;

/// A wire decoder that owns its resynchronisation state.
pub trait FrameDecoder: Send
{
    /// Decode every complete frame at the front of `buffer`, removing the
    /// consumed bytes.
    fn decode(&mut self, buffer: &mut Vec<u8>) -> Vec<Frame>;
}

/// Per-frame decode failure. Logged and skipped, never returned to callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError
{
    /// Source header with the reserved size class `0b00`
    #[error("illegal size class in header 0x{header:02x}")]
    IllegalSize
    {
        header: u8
    },

    /// Hardware source discriminator outside the defined range
    #[error("unknown hardware source {discriminator} in header 0x{header:02x}")]
    UnknownHardwareSource
    {
        header: u8, discriminator: u8, len: usize
    },

    /// Protocol header that matches no packet type
    #[error("unrecognised header 0x{0:02x}")]
    UnknownHeader(u8),

    /// Continuation bytes kept coming past the longest valid encoding
    #[error("continuation run longer than {0} bytes")]
    ContinuationTooLong(usize),

    /// Buffer record announcing an implausible length
    #[error("declared buffer length {declared} exceeds {limit} bytes")]
    BufferTooLong
    {
        declared: u32, limit: u32
    },
}

impl FrameError
{
    /// Bytes to discard before trying the next header.
    pub(crate) fn skip(&self) -> usize
    {
        match self {
            Self::UnknownHardwareSource { len, .. } => 1 + len,
            _ => 1,
        }
    }
}
