//! Bit-packed (ITM/SWO) trace decoder.

use tracing::{debug, trace, warn};

use super::{FrameDecoder, FrameError};
use crate::config::ClockConfig;
use crate::timestamp::RunningClock;
use crate::types::{Frame, FrameKind};

/// Stimulus ports used by the firmware's trace sink.
pub mod ports
{
    /// Log-symbol pointers; each write starts a record
    pub const HEADER: u8 = 0;
    /// Argument words and buffer bytes
    pub const TRACE: u8 = 1;
    /// Absolute device time words
    pub const TIME_SYNC: u8 = 2;
    /// Reset marker
    pub const RESET: u8 = 31;
}

/// Word the firmware writes to the reset port.
pub const RESET_WORD: u32 = 0xBBBB_BBBB;

/// Four-byte write of [`RESET_WORD`] to [`ports::RESET`], as it appears on the wire.
pub const RESET_TOKEN: [u8; 5] = [0xFB, 0xBB, 0xBB, 0xBB, 0xBB];

/// Header byte signalling that the trace port dropped packets.
pub const OVERFLOW_HEADER: u8 = 0x70;

/// Local timestamp and extension packets carry at most four continuation
/// bytes, so payloads fit in 28 bits.
const MAX_CONTINUATION: usize = 4;

/// Decoder for the bit-packed wire.
///
/// Keeps the running clock: every local timestamp frame advances it, and
/// each emitted frame carries the tick count at the moment it was decoded.
#[derive(Debug, Clone)]
pub struct ItmDecoder
{
    clock: RunningClock,
    synced: bool,
}

enum Parsed
{
    Frame(Frame, usize),
    Incomplete,
}

impl ItmDecoder
{
    #[must_use]
    pub fn new(config: ClockConfig) -> Self
    {
        Self {
            clock: RunningClock::new(config),
            synced: false,
        }
    }

    /// Whether the reset token has been seen.
    #[must_use]
    pub fn is_synced(&self) -> bool
    {
        self.synced
    }

    #[must_use]
    pub fn clock(&self) -> &RunningClock
    {
        &self.clock
    }

    /// Drop bytes until the reset token has been consumed.
    ///
    /// A tail that could still grow into the token is kept.
    fn synchronise(&mut self, buffer: &mut Vec<u8>) -> bool
    {
        if let Some(pos) = buffer.windows(RESET_TOKEN.len()).position(|window| window == RESET_TOKEN) {
            buffer.drain(..pos + RESET_TOKEN.len());
            self.synced = true;
            debug!(discarded = pos, "trace stream synchronised");
            return true;
        }

        let keep = (1..RESET_TOKEN.len())
            .rev()
            .find(|&n| n <= buffer.len() && buffer[buffer.len() - n..] == RESET_TOKEN[..n])
            .unwrap_or(0);
        let discard = buffer.len() - keep;
        if discard > 0 {
            trace!(discarded = discard, "waiting for reset token");
            buffer.drain(..discard);
        }
        false
    }

    fn frame(&self, kind: FrameKind, bytes: &[u8]) -> Parsed
    {
        // payload excludes the header byte
        Parsed::Frame(
            Frame::new(kind, bytes.len(), self.clock.ticks(), &bytes[1..]),
            bytes.len(),
        )
    }

    fn parse(&mut self, buf: &[u8]) -> Result<Parsed, FrameError>
    {
        let header = buf[0];

        if header == 0 {
            return Ok(match buf.iter().position(|&b| b != 0) {
                Some(pos) => Parsed::Frame(Frame::new(FrameKind::Sync, pos + 1, self.clock.ticks(), &[]), pos + 1),
                None => Parsed::Incomplete,
            });
        }

        if header & 0x03 == 0 {
            return self.parse_protocol(header, buf);
        }

        let size = match header & 0x03 {
            1 => 1,
            2 => 2,
            3 => 4,
            _ => return Err(FrameError::IllegalSize { header }),
        };
        let discriminator = header >> 3;

        if header & 0x04 == 0 {
            if buf.len() < 1 + size {
                return Ok(Parsed::Incomplete);
            }
            return Ok(self.frame(FrameKind::SourceSoftware { port: discriminator }, &buf[..1 + size]));
        }

        let (kind, size) = match discriminator {
            0 => (FrameKind::SourceHardwareCounterWrap, 1),
            1 => (FrameKind::SourceHardwareException, 2),
            2 => (FrameKind::SourceHardwarePc, size),
            _ => (FrameKind::SourceHardwareTrace { discriminator }, size),
        };
        if buf.len() < 1 + size {
            return Ok(Parsed::Incomplete);
        }
        if discriminator > 0x17 {
            return Err(FrameError::UnknownHardwareSource {
                header,
                discriminator,
                len: size,
            });
        }
        Ok(self.frame(kind, &buf[..1 + size]))
    }

    /// Headers with the low two bits clear: overflow, timestamps, extensions.
    fn parse_protocol(&mut self, header: u8, buf: &[u8]) -> Result<Parsed, FrameError>
    {
        if header == OVERFLOW_HEADER {
            warn!(ticks = self.clock.ticks(), "trace port overflow, packets were lost");
            return Ok(self.frame(FrameKind::Overflow, &buf[..1]));
        }

        if header & 0x0F == 0 {
            let (delta, used) = if header & 0x80 == 0 {
                (u64::from((header >> 4) & 0x07), 0)
            } else {
                match continuation(&buf[1..])? {
                    Some(parsed) => parsed,
                    None => return Ok(Parsed::Incomplete),
                }
            };
            self.clock.advance(delta);
            trace!(
                delta,
                seconds = self.clock.seconds(),
                radio_ticks = self.clock.radio_ticks(),
                "local timestamp"
            );
            return Ok(self.frame(FrameKind::Timestamp { delta }, &buf[..1 + used]));
        }

        if header & 0x0B == 0x08 {
            let mut value = u32::from((header >> 4) & 0x07);
            let mut used = 0;
            if header & 0x80 != 0 {
                match continuation(&buf[1..])? {
                    Some((rest, n)) => {
                        let rest =
                            u32::try_from(rest).map_err(|_| FrameError::ContinuationTooLong(MAX_CONTINUATION))?;
                        value |= rest << 3;
                        used = n;
                    }
                    None => return Ok(Parsed::Incomplete),
                }
            }
            return Ok(self.frame(FrameKind::Extension { value }, &buf[..1 + used]));
        }

        Err(FrameError::UnknownHeader(header))
    }
}

/// Little-endian 7-bit groups, terminated by the first byte with a clear MSB.
fn continuation(bytes: &[u8]) -> Result<Option<(u64, usize)>, FrameError>
{
    let mut value = 0u64;
    for (index, &byte) in bytes.iter().enumerate() {
        if index >= MAX_CONTINUATION {
            return Err(FrameError::ContinuationTooLong(MAX_CONTINUATION));
        }
        value |= u64::from(byte & 0x7F) << (7 * index);
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
    }
    Ok(None)
}

impl FrameDecoder for ItmDecoder
{
    fn decode(&mut self, buffer: &mut Vec<u8>) -> Vec<Frame>
    {
        let mut frames = Vec::new();
        if !self.synced && !self.synchronise(buffer) {
            return frames;
        }

        let mut offset = 0;
        while offset < buffer.len() {
            match self.parse(&buffer[offset..]) {
                Ok(Parsed::Frame(frame, used)) => {
                    offset += used;
                    frames.push(frame);
                }
                Ok(Parsed::Incomplete) => break,
                Err(err) => {
                    warn!(%err, byte = buffer[offset], "skipping undecodable trace data");
                    offset += err.skip();
                }
            }
        }
        buffer.drain(..offset.min(buffer.len()));
        frames
    }
}
