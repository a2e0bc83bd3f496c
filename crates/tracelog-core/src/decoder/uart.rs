//! Header-framed (UART) record decoder.

use std::sync::Arc;

use tracing::{info, trace, warn};

use super::{FrameDecoder, FrameError};
use crate::error::{Result, TraceError};
use crate::symbols::SymbolLookup;
use crate::timestamp::TimestampFormat;
use crate::types::{Frame, FrameKind, SymbolKind};

/// Link address of the `.log_data` section.
pub const LOG_DATA_BASE: u32 = 0x9000_0000;

/// Largest buffer record accepted before the length is treated as corrupt.
pub const MAX_BUFFER_LEN: u32 = 64 * 1024;

const POINTER_LEN: usize = 4;
const RECORD_HEADER_LEN: usize = 8;
const BUFFER_HEADER_LEN: usize = 12;

const ERROR_MASK: u32 = 0xFFF8_0000;
const ERROR_PATTERN: u32 = 0x8000_0000;

/// Address of the call site an overflow marker stands in for.
#[must_use]
pub fn alternate_address(pointer: u32) -> u32
{
    LOG_DATA_BASE | (pointer & !ERROR_MASK)
}

/// Decoder for the header-framed wire.
///
/// Record lengths come from the symbol table, so the decoder needs the
/// resolver from the start. Every [`FrameDecoder::decode`] call begins with a
/// [`FrameKind::TimestampFormat`] frame describing the timestamp words of the
/// data frames that follow. The descriptor is re-read from the lookup on each
/// call, so a rebuilt symbol table takes effect on the next read; a table
/// without one keeps the last known format.
pub struct UartDecoder
{
    lookup: Arc<dyn SymbolLookup>,
    format: TimestampFormat,
}

enum Parsed
{
    Frame(Frame, usize),
    Incomplete,
    Unknown,
}

impl UartDecoder
{
    /// ## Errors
    ///
    /// [`TraceError::MissingTimestampFormat`] when the artifacts carry no
    /// 32-bit native timestamp descriptor.
    pub fn new(lookup: Arc<dyn SymbolLookup>) -> Result<Self>
    {
        let format = lookup
            .timestamp_formats()
            .native32
            .ok_or(TraceError::MissingTimestampFormat)?;
        Ok(Self::with_format(lookup, format))
    }

    #[must_use]
    pub fn with_format(lookup: Arc<dyn SymbolLookup>, format: TimestampFormat) -> Self
    {
        Self { lookup, format }
    }

    #[must_use]
    pub fn format(&self) -> TimestampFormat
    {
        self.format
    }

    fn refresh_format(&mut self)
    {
        let Some(current) = self.lookup.timestamp_formats().native32 else {
            return;
        };
        if current != self.format {
            info!(previous = ?self.format, ?current, "native timestamp format changed");
            self.format = current;
        }
    }

    fn parse(&self, buf: &[u8]) -> std::result::Result<Parsed, FrameError>
    {
        let pointer = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);

        if let Some(entry) = self.lookup.lookup(pointer) {
            return match entry.kind {
                SymbolKind::FormattedText => {
                    let len = RECORD_HEADER_LEN + entry.nargs as usize * 4;
                    if buf.len() < len {
                        return Ok(Parsed::Incomplete);
                    }
                    Ok(Parsed::Frame(Frame::new(FrameKind::Data { pointer }, len, 0, &buf[..len]), len))
                }
                SymbolKind::Buffer => {
                    if buf.len() < BUFFER_HEADER_LEN {
                        return Ok(Parsed::Incomplete);
                    }
                    let declared = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
                    if declared > MAX_BUFFER_LEN {
                        return Err(FrameError::BufferTooLong {
                            declared,
                            limit: MAX_BUFFER_LEN,
                        });
                    }
                    let total = BUFFER_HEADER_LEN + declared as usize;
                    if buf.len() < total {
                        return Ok(Parsed::Incomplete);
                    }
                    // drop the length word; the record length travels in `len`
                    let mut payload = Vec::with_capacity(total - 4);
                    payload.extend_from_slice(&buf[..RECORD_HEADER_LEN]);
                    payload.extend_from_slice(&buf[BUFFER_HEADER_LEN..total]);
                    Ok(Parsed::Frame(
                        Frame::new(FrameKind::Data { pointer }, total - 4, 0, &payload),
                        total,
                    ))
                }
            };
        }

        if pointer & ERROR_MASK == ERROR_PATTERN && self.lookup.lookup(alternate_address(pointer)).is_some() {
            return Ok(Parsed::Frame(
                Frame::new(FrameKind::Error { pointer }, POINTER_LEN, 0, &buf[..POINTER_LEN]),
                POINTER_LEN,
            ));
        }

        Ok(Parsed::Unknown)
    }
}

impl FrameDecoder for UartDecoder
{
    fn decode(&mut self, buffer: &mut Vec<u8>) -> Vec<Frame>
    {
        self.refresh_format();
        let mut frames = vec![Frame::new(FrameKind::TimestampFormat(self.format), 0, 0, &[])];

        let mut offset = 0;
        while buffer.len() - offset >= POINTER_LEN {
            match self.parse(&buffer[offset..]) {
                Ok(Parsed::Frame(frame, used)) => {
                    offset += used;
                    frames.push(frame);
                }
                Ok(Parsed::Incomplete) => break,
                Ok(Parsed::Unknown) => {
                    trace!(byte = buffer[offset], "no record starts here, advancing one byte");
                    offset += 1;
                }
                Err(err) => {
                    warn!(%err, "skipping corrupt record header");
                    offset += err.skip();
                }
            }
        }
        buffer.drain(..offset);
        frames
    }
}
