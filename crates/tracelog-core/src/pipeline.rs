//! Decoder and reassembler glued together for one byte source.

use std::sync::Arc;

use crate::config::Protocol;
use crate::decoder::{FrameDecoder, ItmDecoder, UartDecoder};
use crate::error::Result;
use crate::reassembly::{ItmReassembler, Reassembler, UartReassembler};
use crate::symbols::SymbolLookup;
use crate::types::LogRecord;

/// Bytes in, finished records out.
///
/// Unconsumed bytes (a partial frame) are kept between calls, so chunk
/// boundaries of the underlying source do not matter.
pub struct Pipeline
{
    alias: String,
    buffer: Vec<u8>,
    decoder: Box<dyn FrameDecoder>,
    reassembler: Box<dyn Reassembler>,
}

impl Pipeline
{
    /// Build the decoder and reassembler for `protocol`.
    ///
    /// ## Errors
    ///
    /// Invalid clock settings for the bit-packed wire, or a missing native
    /// timestamp format for the header-framed wire.
    pub fn new(alias: impl Into<String>, protocol: &Protocol, lookup: Arc<dyn SymbolLookup>) -> Result<Self>
    {
        let alias = alias.into();
        let (decoder, reassembler): (Box<dyn FrameDecoder>, Box<dyn Reassembler>) = match protocol {
            Protocol::Itm(clock) => {
                clock.validate()?;
                (
                    Box::new(ItmDecoder::new(*clock)),
                    Box::new(ItmReassembler::new(alias.clone(), lookup, *clock)),
                )
            }
            Protocol::Uart => (
                Box::new(UartDecoder::new(lookup.clone())?),
                Box::new(UartReassembler::new(alias.clone(), lookup)),
            ),
        };
        Ok(Self::from_parts(alias, decoder, reassembler))
    }

    #[must_use]
    pub fn from_parts(alias: impl Into<String>, decoder: Box<dyn FrameDecoder>, reassembler: Box<dyn Reassembler>) -> Self
    {
        Self {
            alias: alias.into(),
            buffer: Vec::new(),
            decoder,
            reassembler,
        }
    }

    #[must_use]
    pub fn alias(&self) -> &str
    {
        &self.alias
    }

    /// Bytes waiting for the rest of their frame.
    #[must_use]
    pub fn pending_bytes(&self) -> usize
    {
        self.buffer.len()
    }

    /// Append `bytes` and return every record they complete, in wire order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<LogRecord>
    {
        self.buffer.extend_from_slice(bytes);
        let frames = self.decoder.decode(&mut self.buffer);
        frames
            .into_iter()
            .filter_map(|frame| self.reassembler.push(frame))
            .collect()
    }
}
