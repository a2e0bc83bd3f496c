//! # Packet Reassembly
//!
//! Combine decoded frames into finished [`LogRecord`]s.
//!
//! A header frame names a log symbol by address. The symbol decides how many
//! payload bytes follow: `nargs` words for formatted text, or a length that
//! travels in-band for buffers. Bytes are collected in an
//! [`InProgressRecord`] until that length is used up.
//!
//! The two wires finish records differently. The bit-packed reassembler
//! requires the remaining count to land on exactly zero and treats an
//! overrun as corruption; the header-framed one finishes as soon as the
//! count is zero or below.

mod itm;
mod uart;

use std::sync::Arc;

pub use itm::ItmReassembler;
pub use uart::UartReassembler;

use crate::types::{Frame, LogRecord, SymbolEntry};

/// Frame consumer producing finished records.
pub trait Reassembler: Send
{
    /// Feed one frame; returns a record when it completes one.
    fn push(&mut self, frame: Frame) -> Option<LogRecord>;

    /// Record currently being collected, if any.
    fn pending(&self) -> Option<&InProgressRecord>;
}

/// Accumulator for a record whose payload has not fully arrived.
#[derive(Debug, Clone)]
pub struct InProgressRecord
{
    address: u32,
    entry: Arc<SymbolEntry>,
    data: Vec<u8>,
    /// `None` while a buffer record waits for its length word
    remaining: Option<i64>,
    device_timestamp: f64,
    host_timestamp: f64,
}

impl InProgressRecord
{
    pub(crate) fn new(address: u32, entry: Arc<SymbolEntry>, device_timestamp: f64, host_timestamp: f64) -> Self
    {
        let remaining = entry.payload_len().map(|len| len as i64);
        Self {
            address,
            entry,
            data: Vec::new(),
            remaining,
            device_timestamp,
            host_timestamp,
        }
    }

    #[must_use]
    pub fn address(&self) -> u32
    {
        self.address
    }

    #[must_use]
    pub fn entry(&self) -> &Arc<SymbolEntry>
    {
        &self.entry
    }

    #[must_use]
    pub fn data(&self) -> &[u8]
    {
        &self.data
    }

    #[must_use]
    pub fn remaining(&self) -> Option<i64>
    {
        self.remaining
    }

    /// Total payload length the record expects, once known.
    #[must_use]
    pub fn expected_len(&self) -> Option<i64>
    {
        self.remaining.map(|remaining| remaining + self.data.len() as i64)
    }

    pub(crate) fn set_remaining(&mut self, remaining: i64)
    {
        self.remaining = Some(remaining);
    }

    pub(crate) fn append(&mut self, bytes: &[u8], consumed: usize)
    {
        self.data.extend_from_slice(bytes);
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= consumed as i64;
        }
    }

    pub(crate) fn finish(self, alias: &str) -> LogRecord
    {
        LogRecord::new(alias, self.entry, self.data, self.device_timestamp, self.host_timestamp)
    }
}
