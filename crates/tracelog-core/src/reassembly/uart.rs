//! Reassembly for the header-framed wire.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::{InProgressRecord, Reassembler};
use crate::decoder::alternate_address;
use crate::symbols::SymbolLookup;
use crate::timestamp::TimestampFormat;
use crate::types::{Frame, FrameKind, LogRecord};

const RECORD_HEADER_LEN: usize = 8;

/// Reassembler for header-framed records.
///
/// Each data frame already holds a whole record, so reassembly here is mostly
/// timestamp decoding. Host time is not correlated on this wire; the host
/// timestamp repeats the device timestamp.
pub struct UartReassembler
{
    alias: String,
    lookup: Arc<dyn SymbolLookup>,
    format: Option<TimestampFormat>,
    current: Option<InProgressRecord>,
}

impl UartReassembler
{
    pub fn new(alias: impl Into<String>, lookup: Arc<dyn SymbolLookup>) -> Self
    {
        Self {
            alias: alias.into(),
            lookup,
            format: None,
            current: None,
        }
    }

    #[must_use]
    pub fn format(&self) -> Option<TimestampFormat>
    {
        self.format
    }

    fn set_format(&mut self, format: TimestampFormat)
    {
        if self.format == Some(format) {
            return;
        }
        if let Some(previous) = self.format {
            info!(transport = %self.alias, ?previous, current = ?format, "timestamp format redefined");
        }
        self.format = Some(format);
    }

    fn data(&mut self, pointer: u32, frame: &Frame) -> Option<LogRecord>
    {
        if let Some(previous) = self.current.take() {
            error!(
                transport = %self.alias,
                address = %format_args!("0x{:08x}", previous.address()),
                expected = ?previous.expected_len(),
                actual = previous.data().len(),
                "record interrupted by a new header, dropping it"
            );
        }

        let Some(format) = self.format else {
            error!(transport = %self.alias, "data frame before any timestamp format, dropping");
            return None;
        };
        let Some(entry) = self.lookup.lookup(pointer) else {
            warn!(
                transport = %self.alias,
                address = %format_args!("0x{pointer:08x}"),
                "unknown log symbol, the artifact may not match the firmware"
            );
            return None;
        };
        if frame.payload.len() < RECORD_HEADER_LEN {
            warn!(transport = %self.alias, len = frame.payload.len(), "data frame shorter than its header");
            return None;
        }

        let word = u32::from_le_bytes([frame.payload[4], frame.payload[5], frame.payload[6], frame.payload[7]]);
        let device = format.decode(u64::from(word));
        let mut record = InProgressRecord::new(pointer, entry, device, device);

        let body = &frame.payload[RECORD_HEADER_LEN..];
        let consumed = frame.len.saturating_sub(RECORD_HEADER_LEN);
        if record.remaining().is_none() {
            record.set_remaining(consumed as i64);
        }
        record.append(body, consumed);

        if record.remaining().is_some_and(|remaining| remaining <= 0) {
            return Some(record.finish(&self.alias));
        }
        self.current = Some(record);
        None
    }

    fn overflow(&mut self, pointer: u32)
    {
        if let Some(previous) = self.current.take() {
            warn!(
                transport = %self.alias,
                address = %format_args!("0x{:08x}", previous.address()),
                "dropping partial record at overflow marker"
            );
        }

        let site = alternate_address(pointer);
        match self.lookup.lookup(site) {
            Some(entry) => warn!(
                transport = %self.alias,
                address = %format_args!("0x{site:08x}"),
                file = %entry.file,
                line = entry.line,
                "device log buffer overflowed, record lost"
            ),
            None => warn!(
                transport = %self.alias,
                address = %format_args!("0x{site:08x}"),
                "device log buffer overflowed, record lost"
            ),
        }
    }
}

impl Reassembler for UartReassembler
{
    fn push(&mut self, frame: Frame) -> Option<LogRecord>
    {
        match frame.kind {
            FrameKind::TimestampFormat(format) => {
                self.set_format(format);
                None
            }
            FrameKind::Data { pointer } => self.data(pointer, &frame),
            FrameKind::Error { pointer } => {
                self.overflow(pointer);
                None
            }
            _ => None,
        }
    }

    fn pending(&self) -> Option<&InProgressRecord>
    {
        self.current.as_ref()
    }
}
