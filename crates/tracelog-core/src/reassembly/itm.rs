//! Reassembly for the bit-packed wire.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use super::{InProgressRecord, Reassembler};
use crate::config::ClockConfig;
use crate::decoder::{ports, MAX_BUFFER_LEN, RESET_WORD};
use crate::symbols::SymbolLookup;
use crate::timestamp::{host_now, TimeCorrelator};
use crate::types::{Frame, FrameKind, LogRecord};

/// Reassembler for ITM stimulus-port traffic.
///
/// Port 0 writes start a record, port 1 writes carry its payload, port 2
/// writes re-anchor device time and port 31 resets the stream.
pub struct ItmReassembler
{
    alias: String,
    lookup: Arc<dyn SymbolLookup>,
    correlator: TimeCorrelator,
    host_clock: fn() -> f64,
    current: Option<InProgressRecord>,
}

impl ItmReassembler
{
    pub fn new(alias: impl Into<String>, lookup: Arc<dyn SymbolLookup>, clock: ClockConfig) -> Self
    {
        Self {
            alias: alias.into(),
            lookup,
            correlator: TimeCorrelator::new(clock),
            host_clock: host_now,
            current: None,
        }
    }

    /// Replace the wall clock used to correlate time-sync records.
    #[must_use]
    pub fn with_host_clock(mut self, host_clock: fn() -> f64) -> Self
    {
        self.host_clock = host_clock;
        self
    }

    #[must_use]
    pub fn correlator(&self) -> &TimeCorrelator
    {
        &self.correlator
    }

    fn start(&mut self, frame: &Frame) -> Option<LogRecord>
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

        let Some(address) = frame.payload_word() else {
            warn!(transport = %self.alias, len = frame.payload.len(), "header write is not a full pointer");
            return None;
        };
        let Some(entry) = self.lookup.lookup(address) else {
            warn!(
                transport = %self.alias,
                address = %format_args!("0x{address:08x}"),
                "unknown log symbol, the artifact may not match the firmware"
            );
            return None;
        };

        let device = self.correlator.device_time(frame.ticks);
        let host = self.correlator.host_time(device);
        let record = InProgressRecord::new(address, entry, device, host);
        if record.remaining() == Some(0) {
            return Some(record.finish(&self.alias));
        }
        self.current = Some(record);
        None
    }

    fn append(&mut self, frame: &Frame) -> Option<LogRecord>
    {
        let Some(record) = self.current.as_mut() else {
            warn!(transport = %self.alias, len = frame.payload.len(), "trace data without a record header, dropping");
            return None;
        };

        if record.remaining().is_none() {
            // first trace write of a buffer record is its length
            let Some(declared) = frame.payload_word() else {
                error!(
                    transport = %self.alias,
                    address = %format_args!("0x{:08x}", record.address()),
                    len = frame.payload.len(),
                    "buffer length is not a full word, dropping record"
                );
                self.current = None;
                return None;
            };
            if declared > MAX_BUFFER_LEN {
                error!(
                    transport = %self.alias,
                    address = %format_args!("0x{:08x}", record.address()),
                    declared,
                    limit = MAX_BUFFER_LEN,
                    "buffer length exceeds limit, dropping record"
                );
                self.current = None;
                return None;
            }
            record.set_remaining(i64::from(declared));
        } else {
            record.append(&frame.payload, frame.payload.len());
        }

        match record.remaining() {
            Some(0) => self.current.take().map(|record| record.finish(&self.alias)),
            Some(remaining) if remaining < 0 => {
                error!(
                    transport = %self.alias,
                    address = %format_args!("0x{:08x}", record.address()),
                    expected = ?record.expected_len(),
                    overrun = -remaining,
                    actual = record.data().len(),
                    "record payload overran its declared length, dropping it"
                );
                self.current = None;
                None
            }
            _ => None,
        }
    }

    fn time_sync(&mut self, frame: &Frame)
    {
        let Some(word) = frame.payload_word() else {
            warn!(transport = %self.alias, "time-sync write is not a full word");
            return;
        };
        let Some(format) = self.lookup.timestamp_formats().preferred() else {
            warn!(transport = %self.alias, "time-sync record without a timestamp format, ignoring");
            return;
        };
        if let Some(device) = self.correlator.sync(word, format, frame.ticks, (self.host_clock)()) {
            debug!(transport = %self.alias, device_seconds = device, "device time resynchronised");
        }
    }

    fn drop_current(&mut self, reason: &str)
    {
        if let Some(record) = self.current.take() {
            warn!(
                transport = %self.alias,
                address = %format_args!("0x{:08x}", record.address()),
                reason,
                "dropping partial record"
            );
        }
    }
}

impl Reassembler for ItmReassembler
{
    fn push(&mut self, frame: Frame) -> Option<LogRecord>
    {
        match frame.kind {
            FrameKind::SourceSoftware { port: ports::HEADER } => self.start(&frame),
            FrameKind::SourceSoftware { port: ports::TRACE } => self.append(&frame),
            FrameKind::SourceSoftware {
                port: ports::TIME_SYNC,
            } => {
                self.time_sync(&frame);
                None
            }
            FrameKind::SourceSoftware { port: ports::RESET } => {
                if frame.payload_word() == Some(RESET_WORD) {
                    self.drop_current("device reset");
                }
                None
            }
            FrameKind::SourceSoftware { port } => {
                trace!(transport = %self.alias, port, "ignoring unused stimulus port");
                None
            }
            FrameKind::Overflow => {
                self.drop_current("trace overflow");
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
