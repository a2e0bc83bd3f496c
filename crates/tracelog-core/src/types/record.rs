//! Finalized log records.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::symbol::{Opcode, Severity, SymbolEntry};

/// A reassembled, timestamped log event.
///
/// Records are built once by a reassembler and then moved into the
/// dispatcher; nothing mutates them afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord
{
    /// Name of the byte source the record arrived on
    pub alias: String,
    pub module: String,
    pub opcode: Opcode,
    pub level: Severity,
    pub file: String,
    pub line: u32,
    /// Device time in seconds
    pub device_timestamp: f64,
    /// Host-correlated time in seconds since the Unix epoch (equal to the
    /// device time when no correlation is available)
    pub host_timestamp: f64,
    /// Argument words or buffer bytes
    pub data: Vec<u8>,
    pub entry: Arc<SymbolEntry>,
}

impl LogRecord
{
    #[must_use]
    pub fn new(alias: &str, entry: Arc<SymbolEntry>, data: Vec<u8>, device_timestamp: f64, host_timestamp: f64) -> Self
    {
        Self {
            alias: alias.to_string(),
            module: entry.module.clone(),
            opcode: entry.opcode.clone(),
            level: entry.level,
            file: entry.file.clone(),
            line: entry.line,
            device_timestamp,
            host_timestamp,
            data,
            entry,
        }
    }

    /// Host timestamp as a calendar time, when it fits the calendar range.
    #[must_use]
    pub fn host_time(&self) -> Option<DateTime<Utc>>
    {
        let micros = (self.host_timestamp * 1_000_000.0).round();
        if !micros.is_finite() {
            return None;
        }
        DateTime::from_timestamp_micros(micros as i64)
    }

    /// Argument words of a formatted-text record.
    ///
    /// Returns `None` when the payload is not a whole number of words.
    #[must_use]
    pub fn argument_words(&self) -> Option<Vec<u32>>
    {
        if self.data.len() % 4 != 0 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect(),
        )
    }
}
