//! Decoded wire frames.

use smallvec::SmallVec;

use crate::timestamp::TimestampFormat;

/// Frame payload bytes; bit-packed frames never exceed four bytes.
pub type FramePayload = SmallVec<[u8; 8]>;

/// Discriminant of a decoded frame, with the fields each variant carries.
///
/// The first group belongs to the bit-packed (ITM) wire, the last three to
/// the header-framed (UART) wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind
{
    /// Synchronisation run of zero bytes
    Sync,
    /// Extension packet with its accumulated value
    Extension
    {
        value: u32
    },
    /// The trace port dropped packets
    Overflow,
    /// Local timestamp carrying a tick delta
    Timestamp
    {
        delta: u64
    },
    /// Software stimulus port write
    SourceSoftware
    {
        port: u8
    },
    /// Periodic PC sample
    SourceHardwarePc,
    /// DWT event counter wrap
    SourceHardwareCounterWrap,
    /// Exception entry/exit trace
    SourceHardwareException,
    /// Data trace or watchpoint match
    SourceHardwareTrace
    {
        discriminator: u8
    },
    /// Complete header-framed record: pointer, timestamp word and arguments
    Data
    {
        pointer: u32
    },
    /// Overflow marker standing in for a lost record
    Error
    {
        pointer: u32
    },
    /// Timestamp layout that applies to the data frames that follow
    TimestampFormat(TimestampFormat),
}

/// One decoded unit of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame
{
    pub kind: FrameKind,
    /// Bytes the frame occupied on the wire (after any in-band length field
    /// has been stripped)
    pub len: usize,
    /// Running tick counter of the decoder when the frame was produced
    pub ticks: u64,
    pub payload: FramePayload,
}

impl Frame
{
    #[must_use]
    pub fn new(kind: FrameKind, len: usize, ticks: u64, payload: &[u8]) -> Self
    {
        Self {
            kind,
            len,
            ticks,
            payload: SmallVec::from_slice(payload),
        }
    }

    /// Payload interpreted as a little-endian word, if it is exactly four bytes.
    #[must_use]
    pub fn payload_word(&self) -> Option<u32>
    {
        let bytes: [u8; 4] = self.payload.as_slice().try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }
}
