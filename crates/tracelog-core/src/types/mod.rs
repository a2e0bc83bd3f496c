//! # Types
//!
//! Data model shared by the decoders, the reassemblers and the dispatcher.
//!
//! Frames are transient wire units, symbol entries describe log call sites
//! recovered from debug artifacts, and log records are the finalized events
//! handed to sinks.

pub mod frame;
pub mod record;
pub mod symbol;

// Re-export all public types
pub use frame::{Frame, FrameKind, FramePayload};
pub use record::LogRecord;
pub use symbol::{Opcode, Severity, SymbolEntry, SymbolKind};
