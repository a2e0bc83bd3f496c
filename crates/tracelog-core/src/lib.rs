//! # tracelog-core
//!
//! Trace-port log decoding for embedded firmware.
//!
//! Firmware built with the compact logging macros never sends format strings
//! over the wire. It sends the address of a metadata string kept in a
//! non-loaded `.log_data` section, followed by the raw argument words. This
//! crate turns that byte stream back into readable records:
//!
//! - [`decoder`]: bit-packed (ITM) and header-framed (UART) frame decoders
//! - [`reassembly`]: frames to finished [`LogRecord`]s, with timestamps
//! - [`symbols`]: address to call-site resolution from ELF artifacts, cached
//!   on disk and refreshed when the artifacts change
//! - [`dispatcher`]: per-transport workers, rendering and sink fan-out
//!
//! ## Data flow
//!
//! ```text
//! ByteSource -> FrameDecoder -> Reassembler -> Dispatcher -> Sink
//!                                    ^
//!                              SymbolResolver
//! ```

pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod reassembly;
pub mod symbols;
pub mod timestamp;
pub mod transport;
pub mod types;

pub use config::{ClockConfig, Protocol, ResolverConfig};
pub use dispatcher::{Dispatcher, Registry, Sink};
pub use error::{Result, TraceError};
pub use pipeline::Pipeline;
pub use symbols::{SymbolLookup, SymbolResolver, SymbolTable};
pub use types::{Frame, FrameKind, LogRecord, SymbolEntry};
