//! # Tracelog Utilities
//!
//! Shared utilities and logging for Tracelog.
//!
//! This crate holds the `tracing` setup used by the command-line tool and by
//! anything else embedding the decoder that wants the same log output.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};
