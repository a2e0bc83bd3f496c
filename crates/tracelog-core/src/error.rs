//! # Error Types
//!
//! General error handling for the decoding pipeline.
//!
//! Only conditions that must stop a caller surface here. Framing corruption,
//! resolution misses and rendering failures are recovered where they happen
//! and reported through `tracing` instead (see `decoder::FrameError` and
//! `dispatcher::RenderError`).

use thiserror::Error;

/// Main error type for pipeline setup and symbol resolution.
///
/// ## Error Categories
///
/// 1. **Artifact errors**: InvalidArtifact
/// 2. **Configuration errors**: MissingTimestampFormat, InvalidConfig
/// 3. **Cache errors**: Cache
/// 4. **Watcher errors**: Watch
/// 5. **I/O errors**: Io
#[derive(Error, Debug)]
pub enum TraceError
{
    /// A debug artifact could not be parsed as an object file
    ///
    /// This happens when:
    /// - The path does not point at an ELF (or other supported) image
    /// - A section holding log metadata is truncated or compressed badly
    #[error("Invalid debug artifact: {0}")]
    InvalidArtifact(String),

    /// The header-framed protocol was started without a timestamp format
    ///
    /// Every record on that wire carries a raw device timestamp word, so the
    /// native format descriptor must be known before any data is decoded.
    /// Link the `TimestampP_nativeFormat32` symbol into the firmware image.
    #[error("No native timestamp format descriptor is available")]
    MissingTimestampFormat,

    /// A configuration value is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The persisted symbol table could not be written
    ///
    /// Unreadable cache entries never produce this error; they trigger a
    /// rebuild instead.
    #[error("Symbol cache error: {0}")]
    Cache(String),

    /// The artifact watcher could not be installed
    #[error("Artifact watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// I/O error (for artifact reads, cache files, byte sources)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, TraceError>`
///
/// ```rust
/// use tracelog_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, TraceError>;
