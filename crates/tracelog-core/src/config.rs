//! # Configuration
//!
//! Plain configuration structs for the decoding pipeline. The binary fills
//! them from command-line flags; library users build them directly.
//!
//! ## Environment Variables
//!
//! - `TRACELOG_CACHE_DIR`: directory for persisted symbol tables

use std::env;
use std::path::PathBuf;

use crate::error::{Result, TraceError};

/// Clock parameters of the bit-packed (ITM) trace port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig
{
    /// Core clock feeding the trace timestamp counter, in Hz
    pub clock_hz: u32,
    /// Local timestamp prescaler (1, 4, 16 or 64 on Cortex-M)
    pub prescaler: u32,
    /// Tick rate of the radio timer, in Hz
    pub radio_tick_hz: u32,
}

impl Default for ClockConfig
{
    fn default() -> Self
    {
        Self {
            clock_hz: 48_000_000,
            prescaler: 64,
            radio_tick_hz: 4_000_000,
        }
    }
}

impl ClockConfig
{
    /// Check that the clock parameters can be used for tick conversion.
    pub fn validate(&self) -> Result<()>
    {
        if self.clock_hz == 0 {
            return Err(TraceError::InvalidConfig("clock_hz must be non-zero".to_string()));
        }
        if self.prescaler == 0 {
            return Err(TraceError::InvalidConfig("prescaler must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Timestamp counter ticks per second after prescaling.
    #[must_use]
    pub fn tick_rate(&self) -> f64
    {
        f64::from(self.clock_hz) / f64::from(self.prescaler)
    }

    /// Convert a number of prescaled ticks into seconds.
    #[must_use]
    pub fn ticks_to_seconds(&self, ticks: u64) -> f64
    {
        ticks as f64 / self.tick_rate()
    }
}

/// Wire encoding spoken by a byte source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol
{
    /// Bit-packed instrumentation trace (ITM/SWO)
    Itm(ClockConfig),
    /// Header-framed records (UART sink)
    Uart,
}

/// Where the symbol resolver finds its inputs and keeps its cache.
#[derive(Debug, Clone)]
pub struct ResolverConfig
{
    /// Debug artifacts (ELF images) to scan
    pub artifacts: Vec<PathBuf>,
    /// Directory for persisted tables; `None` disables the cache
    pub cache_dir: Option<PathBuf>,
    /// Rebuild the table when an artifact changes on disk
    pub watch: bool,
}

impl ResolverConfig
{
    /// Configuration with the default cache directory and watching enabled.
    #[must_use]
    pub fn new(artifacts: Vec<PathBuf>) -> Self
    {
        Self {
            artifacts,
            cache_dir: Some(default_cache_dir()),
            watch: true,
        }
    }

    #[must_use]
    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self
    {
        self.cache_dir = dir;
        self
    }

    #[must_use]
    pub fn with_watch(mut self, watch: bool) -> Self
    {
        self.watch = watch;
        self
    }
}

/// Default location for persisted symbol tables.
///
/// `$TRACELOG_CACHE_DIR` wins, then `~/.tracelog/cache`, then the system
/// temporary directory.
#[must_use]
pub fn default_cache_dir() -> PathBuf
{
    if let Ok(dir) = env::var("TRACELOG_CACHE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(home) = env::var("HOME") {
        return PathBuf::from(home).join(".tracelog").join("cache");
    }
    env::temp_dir().join("tracelog-cache")
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_default_tick_rate()
    {
        let clock = ClockConfig::default();
        assert!((clock.tick_rate() - 750_000.0).abs() < f64::EPSILON);
        assert!((clock.ticks_to_seconds(750_000) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_prescaler_rejected()
    {
        let clock = ClockConfig {
            prescaler: 0,
            ..ClockConfig::default()
        };
        assert!(matches!(clock.validate(), Err(TraceError::InvalidConfig(_))));
    }
}
