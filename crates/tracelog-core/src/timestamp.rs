//! # Timestamp Reconstruction
//!
//! Converts device time into seconds.
//!
//! Two clocks are involved on the bit-packed wire:
//! - a running real-time clock advanced by local timestamp frames
//!   ([`RunningClock`]), which also tracks the derived radio time, and
//! - absolute device time carried by time-sync records, decoded through the
//!   firmware's [`TimestampFormat`] and correlated once with host wall-clock
//!   time ([`TimeCorrelator`]).
//!
//! The header-framed wire carries a raw timestamp word in every record and
//! only needs [`TimestampFormat::decode`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ClockConfig;

/// RTC sub-second resolution: the 32.32 RTC counter advances 2^32 / 32768
/// counts per second.
const RTC_COUNTS_PER_SECOND: f64 = 4_294_967_296.0 / 32_768.0;

/// Layout of a native device timestamp word.
///
/// `value = multiplier * (integral + fractional) * 10^-exponent`, where the
/// fractional part is the low `frac_bits` of the word divided by
/// `2^frac_bits` and the integral part is the next `int_bits` above it. A
/// negative multiplier divides instead of multiplying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimestampFormat
{
    pub frac_bits: u8,
    pub int_bits: u8,
    pub exponent: u8,
    pub multiplier: i16,
}

impl TimestampFormat
{
    /// Unpack the firmware's descriptor word.
    ///
    /// Bits 0-3 hold the fractional width in bytes, bits 4-7 the integer
    /// width in bytes, bits 8-15 the exponent and bits 16-31 the signed
    /// multiplier.
    #[must_use]
    pub fn from_descriptor(word: u32) -> Self
    {
        let frac_bytes = (word & 0xF) as u8;
        let int_bytes = ((word >> 4) & 0xF) as u8;
        Self {
            frac_bits: frac_bytes * 8,
            int_bits: int_bytes * 8,
            exponent: ((word >> 8) & 0xFF) as u8,
            multiplier: (word >> 16) as u16 as i16,
        }
    }

    /// Pack back into the descriptor word layout.
    #[must_use]
    pub fn to_descriptor(self) -> u32
    {
        u32::from(self.frac_bits / 8)
            | (u32::from(self.int_bits / 8) << 4)
            | (u32::from(self.exponent) << 8)
            | (u32::from(self.multiplier as u16) << 16)
    }

    /// Total width of a timestamp word in bits.
    #[must_use]
    pub fn word_bits(self) -> u32
    {
        u32::from(self.frac_bits) + u32::from(self.int_bits)
    }

    /// Whether a timestamp spans two 32-bit words on the wire.
    #[must_use]
    pub fn is_wide(self) -> bool
    {
        self.word_bits() > 32
    }

    /// Decode a raw timestamp word into seconds.
    #[must_use]
    pub fn decode(self, word: u64) -> f64
    {
        let frac_bits = u32::from(self.frac_bits).min(64);
        let int_bits = u32::from(self.int_bits);

        let fractional = if frac_bits == 0 {
            0.0
        } else {
            (word & low_mask(frac_bits)) as f64 / 2f64.powi(frac_bits as i32)
        };
        let integral = if frac_bits >= 64 {
            0
        } else {
            (word >> frac_bits) & low_mask(int_bits)
        };

        let scaled = (integral as f64 + fractional) * 10f64.powi(-i32::from(self.exponent));
        if self.multiplier < 0 {
            scaled / f64::from(self.multiplier.unsigned_abs())
        } else {
            scaled * f64::from(self.multiplier)
        }
    }
}

fn low_mask(bits: u32) -> u64
{
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Running real-time clock of the bit-packed decoder.
#[derive(Debug, Clone)]
pub struct RunningClock
{
    config: ClockConfig,
    ticks: u64,
    rtc_seconds: f64,
    radio_ticks: u64,
}

impl RunningClock
{
    #[must_use]
    pub fn new(config: ClockConfig) -> Self
    {
        Self {
            config,
            ticks: 0,
            rtc_seconds: 0.0,
            radio_ticks: 0,
        }
    }

    /// Account for a local timestamp frame carrying `delta` prescaled ticks.
    pub fn advance(&mut self, delta: u64)
    {
        self.ticks = self.ticks.saturating_add(delta);
        self.rtc_seconds += self.config.ticks_to_seconds(delta);
        self.radio_ticks = radio_ticks_at(self.rtc_seconds, self.config.radio_tick_hz);
    }

    /// Total prescaled ticks seen so far.
    #[must_use]
    pub fn ticks(&self) -> u64
    {
        self.ticks
    }

    /// Running RTC value in seconds.
    #[must_use]
    pub fn seconds(&self) -> f64
    {
        self.rtc_seconds
    }

    pub(crate) fn radio_ticks(&self) -> u64
    {
        self.radio_ticks
    }
}

/// Radio time follows the RTC through its counter domain, so it inherits the
/// RTC's quantisation.
fn radio_ticks_at(rtc_seconds: f64, radio_tick_hz: u32) -> u64
{
    let rtc_counts = (rtc_seconds * RTC_COUNTS_PER_SECOND).floor();
    (rtc_counts * f64::from(radio_tick_hz) / RTC_COUNTS_PER_SECOND) as u64
}

/// Host wall-clock time in seconds since the Unix epoch.
#[must_use]
pub fn host_now() -> f64
{
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Maps running-clock ticks onto device and host time for the bit-packed
/// reassembler.
///
/// Every time-sync record re-anchors device time. The host offset is taken
/// from the first one only; later records are allowed to jitter against it.
#[derive(Debug, Clone)]
pub struct TimeCorrelator
{
    clock: ClockConfig,
    base_seconds: f64,
    anchor_ticks: u64,
    host_offset: Option<f64>,
    pending_low: Option<u32>,
}

impl TimeCorrelator
{
    #[must_use]
    pub fn new(clock: ClockConfig) -> Self
    {
        Self {
            clock,
            base_seconds: 0.0,
            anchor_ticks: 0,
            host_offset: None,
            pending_low: None,
        }
    }

    /// Device time in seconds at the given running tick count.
    #[must_use]
    pub fn device_time(&self, ticks: u64) -> f64
    {
        self.base_seconds + self.clock.ticks_to_seconds(ticks.saturating_sub(self.anchor_ticks))
    }

    /// Host-correlated time for a device time; identity until the first sync.
    #[must_use]
    pub fn host_time(&self, device_seconds: f64) -> f64
    {
        device_seconds + self.host_offset.unwrap_or(0.0)
    }

    #[must_use]
    pub fn host_offset(&self) -> Option<f64>
    {
        self.host_offset
    }

    /// Feed one time-sync word.
    ///
    /// Wide formats arrive low word first; the low word is held back until
    /// the high word completes it. Returns the decoded device time once a
    /// full timestamp is available.
    pub fn sync(&mut self, word: u32, format: TimestampFormat, ticks: u64, host_seconds: f64) -> Option<f64>
    {
        let raw = if format.is_wide() {
            match self.pending_low.take() {
                None => {
                    self.pending_low = Some(word);
                    return None;
                }
                Some(low) => (u64::from(word) << 32) | u64::from(low),
            }
        } else {
            u64::from(word)
        };

        let device_seconds = format.decode(raw);
        self.base_seconds = device_seconds;
        self.anchor_ticks = ticks;

        if self.host_offset.is_none() {
            let offset = host_seconds - device_seconds;
            info!(device_seconds, offset, "correlated device time with host clock");
            self.host_offset = Some(offset);
        }
        Some(device_seconds)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn microsecond_format() -> TimestampFormat
    {
        // 32 integer bits counting microseconds
        TimestampFormat {
            frac_bits: 0,
            int_bits: 32,
            exponent: 6,
            multiplier: 1,
        }
    }

    #[test]
    fn test_descriptor_unpacking()
    {
        // frac 2 bytes, int 2 bytes, exponent 0, multiplier 1
        let format = TimestampFormat::from_descriptor(0x0001_0022);
        assert_eq!(format.frac_bits, 16);
        assert_eq!(format.int_bits, 16);
        assert_eq!(format.exponent, 0);
        assert_eq!(format.multiplier, 1);
        assert_eq!(format.to_descriptor(), 0x0001_0022);
    }

    #[test]
    fn test_negative_multiplier_descriptor()
    {
        let format = TimestampFormat::from_descriptor(0xFFFE_0040);
        assert_eq!(format.multiplier, -2);
        assert_eq!(format.int_bits, 32);
        // 10 counts at half a second each
        assert!((format.decode(10) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_decode_fixed_point()
    {
        let format = TimestampFormat {
            frac_bits: 16,
            int_bits: 16,
            exponent: 0,
            multiplier: 1,
        };
        // 3.5 seconds in 16.16
        assert!((format.decode(0x0003_8000) - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_decode_with_exponent()
    {
        let format = microsecond_format();
        assert!((format.decode(2_500_000) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_decode_integral_masked_to_width()
    {
        let format = TimestampFormat {
            frac_bits: 8,
            int_bits: 8,
            exponent: 0,
            multiplier: 1,
        };
        // bits above the 16-bit word are ignored
        assert!((format.decode(0xFFFF_0280) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_running_clock_is_monotonic()
    {
        let mut clock = RunningClock::new(ClockConfig::default());
        let mut last = clock.seconds();
        for delta in [0, 1, 7, 0, 127, 16_384, 3] {
            clock.advance(delta);
            assert!(clock.seconds() >= last);
            last = clock.seconds();
        }
        assert_eq!(clock.ticks(), 16_522);
    }

    #[test]
    fn test_radio_time_tracks_rtc()
    {
        let mut clock = RunningClock::new(ClockConfig::default());
        // one second at 750 kHz
        clock.advance(750_000);
        assert_eq!(clock.radio_ticks(), 4_000_000);
    }

    #[test]
    fn test_host_offset_captured_once()
    {
        let mut time = TimeCorrelator::new(ClockConfig::default());
        let format = microsecond_format();

        assert_eq!(time.sync(1_000_000, format, 0, 100.0), Some(1.0));
        assert_eq!(time.host_offset(), Some(99.0));

        // a later sync re-anchors device time but keeps the host offset
        assert_eq!(time.sync(5_000_000, format, 750_000, 500.0), Some(5.0));
        assert_eq!(time.host_offset(), Some(99.0));
        assert!((time.device_time(1_500_000) - 6.0).abs() < 1e-9);
        assert!((time.host_time(6.0) - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_wide_sync_waits_for_high_word()
    {
        let mut time = TimeCorrelator::new(ClockConfig::default());
        let format = TimestampFormat {
            frac_bits: 32,
            int_bits: 32,
            exponent: 0,
            multiplier: 1,
        };

        assert_eq!(time.sync(0x8000_0000, format, 0, 10.0), None);
        assert_eq!(time.host_offset(), None);
        assert_eq!(time.sync(7, format, 0, 10.0), Some(7.5));
    }
}
