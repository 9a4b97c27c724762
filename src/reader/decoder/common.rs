//! Common types for decoder module

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One raw 32-bit TTTR record as read from the device FIFO
pub type RawRecord = u32;

/// Hardware timing sub-mode
///
/// Fixed for the lifetime of a session. Selects the bit layout of the
/// records and the meaning of the decoded time fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimingMode {
    /// Absolute times in units of the base resolution
    #[serde(alias = "t2")]
    T2,
    /// Sync period index plus intra-period delay
    #[serde(alias = "t3")]
    T3,
}

impl TimingMode {
    /// Width in bits of the truncated counter field
    pub const fn counter_bits(self) -> u32 {
        match self {
            TimingMode::T2 => 25,
            TimingMode::T3 => 10,
        }
    }

    /// Wraparound modulus of the truncated counter
    ///
    /// T2: 2^25 base-resolution ticks. T3: 2^10 sync periods.
    pub const fn wraparound(self) -> u64 {
        1u64 << self.counter_bits()
    }
}

impl fmt::Display for TimingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingMode::T2 => write!(f, "T2"),
            TimingMode::T3 => write!(f, "T3"),
        }
    }
}

impl FromStr for TimingMode {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "T2" | "2" => Ok(TimingMode::T2),
            "T3" | "3" => Ok(TimingMode::T3),
            _ => Err(DecodeError::InvalidMode(s.to_string())),
        }
    }
}

/// Decoded event with overflow-corrected time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DecodedEvent {
    /// Photon on an input channel, or the sync channel in T2
    Photon {
        /// External channel: 0 = sync (T2 only), 1..N = inputs
        channel: u8,
        /// T2: ticks of the base resolution. T3: sync period index.
        time: u64,
        /// T3 only: delay after the last sync, in resolution bins
        dtime: Option<u16>,
    },
    /// Marker input event
    Marker {
        /// Bitmask of markers reported in this record
        markers: u8,
        /// T2: ticks of the base resolution. T3: sync period index.
        time: u64,
    },
}

impl DecodedEvent {
    /// Overflow-corrected time (ticks in T2, sync index in T3)
    pub fn time(&self) -> u64 {
        match *self {
            DecodedEvent::Photon { time, .. } | DecodedEvent::Marker { time, .. } => time,
        }
    }
}

impl fmt::Display for DecodedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DecodedEvent::Photon {
                channel,
                time,
                dtime: Some(dtime),
            } => write!(f, "CH {:2} {} {}", channel, time, dtime),
            DecodedEvent::Photon {
                channel,
                time,
                dtime: None,
            } => write!(f, "CH {:2} {}", channel, time),
            DecodedEvent::Marker { markers, time } => write!(f, "MK {:2} {}", markers, time),
        }
    }
}

/// A special record whose channel code has no defined meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeAnomaly {
    /// Position of the record in the session's record stream
    pub record_index: u64,
    /// The undecoded record
    pub raw: RawRecord,
    /// Channel code found in the record
    pub channel: u8,
}

impl fmt::Display for DecodeAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "undefined special record 0x{:08x} (channel 0x{:02x}) at record {}",
            self.raw, self.channel, self.record_index
        )
    }
}

/// Item produced while decoding a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutput {
    Event(DecodedEvent),
    Anomaly(DecodeAnomaly),
}

/// Fatal decoder errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Timing mode is neither T2 nor T3
    #[error("Invalid timing mode: {0:?} (expected T2 or T3)")]
    InvalidMode(String),

    /// The 64-bit overflow correction cannot absorb further wraps
    #[error(
        "Overflow correction exhausted after {records_processed} records: \
         correction={correction}, increment={increment}, last time={last_time:?}"
    )]
    CorrectionExhausted {
        correction: u64,
        increment: u64,
        records_processed: u64,
        last_time: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraparound_matches_counter_width() {
        assert_eq!(TimingMode::T2.wraparound(), 33_554_432);
        assert_eq!(TimingMode::T3.wraparound(), 1024);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("T2".parse::<TimingMode>(), Ok(TimingMode::T2));
        assert_eq!(" t3 ".parse::<TimingMode>(), Ok(TimingMode::T3));
        assert_eq!("3".parse::<TimingMode>(), Ok(TimingMode::T3));
        let err = "histo".parse::<TimingMode>().unwrap_err();
        assert!(err.to_string().contains("histo"));
    }

    #[test]
    fn test_mode_serde() {
        let json = serde_json::to_string(&TimingMode::T3).unwrap();
        assert_eq!(json, "\"T3\"");
        let mode: TimingMode = serde_json::from_str("\"t2\"").unwrap();
        assert_eq!(mode, TimingMode::T2);
    }

    #[test]
    fn test_event_accessors() {
        let photon = DecodedEvent::Photon {
            channel: 2,
            time: 42,
            dtime: None,
        };
        let marker = DecodedEvent::Marker {
            markers: 3,
            time: 7,
        };
        assert_eq!(photon.time(), 42);
        assert_eq!(marker.time(), 7);
    }

    #[test]
    fn test_event_display() {
        let t3 = DecodedEvent::Photon {
            channel: 1,
            time: 500,
            dtime: Some(12),
        };
        assert_eq!(t3.to_string(), "CH  1 500 12");
        let marker = DecodedEvent::Marker {
            markers: 4,
            time: 9,
        };
        assert_eq!(marker.to_string(), "MK  4 9");
    }

    #[test]
    fn test_exhausted_error_display() {
        let err = DecodeError::CorrectionExhausted {
            correction: u64::MAX - 1,
            increment: 1024,
            records_processed: 10,
            last_time: Some(5),
        };
        let msg = err.to_string();
        assert!(msg.contains("exhausted"));
        assert!(msg.contains("10 records"));
    }
}
