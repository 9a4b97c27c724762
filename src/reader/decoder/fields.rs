//! Bitfield extraction for 32-bit TTTR records
//!
//! Record layout (bit 31 is the most significant bit):
//!
//! ```text
//!  31 | 30 ........ 25 | 24 ...................................... 0
//!  S  |    channel     |                 timetag                   T2
//!  S  |    channel     |       dtime (24..10)      | nsync (9..0)  T3
//! ```

use super::common::{RawRecord, TimingMode};

/// Record bit layout
mod constants {
    pub const SPECIAL_SHIFT: u32 = 31;
    pub const CHANNEL_SHIFT: u32 = 25;
    pub const CHANNEL_MASK: u32 = 0x3F;

    // T2
    pub const TIMETAG_MASK: u32 = 0x01FF_FFFF;

    // T3
    pub const DTIME_SHIFT: u32 = 10;
    pub const DTIME_MASK: u32 = 0x7FFF;
    pub const NSYNC_MASK: u32 = 0x3FF;
}

/// Channel code reserved for overflow records
pub const OVERFLOW_CHANNEL: u8 = 0x3F;

/// Fields of one record, laid out according to the timing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFields {
    T2 {
        special: bool,
        channel: u8,
        timetag: u32,
    },
    T3 {
        special: bool,
        channel: u8,
        dtime: u16,
        nsync: u16,
    },
}

impl RecordFields {
    /// Split a raw record into its fields. Every 32-bit value is valid.
    #[inline]
    pub fn extract(mode: TimingMode, raw: RawRecord) -> Self {
        let special = (raw >> constants::SPECIAL_SHIFT) & 0x1 == 1;
        let channel = ((raw >> constants::CHANNEL_SHIFT) & constants::CHANNEL_MASK) as u8;

        match mode {
            TimingMode::T2 => RecordFields::T2 {
                special,
                channel,
                timetag: raw & constants::TIMETAG_MASK,
            },
            TimingMode::T3 => RecordFields::T3 {
                special,
                channel,
                dtime: ((raw >> constants::DTIME_SHIFT) & constants::DTIME_MASK) as u16,
                nsync: (raw & constants::NSYNC_MASK) as u16,
            },
        }
    }

    /// Pack the fields back into a raw record
    ///
    /// Values wider than their field are truncated to the field width.
    pub fn to_raw(&self) -> RawRecord {
        let (special, channel, low) = match *self {
            RecordFields::T2 {
                special,
                channel,
                timetag,
            } => (special, channel, timetag & constants::TIMETAG_MASK),
            RecordFields::T3 {
                special,
                channel,
                dtime,
                nsync,
            } => (
                special,
                channel,
                ((dtime as u32 & constants::DTIME_MASK) << constants::DTIME_SHIFT)
                    | (nsync as u32 & constants::NSYNC_MASK),
            ),
        };

        ((special as u32) << constants::SPECIAL_SHIFT)
            | ((channel as u32 & constants::CHANNEL_MASK) << constants::CHANNEL_SHIFT)
            | low
    }

    pub fn mode(&self) -> TimingMode {
        match self {
            RecordFields::T2 { .. } => TimingMode::T2,
            RecordFields::T3 { .. } => TimingMode::T3,
        }
    }

    pub fn special(&self) -> bool {
        match *self {
            RecordFields::T2 { special, .. } | RecordFields::T3 { special, .. } => special,
        }
    }

    pub fn channel(&self) -> u8 {
        match *self {
            RecordFields::T2 { channel, .. } | RecordFields::T3 { channel, .. } => channel,
        }
    }

    /// The truncated counter: timetag in T2, nsync in T3
    ///
    /// Overflow records reuse this field for the number of wraps.
    pub fn counter(&self) -> u32 {
        match *self {
            RecordFields::T2 { timetag, .. } => timetag,
            RecordFields::T3 { nsync, .. } => nsync as u32,
        }
    }

    /// Intra-period delay (T3 only)
    pub fn dtime(&self) -> Option<u16> {
        match *self {
            RecordFields::T2 { .. } => None,
            RecordFields::T3 { dtime, .. } => Some(dtime),
        }
    }
}
