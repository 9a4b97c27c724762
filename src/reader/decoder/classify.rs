//! Record classification
//!
//! Every record falls into exactly one [`RecordKind`], decided once from
//! `(mode, special, channel)`. The session decoder matches on the kind to
//! update the overflow state, and hands the same kind to [`classify`] to
//! build an event.

use super::common::{DecodedEvent, TimingMode};
use super::fields::{RecordFields, OVERFLOW_CHANNEL};

/// Marker channel codes that carry a marker bitmask
const MARKER_MIN: u8 = 1;
const MARKER_MAX: u8 = 15;

/// Closed classification of a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Counter wrapped `count` times (0 = legacy single wrap)
    Overflow { count: u32 },
    /// Marker inputs, reported as a bitmask
    Marker { markers: u8 },
    /// Sync channel reported as an event (T2 only)
    Sync,
    /// Regular input, external channel numbering 1..N
    Photon { channel: u8 },
    /// Special record with an undefined channel code
    Anomaly { channel: u8 },
}

impl RecordKind {
    pub fn of(fields: &RecordFields) -> Self {
        let channel = fields.channel();
        match (fields.special(), fields.mode(), channel) {
            (false, _, ch) => RecordKind::Photon { channel: ch + 1 },
            (true, _, OVERFLOW_CHANNEL) => RecordKind::Overflow {
                count: fields.counter(),
            },
            (true, _, MARKER_MIN..=MARKER_MAX) => RecordKind::Marker { markers: channel },
            (true, TimingMode::T2, 0) => RecordKind::Sync,
            (true, _, ch) => RecordKind::Anomaly { channel: ch },
        }
    }
}

/// Build the event for a non-overflow record
///
/// `kind` is `RecordKind::of(fields)`. `corrected_time` is the
/// overflow-corrected counter: ticks in T2, sync period index in T3.
/// Returns `None` for overflow and anomalous records.
pub fn classify(
    kind: RecordKind,
    fields: &RecordFields,
    corrected_time: u64,
) -> Option<DecodedEvent> {
    match kind {
        RecordKind::Photon { channel } => Some(DecodedEvent::Photon {
            channel,
            time: corrected_time,
            dtime: fields.dtime(),
        }),
        RecordKind::Sync => Some(DecodedEvent::Photon {
            channel: 0,
            time: corrected_time,
            dtime: None,
        }),
        RecordKind::Marker { markers } => Some(DecodedEvent::Marker {
            markers,
            time: corrected_time,
        }),
        RecordKind::Overflow { .. } | RecordKind::Anomaly { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t2(special: bool, channel: u8, timetag: u32) -> RecordFields {
        RecordFields::T2 {
            special,
            channel,
            timetag,
        }
    }

    fn t3(special: bool, channel: u8, dtime: u16, nsync: u16) -> RecordFields {
        RecordFields::T3 {
            special,
            channel,
            dtime,
            nsync,
        }
    }

    fn event(fields: RecordFields, corrected_time: u64) -> Option<DecodedEvent> {
        classify(RecordKind::of(&fields), &fields, corrected_time)
    }

    #[test]
    fn test_kind_covers_every_channel() {
        for channel in 0u8..=0x3F {
            let kind = RecordKind::of(&t2(true, channel, 0));
            match channel {
                0 => assert_eq!(kind, RecordKind::Sync),
                1..=15 => assert_eq!(kind, RecordKind::Marker { markers: channel }),
                0x3F => assert_eq!(kind, RecordKind::Overflow { count: 0 }),
                _ => assert_eq!(kind, RecordKind::Anomaly { channel }),
            }
        }
    }

    #[test]
    fn test_regular_channel_is_one_based() {
        for channel in 0u8..=0x3F {
            for fields in [t2(false, channel, 9), t3(false, channel, 4, 9)] {
                match event(fields, 9) {
                    Some(DecodedEvent::Photon { channel: ext, .. }) => {
                        assert_eq!(ext, channel + 1)
                    }
                    other => panic!("expected photon, got {:?}", other),
                }
            }
        }
    }

    #[test]
    fn test_t2_photon_has_no_dtime() {
        let ev = event(t2(false, 1, 1), 1 + (1 << 25)).unwrap();
        assert_eq!(
            ev,
            DecodedEvent::Photon {
                channel: 2,
                time: 1 + (1 << 25),
                dtime: None,
            }
        );
    }

    #[test]
    fn test_t3_photon_carries_dtime() {
        let ev = event(t3(false, 0, 321, 17), 1041).unwrap();
        assert_eq!(
            ev,
            DecodedEvent::Photon {
                channel: 1,
                time: 1041,
                dtime: Some(321),
            }
        );
    }

    #[test]
    fn test_t2_sync_is_channel_zero() {
        let ev = event(t2(true, 0, 77), 77).unwrap();
        assert_eq!(
            ev,
            DecodedEvent::Photon {
                channel: 0,
                time: 77,
                dtime: None,
            }
        );
    }

    #[test]
    fn test_t3_sync_code_is_anomaly() {
        let fields = t3(true, 0, 0, 5);
        assert_eq!(RecordKind::of(&fields), RecordKind::Anomaly { channel: 0 });
        assert_eq!(event(fields, 5), None);
    }

    #[test]
    fn test_markers_keep_bitmask() {
        for markers in 1u8..=15 {
            let ev = event(t3(true, markers, 0, 500), 500).unwrap();
            assert_eq!(ev, DecodedEvent::Marker { markers, time: 500 });
        }
    }

    #[test]
    fn test_overflow_and_anomaly_yield_nothing() {
        assert_eq!(event(t2(true, 0x3F, 3), 0), None);
        assert_eq!(event(t2(true, 20, 3), 3), None);
        assert_eq!(event(t3(true, 62, 0, 3), 3), None);
    }

    #[test]
    fn test_overflow_count_from_counter_field() {
        assert_eq!(
            RecordKind::of(&t3(true, 0x3F, 99, 12)),
            RecordKind::Overflow { count: 12 }
        );
    }
}
