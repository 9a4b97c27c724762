//! Decoder module for TTTR records
//!
//! Converts 32-bit T2/T3 records into overflow-corrected events.

pub mod classify;
pub mod common;
pub mod fields;
pub mod overflow;
pub mod session;

pub use classify::{classify, RecordKind};
pub use common::{DecodeAnomaly, DecodeError, DecodeOutput, DecodedEvent, RawRecord, TimingMode};
pub use fields::{RecordFields, OVERFLOW_CHANNEL};
pub use overflow::OverflowCorrector;
pub use session::{
    BatchEvents, BatchStats, SessionDecoder, SessionStats, MAX_LOGGED_ANOMALIES_PER_BATCH,
    MAX_RETAINED_ANOMALIES,
};
