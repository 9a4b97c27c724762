//! Overflow correction
//!
//! The device counter is truncated to the width of the timetag (T2) or
//! nsync (T3) field. Whenever it wraps the device emits an overflow record
//! carrying the number of wraps since the previous one. The corrector sums
//! them into a 64-bit correction that is added to every later record.

use super::common::{DecodeError, TimingMode};

/// Running overflow correction for one session
#[derive(Debug, Clone)]
pub struct OverflowCorrector {
    mode: TimingMode,
    correction: u64,
    overflow_records: u64,
}

impl OverflowCorrector {
    pub fn new(mode: TimingMode) -> Self {
        Self {
            mode,
            correction: 0,
            overflow_records: 0,
        }
    }

    pub fn mode(&self) -> TimingMode {
        self.mode
    }

    /// Current correction (ticks in T2, sync periods in T3)
    pub fn correction(&self) -> u64 {
        self.correction
    }

    /// Number of overflow records applied so far
    pub fn overflow_records(&self) -> u64 {
        self.overflow_records
    }

    /// Apply the wrap count of one overflow record
    ///
    /// A wrap count of zero is the old single-overflow encoding and counts
    /// as one wrap.
    pub fn apply(&mut self, count: u32) -> Result<(), DecodeError> {
        let wraps = match count {
            0 => 1,
            n => n as u64,
        };
        self.advance(wraps)
    }

    /// Add `wraps` counter wraps to the correction
    fn advance(&mut self, wraps: u64) -> Result<(), DecodeError> {
        let exhausted = |correction, increment| DecodeError::CorrectionExhausted {
            correction,
            increment,
            records_processed: 0,
            last_time: None,
        };

        let increment = self
            .mode
            .wraparound()
            .checked_mul(wraps)
            .ok_or_else(|| exhausted(self.correction, u64::MAX))?;
        self.correction = self
            .correction
            .checked_add(increment)
            .ok_or_else(|| exhausted(self.correction, increment))?;
        self.overflow_records += 1;
        Ok(())
    }

    /// Reconstruct the full time of a record from its truncated counter
    pub fn corrected(&self, local: u32) -> Result<u64, DecodeError> {
        self.correction
            .checked_add(local as u64)
            .ok_or(DecodeError::CorrectionExhausted {
                correction: self.correction,
                increment: local as u64,
                records_processed: 0,
                last_time: None,
            })
    }
}

#[cfg(test)]
impl OverflowCorrector {
    /// Start from an arbitrary correction
    pub(crate) fn with_correction(mode: TimingMode, correction: u64) -> Self {
        Self {
            mode,
            correction,
            overflow_records: 0,
        }
    }
}
