//! Session decoder
//!
//! Owns the overflow state of one acquisition session and turns batches of
//! raw records into events in arrival order. Batches must be handed over in
//! the order they were read; the decoder keeps no partial records between
//! batches.

use serde::Serialize;
use tracing::{debug, warn};

use super::classify::{classify, RecordKind};
use super::common::{DecodeAnomaly, DecodeError, DecodeOutput, DecodedEvent, RawRecord, TimingMode};
use super::fields::RecordFields;
use super::overflow::OverflowCorrector;

/// Number of anomalies kept for inspection per session
pub const MAX_RETAINED_ANOMALIES: usize = 1024;

/// Anomalies logged individually per batch; the rest only as a count
pub const MAX_LOGGED_ANOMALIES_PER_BATCH: usize = 8;

/// Counters for one decoded batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub records: usize,
    pub events: usize,
    pub overflows: usize,
    pub anomalies: usize,
}

/// Running statistics of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub records_processed: u64,
    pub events_emitted: u64,
    pub overflow_records: u64,
    pub anomalies: u64,
    /// Corrected time of the last emitted event
    pub last_time: Option<u64>,
    pub correction: u64,
}

/// Decoder for one measurement session
#[derive(Debug, Clone)]
pub struct SessionDecoder {
    corrector: OverflowCorrector,
    records_processed: u64,
    events_emitted: u64,
    anomaly_count: u64,
    last_time: Option<u64>,
    anomalies: Vec<DecodeAnomaly>,
}

impl SessionDecoder {
    /// Start a new session with zero overflow correction
    pub fn new(mode: TimingMode) -> Self {
        Self::with_corrector(OverflowCorrector::new(mode))
    }

    fn with_corrector(corrector: OverflowCorrector) -> Self {
        Self {
            corrector,
            records_processed: 0,
            events_emitted: 0,
            anomaly_count: 0,
            last_time: None,
            anomalies: Vec::new(),
        }
    }

    pub fn mode(&self) -> TimingMode {
        self.corrector.mode()
    }

    pub fn correction(&self) -> u64 {
        self.corrector.correction()
    }

    /// Anomalies seen so far (at most [`MAX_RETAINED_ANOMALIES`])
    pub fn anomalies(&self) -> &[DecodeAnomaly] {
        &self.anomalies
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            records_processed: self.records_processed,
            events_emitted: self.events_emitted,
            overflow_records: self.corrector.overflow_records(),
            anomalies: self.anomaly_count,
            last_time: self.last_time,
            correction: self.corrector.correction(),
        }
    }

    /// Lazily decode one batch
    ///
    /// Yields events and anomalies in record order. A fatal error is
    /// yielded once and ends the iteration.
    pub fn events<'a>(&'a mut self, records: &'a [RawRecord]) -> BatchEvents<'a> {
        BatchEvents {
            session: self,
            records: records.iter(),
            failed: false,
        }
    }

    /// Decode one batch, appending events to `out`
    ///
    /// Anomalies are logged, counted and retained; decoding continues past
    /// them. On a fatal error the events decoded before it stay in `out`.
    pub fn decode_into(
        &mut self,
        records: &[RawRecord],
        out: &mut Vec<DecodedEvent>,
    ) -> Result<BatchStats, DecodeError> {
        let overflows_before = self.corrector.overflow_records();
        let mut stats = BatchStats::default();
        out.reserve(records.len());

        for &raw in records {
            stats.records += 1;
            match self.decode_record(raw)? {
                Some(DecodeOutput::Event(event)) => {
                    out.push(event);
                    stats.events += 1;
                }
                Some(DecodeOutput::Anomaly(anomaly)) => {
                    if stats.anomalies < MAX_LOGGED_ANOMALIES_PER_BATCH {
                        warn!(
                            mode = %self.mode(),
                            record = anomaly.record_index,
                            raw = format_args!("0x{:08x}", anomaly.raw),
                            channel = anomaly.channel,
                            "Undefined special record, skipped"
                        );
                    }
                    stats.anomalies += 1;
                }
                None => {}
            }
        }
        stats.overflows = (self.corrector.overflow_records() - overflows_before) as usize;

        if stats.anomalies > MAX_LOGGED_ANOMALIES_PER_BATCH {
            warn!(
                mode = %self.mode(),
                anomalies = stats.anomalies,
                not_logged = stats.anomalies - MAX_LOGGED_ANOMALIES_PER_BATCH,
                "Undefined special records in batch"
            );
        }

        debug!(
            records = stats.records,
            events = stats.events,
            overflows = stats.overflows,
            anomalies = stats.anomalies,
            correction = self.corrector.correction(),
            "Decoded batch"
        );
        Ok(stats)
    }

    /// Decode a whole batch into a new vector
    pub fn decode(&mut self, records: &[RawRecord]) -> Result<Vec<DecodedEvent>, DecodeError> {
        let mut events = Vec::with_capacity(records.len());
        self.decode_into(records, &mut events)?;
        Ok(events)
    }

    /// Extract, correct and classify a single record
    fn decode_record(&mut self, raw: RawRecord) -> Result<Option<DecodeOutput>, DecodeError> {
        let fields = RecordFields::extract(self.corrector.mode(), raw);

        let output = match RecordKind::of(&fields) {
            RecordKind::Overflow { count } => {
                self.corrector
                    .apply(count)
                    .map_err(|e| self.with_context(e))?;
                None
            }
            RecordKind::Anomaly { channel } => {
                let anomaly = DecodeAnomaly {
                    record_index: self.records_processed,
                    raw,
                    channel,
                };
                self.anomaly_count += 1;
                if self.anomalies.len() < MAX_RETAINED_ANOMALIES {
                    self.anomalies.push(anomaly);
                }
                Some(DecodeOutput::Anomaly(anomaly))
            }
            kind => {
                let time = self
                    .corrector
                    .corrected(fields.counter())
                    .map_err(|e| self.with_context(e))?;
                classify(kind, &fields, time).map(|event| {
                    self.events_emitted += 1;
                    self.last_time = Some(time);
                    DecodeOutput::Event(event)
                })
            }
        };

        self.records_processed += 1;
        Ok(output)
    }

    /// Fill in where in the stream a fatal error happened
    fn with_context(&self, err: DecodeError) -> DecodeError {
        match err {
            DecodeError::CorrectionExhausted {
                correction,
                increment,
                ..
            } => DecodeError::CorrectionExhausted {
                correction,
                increment,
                records_processed: self.records_processed,
                last_time: self.last_time,
            },
            other => other,
        }
    }
}

/// Lazy decoding of one batch, see [`SessionDecoder::events`]
pub struct BatchEvents<'a> {
    session: &'a mut SessionDecoder,
    records: std::slice::Iter<'a, RawRecord>,
    failed: bool,
}

impl Iterator for BatchEvents<'_> {
    type Item = Result<DecodeOutput, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        for &raw in self.records.by_ref() {
            match self.session.decode_record(raw) {
                Ok(Some(output)) => return Some(Ok(output)),
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
