//! File formats for decoded events and raw records
//!
//! Text output (one event per line, after a two-line header):
//! ```text
//! T2:  ev chn time/ps
//!      CH %2d %14.0f          time in ps
//!      MK %2d %14.0f
//! T3:  ev chn ttag/s dtime/ps
//!      CH %2d %10.8f %8.0f    sync time in s, dtime in ps
//!      MK %2d %10.8f
//! ```
//!
//! Raw record files are a flat sequence of little-endian `u32` records,
//! exactly as read from the FIFO, with no header.

use serde::Serialize;
use std::io::{ErrorKind, Read, Write};
use thiserror::Error;

use crate::reader::decoder::{DecodedEvent, RawRecord, TimingMode};

/// Size of one raw record in bytes
pub const RECORD_SIZE: usize = 4;

/// Errors from reading or writing output files
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("T3 output requires a sync period")]
    MissingSyncPeriod,

    #[error("File ends with {0} bytes of a partial record")]
    TrailingBytes(usize),
}

/// Physical units for text output
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Units {
    /// T2 tick / T3 dtime bin in picoseconds
    pub resolution_ps: f64,
    /// Sync period in seconds (T3)
    pub sync_period_s: Option<f64>,
}

impl Units {
    pub fn new(resolution_ps: f64, sync_period_s: Option<f64>) -> Self {
        Self {
            resolution_ps,
            sync_period_s,
        }
    }

    /// Header of the text format
    pub fn header(mode: TimingMode) -> &'static str {
        match mode {
            TimingMode::T2 => "ev chn time/ps\n\n",
            TimingMode::T3 => "ev chn ttag/s dtime/ps\n\n",
        }
    }
}

/// Writes decoded events in the reference text format
pub struct TextEventWriter<W: Write> {
    writer: W,
    mode: TimingMode,
    resolution_ps: f64,
    sync_period_s: f64,
    events_written: u64,
}

impl<W: Write> TextEventWriter<W> {
    /// Create a writer and emit the header
    pub fn new(mut writer: W, mode: TimingMode, units: Units) -> Result<Self, FormatError> {
        let sync_period_s = match (mode, units.sync_period_s) {
            (TimingMode::T3, None) => return Err(FormatError::MissingSyncPeriod),
            (_, period) => period.unwrap_or(0.0),
        };
        writer.write_all(Units::header(mode).as_bytes())?;

        Ok(Self {
            writer,
            mode,
            resolution_ps: units.resolution_ps,
            sync_period_s,
            events_written: 0,
        })
    }

    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    pub fn write_event(&mut self, event: &DecodedEvent) -> Result<(), FormatError> {
        let res = self.resolution_ps;
        match (self.mode, *event) {
            (TimingMode::T2, DecodedEvent::Photon { channel, time, .. }) => {
                writeln!(self.writer, "CH {:2} {:14.0}", channel, time as f64 * res)?
            }
            (TimingMode::T2, DecodedEvent::Marker { markers, time }) => {
                writeln!(self.writer, "MK {:2} {:14.0}", markers, time as f64 * res)?
            }
            (TimingMode::T3, DecodedEvent::Photon { channel, time, dtime }) => writeln!(
                self.writer,
                "CH {:2} {:10.8} {:8.0}",
                channel,
                time as f64 * self.sync_period_s,
                dtime.unwrap_or(0) as f64 * res
            )?,
            (TimingMode::T3, DecodedEvent::Marker { markers, time }) => writeln!(
                self.writer,
                "MK {:2} {:10.8}",
                markers,
                time as f64 * self.sync_period_s
            )?,
        }
        self.events_written += 1;
        Ok(())
    }

    pub fn write_events(&mut self, events: &[DecodedEvent]) -> Result<(), FormatError> {
        events.iter().try_for_each(|e| self.write_event(e))
    }

    /// Flush and return the inner writer
    pub fn finish(mut self) -> Result<W, FormatError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Writes raw records as little-endian `u32`
pub struct RawRecordWriter<W: Write> {
    writer: W,
    bytes: Vec<u8>,
    records_written: u64,
}

impl<W: Write> RawRecordWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            bytes: Vec::new(),
            records_written: 0,
        }
    }

    pub fn write_records(&mut self, records: &[RawRecord]) -> Result<(), FormatError> {
        self.bytes.clear();
        self.bytes.reserve(records.len() * RECORD_SIZE);
        for record in records {
            self.bytes.extend_from_slice(&record.to_le_bytes());
        }
        self.writer.write_all(&self.bytes)?;
        self.records_written += records.len() as u64;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn flush(&mut self) -> Result<(), FormatError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<W, FormatError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Reads raw records in bounded chunks
pub struct RawRecordReader<R: Read> {
    reader: R,
    bytes: Vec<u8>,
    records_read: u64,
    /// Partial record found at end of file, reported on the next call
    trailing: Option<usize>,
}

impl<R: Read> RawRecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            bytes: Vec::new(),
            records_read: 0,
            trailing: None,
        }
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Replace `out` with up to `max_records` records
    ///
    /// Returns the number of records read; 0 means end of file. A file whose
    /// length is not a multiple of [`RECORD_SIZE`] first yields all of its
    /// complete records, then fails with [`FormatError::TrailingBytes`].
    pub fn read_chunk(
        &mut self,
        out: &mut Vec<RawRecord>,
        max_records: usize,
    ) -> Result<usize, FormatError> {
        out.clear();
        if let Some(partial) = self.trailing.take() {
            return Err(FormatError::TrailingBytes(partial));
        }
        self.bytes.resize(max_records * RECORD_SIZE, 0);

        let mut filled = 0;
        while filled < self.bytes.len() {
            match self.reader.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        // A short read only happens at end of file
        let partial = filled % RECORD_SIZE;
        if partial != 0 {
            if filled < RECORD_SIZE {
                return Err(FormatError::TrailingBytes(partial));
            }
            self.trailing = Some(partial);
        }

        out.extend(
            self.bytes[..filled - partial]
                .chunks_exact(RECORD_SIZE)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
        self.records_read += out.len() as u64;
        Ok(out.len())
    }

    /// Read everything that is left
    pub fn read_all(&mut self) -> Result<Vec<RawRecord>, FormatError> {
        let mut all = Vec::new();
        let mut chunk = Vec::new();
        while self.read_chunk(&mut chunk, 65_536)? > 0 {
            all.extend_from_slice(&chunk);
        }
        Ok(all)
    }
}
