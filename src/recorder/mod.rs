//! Recorder component - writes acquisition output to files
//!
//! Two outputs, both per device:
//! - Raw records, captured at the driver boundary by [`RecordingDriver`]
//!   before decoding, so a file can be decoded again later.
//! - Decoded events in text form, written by [`Recorder`] from the
//!   reader's batch channel.
//!
//! File naming for text output: `{output_dir}/device{NN}.txt`

mod format;

pub use format::{
    FormatError, RawRecordReader, RawRecordWriter, TextEventWriter, Units, RECORD_SIZE,
};

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::reader::device::codes;
use crate::reader::{AcquisitionDriver, DeviceBatch, DeviceError, DeviceStatus, RawRecord, TimingMode};

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Recorder error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}

/// Recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Output directory
    pub output_dir: PathBuf,
    pub mode: TimingMode,
    pub units: Units,
}

impl RecorderConfig {
    /// Text output path for a device
    pub fn text_path(&self, device: u32) -> PathBuf {
        self.output_dir.join(format!("device{:02}.txt", device))
    }
}

/// What the recorder wrote
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecorderSummary {
    pub files: Vec<PathBuf>,
    pub batches: u64,
    pub events: u64,
}

/// Writes decoded batches as text, one file per device
pub struct Recorder {
    config: RecorderConfig,
    writers: BTreeMap<u32, TextEventWriter<BufWriter<File>>>,
    summary: RecorderSummary,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            writers: BTreeMap::new(),
            summary: RecorderSummary::default(),
        }
    }

    /// Append a batch to its device's file, opening the file on first use
    pub fn write_batch(&mut self, batch: &DeviceBatch) -> Result<(), RecorderError> {
        let writer = match self.writers.entry(batch.device) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                fs::create_dir_all(&self.config.output_dir)?;
                let path = self.config.text_path(batch.device);
                let file = File::create(&path)?;
                let writer = TextEventWriter::new(
                    BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
                    self.config.mode,
                    self.config.units,
                )?;
                info!(device = batch.device, path = %path.display(), "Opened text output");
                self.summary.files.push(path);
                entry.insert(writer)
            }
        };

        writer.write_events(&batch.events)?;
        self.summary.batches += 1;
        self.summary.events += batch.events.len() as u64;
        Ok(())
    }

    /// Flush and close all files
    pub fn finish(self) -> Result<RecorderSummary, RecorderError> {
        for (device, writer) in self.writers {
            let events = writer.events_written();
            let buffered = writer.finish()?;
            buffered.get_ref().sync_data()?;
            info!(device, events, "Closed text output");
        }
        Ok(self.summary)
    }

    /// Consume batches until every sender is dropped
    pub async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<DeviceBatch>,
    ) -> Result<RecorderSummary, RecorderError> {
        while let Some(batch) = rx.recv().await {
            debug!(device = batch.device, events = batch.events.len(), "Writing batch");
            self.write_batch(&batch)?;
        }
        info!("Recorder channel closed");
        self.finish()
    }
}

/// Driver wrapper that saves every record it hands out
///
/// Records are written before they reach the decoder. A batch read together
/// with an overrun is not written, matching what gets decoded.
pub struct RecordingDriver<D> {
    inner: D,
    path: PathBuf,
    writer: RawRecordWriter<BufWriter<File>>,
}

impl<D: AcquisitionDriver> RecordingDriver<D> {
    pub fn create(inner: D, path: impl AsRef<Path>) -> Result<Self, RecorderError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        info!(device = inner.index(), path = %path.display(), "Opened raw record output");

        Ok(Self {
            inner,
            path,
            writer: RawRecordWriter::new(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file)),
        })
    }

    pub fn records_written(&self) -> u64 {
        self.writer.records_written()
    }

    fn write_error(&self, e: FormatError) -> DeviceError {
        DeviceError::new(
            codes::FILE_WRITE_FAIL,
            format!("{}: {}", self.path.display(), e),
        )
    }
}

impl<D: AcquisitionDriver> AcquisitionDriver for RecordingDriver<D> {
    fn index(&self) -> u32 {
        self.inner.index()
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.inner.start()
    }

    fn read_fifo(&mut self, buffer: &mut Vec<RawRecord>) -> Result<DeviceStatus, DeviceError> {
        let status = self.inner.read_fifo(buffer)?;
        if status != DeviceStatus::Overrun && !buffer.is_empty() {
            if let Err(e) = self.writer.write_records(buffer) {
                return Err(self.write_error(e));
            }
        }
        Ok(status)
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        let stopped = self.inner.stop();
        if let Err(e) = self.writer.flush() {
            return Err(self.write_error(e));
        }
        info!(
            device = self.inner.index(),
            records = self.writer.records_written(),
            "Closed raw record output"
        );
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::decoder::RecordFields;
    use crate::reader::device::testing::ScriptedDriver;
    use crate::reader::DecodedEvent;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tttr-rs-{}-{}", std::process::id(), name));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn photon(time: u64) -> DecodedEvent {
        DecodedEvent::Photon {
            channel: 1,
            time,
            dtime: Some(10),
        }
    }

    #[test]
    fn test_text_path() {
        let config = RecorderConfig {
            output_dir: PathBuf::from("/data"),
            mode: TimingMode::T3,
            units: Units::new(1.0, Some(1e-8)),
        };
        assert_eq!(config.text_path(3), PathBuf::from("/data/device03.txt"));
    }

    #[test]
    fn test_recorder_writes_per_device_files() {
        let dir = scratch_dir("recorder");
        let mut recorder = Recorder::new(RecorderConfig {
            output_dir: dir.clone(),
            mode: TimingMode::T3,
            units: Units::new(1.0, Some(1e-6)),
        });

        recorder
            .write_batch(&DeviceBatch {
                device: 0,
                events: vec![photon(1), photon(2)],
            })
            .unwrap();
        recorder
            .write_batch(&DeviceBatch {
                device: 1,
                events: vec![photon(5)],
            })
            .unwrap();
        recorder
            .write_batch(&DeviceBatch {
                device: 0,
                events: vec![photon(3)],
            })
            .unwrap();

        let summary = recorder.finish().unwrap();
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.events, 4);
        assert_eq!(summary.files.len(), 2);

        let dev0 = fs::read_to_string(dir.join("device00.txt")).unwrap();
        assert!(dev0.starts_with("ev chn ttag/s dtime/ps\n\n"));
        assert_eq!(dev0.lines().count(), 2 + 3);
        let dev1 = fs::read_to_string(dir.join("device01.txt")).unwrap();
        assert_eq!(dev1.lines().count(), 2 + 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_recorder_run_until_closed() {
        let dir = scratch_dir("recorder-run");
        let recorder = Recorder::new(RecorderConfig {
            output_dir: dir.clone(),
            mode: TimingMode::T2,
            units: Units::new(1.0, None),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(recorder.run(rx));
        tx.send(DeviceBatch {
            device: 2,
            events: vec![DecodedEvent::Marker {
                markers: 1,
                time: 7,
            }],
        })
        .unwrap();
        drop(tx);

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.events, 1);
        let text = fs::read_to_string(dir.join("device02.txt")).unwrap();
        assert!(text.ends_with("MK  1              7\n"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_recording_driver_saves_records() {
        let dir = scratch_dir("raw");
        let path = dir.join("dev0.out");
        let overflow = RecordFields::T3 {
            special: true,
            channel: 0x3F,
            dtime: 0,
            nsync: 1,
        }
        .to_raw();

        let inner = ScriptedDriver::new(
            0,
            vec![
                Ok((vec![overflow, 5], DeviceStatus::Running)),
                Ok((vec![], DeviceStatus::Running)),
                Ok((vec![6], DeviceStatus::Complete)),
                Ok((vec![99], DeviceStatus::Overrun)),
            ],
        );
        let mut driver = RecordingDriver::create(inner, &path).unwrap();
        driver.start().unwrap();

        let mut buffer = Vec::new();
        for _ in 0..4 {
            driver.read_fifo(&mut buffer).unwrap();
        }
        driver.stop().unwrap();
        assert_eq!(driver.records_written(), 3);

        let mut reader = RawRecordReader::new(File::open(&path).unwrap());
        assert_eq!(reader.read_all().unwrap(), vec![overflow, 5, 6]);

        let _ = fs::remove_dir_all(&dir);
    }
}
