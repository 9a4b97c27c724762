//! Emulator data source - generates synthetic TTTR records for testing
//!
//! This module provides an [`AcquisitionDriver`] that behaves like a device
//! FIFO without hardware: it produces T2 or T3 records with exponentially
//! distributed arrival times, inserts overflow records whenever the
//! truncated counter wraps, and reports completion and overrun like a
//! real device would.
//!
//! The generator also returns the true (unwrapped) event for every record,
//! so decoded output can be checked against it.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::reader::decoder::{DecodedEvent, RawRecord, RecordFields, TimingMode, OVERFLOW_CHANNEL};
use crate::reader::device::{codes, AcquisitionDriver, DeviceError, DeviceStatus};

/// Emulator configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Number of photon/marker events per session
    pub events: u64,
    /// Maximum records returned by one FIFO read
    pub records_per_read: usize,
    /// Number of input channels to spread photons over
    pub channels: u8,
    /// Mean gap between events in counter units (ticks in T2, sync periods
    /// in T3). Defaults depend on the mode when unset.
    pub mean_interval: Option<f64>,
    /// Mean of the exponential dtime distribution in bins (T3)
    pub dtime_decay: f64,
    /// Fraction of events that are markers
    pub marker_probability: f64,
    /// Fraction of events on the sync channel (T2)
    pub sync_probability: f64,
    /// Fraction of events preceded by an undefined special record
    pub anomaly_probability: f64,
    /// Coalesce consecutive wraps into one overflow record
    pub overflow_compression: bool,
    /// Report a FIFO overrun after this many records
    pub overrun_after: Option<u64>,
    /// Random seed (device index is added)
    pub seed: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            events: 100_000,
            records_per_read: 8192,
            channels: 4,
            mean_interval: None,
            dtime_decay: 500.0,
            marker_probability: 0.01,
            sync_probability: 0.05,
            anomaly_probability: 0.0,
            overflow_compression: true,
            overrun_after: None,
            seed: 0x5EED,
        }
    }
}

impl EmulatorConfig {
    /// Mean event gap for the given mode
    pub fn interval_for(&self, mode: TimingMode) -> f64 {
        self.mean_interval.unwrap_or(match mode {
            TimingMode::T2 => 100_000.0,
            TimingMode::T3 => 100.0,
        })
    }
}

/// Emulator errors
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Invalid emulator parameter: {0}")]
    InvalidParameter(String),
}

/// Produces records together with the events they encode
pub struct RecordGenerator {
    mode: TimingMode,
    config: EmulatorConfig,
    rng: StdRng,
    interval: Exp<f64>,
    dtime: Exp<f64>,
    /// Absolute time of the last event
    now: u64,
    /// Counter wraps already reported through overflow records
    wraps_reported: u64,
}

impl RecordGenerator {
    pub fn new(mode: TimingMode, config: EmulatorConfig, seed: u64) -> Result<Self, EmulatorError> {
        let interval = Exp::new(1.0 / config.interval_for(mode)).map_err(|_| {
            EmulatorError::InvalidParameter(format!(
                "mean_interval must be positive, got {}",
                config.interval_for(mode)
            ))
        })?;
        let dtime = Exp::new(1.0 / config.dtime_decay).map_err(|_| {
            EmulatorError::InvalidParameter(format!(
                "dtime_decay must be positive, got {}",
                config.dtime_decay
            ))
        })?;
        if config.channels == 0 || config.channels > 64 {
            return Err(EmulatorError::InvalidParameter(format!(
                "channels must be 1..=64, got {}",
                config.channels
            )));
        }

        Ok(Self {
            mode,
            config,
            rng: StdRng::seed_from_u64(seed),
            interval,
            dtime,
            now: 0,
            wraps_reported: 0,
        })
    }

    pub fn mode(&self) -> TimingMode {
        self.mode
    }

    /// Append the records of the next event to `out` and return the event
    ///
    /// Any overflow records needed before the event are appended first.
    pub fn next_event(&mut self, out: &mut Vec<RawRecord>) -> DecodedEvent {
        let gap = self.interval.sample(&mut self.rng).round() as u64;
        self.now += gap;

        let bits = self.mode.counter_bits();
        let wraps = (self.now >> bits) - self.wraps_reported;
        self.push_overflows(wraps, out);
        self.wraps_reported += wraps;

        if self.rng.gen::<f64>() < self.config.anomaly_probability {
            let channel = self.rng.gen_range(16..OVERFLOW_CHANNEL);
            out.push(self.fields(true, channel, 0, 0).to_raw());
        }

        let local = (self.now & (self.mode.wraparound() - 1)) as u32;
        let roll: f64 = self.rng.gen();

        let (fields, event) = if roll < self.config.marker_probability {
            let markers: u8 = self.rng.gen_range(1..=15);
            (
                self.fields(true, markers, local, 0),
                DecodedEvent::Marker {
                    markers,
                    time: self.now,
                },
            )
        } else if self.mode == TimingMode::T2
            && roll < self.config.marker_probability + self.config.sync_probability
        {
            (
                self.fields(true, 0, local, 0),
                DecodedEvent::Photon {
                    channel: 0,
                    time: self.now,
                    dtime: None,
                },
            )
        } else {
            let channel: u8 = self.rng.gen_range(0..self.config.channels);
            let dtime = match self.mode {
                TimingMode::T2 => None,
                TimingMode::T3 => Some((self.dtime.sample(&mut self.rng) as u64).min(0x7FFF) as u16),
            };
            (
                self.fields(false, channel, local, dtime.unwrap_or(0)),
                DecodedEvent::Photon {
                    channel: channel + 1,
                    time: self.now,
                    dtime,
                },
            )
        };

        out.push(fields.to_raw());
        event
    }

    fn push_overflows(&mut self, mut wraps: u64, out: &mut Vec<RawRecord>) {
        let max_count = if self.config.overflow_compression {
            self.mode.wraparound() - 1
        } else {
            1
        };
        while wraps > 0 {
            let count = wraps.min(max_count);
            out.push(self.fields(true, OVERFLOW_CHANNEL, count as u32, 0).to_raw());
            wraps -= count;
        }
    }

    fn fields(&self, special: bool, channel: u8, counter: u32, dtime: u16) -> RecordFields {
        match self.mode {
            TimingMode::T2 => RecordFields::T2 {
                special,
                channel,
                timetag: counter,
            },
            TimingMode::T3 => RecordFields::T3 {
                special,
                channel,
                dtime,
                nsync: counter as u16,
            },
        }
    }
}

/// Emulated device FIFO
pub struct EmulatedDevice {
    index: u32,
    generator: RecordGenerator,
    pending: VecDeque<RawRecord>,
    scratch: Vec<RawRecord>,
    remaining_events: u64,
    records_per_read: usize,
    records_delivered: u64,
    overrun_after: Option<u64>,
    running: bool,
}

impl EmulatedDevice {
    pub fn new(index: u32, mode: TimingMode, config: EmulatorConfig) -> Result<Self, EmulatorError> {
        if config.records_per_read == 0 {
            return Err(EmulatorError::InvalidParameter(
                "records_per_read must be positive".to_string(),
            ));
        }
        let seed = config.seed.wrapping_add(index as u64);
        let remaining_events = config.events;
        let records_per_read = config.records_per_read;
        let overrun_after = config.overrun_after;

        Ok(Self {
            index,
            generator: RecordGenerator::new(mode, config, seed)?,
            pending: VecDeque::new(),
            scratch: Vec::new(),
            remaining_events,
            records_per_read,
            records_delivered: 0,
            overrun_after,
            running: false,
        })
    }

    pub fn records_delivered(&self) -> u64 {
        self.records_delivered
    }
}

impl AcquisitionDriver for EmulatedDevice {
    fn index(&self) -> u32 {
        self.index
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        info!(
            device = self.index,
            mode = %self.generator.mode(),
            events = self.remaining_events,
            "Emulated measurement started"
        );
        self.running = true;
        Ok(())
    }

    fn read_fifo(&mut self, buffer: &mut Vec<RawRecord>) -> Result<DeviceStatus, DeviceError> {
        buffer.clear();
        if !self.running {
            return Err(DeviceError::new(
                codes::NOT_INITIALIZED,
                "measurement not started",
            ));
        }

        if let Some(limit) = self.overrun_after {
            if self.records_delivered >= limit {
                return Ok(DeviceStatus::Overrun);
            }
        }

        while self.pending.len() < self.records_per_read && self.remaining_events > 0 {
            self.scratch.clear();
            self.generator.next_event(&mut self.scratch);
            self.pending.extend(self.scratch.iter().copied());
            self.remaining_events -= 1;
        }

        let n = self.pending.len().min(self.records_per_read);
        buffer.extend(self.pending.drain(..n));
        self.records_delivered += n as u64;
        debug!(device = self.index, records = n, "Emulated FIFO read");

        if self.remaining_events == 0 {
            Ok(DeviceStatus::Complete)
        } else {
            Ok(DeviceStatus::Running)
        }
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.running = false;
        info!(
            device = self.index,
            records = self.records_delivered,
            "Emulated measurement stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::decoder::SessionDecoder;

    fn generate(
        mode: TimingMode,
        config: EmulatorConfig,
        n: usize,
    ) -> (Vec<RawRecord>, Vec<DecodedEvent>) {
        let mut gen = RecordGenerator::new(mode, config, 42).unwrap();
        let mut records = Vec::new();
        let truth = (0..n).map(|_| gen.next_event(&mut records)).collect();
        (records, truth)
    }

    #[test]
    fn test_default_config() {
        let config = EmulatorConfig::default();
        assert!(config.overflow_compression);
        assert_eq!(config.interval_for(TimingMode::T3), 100.0);
        assert_eq!(config.interval_for(TimingMode::T2), 100_000.0);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let config = EmulatorConfig {
            mean_interval: Some(0.0),
            ..Default::default()
        };
        assert!(RecordGenerator::new(TimingMode::T2, config, 0).is_err());

        let config = EmulatorConfig {
            channels: 0,
            ..Default::default()
        };
        assert!(RecordGenerator::new(TimingMode::T2, config, 0).is_err());

        let config = EmulatorConfig {
            records_per_read: 0,
            ..Default::default()
        };
        assert!(EmulatedDevice::new(0, TimingMode::T3, config).is_err());
    }

    #[test]
    fn test_decoder_reproduces_t3_truth() {
        let (records, truth) = generate(TimingMode::T3, EmulatorConfig::default(), 5000);
        let mut session = SessionDecoder::new(TimingMode::T3);
        assert_eq!(session.decode(&records).unwrap(), truth);
        assert!(session.stats().overflow_records > 0);
    }

    #[test]
    fn test_decoder_reproduces_t2_truth() {
        let config = EmulatorConfig {
            mean_interval: Some(5_000_000.0),
            ..Default::default()
        };
        let (records, truth) = generate(TimingMode::T2, config, 2000);
        let mut session = SessionDecoder::new(TimingMode::T2);
        assert_eq!(session.decode(&records).unwrap(), truth);
        assert!(truth.iter().any(|e| matches!(e, DecodedEvent::Photon { channel: 0, .. })));
    }

    #[test]
    fn test_uncompressed_overflows() {
        let config = EmulatorConfig {
            mean_interval: Some(10_000.0),
            overflow_compression: false,
            ..Default::default()
        };
        let (records, truth) = generate(TimingMode::T3, config, 100);
        let mut session = SessionDecoder::new(TimingMode::T3);
        assert_eq!(session.decode(&records).unwrap(), truth);
        // Every overflow record carries a single wrap
        let last = truth.last().unwrap().time();
        assert_eq!(session.stats().overflow_records, last >> 10);
    }

    #[test]
    fn test_truth_is_monotonic() {
        let (_, truth) = generate(TimingMode::T3, EmulatorConfig::default(), 1000);
        assert!(truth.windows(2).all(|w| w[0].time() <= w[1].time()));
    }

    #[test]
    fn test_anomalies_are_injected() {
        let config = EmulatorConfig {
            anomaly_probability: 0.5,
            ..Default::default()
        };
        let (records, truth) = generate(TimingMode::T3, config, 200);
        let mut session = SessionDecoder::new(TimingMode::T3);
        assert_eq!(session.decode(&records).unwrap(), truth);
        assert!(session.stats().anomalies > 0);
    }

    #[test]
    fn test_device_requires_start() {
        let mut device = EmulatedDevice::new(0, TimingMode::T3, EmulatorConfig::default()).unwrap();
        let mut buffer = Vec::new();
        let err = device.read_fifo(&mut buffer).unwrap_err();
        assert_eq!(err.code, codes::NOT_INITIALIZED);
    }

    #[test]
    fn test_device_reads_until_complete() {
        let config = EmulatorConfig {
            events: 1000,
            records_per_read: 128,
            ..Default::default()
        };
        let mut device = EmulatedDevice::new(0, TimingMode::T3, config).unwrap();
        device.start().unwrap();

        let mut buffer = Vec::new();
        let mut total = 0;
        loop {
            let status = device.read_fifo(&mut buffer).unwrap();
            assert!(buffer.len() <= 128);
            total += buffer.len();
            if status == DeviceStatus::Complete && buffer.is_empty() {
                break;
            }
        }
        assert!(total >= 1000);
        assert_eq!(device.records_delivered(), total as u64);
    }

    #[test]
    fn test_device_overrun() {
        let config = EmulatorConfig {
            records_per_read: 10,
            overrun_after: Some(20),
            ..Default::default()
        };
        let mut device = EmulatedDevice::new(0, TimingMode::T2, config).unwrap();
        device.start().unwrap();

        let mut buffer = Vec::new();
        assert_eq!(device.read_fifo(&mut buffer).unwrap(), DeviceStatus::Running);
        assert_eq!(device.read_fifo(&mut buffer).unwrap(), DeviceStatus::Running);
        assert_eq!(device.read_fifo(&mut buffer).unwrap(), DeviceStatus::Overrun);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_devices_are_seeded_by_index() {
        let config = EmulatorConfig {
            events: 10,
            ..Default::default()
        };
        let mut a = EmulatedDevice::new(0, TimingMode::T3, config.clone()).unwrap();
        let mut b = EmulatedDevice::new(1, TimingMode::T3, config).unwrap();
        a.start().unwrap();
        b.start().unwrap();

        let (mut ra, mut rb) = (Vec::new(), Vec::new());
        a.read_fifo(&mut ra).unwrap();
        b.read_fifo(&mut rb).unwrap();
        assert_ne!(ra, rb);
    }
}
