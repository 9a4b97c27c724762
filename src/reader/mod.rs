//! Reader module for TTTR data acquisition
//!
//! This module provides:
//! - The record decoder (decoder)
//! - The acquisition driver boundary (device)
//! - The per-device read/decode loop and multi-device orchestration

pub mod decoder;
pub mod device;

// Re-exports
pub use decoder::{
    DecodeAnomaly, DecodeError, DecodedEvent, RawRecord, SessionDecoder, SessionStats, TimingMode,
};
pub use device::{AcquisitionDriver, DeviceError, DeviceStatus, TTREADMAX};

use crate::common::metrics::AtomicCounters;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Reader error type
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Hardware FIFO overran; earlier data may be lost
    #[error("FIFO overrun")]
    FifoOverrun,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel send error")]
    ChannelSend,

    #[error("Acquisition task failed: {0}")]
    TaskFailed(String),
}

/// A fatal session error, with where the stream was cut off
#[derive(Debug, Error)]
#[error(
    "Device {device} session aborted after {} records (last time {:?}): {kind}",
    .stats.records_processed,
    .stats.last_time
)]
pub struct SessionError {
    pub device: u32,
    #[source]
    pub kind: ReaderError,
    pub stats: SessionStats,
}

/// Reader configuration
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Timing mode of every session
    pub mode: TimingMode,
    /// Empty polls after completion before the session is declared finished
    pub stop_grace_polls: u32,
    /// Sleep after an empty poll while running (zero = busy poll)
    pub poll_idle: Duration,
    /// Capacity of the record buffer
    pub max_batch_records: usize,
    /// Progress log interval (zero = disabled)
    pub progress_interval: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            mode: TimingMode::T3,
            stop_grace_polls: 5,
            poll_idle: Duration::ZERO,
            max_batch_records: TTREADMAX,
            progress_interval: Duration::from_secs(1),
        }
    }
}

impl ReaderConfig {
    /// Create ReaderConfig from the acquisition section of a Config
    pub fn from_config(config: &crate::config::Config) -> Self {
        let acq = &config.acquisition;
        Self {
            mode: acq.mode,
            stop_grace_polls: acq.stop_grace_polls,
            poll_idle: Duration::from_millis(acq.poll_idle_ms),
            max_batch_records: acq.max_batch_records,
            progress_interval: Duration::from_millis(acq.progress_interval_ms),
        }
    }
}

/// Result of a completed session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub device: u32,
    pub mode: TimingMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// FIFO reads that returned records
    pub batches: u64,
    /// True if the stop flag ended the session before completion
    pub stopped_early: bool,
    pub stats: SessionStats,
    /// Retained undefined special records
    pub anomalies: Vec<DecodeAnomaly>,
}

/// Run one acquisition session to completion
///
/// Polls the driver, decodes every batch in order with a fresh
/// [`SessionDecoder`] and hands the events of each batch to `sink`.
/// The session ends when the device reports completion and more than
/// `stop_grace_polls` further polls came back empty, or when `stop` is
/// raised. Overrun, device, decode and sink errors abort the session;
/// events already passed to `sink` stay valid.
pub fn run_session<D, F>(
    driver: &mut D,
    config: &ReaderConfig,
    stop: &AtomicBool,
    counters: &AtomicCounters,
    mut sink: F,
) -> Result<SessionSummary, SessionError>
where
    D: AcquisitionDriver + ?Sized,
    F: FnMut(&[DecodedEvent]) -> Result<(), ReaderError>,
{
    let device = driver.index();
    let started_at = Utc::now();
    let mut decoder = SessionDecoder::new(config.mode);

    let fail = |kind: ReaderError, decoder: &SessionDecoder| SessionError {
        device,
        kind,
        stats: decoder.stats(),
    };

    info!(device, mode = %config.mode, "Starting acquisition session");
    driver
        .start()
        .map_err(|e| fail(ReaderError::Device(e), &decoder))?;

    let mut buffer: Vec<RawRecord> = Vec::with_capacity(config.max_batch_records);
    let mut events: Vec<DecodedEvent> = Vec::with_capacity(config.max_batch_records);
    let mut batches: u64 = 0;
    let mut stop_retry: u32 = 0;
    let mut stopped_early = false;

    let mut last_report = Instant::now();
    let mut last_snapshot = counters.snapshot();

    loop {
        if stop.load(Ordering::Relaxed) {
            info!(device, "Stop requested, ending session");
            stopped_early = true;
            break;
        }

        let status = match driver.read_fifo(&mut buffer) {
            Ok(status) => status,
            Err(e) => {
                error!(device, error = %e, "FIFO read failed");
                let _ = driver.stop();
                return Err(fail(ReaderError::Device(e), &decoder));
            }
        };

        if status == DeviceStatus::Overrun {
            error!(
                device,
                records = decoder.stats().records_processed,
                "FIFO overrun, aborting session"
            );
            let _ = driver.stop();
            return Err(fail(ReaderError::FifoOverrun, &decoder));
        }

        if !buffer.is_empty() {
            events.clear();
            let result = decoder.decode_into(&buffer, &mut events);
            batches += 1;

            // Events decoded before a fatal error are still delivered
            if !events.is_empty() {
                if let Err(e) = sink(&events) {
                    let _ = driver.stop();
                    return Err(fail(e, &decoder));
                }
            }

            match result {
                Ok(stats) => {
                    counters.add_batch(
                        stats.records as u64,
                        stats.events as u64,
                        stats.overflows as u64,
                        stats.anomalies as u64,
                    );
                    debug!(device, records = stats.records, events = stats.events, "Batch");
                }
                Err(e) => {
                    error!(device, error = %e, "Decoding aborted");
                    let _ = driver.stop();
                    return Err(fail(ReaderError::Decode(e), &decoder));
                }
            }
        } else if status == DeviceStatus::Complete {
            // A few more rounds, the FIFO may still hold records
            stop_retry += 1;
            if stop_retry > config.stop_grace_polls {
                info!(device, "Acquisition complete");
                break;
            }
        } else if !config.poll_idle.is_zero() {
            std::thread::sleep(config.poll_idle);
        }

        if !config.progress_interval.is_zero() && last_report.elapsed() >= config.progress_interval
        {
            let snapshot = counters.snapshot();
            let rate = snapshot.rate_from(&last_snapshot, last_report.elapsed().as_secs_f64());
            info!(
                device,
                records = snapshot.records,
                events = snapshot.events,
                record_rate = %rate.format_records_rate(),
                event_rate = %rate.format_events_rate(),
                "Progress"
            );
            last_snapshot = snapshot;
            last_report = Instant::now();
        }
    }

    driver
        .stop()
        .map_err(|e| fail(ReaderError::Device(e), &decoder))?;

    let stats = decoder.stats();
    if stats.anomalies > 0 {
        warn!(device, anomalies = stats.anomalies, "Session contained undefined special records");
    }
    info!(
        device,
        records = stats.records_processed,
        events = stats.events_emitted,
        overflows = stats.overflow_records,
        "Session finished"
    );

    Ok(SessionSummary {
        device,
        mode: config.mode,
        started_at,
        finished_at: Utc::now(),
        batches,
        stopped_early,
        stats,
        anomalies: decoder.anomalies().to_vec(),
    })
}

/// Decoded events of one batch, tagged with their device
#[derive(Debug, Clone)]
pub struct DeviceBatch {
    pub device: u32,
    pub events: Vec<DecodedEvent>,
}

/// Runs independent acquisition sessions for several devices
///
/// Each device gets its own blocking task and its own decoder; decoded
/// batches meet only at the output channel.
pub struct Reader {
    config: ReaderConfig,
    stop: Arc<AtomicBool>,
}

impl Reader {
    pub fn new(config: ReaderConfig) -> Self {
        Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that ends all sessions when raised
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run all devices until each session ends
    ///
    /// Returns one result per driver, in driver order. A failing device
    /// does not stop the others.
    pub async fn run(
        &self,
        drivers: Vec<Box<dyn AcquisitionDriver>>,
        tx: mpsc::UnboundedSender<DeviceBatch>,
    ) -> Vec<Result<SessionSummary, SessionError>> {
        info!(devices = drivers.len(), mode = %self.config.mode, "Reader starting");

        let handles: Vec<_> = drivers
            .into_iter()
            .map(|mut driver| {
                let config = self.config.clone();
                let stop = self.stop.clone();
                let tx = tx.clone();
                let device = driver.index();

                let handle = tokio::task::spawn_blocking(move || {
                    let counters = AtomicCounters::new();
                    run_session(&mut driver, &config, &stop, &counters, |events| {
                        tx.send(DeviceBatch {
                            device,
                            events: events.to_vec(),
                        })
                        .map_err(|_| ReaderError::ChannelSend)
                    })
                });
                (device, handle)
            })
            .collect();
        drop(tx);

        let (devices, handles): (Vec<u32>, Vec<_>) = handles.into_iter().unzip();
        let joined = futures::future::join_all(handles).await;

        let results: Vec<_> = devices
            .into_iter()
            .zip(joined)
            .map(|(device, joined)| {
                joined.unwrap_or_else(|e| {
                    Err(SessionError {
                        device,
                        kind: ReaderError::TaskFailed(e.to_string()),
                        stats: SessionStats::default(),
                    })
                })
            })
            .collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(devices = results.len(), failed, "Reader stopped");
        results
    }

    /// Like [`Reader::run`], raising the stop flag on a shutdown signal
    pub async fn run_until_shutdown(
        &self,
        drivers: Vec<Box<dyn AcquisitionDriver>>,
        tx: mpsc::UnboundedSender<DeviceBatch>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Vec<Result<SessionSummary, SessionError>> {
        let stop = self.stop.clone();
        let watcher = tokio::spawn(async move {
            if shutdown.recv().await.is_ok() {
                info!("Shutdown received, stopping acquisition");
                stop.store(true, Ordering::Relaxed);
            }
        });

        let results = self.run(drivers, tx).await;
        watcher.abort();
        results
    }
}
