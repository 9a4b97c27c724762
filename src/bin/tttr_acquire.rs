//! tttr-acquire - acquire and decode records from emulated TTTR devices
//!
//! Every device runs its own read/decode session; decoded batches are
//! written as text by the recorder, raw records optionally go to one file
//! per device. Ctrl+C ends all sessions cleanly.
//!
//! Usage:
//!   tttr-acquire --mode T2 -n 2 --events 100000 -o ./data
//!   tttr-acquire --mode T3 --sync-period-s 1.25e-8 --resolution-ps 25 -o ./data
//!   tttr-acquire --config config.toml --raw-dir ./raw

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tttr_rs::common::{setup_shutdown, AcquireArgs};
use tttr_rs::config::DeviceConfig;
use tttr_rs::data_source_emulator::EmulatedDevice;
use tttr_rs::reader::{
    AcquisitionDriver, Reader, ReaderConfig, SessionStats, SessionSummary, TimingMode,
};
use tttr_rs::recorder::{Recorder, RecorderConfig, RecorderSummary, RecordingDriver};

/// A device whose session ended with an error
#[derive(Serialize)]
struct FailedSession {
    device: u32,
    error: String,
    stats: SessionStats,
}

/// JSON summary of the whole run
#[derive(Serialize)]
struct RunSummary {
    mode: TimingMode,
    sessions: Vec<SessionSummary>,
    failures: Vec<FailedSession>,
    recorder: Option<RecorderSummary>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (logging)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tttr_rs=info".parse()?))
        .init();

    let args = AcquireArgs::parse();

    let mut config = args
        .common
        .load_config()
        .context("Failed to load configuration")?;
    if let Some(path) = &args.common.config_file {
        info!(config_file = %path.display(), "Loaded configuration");
    }
    if let Some(events) = args.events {
        config.emulator.events = events;
    }
    let mode = config.acquisition.mode;

    let devices: Vec<DeviceConfig> = if config.devices.is_empty() {
        (0..args.devices)
            .map(|index| DeviceConfig {
                index,
                name: format!("emulated-{index}"),
                output: None,
            })
            .collect()
    } else {
        config.devices.clone()
    };

    let mut drivers: Vec<Box<dyn AcquisitionDriver>> = Vec::with_capacity(devices.len());
    for device in &devices {
        let emulated = EmulatedDevice::new(device.index, mode, config.emulator.clone())?;
        let raw_path = device.output.clone().or_else(|| {
            args.raw_dir
                .as_ref()
                .map(|dir| dir.join(format!("device{:02}.out", device.index)))
        });
        match raw_path {
            Some(path) => drivers.push(Box::new(RecordingDriver::create(emulated, &path)?)),
            None => drivers.push(Box::new(emulated)),
        }
        info!(device = device.index, name = %device.name, "Device configured");
    }

    let recorder = match &args.output_dir {
        Some(dir) => {
            let units = config
                .units()
                .context("Text output needs units (--sync-period-s in T3)")?;
            Some(Recorder::new(RecorderConfig {
                output_dir: dir.clone(),
                mode,
                units,
            }))
        }
        None => None,
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = tokio::spawn(async move {
        match recorder {
            Some(recorder) => recorder.run(rx).await.map(Some),
            None => {
                while rx.recv().await.is_some() {}
                Ok(None)
            }
        }
    });

    let reader = Reader::new(ReaderConfig::from_config(&config));
    let (_shutdown_tx, shutdown_rx) = setup_shutdown();
    let results = reader.run_until_shutdown(drivers, tx, shutdown_rx).await;
    let recorded = sink.await??;

    let mut sessions = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(summary) => sessions.push(summary),
            Err(e) => {
                error!(device = e.device, error = %e, "Session failed");
                failures.push(FailedSession {
                    device: e.device,
                    error: e.to_string(),
                    stats: e.stats,
                });
            }
        }
    }

    let failed = failures.len();
    let total = sessions.len() + failed;
    args.common.write_summary(&RunSummary {
        mode,
        sessions,
        failures,
        recorder: recorded,
    })?;

    if failed > 0 {
        anyhow::bail!("{failed} of {total} device sessions failed");
    }
    info!(devices = total, "Acquisition finished");
    Ok(())
}
