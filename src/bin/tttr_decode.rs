//! tttr-decode - decode a raw TTTR record file into text
//!
//! Usage:
//!   tttr-decode run.out --mode T2 --resolution-ps 5 -o run.txt
//!   tttr-decode run.out --mode T3 --resolution-ps 25 --sync-period-s 1.25e-8
//!   tttr-decode run.out --config config.toml --summary run.json

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tttr_rs::common::DecodeArgs;
use tttr_rs::reader::{DecodeAnomaly, SessionDecoder, SessionStats, TimingMode};
use tttr_rs::recorder::{RawRecordReader, TextEventWriter};

/// JSON summary of one decoded file
#[derive(Serialize)]
struct DecodeSummary {
    input: PathBuf,
    mode: TimingMode,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    stats: SessionStats,
    anomalies: Vec<DecodeAnomaly>,
    error: Option<String>,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr, text output may be on stdout
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("tttr_rs=info".parse()?))
        .init();

    let args = DecodeArgs::parse();
    anyhow::ensure!(args.chunk_records > 0, "--chunk-records must be positive");

    let config = args
        .common
        .load_config()
        .context("Failed to load configuration")?;
    if let Some(path) = &args.common.config_file {
        info!(config_file = %path.display(), "Loaded configuration");
    }

    let mode = config.acquisition.mode;
    let units = config.units()?;

    let input = File::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let mut reader = RawRecordReader::new(BufReader::new(input));

    let output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let mut writer = TextEventWriter::new(output, mode, units)?;

    info!(input = %args.input.display(), %mode, "Decoding");
    let started_at = Utc::now();
    let mut decoder = SessionDecoder::new(mode);
    let mut chunk = Vec::new();
    let mut events = Vec::new();

    let mut failure: Option<anyhow::Error> = None;
    loop {
        match reader.read_chunk(&mut chunk, args.chunk_records) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, records = reader.records_read(), "Reading input aborted");
                failure = Some(e.into());
                break;
            }
        }

        events.clear();
        let result = decoder.decode_into(&chunk, &mut events);
        // Events before a fatal record are still written
        writer.write_events(&events)?;
        if let Err(e) = result {
            error!(error = %e, "Decoding aborted");
            failure = Some(e.into());
            break;
        }
    }
    writer.finish()?;

    let stats = decoder.stats();
    info!(
        records = stats.records_processed,
        events = stats.events_emitted,
        overflows = stats.overflow_records,
        anomalies = stats.anomalies,
        "Decoding finished"
    );

    args.common.write_summary(&DecodeSummary {
        input: args.input.clone(),
        mode,
        started_at,
        finished_at: Utc::now(),
        stats,
        anomalies: decoder.anomalies().to_vec(),
        error: failure.as_ref().map(|e| format!("{e:#}")),
    })?;

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
