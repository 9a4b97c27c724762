//! TTTR-RS: decoding and time reconstruction for time-tagged photon records
//!
//! Turns the 32-bit T2/T3 records streamed by a time-correlated single
//! photon counting device into overflow-corrected photon and marker events,
//! for one or several devices at once.

pub mod common;
pub mod config;
pub mod data_source_emulator;
pub mod reader;
pub mod recorder;
