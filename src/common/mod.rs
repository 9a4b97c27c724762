//! Infrastructure shared by the library and the binaries

pub mod cli;
pub mod metrics;
pub mod shutdown;

pub use cli::{AcquireArgs, CommonArgs, DecodeArgs};
pub use metrics::{AtomicCounters, CounterSnapshot, RateSnapshot};
pub use shutdown::{setup_shutdown, ShutdownReceiver, ShutdownSender, ShutdownSignal};
