//! Acquisition driver boundary
//!
//! The hardware side (device open, initialisation, input configuration) is
//! outside this crate. A driver only has to hand out FIFO contents together
//! with the device status, the way MH_GetFlags / MH_ReadFiFo / MH_CTCStatus
//! are used in a TTTR read loop.

use std::fmt;
use thiserror::Error;

use super::decoder::RawRecord;

/// Maximum number of records delivered by one FIFO read (TTREADMAX)
pub const TTREADMAX: usize = 1_048_576;

/// Device status reported with each FIFO read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Measurement running (an empty batch means "no data yet")
    Running,
    /// Acquisition time elapsed (CTC status set); the FIFO may still hold records
    Complete,
    /// Hardware FIFO overran; data may already be lost
    Overrun,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Running => write!(f, "Running"),
            DeviceStatus::Complete => write!(f, "Complete"),
            DeviceStatus::Overrun => write!(f, "Overrun"),
        }
    }
}

/// Device communication error
///
/// Distinct from decoding errors: a session cut short by a device error
/// produced partial output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Device error {code}: {message}")]
pub struct DeviceError {
    pub code: i32,
    pub message: String,
}

impl DeviceError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Common device library error codes
pub mod codes {
    pub const NOT_INITIALIZED: i32 = -3;
    pub const USB_ERROR: i32 = -4;
    /// Raw record output attached to the driver failed
    pub const FILE_WRITE_FAIL: i32 = -6;
}

/// Source of raw record batches for one device
///
/// Calls are blocking and come from a single thread per device.
pub trait AcquisitionDriver: Send {
    /// Device index, used to tag output and logs
    fn index(&self) -> u32;

    /// Start the measurement (MH_StartMeas)
    fn start(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Replace `buffer` with the records currently available
    ///
    /// Returns the device status at the time of the read. On `Overrun` the
    /// buffer contents are not decoded.
    fn read_fifo(&mut self, buffer: &mut Vec<RawRecord>) -> Result<DeviceStatus, DeviceError>;

    /// Stop the measurement (MH_StopMeas)
    fn stop(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

impl<D: AcquisitionDriver + ?Sized> AcquisitionDriver for Box<D> {
    fn index(&self) -> u32 {
        (**self).index()
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        (**self).start()
    }

    fn read_fifo(&mut self, buffer: &mut Vec<RawRecord>) -> Result<DeviceStatus, DeviceError> {
        (**self).read_fifo(buffer)
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        (**self).stop()
    }
}
