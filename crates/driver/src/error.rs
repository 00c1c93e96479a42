//! Driver error types

use protocol::{DeviceState, FirmwareVersion};
use std::time::Duration;
use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by sessions and the registry
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Transport-level transfer failure, including mid-call disconnection.
    /// Never retried by the driver; retry policy belongs to the caller.
    #[error("communication error: {0}")]
    Communication(#[from] TransportError),

    /// Requested wavelength outside the device's tuning range; rejected
    /// before any transfer is attempted
    #[error("wavelength {target} outside tuning range [{min}, {max}]")]
    OutOfRange { target: u32, min: u32, max: u32 },

    /// Device firmware older than the driver supports
    #[error("unsupported firmware version {found} (minimum {min})")]
    UnsupportedFirmware {
        found: FirmwareVersion,
        min: FirmwareVersion,
    },

    /// The device rejected a command because a prior tune or calibration
    /// was still in progress
    #[error("device busy (state {state:?})")]
    DeviceBusy { state: Option<DeviceState> },

    /// The device reported a fault during a pending tune
    #[error("device error (state {state:?})")]
    DeviceError { state: Option<DeviceState> },

    /// No resolving interrupt arrived within the configured window
    #[error("tune did not complete within {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Operation attempted after the session's transport was released
    #[error("session disposed")]
    SessionDisposed,

    /// Malformed response buffer from the device
    #[error("codec error: {0}")]
    Codec(#[from] protocol::CodecError),

    /// Device enumeration failure in the registry's provider
    #[error("provider error: {0}")]
    Provider(String),

    /// Invalid logging or environment configuration
    #[error("configuration error: {0}")]
    Config(String),
}

/// Type alias for driver results
pub type Result<T> = std::result::Result<T, Error>;
