//! Transport abstraction over the USB control and notification channels
//!
//! The driver never touches the bus directly. Everything it needs from the
//! host-controller side is behind the [`Transport`] trait: executing a
//! vendor control transfer, reading the notification endpoint, and the two
//! descriptor-derived statics (serial number, firmware version). The rusb
//! implementation lives in [`crate::usb`]; tests use the scripted mock in
//! [`crate::testing`].

use protocol::{ControlRequest, FirmwareVersion};
use std::time::Duration;
use thiserror::Error;

/// Transport-level failures
///
/// Mirrors the libusb error surface. A transfer on a released transport
/// fails with [`TransportError::Released`], never undefined behavior.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Transfer timed out
    #[error("transfer timed out")]
    Timeout,

    /// Endpoint stalled
    #[error("endpoint stalled")]
    Pipe,

    /// Device disconnected
    #[error("device disconnected")]
    NoDevice,

    /// Insufficient permissions on the device node
    #[error("access denied")]
    Access,

    /// Low-level I/O failure
    #[error("i/o error")]
    Io,

    /// Transport already released by disposal
    #[error("transport released")]
    Released,

    /// Anything else the host controller reports
    #[error("usb error: {message}")]
    Other { message: String },
}

/// One device's USB control and notification channels
///
/// Exclusively owned by its session; release is idempotent and any
/// transfer after release fails with [`TransportError::Released`].
pub trait Transport: Send + Sync {
    /// Execute a device-to-host control transfer, filling `buf`
    ///
    /// Returns the number of bytes the device answered with.
    fn control_in(&self, req: &ControlRequest, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Execute a host-to-device control transfer
    ///
    /// Writes the request's payload bytes if present, otherwise a
    /// zero-length data stage.
    fn control_out(&self, req: &ControlRequest) -> Result<(), TransportError>;

    /// Read one notification payload from the interrupt endpoint
    ///
    /// Returns [`TransportError::Timeout`] when the device has nothing
    /// pending within `timeout`; the listener loop treats that as normal.
    fn read_notification(&self, buf: &mut [u8], timeout: Duration)
    -> Result<usize, TransportError>;

    /// Serial number from the device's string descriptor, if present
    fn serial_number(&self) -> Option<String>;

    /// Firmware version from the device descriptor's bcdDevice field
    fn firmware_version(&self) -> FirmwareVersion;

    /// Release the underlying handle; safe to call more than once
    fn close(&self);
}
