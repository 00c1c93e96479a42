//! Driver for a USB liquid-crystal tunable filter
//!
//! This crate turns the raw vendor control protocol (the `protocol` crate)
//! into typed device sessions with an asynchronous completion model:
//!
//! - [`Session`] owns one device's transport, exposes typed get/set
//!   operations, and correlates the device's interrupt notifications with
//!   in-flight tune commands.
//! - [`Registry`] watches for attach/detach of matching devices and keeps
//!   at most one live session per physical device.
//! - [`transport::Transport`] is the seam to the USB host controller; the
//!   rusb implementation lives in [`usb`], and [`testing`] provides a
//!   scripted mock for simulated devices.
//!
//! Tune completion is the subtle part: the device acknowledges a
//! `SetWavelength` command immediately and reports actual completion later
//! via an unsolicited interrupt. [`Session::set_wavelength_and_wait`]
//! registers its waiter before issuing the command, so even an immediate
//! completion cannot be missed, and resolves exactly once from whichever of
//! TuningDone, Busy, Error or the timeout fires first.

pub mod error;
pub mod events;
pub mod logging;
pub mod registry;
pub mod session;
pub mod testing;
pub mod transport;
pub mod usb;
pub mod waiter;

pub use error::{Error, Result};
pub use events::InterruptEvent;
pub use registry::{AttachFailure, DeviceProvider, Registry, RegistryEvent};
pub use session::Session;
pub use transport::{Transport, TransportError};
pub use waiter::{DEFAULT_TUNE_TIMEOUT, DEFAULT_WAIT_TIMEOUT, TuneWaiter};

use serde::{Deserialize, Serialize};

/// Stable key distinguishing physically attached devices
///
/// Derived from the device's bus position (bus and address for the rusb
/// provider). A device that re-enumerates under the same key still gets a
/// fresh [`Session`]; the key only drives the registry's attach/detach
/// diffing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Wrap an identity string
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
