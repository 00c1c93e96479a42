//! rusb control and notification transport

use protocol::{ControlRequest, FirmwareVersion};
use rusb::{Context, Device, DeviceHandle};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::transport::{Transport, TransportError};
use crate::usb::map_rusb_error;

/// Interrupt IN endpoint carrying device notifications
const NOTIFICATION_ENDPOINT: u8 = 0x81;

/// Interface holding both the control and notification endpoints
const INTERFACE: u8 = 0;

/// Timeout for control transfers
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport over an open rusb device handle
///
/// Transfers take a shared lock so control traffic and the notification
/// listener run concurrently; [`close`](Transport::close) takes the
/// exclusive lock, drops the handle, and leaves later transfers failing
/// with [`TransportError::Released`].
pub struct UsbTransport {
    handle: RwLock<Option<DeviceHandle<Context>>>,
    serial: Option<String>,
    firmware: FirmwareVersion,
}

impl UsbTransport {
    /// Open a device and claim its control interface
    ///
    /// Reads the serial string descriptor and `bcdDevice` while the handle
    /// is fresh; both are immutable for the life of the transport.
    pub fn open(device: &Device<Context>) -> Result<Self, TransportError> {
        let descriptor = device.device_descriptor().map_err(map_rusb_error)?;
        let handle = device.open().map_err(|e| {
            warn!("failed to open device: {}", e);
            map_rusb_error(e)
        })?;

        // On Linux the kernel may have a driver bound; detach before claim
        match handle.kernel_driver_active(INTERFACE) {
            Ok(true) => {
                if let Err(e) = handle.detach_kernel_driver(INTERFACE) {
                    warn!("failed to detach kernel driver: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => debug!("could not check kernel driver status: {}", e),
        }
        handle.claim_interface(INTERFACE).map_err(map_rusb_error)?;

        let serial = descriptor
            .serial_number_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

        let version = descriptor.device_version();
        let firmware = FirmwareVersion::from_bcd(
            (u16::from(version.major()) << 8)
                | (u16::from(version.minor()) << 4)
                | u16::from(version.sub_minor()),
        );

        debug!(
            bus = device.bus_number(),
            address = device.address(),
            %firmware,
            "opened filter device"
        );

        Ok(Self {
            handle: RwLock::new(Some(handle)),
            serial,
            firmware,
        })
    }
}

impl Transport for UsbTransport {
    fn control_in(&self, req: &ControlRequest, buf: &mut [u8]) -> Result<usize, TransportError> {
        let Ok(guard) = self.handle.read() else {
            return Err(TransportError::Released);
        };
        let handle = guard.as_ref().ok_or(TransportError::Released)?;

        handle
            .read_control(
                req.request_type,
                req.request,
                req.value,
                req.index,
                buf,
                CONTROL_TIMEOUT,
            )
            .map_err(map_rusb_error)
    }

    fn control_out(&self, req: &ControlRequest) -> Result<(), TransportError> {
        let Ok(guard) = self.handle.read() else {
            return Err(TransportError::Released);
        };
        let handle = guard.as_ref().ok_or(TransportError::Released)?;

        let payload: &[u8] = match &req.payload {
            Some(bytes) => bytes,
            None => &[],
        };
        handle
            .write_control(
                req.request_type,
                req.request,
                req.value,
                req.index,
                payload,
                CONTROL_TIMEOUT,
            )
            .map_err(map_rusb_error)?;
        Ok(())
    }

    fn read_notification(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let Ok(guard) = self.handle.read() else {
            return Err(TransportError::Released);
        };
        let handle = guard.as_ref().ok_or(TransportError::Released)?;

        handle
            .read_interrupt(NOTIFICATION_ENDPOINT, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn serial_number(&self) -> Option<String> {
        self.serial.clone()
    }

    fn firmware_version(&self) -> FirmwareVersion {
        self.firmware
    }

    fn close(&self) {
        let Ok(mut guard) = self.handle.write() else {
            return;
        };
        if let Some(handle) = guard.take() {
            if let Err(e) = handle.release_interface(INTERFACE) {
                debug!("failed to release interface: {}", e);
            }
            // Hand the device back to kernel control
            if let Err(e) = handle.attach_kernel_driver(INTERFACE) {
                debug!("could not reattach kernel driver: {}", e);
            }
            debug!("transport released");
        }
    }
}
