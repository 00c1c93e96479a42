//! rusb-backed transport and hotplug integration
//!
//! This module binds the driver's [`Transport`](crate::transport::Transport)
//! and [`DeviceProvider`](crate::registry::DeviceProvider) seams to libusb
//! via rusb: control transfers on endpoint 0, notification reads on the
//! interrupt IN endpoint, vendor/product-filtered enumeration, and a
//! dedicated event thread that turns libusb hotplug callbacks into registry
//! refresh nudges.

pub mod hotplug;
pub mod transport;

pub use hotplug::{HotplugPump, UsbProvider};
pub use transport::UsbTransport;

/// Vendor ID of the filter hardware
pub const VENDOR_ID: u16 = 0x1313;
/// Product ID of the filter hardware
pub const PRODUCT_ID: u16 = 0x900C;

/// Map rusb errors onto the transport error taxonomy
pub(crate) fn map_rusb_error(err: rusb::Error) -> crate::transport::TransportError {
    use crate::transport::TransportError;

    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe => TransportError::Pipe,
        rusb::Error::NoDevice | rusb::Error::NotFound => TransportError::NoDevice,
        rusb::Error::Access => TransportError::Access,
        rusb::Error::Io => TransportError::Io,
        other => TransportError::Other {
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), TransportError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), TransportError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), TransportError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::Access), TransportError::Access);
        assert!(matches!(
            map_rusb_error(rusb::Error::Overflow),
            TransportError::Other { .. }
        ));
    }
}
