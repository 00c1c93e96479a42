//! Device enumeration and hotplug pump
//!
//! [`UsbProvider`] enumerates devices matching the filter's vendor/product
//! signature and opens transports for the registry. [`HotplugPump`] runs
//! the libusb event loop on a dedicated thread and forwards hotplug
//! callbacks as refresh nudges; on hosts without hotplug support the
//! registry's periodic poll fallback covers attach/detach alone.

use rusb::{Context, Device, HotplugBuilder, Registration, UsbContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::DeviceIdentity;
use crate::error::{Error, Result};
use crate::registry::DeviceProvider;
use crate::transport::Transport;
use crate::usb::transport::UsbTransport;
use crate::usb::{PRODUCT_ID, VENDOR_ID};

/// Enumerates attached filter devices through libusb
pub struct UsbProvider {
    context: Context,
    vendor_id: u16,
    product_id: u16,
}

impl UsbProvider {
    /// Provider for the filter's fixed vendor/product signature
    pub fn new() -> Result<Self> {
        Self::with_signature(VENDOR_ID, PRODUCT_ID)
    }

    /// Provider for an explicit signature (engineering samples report
    /// different product IDs)
    pub fn with_signature(vendor_id: u16, product_id: u16) -> Result<Self> {
        let context = Context::new().map_err(|e| Error::Provider(e.to_string()))?;
        Ok(Self {
            context,
            vendor_id,
            product_id,
        })
    }

    /// The libusb context, shared with the hotplug pump
    pub fn context(&self) -> &Context {
        &self.context
    }

    fn matches(&self, device: &Device<Context>) -> bool {
        device
            .device_descriptor()
            .map(|d| d.vendor_id() == self.vendor_id && d.product_id() == self.product_id)
            .unwrap_or(false)
    }

    fn find(&self, identity: &DeviceIdentity) -> Result<Device<Context>> {
        let devices = self
            .context
            .devices()
            .map_err(|e| Error::Provider(e.to_string()))?;
        devices
            .iter()
            .find(|d| self.matches(d) && identity_of(d) == *identity)
            .ok_or(Error::Communication(crate::TransportError::NoDevice))
    }
}

/// Bus-position identity for one enumerated device
fn identity_of(device: &Device<Context>) -> DeviceIdentity {
    DeviceIdentity::new(format!(
        "usb:{:03}:{:03}",
        device.bus_number(),
        device.address()
    ))
}

impl DeviceProvider for UsbProvider {
    fn scan(&self) -> Result<Vec<DeviceIdentity>> {
        let devices = self
            .context
            .devices()
            .map_err(|e| Error::Provider(e.to_string()))?;

        let mut identities: Vec<DeviceIdentity> = devices
            .iter()
            .filter(|d| self.matches(d))
            .map(|d| identity_of(&d))
            .collect();
        identities.sort();

        debug!(found = identities.len(), "scanned for filter devices");
        Ok(identities)
    }

    fn open(&self, identity: &DeviceIdentity) -> Result<Box<dyn Transport>> {
        let device = self.find(identity)?;
        let transport = UsbTransport::open(&device)?;
        Ok(Box::new(transport))
    }
}

/// Dedicated thread for libusb event handling and hotplug callbacks
///
/// Each callback nudges the registry; pending nudges coalesce, so a burst
/// of bus activity collapses into one refresh.
pub struct HotplugPump {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HotplugPump {
    /// Register for hotplug callbacks and start the event thread
    ///
    /// `nudge` is the registry's [`notifier`](crate::Registry::notifier).
    pub fn spawn(context: Context, nudge: async_channel::Sender<()>) -> Result<Self> {
        if !rusb::has_hotplug() {
            return Err(Error::Provider(
                "hotplug callbacks not supported on this platform".to_string(),
            ));
        }

        let registration: Registration<Context> = HotplugBuilder::new()
            .vendor_id(VENDOR_ID)
            .product_id(PRODUCT_ID)
            .enumerate(false)
            .register(&context, Box::new(NudgeCallback { nudge }))
            .map_err(|e| Error::Provider(e.to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("lctf-hotplug".to_string())
            .spawn(move || {
                // Registration must outlive the event loop
                let _registration = registration;
                info!("hotplug pump started");

                while !stop_flag.load(Ordering::Acquire) {
                    match context.handle_events(Some(Duration::from_millis(100))) {
                        Ok(()) => {}
                        Err(rusb::Error::Interrupted) => {
                            debug!("usb event handling interrupted");
                        }
                        Err(e) => {
                            warn!("error handling usb events: {}", e);
                            std::thread::sleep(Duration::from_millis(100));
                        }
                    }
                }

                info!("hotplug pump stopped");
            })
            .map_err(|e| Error::Provider(e.to_string()))?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stop the event thread; also runs on drop
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for HotplugPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Hotplug callback that nudges the registry
struct NudgeCallback {
    nudge: async_channel::Sender<()>,
}

impl<T: UsbContext> rusb::Hotplug<T> for NudgeCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        debug!(
            bus = device.bus_number(),
            address = device.address(),
            "hotplug: device arrived"
        );
        let _ = self.nudge.try_send(());
    }

    fn device_left(&mut self, device: Device<T>) {
        debug!(
            bus = device.bus_number(),
            address = device.address(),
            "hotplug: device left"
        );
        let _ = self.nudge.try_send(());
    }
}
