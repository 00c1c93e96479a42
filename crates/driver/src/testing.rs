//! Simulated transports and providers for tests
//!
//! [`MockTransport`] scripts the device side of the control protocol:
//! responses per command index, recorded requests, an injectable
//! notification queue, and optional fault injection. [`MockProvider`]
//! simulates attach/detach for registry tests. Both are ordinary library
//! types so downstream crates can drive the driver against a simulated
//! device too.

use protocol::{Command, ControlRequest, DeviceState, FirmwareVersion, NOTIFICATION_LEN};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::DeviceIdentity;
use crate::error::{Error, Result};
use crate::registry::DeviceProvider;
use crate::transport::{Transport, TransportError};

/// A scripted in-memory transport
///
/// Fresh instances answer the construction-time reads of a healthy device:
/// firmware 1.10, tuning range 420-730 step 1, state Ready, temperature
/// 23.5. Tests override individual responses before opening a session.
pub struct MockTransport {
    state: Mutex<MockState>,
    notif_tx: Sender<[u8; NOTIFICATION_LEN]>,
    notif_rx: Mutex<Receiver<[u8; NOTIFICATION_LEN]>>,
    closed: AtomicBool,
}

struct MockState {
    responses: HashMap<u16, Vec<u8>>,
    requests: Vec<ControlRequest>,
    serial: Option<String>,
    firmware: FirmwareVersion,
    fail_with: Option<TransportError>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (notif_tx, notif_rx) = std::sync::mpsc::channel();

        let mut responses = HashMap::new();
        responses.insert(
            Command::WavelengthMin as u16,
            420.0f32.to_le_bytes().to_vec(),
        );
        responses.insert(
            Command::WavelengthMax as u16,
            730.0f32.to_le_bytes().to_vec(),
        );
        responses.insert(Command::WavelengthStep as u16, 1.0f32.to_le_bytes().to_vec());
        responses.insert(Command::GetLctfState as u16, vec![DeviceState::Ready as u8]);
        responses.insert(
            Command::GetTemperature as u16,
            23.5f32.to_le_bytes().to_vec(),
        );

        Self {
            state: Mutex::new(MockState {
                responses,
                requests: Vec::new(),
                serial: Some("LCTF-SIM".to_string()),
                firmware: FirmwareVersion::from_bcd(0x0110),
                fail_with: None,
            }),
            notif_tx,
            notif_rx: Mutex::new(notif_rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Script the response buffer for one get command
    pub fn set_response(&self, command: Command, bytes: Vec<u8>) {
        self.lock().responses.insert(command as u16, bytes);
    }

    /// Script a float response for one get command
    pub fn set_f32_response(&self, command: Command, value: f32) {
        self.set_response(command, value.to_le_bytes().to_vec());
    }

    /// Script a single-byte response for one get command
    pub fn set_u8_response(&self, command: Command, value: u8) {
        self.set_response(command, vec![value]);
    }

    /// Override the reported serial number
    pub fn set_serial_number(&self, serial: &str) {
        self.lock().serial = Some(serial.to_string());
    }

    /// Override the reported firmware version (raw BCD)
    pub fn set_firmware(&self, bcd: u16) {
        self.lock().firmware = FirmwareVersion::from_bcd(bcd);
    }

    /// Make every subsequent transfer fail with `error`
    pub fn fail_with(&self, error: TransportError) {
        self.lock().fail_with = Some(error);
    }

    /// Queue a notification payload for the interrupt channel
    pub fn push_notification(&self, payload: [u8; NOTIFICATION_LEN]) {
        let _ = self.notif_tx.send(payload);
    }

    /// Every control request executed so far, in order
    pub fn requests(&self) -> Vec<ControlRequest> {
        self.lock().requests.clone()
    }

    /// Control requests carrying `command`, in order
    pub fn requests_for(&self, command: Command) -> Vec<ControlRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.index == command as u16)
            .collect()
    }

    /// Whether [`Transport::close`] has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    fn check_live(&self) -> std::result::Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Released);
        }
        if let Some(err) = self.lock().fail_with.clone() {
            return Err(err);
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn control_in(
        &self,
        req: &ControlRequest,
        buf: &mut [u8],
    ) -> std::result::Result<usize, TransportError> {
        self.check_live()?;
        let mut state = self.lock();
        state.requests.push(*req);

        let response = state.responses.get(&req.index).cloned().ok_or_else(|| {
            TransportError::Other {
                message: format!("unscripted command index {:#04x}", req.index),
            }
        })?;

        let len = response.len().min(buf.len());
        buf[..len].copy_from_slice(&response[..len]);
        Ok(len)
    }

    fn control_out(&self, req: &ControlRequest) -> std::result::Result<(), TransportError> {
        self.check_live()?;
        self.lock().requests.push(*req);
        Ok(())
    }

    fn read_notification(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Released);
        }

        let rx = self.notif_rx.lock().expect("mock receiver poisoned");
        match rx.recv_timeout(timeout) {
            Ok(payload) => {
                let len = payload.len().min(buf.len());
                buf[..len].copy_from_slice(&payload[..len]);
                Ok(len)
            }
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Released),
        }
    }

    fn serial_number(&self) -> Option<String> {
        self.lock().serial.clone()
    }

    fn firmware_version(&self) -> FirmwareVersion {
        self.lock().firmware
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Transport for Arc<MockTransport> {
    fn control_in(
        &self,
        req: &ControlRequest,
        buf: &mut [u8],
    ) -> std::result::Result<usize, TransportError> {
        self.as_ref().control_in(req, buf)
    }

    fn control_out(&self, req: &ControlRequest) -> std::result::Result<(), TransportError> {
        self.as_ref().control_out(req)
    }

    fn read_notification(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransportError> {
        self.as_ref().read_notification(buf, timeout)
    }

    fn serial_number(&self) -> Option<String> {
        self.as_ref().serial_number()
    }

    fn firmware_version(&self) -> FirmwareVersion {
        self.as_ref().firmware_version()
    }

    fn close(&self) {
        self.as_ref().close()
    }
}

/// A simulated device bus for registry tests
///
/// Attach and detach devices between refreshes; the registry sees the
/// present set through [`DeviceProvider::scan`]. Tests keep their own
/// `Arc<MockTransport>` to inspect traffic after handing one in.
#[derive(Default)]
pub struct MockProvider {
    present: Mutex<HashMap<DeviceIdentity, Arc<MockTransport>>>,
    fail_open: Mutex<Vec<DeviceIdentity>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a device physically present
    pub fn attach_device(&self, identity: impl Into<String>, transport: Arc<MockTransport>) {
        self.present
            .lock()
            .expect("mock provider poisoned")
            .insert(DeviceIdentity::new(identity), transport);
    }

    /// Make a device physically absent
    pub fn detach_device(&self, identity: &str) {
        self.present
            .lock()
            .expect("mock provider poisoned")
            .remove(&DeviceIdentity::new(identity));
    }

    /// Make opening a transport to `identity` fail
    pub fn fail_open(&self, identity: &str) {
        self.fail_open
            .lock()
            .expect("mock provider poisoned")
            .push(DeviceIdentity::new(identity));
    }
}

impl DeviceProvider for MockProvider {
    fn scan(&self) -> Result<Vec<DeviceIdentity>> {
        let mut identities: Vec<DeviceIdentity> = self
            .present
            .lock()
            .expect("mock provider poisoned")
            .keys()
            .cloned()
            .collect();
        identities.sort();
        Ok(identities)
    }

    fn open(&self, identity: &DeviceIdentity) -> Result<Box<dyn Transport>> {
        if self
            .fail_open
            .lock()
            .expect("mock provider poisoned")
            .contains(identity)
        {
            return Err(Error::Communication(TransportError::Access));
        }

        let transport = self
            .present
            .lock()
            .expect("mock provider poisoned")
            .get(identity)
            .cloned()
            .ok_or(Error::Communication(TransportError::NoDevice))?;

        Ok(Box::new(transport))
    }
}

impl DeviceProvider for Arc<MockProvider> {
    fn scan(&self) -> Result<Vec<DeviceIdentity>> {
        self.as_ref().scan()
    }

    fn open(&self, identity: &DeviceIdentity) -> Result<Box<dyn Transport>> {
        self.as_ref().open(identity)
    }
}
