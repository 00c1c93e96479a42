//! Device session
//!
//! One [`Session`] per physically attached filter. The session exclusively
//! owns the device's transport, caches the statics read at construction
//! (serial number, firmware version, tuning range), and exposes the typed
//! operations built on the control codec. Asynchronous completion flows
//! through the interrupt listener the session starts at construction.

use protocol::{
    Command, ControlRequest, DeviceState, FirmwareVersion, MIN_FIRMWARE_VERSION, TuningRange,
    decode_f32, decode_u8,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::DeviceIdentity;
use crate::error::{Error, Result};
use crate::events::{self, EVENT_CHANNEL_CAPACITY, InterruptEvent};
use crate::transport::Transport;
use crate::waiter::TuneWaiter;

/// A live session with one attached device
///
/// Created by the registry (or directly from a transport for tests).
/// Disposal is idempotent and also runs on drop; every operation after
/// disposal fails with [`Error::SessionDisposed`].
pub struct Session {
    identity: DeviceIdentity,
    transport: Arc<dyn Transport>,
    serial_number: Option<String>,
    firmware: FirmwareVersion,
    range: TuningRange,
    events: broadcast::Sender<InterruptEvent>,
    listener_stop: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Session {
    /// Open a session over an already-opened transport
    ///
    /// Construction reads the device statics, rejects firmware older than
    /// the supported minimum, reads and rounds the tuning range, enables
    /// the filter, autotune and overdrive, and starts the interrupt
    /// listener. The transport is released again if any step fails.
    pub fn open(identity: DeviceIdentity, transport: Box<dyn Transport>) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::from(transport);

        match Self::open_inner(identity, Arc::clone(&transport)) {
            Ok(session) => Ok(session),
            Err(e) => {
                transport.close();
                Err(e)
            }
        }
    }

    fn open_inner(identity: DeviceIdentity, transport: Arc<dyn Transport>) -> Result<Self> {
        let firmware = transport.firmware_version();
        if firmware < MIN_FIRMWARE_VERSION {
            return Err(Error::UnsupportedFirmware {
                found: firmware,
                min: MIN_FIRMWARE_VERSION,
            });
        }
        let serial_number = transport.serial_number();

        let min = read_f32(transport.as_ref(), Command::WavelengthMin)?;
        let max = read_f32(transport.as_ref(), Command::WavelengthMax)?;
        let step = read_f32(transport.as_ref(), Command::WavelengthStep)?;
        let range = TuningRange::from_readings(min, max, step);

        // Default feature set on every fresh session
        for command in [
            Command::FilterEnable,
            Command::AutotuneEnable,
            Command::OverdriveEnable,
        ] {
            transport.control_out(&ControlRequest::set_bool(command, true))?;
        }

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let listener_stop = Arc::new(AtomicBool::new(false));
        let listener = events::spawn_listener(
            identity.clone(),
            Arc::clone(&transport),
            events_tx.clone(),
            Arc::clone(&listener_stop),
        );

        info!(
            device = %identity,
            %firmware,
            serial = serial_number.as_deref().unwrap_or("<none>"),
            min = range.min,
            max = range.max,
            step = range.step,
            "session opened"
        );

        Ok(Self {
            identity,
            transport,
            serial_number,
            firmware,
            range,
            events: events_tx,
            listener_stop,
            listener: Mutex::new(Some(listener)),
            disposed: AtomicBool::new(false),
        })
    }

    /// Identity of the underlying device
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Serial number read at construction
    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    /// Firmware version read at construction
    pub fn firmware_version(&self) -> FirmwareVersion {
        self.firmware
    }

    /// Tuning range read at construction
    pub fn tuning_range(&self) -> TuningRange {
        self.range
    }

    /// Subscribe to this session's interrupt events
    ///
    /// Delivery preserves the device's notification order. Only events
    /// emitted after subscribing are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<InterruptEvent> {
        self.events.subscribe()
    }

    /// Read the internal temperature
    pub fn temperature(&self) -> Result<f32> {
        self.ensure_live()?;
        read_f32(self.transport.as_ref(), Command::GetTemperature)
    }

    /// Read the current operating state
    ///
    /// Always a fresh query; the state is never cached. A state byte
    /// outside the contract reads as [`DeviceState::None`].
    pub fn state(&self) -> Result<DeviceState> {
        self.ensure_live()?;
        let raw = read_u8(self.transport.as_ref(), Command::GetLctfState)?;
        Ok(DeviceState::from_raw(raw).unwrap_or_else(|| {
            warn!(device = %self.identity, raw, "unknown state byte from device");
            DeviceState::None
        }))
    }

    /// Tune to `target` without waiting for completion
    ///
    /// Returns as soon as the transport accepts the command; the device
    /// reports actual completion later via a TuningDone interrupt. Targets
    /// outside the tuning range are rejected before any transfer.
    pub fn set_wavelength(&self, target: u32) -> Result<()> {
        self.ensure_live()?;
        if !self.range.contains(target) {
            return Err(Error::OutOfRange {
                target,
                min: self.range.min,
                max: self.range.max,
            });
        }
        debug!(device = %self.identity, target, "set wavelength");
        self.transport
            .control_out(&ControlRequest::set_f32(Command::SetWavelength, target as f32))?;
        Ok(())
    }

    /// Tune to `target` and wait for the completion interrupt
    ///
    /// The waiter is registered before the command is issued, so a
    /// completion that arrives immediately cannot be missed. Returns the
    /// confirmed wavelength.
    ///
    /// Device notifications carry no correlation identifier: if two tunes
    /// are in flight on one session, which interrupt resolves which caller
    /// is non-deterministic. Callers are expected to keep at most one tune
    /// pending per session.
    pub async fn set_wavelength_and_wait(&self, target: u32, timeout: Duration) -> Result<u32> {
        let waiter = self.tune_waiter(timeout)?;
        self.set_wavelength(target)?;
        waiter.wait().await
    }

    /// Wait for a tune completion without issuing a command
    ///
    /// Useful when the triggering command was issued by other means.
    pub async fn wait_for_tune(&self, timeout: Duration) -> Result<u32> {
        self.tune_waiter(timeout)?.wait().await
    }

    /// Register a pending tune operation
    ///
    /// The returned waiter already subscribes to the interrupt stream;
    /// issue the triggering command after obtaining it.
    pub fn tune_waiter(&self, timeout: Duration) -> Result<TuneWaiter> {
        self.ensure_live()?;
        Ok(TuneWaiter::new(self.events.subscribe(), timeout))
    }

    /// Start a calibration cycle
    ///
    /// Completion is reported via a CalibrationDone interrupt, observable
    /// through [`subscribe`](Self::subscribe).
    pub fn calibrate(&self) -> Result<()> {
        self.set_flag(Command::Calibrate, true)
    }

    /// Enable or disable the optical filter stage
    pub fn set_filter_enabled(&self, enabled: bool) -> Result<()> {
        self.set_flag(Command::FilterEnable, enabled)
    }

    /// Enable or disable automatic retuning
    pub fn set_autotune_enabled(&self, enabled: bool) -> Result<()> {
        self.set_flag(Command::AutotuneEnable, enabled)
    }

    /// Enable or disable overdrive switching
    pub fn set_overdrive_enabled(&self, enabled: bool) -> Result<()> {
        self.set_flag(Command::OverdriveEnable, enabled)
    }

    fn set_flag(&self, command: Command, enabled: bool) -> Result<()> {
        self.ensure_live()?;
        debug!(device = %self.identity, ?command, enabled, "set flag");
        self.transport
            .control_out(&ControlRequest::set_bool(command, enabled))?;
        Ok(())
    }

    /// Whether this session has been disposed
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Release the device
    ///
    /// Stops the interrupt listener and releases the transport. Idempotent;
    /// an in-flight transfer racing disposal fails with a communication
    /// error rather than anything undefined.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.listener_stop.store(true, Ordering::Release);
        self.transport.close();

        if let Ok(mut listener) = self.listener.lock()
            && let Some(handle) = listener.take()
        {
            // The listener wakes within its poll timeout once the
            // transport reads as released.
            let _ = handle.join();
        }

        info!(device = %self.identity, "session disposed");
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::SessionDisposed);
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("firmware", &self.firmware)
            .field("range", &self.range)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn read_u8(transport: &dyn Transport, command: Command) -> Result<u8> {
    let mut buf = [0u8; 1];
    let len = transport.control_in(&ControlRequest::get(command, 0), &mut buf)?;
    Ok(decode_u8(&buf[..len])?)
}

fn read_f32(transport: &dyn Transport, command: Command) -> Result<f32> {
    let mut buf = [0u8; 4];
    let len = transport.control_in(&ControlRequest::get(command, 0), &mut buf)?;
    Ok(decode_f32(&buf[..len])?)
}
