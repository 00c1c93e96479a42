//! Interrupt dispatch
//!
//! Each session runs one listener thread that drains the device's
//! notification endpoint, decodes the fixed-layout payloads, and fans the
//! typed events out on a broadcast channel. Subscribers (tune waiters, any
//! application observer) consume on their own contexts, so handler logic
//! never blocks the read loop, and events from one device keep arrival
//! order.

use protocol::{DeviceState, InterruptKind, decode_notification};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::DeviceIdentity;
use crate::transport::{Transport, TransportError};

/// Broadcast channel depth for interrupt events
///
/// The device emits at most a handful of notifications per tune; a slow
/// subscriber that still lags simply resumes past the gap.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Poll timeout for the notification endpoint
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// A decoded, typed interrupt notification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterruptEvent {
    /// What the device is reporting
    pub kind: InterruptKind,
    /// Operating state at emission time
    pub state: Option<DeviceState>,
    /// Associated wavelength; meaningful for TuningDone, StateChanged,
    /// Busy and Error
    pub wavelength: u32,
}

/// Spawn the notification listener thread for one session
///
/// The thread runs until `stop` is set, the transport is released, or the
/// device disconnects. Bus errors unrelated to a specific operation are
/// logged and the loop keeps going; they are never surfaced as call
/// failures.
pub(crate) fn spawn_listener(
    identity: DeviceIdentity,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<InterruptEvent>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("lctf-notify-{}", identity))
        .spawn(move || listen_loop(&identity, transport.as_ref(), &events, &stop))
        .expect("failed to spawn notification listener thread")
}

fn listen_loop(
    identity: &DeviceIdentity,
    transport: &dyn Transport,
    events: &broadcast::Sender<InterruptEvent>,
    stop: &AtomicBool,
) {
    debug!(device = %identity, "notification listener started");
    let mut buf = [0u8; 64];

    while !stop.load(Ordering::Acquire) {
        let len = match transport.read_notification(&mut buf, READ_TIMEOUT) {
            Ok(len) => len,
            Err(TransportError::Timeout) => continue,
            Err(TransportError::Released) | Err(TransportError::NoDevice) => {
                debug!(device = %identity, "notification channel gone, listener stopping");
                break;
            }
            Err(e) => {
                // Transient bus fault: diagnostic only, keep listening
                warn!(device = %identity, error = %e, "notification read failed");
                continue;
            }
        };

        let notification = match decode_notification(&buf[..len]) {
            Ok(n) => n,
            Err(e) => {
                warn!(device = %identity, error = %e, "malformed notification payload");
                continue;
            }
        };

        let Some(kind) = notification.interrupt_kind() else {
            trace!(
                device = %identity,
                raw_kind = notification.kind,
                "ignoring unknown interrupt kind"
            );
            continue;
        };

        let event = InterruptEvent {
            kind,
            state: notification.device_state(),
            wavelength: notification.wavelength,
        };
        trace!(device = %identity, ?event, "dispatching interrupt");

        // No subscribers is fine; events are only meaningful to whoever
        // is currently waiting.
        let _ = events.send(event);
    }

    debug!(device = %identity, "notification listener stopped");
}
