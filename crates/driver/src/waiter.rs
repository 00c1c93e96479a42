//! Tune-completion waiting
//!
//! A [`TuneWaiter`] is the pending side of one "wait for tuning done"
//! operation. It holds a broadcast subscription taken before the triggering
//! command was issued, so a completion interrupt that arrives immediately
//! after the command cannot be missed. Whichever of TuningDone, Busy, Error
//! or the timeout fires first resolves the wait; resolution is terminal and
//! drops the subscription, so no handler leaks onto later notifications.

use protocol::InterruptKind;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::{Error, Result};
use crate::events::InterruptEvent;

/// Default completion window for `set_wavelength_and_wait`
pub const DEFAULT_TUNE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default completion window for a stand-alone `wait_for_tune`
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// A registered pending tune operation
///
/// Obtained from [`crate::Session::tune_waiter`] or implicitly inside
/// [`crate::Session::set_wavelength_and_wait`]. Dropping it without calling
/// [`wait`](Self::wait) abandons the operation; there is no separate cancel
/// API.
#[derive(Debug)]
pub struct TuneWaiter {
    rx: broadcast::Receiver<InterruptEvent>,
    timeout: Duration,
}

impl TuneWaiter {
    pub(crate) fn new(rx: broadcast::Receiver<InterruptEvent>, timeout: Duration) -> Self {
        Self { rx, timeout }
    }

    /// Suspend until the pending tune resolves
    ///
    /// Returns the confirmed wavelength on TuningDone. Busy resolves to
    /// [`Error::DeviceBusy`], Error to [`Error::DeviceError`], an elapsed
    /// window to [`Error::Timeout`]. CalibrationDone and StateChanged
    /// notifications do not resolve the wait.
    ///
    /// Consuming `self` makes resolution terminal: the event subscription
    /// is torn down on return no matter which trigger won.
    pub async fn wait(mut self) -> Result<u32> {
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            let event = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(Error::Timeout {
                        elapsed: self.timeout,
                    });
                }
                recv = self.rx.recv() => match recv {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        trace!(missed, "tune waiter lagged, resuming");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::SessionDisposed);
                    }
                },
            };

            match event.kind {
                InterruptKind::TuningDone => return Ok(event.wavelength),
                InterruptKind::Busy => return Err(Error::DeviceBusy { state: event.state }),
                InterruptKind::Error => return Err(Error::DeviceError { state: event.state }),
                InterruptKind::CalibrationDone | InterruptKind::StateChanged => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EVENT_CHANNEL_CAPACITY;
    use protocol::DeviceState;

    fn event(kind: InterruptKind, wavelength: u32) -> InterruptEvent {
        InterruptEvent {
            kind,
            state: Some(DeviceState::Ready),
            wavelength,
        }
    }

    #[tokio::test]
    async fn test_tuning_done_resolves_with_wavelength() {
        let (tx, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let waiter = TuneWaiter::new(rx, Duration::from_secs(1));

        tx.send(event(InterruptKind::TuningDone, 532)).unwrap();
        assert_eq!(waiter.wait().await.unwrap(), 532);
    }

    #[tokio::test]
    async fn test_busy_resolves_to_device_busy() {
        let (tx, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let waiter = TuneWaiter::new(rx, Duration::from_secs(1));

        tx.send(InterruptEvent {
            kind: InterruptKind::Busy,
            state: Some(DeviceState::Busy),
            wavelength: 532,
        })
        .unwrap();

        assert!(matches!(
            waiter.wait().await,
            Err(Error::DeviceBusy {
                state: Some(DeviceState::Busy)
            })
        ));
    }

    #[tokio::test]
    async fn test_error_resolves_to_device_error() {
        let (tx, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let waiter = TuneWaiter::new(rx, Duration::from_secs(1));

        tx.send(event(InterruptKind::Error, 0)).unwrap();
        assert!(matches!(waiter.wait().await, Err(Error::DeviceError { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_no_interrupt_arrives() {
        let (_tx, rx) = broadcast::channel::<InterruptEvent>(EVENT_CHANNEL_CAPACITY);
        let waiter = TuneWaiter::new(rx, Duration::from_millis(250));

        let result = waiter.wait().await;
        assert!(matches!(
            result,
            Err(Error::Timeout { elapsed }) if elapsed == Duration::from_millis(250)
        ));
    }

    #[tokio::test]
    async fn test_non_resolving_kinds_are_skipped() {
        let (tx, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let waiter = TuneWaiter::new(rx, Duration::from_secs(1));

        tx.send(event(InterruptKind::StateChanged, 100)).unwrap();
        tx.send(event(InterruptKind::CalibrationDone, 0)).unwrap();
        tx.send(event(InterruptKind::TuningDone, 650)).unwrap();

        assert_eq!(waiter.wait().await.unwrap(), 650);
    }

    #[tokio::test]
    async fn test_first_event_wins() {
        let (tx, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let waiter = TuneWaiter::new(rx, Duration::from_secs(1));

        // Both queued before the waiter polls; arrival order decides
        tx.send(event(InterruptKind::TuningDone, 532)).unwrap();
        tx.send(event(InterruptKind::Busy, 532)).unwrap();

        assert_eq!(waiter.wait().await.unwrap(), 532);
    }

    #[tokio::test]
    async fn test_closed_channel_fails_as_disposed() {
        let (tx, rx) = broadcast::channel::<InterruptEvent>(EVENT_CHANNEL_CAPACITY);
        let waiter = TuneWaiter::new(rx, Duration::from_secs(1));

        drop(tx);
        assert!(matches!(waiter.wait().await, Err(Error::SessionDisposed)));
    }
}
