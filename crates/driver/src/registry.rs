//! Device registry and hotplug lifecycle
//!
//! The registry keeps the set of live sessions in step with the set of
//! physically present devices. A refresh diffs the provider's scan against
//! the tracked sessions: new identities get a transport opened and a
//! session constructed, vanished identities get their session disposed.
//! Refreshes run on hotplug nudges and on a periodic poll fallback, always
//! serialized against each other.
//!
//! The registry is an explicit instance owned by the composition root, not
//! a process-wide singleton; tests drive it with a simulated provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::DeviceIdentity;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::transport::Transport;

/// Capacity of the attach/detach event channel
const REGISTRY_CHANNEL_CAPACITY: usize = 16;

/// Enumerates matching devices and opens their transports
///
/// The rusb implementation filters by the filter's fixed vendor/product
/// signature; [`crate::testing::MockProvider`] simulates attach/detach.
pub trait DeviceProvider: Send + Sync + 'static {
    /// Identities of all matching, physically present devices
    fn scan(&self) -> Result<Vec<DeviceIdentity>>;

    /// Open a transport to one scanned device
    fn open(&self, identity: &DeviceIdentity) -> Result<Box<dyn Transport>>;
}

/// Hotplug lifecycle notifications republished by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A matching device appeared and its session was constructed
    Attached(DeviceIdentity),
    /// A tracked device vanished and its session was disposed
    Detached(DeviceIdentity),
}

/// A device that was present but could not be attached
///
/// Returned from [`Registry::refresh`] so construction failures (transport
/// open, unsupported firmware) reach the caller instead of vanishing. The
/// device is not tracked and no Attached event is published.
#[derive(Debug, Clone)]
pub struct AttachFailure {
    /// The device that failed
    pub identity: DeviceIdentity,
    /// Why construction failed
    pub error: Error,
}

/// Tracks live sessions for all matching attached devices
pub struct Registry<P: DeviceProvider> {
    provider: P,
    sessions: Mutex<HashMap<DeviceIdentity, Arc<Session>>>,
    /// Serializes refreshes; the session map is only mutated under this
    refresh_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<RegistryEvent>,
    nudge_tx: async_channel::Sender<()>,
    nudge_rx: async_channel::Receiver<()>,
    stopped: AtomicBool,
}

impl<P: DeviceProvider> Registry<P> {
    /// Create a registry over a provider
    ///
    /// No devices are tracked until the first [`refresh`](Self::refresh)
    /// (or the background loop started by [`start`](Self::start)).
    pub fn new(provider: P) -> Self {
        let (events, _) = broadcast::channel(REGISTRY_CHANNEL_CAPACITY);
        // Shallow queue: multiple pending nudges collapse into one refresh
        let (nudge_tx, nudge_rx) = async_channel::bounded(4);

        Self {
            provider,
            sessions: Mutex::new(HashMap::new()),
            refresh_lock: tokio::sync::Mutex::new(()),
            events,
            nudge_tx,
            nudge_rx,
            stopped: AtomicBool::new(false),
        }
    }

    /// Subscribe to attach/detach events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Sender that triggers a refresh when the host reports hotplug activity
    ///
    /// Hand this to the platform hotplug pump; `try_send` semantics are
    /// fine since pending nudges coalesce.
    pub fn notifier(&self) -> async_channel::Sender<()> {
        self.nudge_tx.clone()
    }

    /// All currently tracked sessions
    pub fn get_all(&self) -> Vec<Arc<Session>> {
        match self.sessions.lock() {
            Ok(sessions) => sessions.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Any one tracked session, if a device is attached
    pub fn get_first(&self) -> Option<Arc<Session>> {
        match self.sessions.lock() {
            Ok(sessions) => sessions.values().next().cloned(),
            Err(_) => None,
        }
    }

    /// Session for a specific device, if tracked
    pub fn get(&self, identity: &DeviceIdentity) -> Option<Arc<Session>> {
        match self.sessions.lock() {
            Ok(sessions) => sessions.get(identity).cloned(),
            Err(_) => None,
        }
    }

    /// Recompute the tracked set against the physically present set
    ///
    /// Scan failure is the hard error. Per-device construction failures
    /// are collected into the returned list; healthy devices still attach.
    pub async fn refresh(&self) -> Result<Vec<AttachFailure>> {
        let _serialized = self.refresh_lock.lock().await;

        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::SessionDisposed);
        }

        let present = self.provider.scan()?;
        debug!(present = present.len(), "registry refresh");

        // Devices that went away: dispose and unpublish
        let gone: Vec<(DeviceIdentity, Arc<Session>)> = {
            let Ok(mut sessions) = self.sessions.lock() else {
                return Err(Error::Provider("session map poisoned".into()));
            };
            let keys: Vec<DeviceIdentity> = sessions
                .keys()
                .filter(|k| !present.contains(k))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| sessions.remove(&k).map(|s| (k, s)))
                .collect()
        };
        for (identity, session) in gone {
            info!(device = %identity, "device detached");
            session.dispose();
            let _ = self.events.send(RegistryEvent::Detached(identity));
        }

        // Newly present devices: open, construct, publish
        let mut failures = Vec::new();
        for identity in present {
            if self.get(&identity).is_some() {
                continue;
            }

            let attached = self
                .provider
                .open(&identity)
                .and_then(|transport| Session::open(identity.clone(), transport));

            match attached {
                Ok(session) => {
                    info!(device = %identity, "device attached");
                    if let Ok(mut sessions) = self.sessions.lock() {
                        sessions.insert(identity.clone(), Arc::new(session));
                    }
                    let _ = self.events.send(RegistryEvent::Attached(identity));
                }
                Err(error) => {
                    warn!(device = %identity, %error, "device failed to attach");
                    failures.push(AttachFailure { identity, error });
                }
            }
        }

        Ok(failures)
    }

    /// Run the hotplug loop until disposal
    ///
    /// Refreshes whenever the notifier fires and on every `poll_interval`
    /// tick as a fallback for hosts without hotplug callbacks. Attach
    /// failures inside the loop are logged; callers needing them directly
    /// should call [`refresh`](Self::refresh) themselves.
    pub fn start(self: &Arc<Self>, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(poll_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    nudge = registry.nudge_rx.recv() => {
                        if nudge.is_err() {
                            break;
                        }
                    }
                }

                if registry.stopped.load(Ordering::Acquire) {
                    break;
                }

                match registry.refresh().await {
                    Ok(failures) => {
                        for failure in failures {
                            warn!(
                                device = %failure.identity,
                                error = %failure.error,
                                "device failed to attach"
                            );
                        }
                    }
                    Err(Error::SessionDisposed) => break,
                    Err(e) => warn!(error = %e, "registry refresh failed"),
                }
            }

            debug!("registry hotplug loop stopped");
        })
    }

    /// Stop the hotplug loop and dispose every tracked session
    ///
    /// Idempotent. Sessions handed out earlier become disposed; their
    /// pending operations fail accordingly.
    pub fn dispose(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        // Wakes and terminates the start() loop
        self.nudge_rx.close();

        let drained: Vec<(DeviceIdentity, Arc<Session>)> = match self.sessions.lock() {
            Ok(mut sessions) => sessions.drain().collect(),
            Err(_) => Vec::new(),
        };
        for (identity, session) in drained {
            session.dispose();
            let _ = self.events.send(RegistryEvent::Detached(identity));
        }

        info!("registry disposed");
    }
}

impl<P: DeviceProvider> Drop for Registry<P> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockProvider, MockTransport};

    #[tokio::test]
    async fn test_refresh_on_empty_bus() {
        let registry = Registry::new(MockProvider::new());
        let failures = registry.refresh().await.unwrap();
        assert!(failures.is_empty());
        assert!(registry.get_all().is_empty());
        assert!(registry.get_first().is_none());
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let provider = MockProvider::new();
        provider.attach_device("usb:001:002", Arc::new(MockTransport::new()));

        let registry = Registry::new(provider);
        registry.refresh().await.unwrap();
        assert_eq!(registry.get_all().len(), 1);

        let session = registry.get_first().unwrap();
        registry.dispose();
        registry.dispose();

        assert!(registry.get_all().is_empty());
        assert!(session.is_disposed());
    }
}
