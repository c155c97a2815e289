//! Device registry
//!
//! Owns the table of supervised devices keyed by host. Discovery announces
//! devices; the registry starts one supervisor per new host and decides what
//! happens when supervision ends:
//! - setup failure: the device is dropped and announced again after the
//!   rediscovery delay;
//! - lost connection: the device is dropped and a fresh lookup starts.

use dashcast_core::config::CastConfig;
use dashcast_core::{SubscriptionId, Subscribers};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::device::{DeviceEvent, DeviceRecord};
use crate::discovery::{Announcer, DeviceAnnouncement, Discovery};
use crate::sdk::{CastConnector, MediaDescriptor};
use crate::supervisor::{DeviceHandle, DeviceSupervisor, SupervisionEnd, SupervisorSettings};

pub struct DeviceRegistry {
    devices: DashMap<String, DeviceHandle>,
    cast: CastConfig,
    settings: SupervisorSettings,
    signal_host: String,
    connector: Arc<dyn CastConnector>,
    discovery: Arc<dyn Discovery>,
    events: Arc<Subscribers<DeviceEvent>>,
    announcer: Announcer,
    announcements: Mutex<Option<mpsc::UnboundedReceiver<DeviceAnnouncement>>>,
    cancel: CancellationToken,
}

impl DeviceRegistry {
    /// Create a stopped registry. Call [`DeviceRegistry::start`] to begin discovery.
    pub fn new(
        cast: CastConfig,
        signal_host: impl Into<String>,
        connector: Arc<dyn CastConnector>,
        discovery: Arc<dyn Discovery>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (announcer, announcements) = Announcer::channel();
        Arc::new(Self {
            devices: DashMap::new(),
            settings: SupervisorSettings::from_config(&cast),
            cast,
            signal_host: signal_host.into(),
            connector,
            discovery,
            events: Arc::new(Subscribers::new()),
            announcer,
            announcements: Mutex::new(Some(announcements)),
            cancel,
        })
    }

    /// Spawn the announcement loop and run the first lookup. Later calls are no-ops.
    pub fn start(self: &Arc<Self>) {
        let Some(announcements) = self.announcements.lock().take() else {
            return;
        };

        tokio::spawn(Arc::clone(self).run(announcements));
        self.discovery.lookup(&self.announcer);
    }

    /// Feed an announcement as if discovery had produced it
    pub fn announce(&self, announcement: DeviceAnnouncement) -> bool {
        self.announcer.announce(announcement)
    }

    pub fn on_event<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(observer)
    }

    pub fn remove_event_observer(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Resume a paused device. Returns false for unknown or running devices.
    pub fn reset(&self, host: &str) -> bool {
        self.devices.get(host).is_some_and(|handle| handle.reset())
    }

    #[must_use]
    pub fn device(&self, host: &str) -> Option<DeviceRecord> {
        self.devices.get(host).map(|handle| handle.snapshot())
    }

    #[must_use]
    pub fn devices(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<DeviceRecord> = self.devices.iter().map(|entry| entry.value().snapshot()).collect();
        devices.sort_by(|a, b| a.host.cmp(&b.host));
        devices
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    async fn run(self: Arc<Self>, mut announcements: mpsc::UnboundedReceiver<DeviceAnnouncement>) {
        info!("Device registry started");
        loop {
            let announcement = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                announcement = announcements.recv() => announcement,
            };
            let Some(announcement) = announcement else {
                break;
            };
            self.register(announcement);
        }

        for entry in &self.devices {
            entry.value().cancel();
        }
        self.discovery.stop();
        info!("Device registry stopped");
    }

    fn register(self: &Arc<Self>, announcement: DeviceAnnouncement) {
        let room = self.cast.room_for(&announcement.friendly_name);
        let supervisor = match self.devices.entry(announcement.host.clone()) {
            Entry::Occupied(_) => {
                debug!(host = %announcement.host, "Device already supervised, ignoring announcement");
                return;
            }
            Entry::Vacant(vacant) => {
                let supervisor = DeviceSupervisor::new(
                    DeviceRecord::new(&announcement.host, &announcement.friendly_name, &room),
                    MediaDescriptor::new(&room, &self.signal_host),
                    self.settings.clone(),
                    Arc::clone(&self.connector),
                    Arc::clone(&self.events),
                    self.cancel.child_token(),
                );
                vacant.insert(supervisor.handle());
                supervisor
            }
        };

        if room.is_empty() {
            warn!(host = %announcement.host, device = %announcement.friendly_name, "No screen assigned to device");
        }
        info!(
            host = %announcement.host,
            device = %announcement.friendly_name,
            room = %room,
            "New device found"
        );

        let handle = supervisor.handle();
        let registry = Arc::clone(self);
        let span = tracing::info_span!("device", host = %announcement.host, device = %announcement.friendly_name);
        tokio::spawn(
            async move {
                let end = supervisor.run().await;
                registry.supervision_ended(announcement, &handle, end);
            }
            .instrument(span),
        );
    }

    fn supervision_ended(self: &Arc<Self>, announcement: DeviceAnnouncement, handle: &DeviceHandle, end: SupervisionEnd) {
        self.devices
            .remove_if(&announcement.host, |_, current| current.same_device(handle));

        match end {
            SupervisionEnd::SetupFailed(error) => {
                let delay = self.cast.rediscovery_delay();
                warn!(
                    host = %announcement.host,
                    error = %error,
                    delay_secs = delay.as_secs(),
                    "Device setup failed, announcing it again later"
                );

                let registry = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        () = registry.cancel.cancelled() => {}
                        () = tokio::time::sleep(delay) => {
                            registry.announcer.announce(announcement);
                        }
                    }
                });
            }
            SupervisionEnd::Lost(error) => {
                warn!(host = %announcement.host, error = %error, "Device lost, restarting lookup");
                self.discovery.lookup(&self.announcer);
            }
            SupervisionEnd::Cancelled => {
                debug!(host = %announcement.host, "Device supervision cancelled");
            }
        }
    }
}
