//! Device discovery

use dashcast_core::config::StaticDevice;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A receiver found on the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAnnouncement {
    pub host: String,
    pub friendly_name: String,
}

impl DeviceAnnouncement {
    #[must_use]
    pub fn new(host: impl Into<String>, friendly_name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            friendly_name: friendly_name.into(),
        }
    }
}

impl From<&StaticDevice> for DeviceAnnouncement {
    fn from(device: &StaticDevice) -> Self {
        Self::new(device.host.clone(), device.name.clone())
    }
}

/// Sending half for announcements, handed to discovery backends
#[derive(Debug, Clone)]
pub struct Announcer {
    tx: mpsc::UnboundedSender<DeviceAnnouncement>,
}

impl Announcer {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<DeviceAnnouncement>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the registry has shut down
    pub fn announce(&self, announcement: DeviceAnnouncement) -> bool {
        self.tx.send(announcement).is_ok()
    }
}

pub trait Discovery: Send + Sync {
    /// Start (or restart) a lookup, announcing every device found
    fn lookup(&self, announcer: &Announcer);

    /// Release whatever the lookups hold once the registry stops
    fn stop(&self) {}
}

/// Announces the devices listed in configuration
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    devices: Vec<DeviceAnnouncement>,
}

impl StaticDiscovery {
    #[must_use]
    pub fn new(devices: &[StaticDevice]) -> Self {
        Self {
            devices: devices.iter().map(DeviceAnnouncement::from).collect(),
        }
    }
}

impl Discovery for StaticDiscovery {
    fn lookup(&self, announcer: &Announcer) {
        tracing::debug!(devices = self.devices.len(), "Announcing configured devices");
        for device in &self.devices {
            if !announcer.announce(device.clone()) {
                break;
            }
        }
    }
}
