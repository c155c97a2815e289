//! mDNS discovery
//!
//! Browses `_googlecast._tcp` and announces every receiver that resolves
//! to an IPv4 address, named after its `fn` TXT record. A new lookup
//! restarts the browse so receivers that already answered are resolved
//! again. Configured devices are announced alongside.

use mdns_sd::{IfKind, ServiceDaemon, ServiceEvent, ServiceInfo};
use parking_lot::Mutex;
use std::net::IpAddr;
use tracing::{debug, info, warn};

use crate::discovery::{Announcer, DeviceAnnouncement, Discovery, StaticDiscovery};

pub const CAST_SERVICE: &str = "_googlecast._tcp.local.";

pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
    fallback: StaticDiscovery,
    browsing: Mutex<bool>,
}

impl MdnsDiscovery {
    /// Start the mDNS daemon, restricted to `interface` when given
    pub fn new(interface: Option<&str>, fallback: StaticDiscovery) -> Result<Self, mdns_sd::Error> {
        let daemon = ServiceDaemon::new()?;
        if let Some(interface) = interface {
            daemon.disable_interface(IfKind::All)?;
            daemon.enable_interface(IfKind::Name(interface.to_string()))?;
        }
        Ok(Self {
            daemon,
            fallback,
            browsing: Mutex::new(false),
        })
    }
}

impl Discovery for MdnsDiscovery {
    fn lookup(&self, announcer: &Announcer) {
        self.fallback.lookup(announcer);

        let mut browsing = self.browsing.lock();
        if *browsing {
            if let Err(e) = self.daemon.stop_browse(CAST_SERVICE) {
                debug!(error = %e, "Stopping previous browse failed");
            }
        }

        match self.daemon.browse(CAST_SERVICE) {
            Ok(events) => {
                *browsing = true;
                info!(service = CAST_SERVICE, "Looking up cast devices");
                let announcer = announcer.clone();
                tokio::task::spawn_blocking(move || {
                    let announced = forward_resolved(events.iter(), &announcer);
                    debug!(announced, "Browse ended");
                });
            }
            Err(e) => {
                *browsing = false;
                warn!(error = %e, "Starting mDNS browse failed");
            }
        }
    }

    fn stop(&self) {
        if let Err(e) = self.daemon.shutdown() {
            debug!(error = %e, "Shutting down mDNS daemon failed");
        }
    }
}

/// Announce resolved receivers until the browse stops or the registry is gone
fn forward_resolved(events: impl IntoIterator<Item = ServiceEvent>, announcer: &Announcer) -> usize {
    let mut announced = 0;
    for event in events {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                let Some(announcement) = announcement_for(&info) else {
                    debug!(service = info.get_fullname(), "Receiver has no IPv4 address, skipping");
                    continue;
                };
                if !announcer.announce(announcement) {
                    break;
                }
                announced += 1;
            }
            ServiceEvent::SearchStopped(_) => break,
            _ => {}
        }
    }
    announced
}

fn announcement_for(info: &ServiceInfo) -> Option<DeviceAnnouncement> {
    let host = info
        .get_addresses()
        .iter()
        .filter_map(|address| match address {
            IpAddr::V4(ip) if !ip.is_loopback() => Some(*ip),
            _ => None,
        })
        .min()?;

    let friendly_name = info
        .get_property_val_str("fn")
        .map(str::to_string)
        .unwrap_or_else(|| instance_name(info.get_fullname()).to_string());

    Some(DeviceAnnouncement::new(host.to_string(), friendly_name))
}

/// `Chromecast-abc._googlecast._tcp.local.` -> `Chromecast-abc`
fn instance_name(fullname: &str) -> &str {
    fullname
        .strip_suffix(CAST_SERVICE)
        .map_or(fullname, |name| name.trim_end_matches('.'))
}
