use local_ip_address::{list_afinet_netifas, local_ip};
use std::net::{IpAddr, Ipv4Addr};
use tracing::warn;

/// Every non-loopback IPv4 address of this host, in interface order
#[must_use]
pub fn ipv4_addresses() -> Vec<Ipv4Addr> {
    match list_afinet_netifas() {
        Ok(interfaces) => routable_ipv4(interfaces.into_iter().map(|(_, ip)| ip)),
        Err(e) => {
            warn!(error = %e, "Listing network interfaces failed");
            Vec::new()
        }
    }
}

/// Address of the default-route interface, else the first usable one
#[must_use]
pub fn local_ipv4() -> Option<Ipv4Addr> {
    local_ip()
        .ok()
        .and_then(|ip| routable_ipv4([ip]).into_iter().next())
        .or_else(|| ipv4_addresses().into_iter().next())
}

fn routable_ipv4(addresses: impl IntoIterator<Item = IpAddr>) -> Vec<Ipv4Addr> {
    let mut found = Vec::new();
    for address in addresses {
        if let IpAddr::V4(ip) = address {
            if !ip.is_loopback() && !ip.is_unspecified() && !found.contains(&ip) {
                found.push(ip);
            }
        }
    }
    found
}
