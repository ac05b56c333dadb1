//! Local IPv4 interface enumeration.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

use tracing::debug;

use crate::infrastructure::network::discovery::DiscoveryError;

/// One usable interface: a name and its IPv4 address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInterface {
    pub name: String,
    pub address: Ipv4Addr,
}

/// Lists every interface discovery can bind to.
///
/// # Errors
///
/// Returns [`DiscoveryError::Interfaces`] when the OS interface table cannot
/// be read.
pub fn enumerate_interfaces() -> Result<Vec<LocalInterface>, DiscoveryError> {
    let raw = local_ip_address::list_afinet_netifas()
        .map_err(|e| DiscoveryError::Interfaces(e.to_string()))?;
    let usable = usable_interfaces(raw);
    debug!("usable interfaces: {usable:?}");
    Ok(usable)
}

/// Filters a raw `(name, address)` table down to usable IPv4 interfaces.
///
/// Loopback, unspecified, and IPv6 addresses are skipped. An interface
/// listed with several IPv4 addresses keeps only the first.
pub fn usable_interfaces(raw: Vec<(String, IpAddr)>) -> Vec<LocalInterface> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter_map(|(name, ip)| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some((name, v4)),
            _ => None,
        })
        .filter(|(name, _)| seen.insert(name.clone()))
        .map(|(name, address)| LocalInterface { name, address })
        .collect()
}
