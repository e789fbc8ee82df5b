//! Interface index → identity/address mapping.
//!
//! Only link and address notifications mutate the registry. The route
//! controller reads it to resolve a route's output interface, never the
//! reverse.

use std::{collections::HashMap, fmt, net::Ipv4Addr};

use ip_network::{IpNetworkError, Ipv4Network};
use tracing::{debug, info};

use crate::error::SyncError;

/// An IPv4 address assigned to an interface, together with its containing network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IfaceAddr {
    ip: Ipv4Addr,
    network: Ipv4Network,
}

impl IfaceAddr {
    pub fn new(ip: Ipv4Addr, prefix_len: u8) -> Result<Self, IpNetworkError> {
        let network = Ipv4Network::new_truncate(ip, prefix_len)?;
        Ok(Self { ip, network })
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn prefix_len(&self) -> u8 {
        self.network.netmask()
    }

    /// The network this address belongs to, e.g. `10.0.0.0/24` for `10.0.0.5/24`.
    pub fn network(&self) -> Ipv4Network {
        self.network
    }
}

impl fmt::Display for IfaceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len())
    }
}

/// A network interface as last reported by the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Link {
    name: Option<String>,
    /// Insertion ordered, no duplicates.
    addrs: Vec<IfaceAddr>,
}

impl Link {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn addrs(&self) -> &[IfaceAddr] {
        &self.addrs
    }

    /// The address used as routing source: the earliest one still assigned.
    ///
    /// Interfaces with several addresses are routed as if only this one
    /// existed.
    pub fn first_addr(&self) -> Option<&IfaceAddr> {
        self.addrs.first()
    }

    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

/// Registry of known interfaces keyed by kernel interface index.
///
/// An entry exists exactly as long as the kernel reports the link. Single
/// writer: the engine owns the registry and lends it to the controller.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    links: HashMap<u32, Link>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the link if absent, otherwise update its name. Never touches
    /// the address set, and a missing name leaves the known one in place.
    pub fn upsert(&mut self, index: u32, name: Option<String>) {
        let link = self.links.entry(index).or_default();
        if let Some(name) = name {
            link.name = Some(name);
        }

        info!(
            event.name = "link_registry.link_added",
            network.interface.index = index,
            network.interface.name = %link.display_name(),
            "adding link"
        );
    }

    /// Drop the link and its address set.
    pub fn remove(&mut self, index: u32) -> Result<Link, SyncError> {
        let link = self
            .links
            .remove(&index)
            .ok_or(SyncError::UnknownInterface { index })?;

        info!(
            event.name = "link_registry.link_removed",
            network.interface.index = index,
            network.interface.name = %link.display_name(),
            "dropping link"
        );

        Ok(link)
    }

    pub fn add_address(&mut self, index: u32, addr: IfaceAddr) -> Result<(), SyncError> {
        let link = self.lookup_mut(index)?;

        info!(
            event.name = "link_registry.address_added",
            network.interface.index = index,
            network.interface.name = %link.display_name(),
            network.address = %addr,
            "adding address"
        );

        if !link.addrs.contains(&addr) {
            link.addrs.push(addr);
        }
        Ok(())
    }

    pub fn remove_address(&mut self, index: u32, addr: IfaceAddr) -> Result<(), SyncError> {
        let link = self.lookup_mut(index)?;

        match link.addrs.iter().position(|a| *a == addr) {
            Some(pos) => {
                link.addrs.remove(pos);
                info!(
                    event.name = "link_registry.address_removed",
                    network.interface.index = index,
                    network.interface.name = %link.display_name(),
                    network.address = %addr,
                    "dropping address"
                );
            }
            None => {
                debug!(
                    event.name = "link_registry.address_not_present",
                    network.interface.index = index,
                    network.interface.name = %link.display_name(),
                    network.address = %addr,
                    "address already absent, nothing to drop"
                );
            }
        }
        Ok(())
    }

    pub fn lookup(&self, index: u32) -> Result<&Link, SyncError> {
        self.links
            .get(&index)
            .ok_or(SyncError::UnknownInterface { index })
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    fn lookup_mut(&mut self, index: u32) -> Result<&mut Link, SyncError> {
        self.links
            .get_mut(&index)
            .ok_or(SyncError::UnknownInterface { index })
    }
}
