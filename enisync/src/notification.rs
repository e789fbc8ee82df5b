//! Typed kernel network-change notifications.
//!
//! Both the startup dump and the live multicast subscription deliver
//! `RouteNetlinkMessage`s; [`Notification::from_rtnl`] reduces them to the
//! handful of fields the engine cares about. Message kinds outside
//! link/address/route add/remove collapse to [`Notification::Other`].

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr},
};

use netlink_packet_route::{
    AddressFamily, RouteNetlinkMessage,
    address::{AddressAttribute, AddressMessage},
    link::{LinkAttribute, LinkMessage},
    route::{RouteAddress, RouteAttribute, RouteMessage},
};

/// Address family of an address or route notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Inet,
    Inet6,
    Other,
}

impl From<AddressFamily> for Family {
    fn from(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Inet => Family::Inet,
            AddressFamily::Inet6 => Family::Inet6,
            _ => Family::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub index: u32,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    pub index: u32,
    pub family: Family,
    pub address: Option<IpAddr>,
    pub prefix_len: u8,
}

impl AddressInfo {
    /// The IPv4 address carried by this notification, if it is an IPv4 one.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match (self.family, self.address) {
            (Family::Inet, Some(IpAddr::V4(ip))) => Some(ip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub family: Family,
    pub table: u32,
    pub destination_prefix_len: u8,
    pub output_interface: Option<u32>,
    pub gateway: Option<IpAddr>,
}

impl RouteInfo {
    pub fn gateway_v4(&self) -> Option<Ipv4Addr> {
        match self.gateway {
            Some(IpAddr::V4(gw)) => Some(gw),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    LinkAdded(LinkInfo),
    LinkRemoved(LinkInfo),
    AddressAdded(AddressInfo),
    AddressRemoved(AddressInfo),
    RouteAdded(RouteInfo),
    RouteRemoved(RouteInfo),
    /// Anything else the kernel tells us about; always ignored.
    Other,
}

impl Notification {
    pub fn from_rtnl(msg: RouteNetlinkMessage) -> Self {
        match msg {
            RouteNetlinkMessage::NewLink(m) | RouteNetlinkMessage::SetLink(m)
                if !is_bridge_port(&m) =>
            {
                Notification::LinkAdded(link_info(&m))
            }
            RouteNetlinkMessage::DelLink(m) if !is_bridge_port(&m) => {
                Notification::LinkRemoved(link_info(&m))
            }
            RouteNetlinkMessage::NewAddress(m) => Notification::AddressAdded(address_info(&m)),
            RouteNetlinkMessage::DelAddress(m) => Notification::AddressRemoved(address_info(&m)),
            RouteNetlinkMessage::NewRoute(m) => Notification::RouteAdded(route_info(&m)),
            RouteNetlinkMessage::DelRoute(m) => Notification::RouteRemoved(route_info(&m)),
            _ => Notification::Other,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkAdded(l) => write!(f, "link_added(#{})", l.index),
            Self::LinkRemoved(l) => write!(f, "link_removed(#{})", l.index),
            Self::AddressAdded(a) => write!(f, "address_added(#{})", a.index),
            Self::AddressRemoved(a) => write!(f, "address_removed(#{})", a.index),
            Self::RouteAdded(r) => write!(f, "route_added(table {})", r.table),
            Self::RouteRemoved(r) => write!(f, "route_removed(table {})", r.table),
            Self::Other => write!(f, "other"),
        }
    }
}

/// AF_BRIDGE link messages describe bridge port membership, not the
/// interface itself. A port leaving its bridge arrives as an RTM_DELLINK
/// while the link still exists.
fn is_bridge_port(msg: &LinkMessage) -> bool {
    msg.header.interface_family == AddressFamily::Bridge
}

fn link_info(msg: &LinkMessage) -> LinkInfo {
    let name = msg.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => Some(name.clone()),
        _ => None,
    });

    LinkInfo {
        index: msg.header.index,
        name,
    }
}

fn address_info(msg: &AddressMessage) -> AddressInfo {
    let address = msg.attributes.iter().find_map(|attr| match attr {
        AddressAttribute::Address(ip) => Some(*ip),
        _ => None,
    });

    AddressInfo {
        index: msg.header.index,
        family: msg.header.family.into(),
        address,
        prefix_len: msg.header.prefix_len,
    }
}

/// Table a route lives in. RTA_TABLE carries ids above 255; the header
/// byte is only a fallback.
pub(crate) fn route_table(msg: &RouteMessage) -> u32 {
    msg.attributes
        .iter()
        .find_map(|attr| match attr {
            RouteAttribute::Table(id) => Some(*id),
            _ => None,
        })
        .unwrap_or(u32::from(msg.header.table))
}

fn route_info(msg: &RouteMessage) -> RouteInfo {
    let output_interface = msg.attributes.iter().find_map(|attr| match attr {
        RouteAttribute::Oif(index) => Some(*index),
        _ => None,
    });

    let gateway = msg.attributes.iter().find_map(|attr| match attr {
        RouteAttribute::Gateway(RouteAddress::Inet(gw)) => Some(IpAddr::V4(*gw)),
        RouteAttribute::Gateway(RouteAddress::Inet6(gw)) => Some(IpAddr::V6(*gw)),
        _ => None,
    });

    RouteInfo {
        family: msg.header.address_family.into(),
        table: route_table(msg),
        destination_prefix_len: msg.header.destination_prefix_length,
        output_interface,
        gateway,
    }
}
