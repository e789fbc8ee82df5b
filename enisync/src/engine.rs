//! Notification dispatch.
//!
//! [`SyncEngine`] owns the [`LinkRegistry`] and a [`RouteController`] and
//! routes each [`Notification`] to exactly one of them. Notifications are
//! handled strictly one at a time, in delivery order; a handler finishes all
//! of its registry updates and kernel calls before the next one starts.

use tracing::{trace, warn};

use crate::{
    error::SyncError,
    iface::{IfaceAddr, LinkRegistry},
    notification::{AddressInfo, Notification},
    route::{controller::RouteController, ops::RouteOps},
};

pub struct SyncEngine<O> {
    links: LinkRegistry,
    routes: RouteController<O>,
}

impl<O: RouteOps> SyncEngine<O> {
    pub fn new(routes: RouteController<O>) -> Self {
        Self {
            links: LinkRegistry::new(),
            routes,
        }
    }

    pub fn links(&self) -> &LinkRegistry {
        &self.links
    }

    /// Apply one notification. Errors are fatal to the caller's loop.
    pub async fn recv(&mut self, notification: Notification) -> Result<(), SyncError> {
        trace!(
            event.name = "engine.notification_received",
            notification = %notification,
            "received notification"
        );

        match notification {
            Notification::LinkAdded(link) => self.links.upsert(link.index, link.name),
            Notification::LinkRemoved(link) => {
                self.links.remove(link.index)?;
            }
            Notification::AddressAdded(addr) => {
                if let Some(iface_addr) = ipv4_addr(&addr) {
                    self.links.add_address(addr.index, iface_addr)?;
                }
            }
            Notification::AddressRemoved(addr) => {
                if let Some(iface_addr) = ipv4_addr(&addr) {
                    self.links.remove_address(addr.index, iface_addr)?;
                }
            }
            Notification::RouteAdded(route) => self.routes.route_added(&self.links, &route).await?,
            Notification::RouteRemoved(route) => {
                self.routes.route_removed(&self.links, &route).await?
            }
            Notification::Other => {}
        }

        Ok(())
    }
}

/// IPv4 address carried by an address notification; anything else is dropped.
fn ipv4_addr(info: &AddressInfo) -> Option<IfaceAddr> {
    let ip = info.ipv4()?;
    match IfaceAddr::new(ip, info.prefix_len) {
        Ok(addr) => Some(addr),
        Err(e) => {
            warn!(
                event.name = "engine.address_invalid",
                network.interface.index = info.index,
                network.address = %ip,
                prefix_len = info.prefix_len,
                error.message = %e,
                "ignoring address with invalid prefix length"
            );
            None
        }
    }
}
