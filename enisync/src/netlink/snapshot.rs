use std::net::Ipv4Addr;

use futures::TryStreamExt;
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use rtnetlink::{Handle, RouteMessageBuilder};
use thiserror::Error;
use tracing::debug;

use crate::notification::Notification;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to dump {what}: {source}")]
    Dump {
        what: &'static str,
        #[source]
        source: rtnetlink::Error,
    },
}

fn dump(what: &'static str) -> impl FnOnce(rtnetlink::Error) -> SnapshotError {
    move |source| SnapshotError::Dump { what, source }
}

/// Current kernel state as synthetic "added" notifications.
///
/// Links come first, then IPv4 addresses, then IPv4 routes, so replaying the
/// result in order never references an interface before it is known.
pub async fn collect(handle: &Handle) -> Result<Vec<Notification>, SnapshotError> {
    let mut notifications = Vec::new();

    let links: Vec<_> = handle
        .link()
        .get()
        .execute()
        .try_collect()
        .await
        .map_err(dump("links"))?;
    debug!(
        event.name = "snapshot.links_dumped",
        count = links.len(),
        "dumped links"
    );
    notifications.extend(
        links
            .into_iter()
            .map(|m| Notification::from_rtnl(RouteNetlinkMessage::NewLink(m))),
    );

    let addresses: Vec<_> = handle
        .address()
        .get()
        .execute()
        .try_collect()
        .await
        .map_err(dump("addresses"))?;
    let addresses: Vec<_> = addresses
        .into_iter()
        .filter(|m| m.header.family == AddressFamily::Inet)
        .collect();
    debug!(
        event.name = "snapshot.addresses_dumped",
        count = addresses.len(),
        "dumped ipv4 addresses"
    );
    notifications.extend(
        addresses
            .into_iter()
            .map(|m| Notification::from_rtnl(RouteNetlinkMessage::NewAddress(m))),
    );

    let routes: Vec<_> = handle
        .route()
        .get(RouteMessageBuilder::<Ipv4Addr>::default().build())
        .execute()
        .try_collect()
        .await
        .map_err(dump("routes"))?;
    debug!(
        event.name = "snapshot.routes_dumped",
        count = routes.len(),
        "dumped ipv4 routes"
    );
    notifications.extend(
        routes
            .into_iter()
            .map(|m| Notification::from_rtnl(RouteNetlinkMessage::NewRoute(m))),
    );

    Ok(notifications)
}
