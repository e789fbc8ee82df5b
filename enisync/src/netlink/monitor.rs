// Netlink multicast monitor for link, IPv4 address and IPv4 route changes
//
// The socket is read on a dedicated blocking thread (netlink-sys has no
// async recv without taking over the rtnetlink connection), and every decoded
// notification is forwarded over an unbounded tokio channel so the async
// driver consumes them in delivery order.

use std::thread::JoinHandle;

use netlink_packet_core::{NetlinkBuffer, NetlinkMessage, NetlinkPayload};
use netlink_packet_route::RouteNetlinkMessage;
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::notification::Notification;

/// Multicast groups as a bind bitmask: group N is bit N-1.
const fn nl_mgrp(group: u32) -> u32 {
    if group == 0 { 0 } else { 1 << (group - 1) }
}

const MONITOR_GROUPS: u32 = nl_mgrp(libc::RTNLGRP_LINK)
    | nl_mgrp(libc::RTNLGRP_IPV4_IFADDR)
    | nl_mgrp(libc::RTNLGRP_IPV4_ROUTE);

/// Standard netlink receive buffer size
const RECV_BUFFER_LEN: usize = 8192;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("failed to create netlink socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("failed to bind netlink socket to groups {groups:#010x}: {source}")]
    Bind {
        groups: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn netlink monitor thread: {0}")]
    Thread(#[source] std::io::Error),
}

/// Live notification source.
///
/// Subscribes on construction, so anything the kernel reports after
/// [`NetlinkMonitor::spawn`] returns is buffered until read from
/// [`NetlinkMonitor::receiver`].
pub struct NetlinkMonitor {
    rx: mpsc::UnboundedReceiver<Notification>,
    _thread: JoinHandle<()>,
}

impl NetlinkMonitor {
    pub fn spawn() -> Result<Self, MonitorError> {
        let mut socket = Socket::new(NETLINK_ROUTE).map_err(MonitorError::Socket)?;

        // SocketAddr takes the group BITMASK, not a group id
        socket
            .bind(&SocketAddr::new(0, MONITOR_GROUPS))
            .map_err(|source| MonitorError::Bind {
                groups: MONITOR_GROUPS,
                source,
            })?;

        info!(
            event.name = "monitor.subscribed",
            netlink.groups = format!("0x{MONITOR_GROUPS:08x}"),
            "subscribed to link, ipv4 address and ipv4 route notifications"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let thread = std::thread::Builder::new()
            .name("netlink-monitor".to_string())
            .spawn(move || recv_loop(socket, tx))
            .map_err(MonitorError::Thread)?;

        Ok(Self {
            rx,
            _thread: thread,
        })
    }

    /// Decoded notifications in delivery order. Yields `None` once the socket
    /// thread has exited.
    pub fn receiver(&mut self) -> &mut mpsc::UnboundedReceiver<Notification> {
        &mut self.rx
    }
}

fn recv_loop(socket: Socket, tx: mpsc::UnboundedSender<Notification>) {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    loop {
        // MSG_TRUNC makes recv report the full datagram length
        let n = match socket.recv(&mut &mut buf[..], libc::MSG_TRUNC) {
            Ok(n) => n,
            Err(e) => {
                error!(
                    event.name = "monitor.recv_failed",
                    error.message = %e,
                    "error receiving from netlink socket"
                );
                break;
            }
        };

        trace!(
            event.name = "monitor.data_received",
            bytes = n,
            "received netlink data"
        );

        let n = received_len(n, buf.len());
        for notification in parse_datagram(&buf[..n]) {
            if tx.send(notification).is_err() {
                debug!(
                    event.name = "monitor.receiver_dropped",
                    "notification receiver dropped, stopping monitor"
                );
                return;
            }
        }
    }

    info!(
        event.name = "monitor.socket_closed",
        "netlink socket closed, exiting recv loop"
    );
}

/// Bytes actually in the buffer. A datagram longer than the buffer has lost
/// its tail, and any link it described will later surface as an unknown
/// interface.
fn received_len(datagram_len: usize, capacity: usize) -> usize {
    if datagram_len > capacity {
        warn!(
            event.name = "monitor.datagram_truncated",
            bytes = datagram_len,
            buffer.capacity = capacity,
            "netlink datagram truncated, notifications lost"
        );
        capacity
    } else {
        datagram_len
    }
}

/// Decode every netlink message in one datagram. Anything that fails to parse
/// ends the datagram; messages already decoded are kept.
fn parse_datagram(bytes: &[u8]) -> Vec<Notification> {
    let mut notifications = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let remaining = &bytes[offset..];
        let msg_len = match NetlinkBuffer::new_checked(remaining) {
            Ok(nl_buf) => nl_buf.length() as usize,
            Err(e) => {
                trace!(
                    event.name = "monitor.buffer_check_failed",
                    error.message = ?e,
                    offset = offset,
                    remaining = remaining.len(),
                    "not enough bytes for complete message, ending parse loop"
                );
                break;
            }
        };
        if msg_len == 0 {
            break;
        }

        match NetlinkMessage::<RouteNetlinkMessage>::deserialize(remaining) {
            Ok(msg) => {
                if let NetlinkPayload::InnerMessage(rtnl) = msg.payload {
                    notifications.push(Notification::from_rtnl(rtnl));
                }
            }
            Err(e) => {
                warn!(
                    event.name = "monitor.message_parse_error",
                    error.message = %e,
                    "failed to parse netlink message"
                );
                break;
            }
        }

        offset += (msg_len + 3) & !3; // NLMSG_ALIGN
    }

    notifications
}

#[cfg(test)]
mod tests {
    use netlink_packet_core::{NetlinkHeader, NetlinkMessage};
    use netlink_packet_route::link::{LinkAttribute, LinkMessage};

    use super::*;
    use crate::notification::LinkInfo;

    fn new_link_bytes(index: u32, name: &str) -> Vec<u8> {
        let mut link = LinkMessage::default();
        link.header.index = index;
        link.attributes.push(LinkAttribute::IfName(name.to_string()));

        let mut msg = NetlinkMessage::new(
            NetlinkHeader::default(),
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link)),
        );
        msg.finalize();

        let mut buf = vec![0u8; msg.buffer_len()];
        msg.serialize(&mut buf);
        buf
    }

    #[test]
    fn test_groups_bitmask() {
        assert_eq!(nl_mgrp(0), 0);
        assert_eq!(nl_mgrp(1), 0x1);
        // RTMGRP_LINK | RTMGRP_IPV4_IFADDR | RTMGRP_IPV4_ROUTE
        assert_eq!(MONITOR_GROUPS, 0x1 | 0x10 | 0x40);
    }

    #[test]
    fn test_parse_single_message() {
        let bytes = new_link_bytes(3, "eth0");
        assert_eq!(
            parse_datagram(&bytes),
            vec![Notification::LinkAdded(LinkInfo {
                index: 3,
                name: Some("eth0".to_string()),
            })]
        );
    }

    #[test]
    fn test_parse_multiple_messages_in_one_datagram() {
        let mut bytes = new_link_bytes(3, "eth0");
        bytes.extend(new_link_bytes(4, "eth1"));

        let parsed = parse_datagram(&bytes);
        assert_eq!(parsed.len(), 2);
        assert!(matches!(&parsed[1], Notification::LinkAdded(l) if l.index == 4));
    }

    #[test]
    fn test_parse_truncated_datagram_keeps_complete_messages() {
        let mut bytes = new_link_bytes(3, "eth0");
        let second = new_link_bytes(4, "eth1");
        bytes.extend(&second[..second.len() / 2]);

        assert_eq!(parse_datagram(&bytes).len(), 1);
    }

    #[test]
    fn test_received_len_clamps_truncated_datagram() {
        assert_eq!(received_len(100, RECV_BUFFER_LEN), 100);
        assert_eq!(received_len(RECV_BUFFER_LEN, RECV_BUFFER_LEN), RECV_BUFFER_LEN);
        assert_eq!(received_len(RECV_BUFFER_LEN + 1, RECV_BUFFER_LEN), RECV_BUFFER_LEN);
    }

    #[test]
    fn test_parse_empty_datagram() {
        assert!(parse_datagram(&[]).is_empty());
    }
}
