//! Routing mutator: the rule/route primitives the controller issues.
//!
//! [`RouteOps`] keeps the controller independent of the netlink wire format.
//! Production code uses [`NetlinkRouteOps`], a thin wrapper over an
//! `rtnetlink::Handle`; tests use the stateful mock in `route::mocks`.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use futures::TryStreamExt;
use ip_network::Ipv4Network;
use netlink_packet_route::{
    route::RouteMessage,
    rule::{RuleAction, RuleAttribute, RuleMessage},
};
use rtnetlink::{Handle, IpVersion, RouteMessageBuilder};
use thiserror::Error;
use tracing::trace;

use crate::notification::route_table;

/// Errors raised by a routing mutator.
#[derive(Debug, Error)]
pub enum RouteOpsError {
    /// The kernel rejected or failed a netlink request
    #[error("failed to {operation}: {source}")]
    Request {
        operation: &'static str,
        #[source]
        source: rtnetlink::Error,
    },

    /// The netlink connection itself failed
    #[error("netlink connection error: {0}")]
    Io(#[from] std::io::Error),
}

impl RouteOpsError {
    fn request(operation: &'static str) -> impl FnOnce(rtnetlink::Error) -> Self {
        move |source| Self::Request { operation, source }
    }
}

/// Source-based policy rule: traffic from `source` looks up `table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleSpec {
    pub priority: u32,
    pub source: Ipv4Network,
    pub table: u32,
}

/// Default route (`0.0.0.0/0`) placed in a dedicated table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultRouteSpec {
    pub table: u32,
    pub gateway: Option<Ipv4Addr>,
    pub output_interface: u32,
    pub pref_source: Ipv4Addr,
}

/// Abstraction over the kernel's policy-routing primitives.
///
/// All calls are issued one at a time from the single processing path, so
/// implementations need no internal synchronisation beyond what their
/// transport requires.
#[async_trait]
pub trait RouteOps: Send + Sync {
    async fn add_rule(&self, rule: &RuleSpec) -> Result<(), RouteOpsError>;

    async fn add_default_route(&self, route: &DefaultRouteSpec) -> Result<(), RouteOpsError>;

    /// Number of IPv4 rules currently installed at `priority`.
    async fn count_rules(&self, priority: u32) -> Result<usize, RouteOpsError>;

    /// Delete every IPv4 rule at `priority`.
    async fn flush_rules(&self, priority: u32) -> Result<(), RouteOpsError>;

    /// Delete every IPv4 route in `table`.
    async fn flush_routes(&self, table: u32) -> Result<(), RouteOpsError>;
}

/// [`RouteOps`] backed by an `rtnetlink::Handle`.
#[derive(Clone)]
pub struct NetlinkRouteOps {
    handle: Handle,
}

impl NetlinkRouteOps {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    async fn rules_at(&self, priority: u32) -> Result<Vec<RuleMessage>, RouteOpsError> {
        let rules: Vec<RuleMessage> = self
            .handle
            .rule()
            .get(IpVersion::V4)
            .execute()
            .try_collect()
            .await
            .map_err(RouteOpsError::request("list rules"))?;

        Ok(rules
            .into_iter()
            .filter(|rule| rule_priority(rule) == Some(priority))
            .collect())
    }

    async fn routes_in(&self, table: u32) -> Result<Vec<RouteMessage>, RouteOpsError> {
        // without strict checking the kernel dumps every table, so filter here
        let routes: Vec<RouteMessage> = self
            .handle
            .route()
            .get(RouteMessageBuilder::<Ipv4Addr>::default().table_id(table).build())
            .execute()
            .try_collect()
            .await
            .map_err(RouteOpsError::request("list routes"))?;

        Ok(routes
            .into_iter()
            .filter(|route| route_table(route) == table)
            .collect())
    }
}

#[async_trait]
impl RouteOps for NetlinkRouteOps {
    async fn add_rule(&self, rule: &RuleSpec) -> Result<(), RouteOpsError> {
        self.handle
            .rule()
            .add()
            .v4()
            .source_prefix(rule.source.network_address(), rule.source.netmask())
            .table_id(rule.table)
            .priority(rule.priority)
            .action(RuleAction::ToTable)
            .execute()
            .await
            .map_err(RouteOpsError::request("add rule"))
    }

    async fn add_default_route(&self, route: &DefaultRouteSpec) -> Result<(), RouteOpsError> {
        let mut builder = RouteMessageBuilder::<Ipv4Addr>::default()
            .destination_prefix(Ipv4Addr::UNSPECIFIED, 0)
            .output_interface(route.output_interface)
            .pref_source(route.pref_source)
            .table_id(route.table);
        if let Some(gateway) = route.gateway {
            builder = builder.gateway(gateway);
        }

        self.handle
            .route()
            .add(builder.build())
            .execute()
            .await
            .map_err(RouteOpsError::request("add route"))
    }

    async fn count_rules(&self, priority: u32) -> Result<usize, RouteOpsError> {
        Ok(self.rules_at(priority).await?.len())
    }

    async fn flush_rules(&self, priority: u32) -> Result<(), RouteOpsError> {
        for rule in self.rules_at(priority).await? {
            trace!(
                event.name = "route_ops.rule_deleting",
                rule.priority = priority,
                "deleting rule"
            );
            self.handle
                .rule()
                .del(rule)
                .execute()
                .await
                .map_err(RouteOpsError::request("delete rule"))?;
        }
        Ok(())
    }

    async fn flush_routes(&self, table: u32) -> Result<(), RouteOpsError> {
        for route in self.routes_in(table).await? {
            trace!(
                event.name = "route_ops.route_deleting",
                route.table = table,
                route.destination_prefix_len = route.header.destination_prefix_length,
                "deleting route"
            );
            self.handle
                .route()
                .del(route)
                .execute()
                .await
                .map_err(RouteOpsError::request("delete route"))?;
        }
        Ok(())
    }
}

fn rule_priority(rule: &RuleMessage) -> Option<u32> {
    rule.attributes.iter().find_map(|attr| match attr {
        RuleAttribute::Priority(priority) => Some(*priority),
        _ => None,
    })
}
