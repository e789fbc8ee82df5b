//! Symmetric route controller.
//!
//! Watches default routes in the main table and, for every interface whose
//! name matches the configured pattern, keeps a source-based policy rule and
//! a per-interface table in place so replies leave through the interface the
//! request arrived on:
//!
//! ```text
//! default via 10.0.0.1 dev eth0 (table main, eth0 = #3, 10.0.0.5/24)
//!
//!   ip rule  add pref <rule_priority_base + 3> from 10.0.0.0/24 lookup <rt_table_base + 3>
//!   ip route add default via 10.0.0.1 dev eth0 src 10.0.0.5 table <rt_table_base + 3>
//! ```
//!
//! The controller keeps no state of its own. Interface identity comes from
//! the [`LinkRegistry`] lent to each call, and whether the rule/route pair
//! already exists is asked of the kernel each time, which makes install and
//! uninstall idempotent across repeated notifications and restarts.
//!
//! In [`ControllerMode::Reset`] the route-added/route-removed mapping is
//! inverted: replaying the current route set tears down what
//! [`ControllerMode::Symmetric`] would have built.

use std::fmt;

use regex::Regex;
use tracing::{debug, info, trace};

use crate::{
    error::SyncError,
    iface::{Link, LinkRegistry},
    notification::{Family, RouteInfo},
    route::ops::{DefaultRouteSpec, RouteOps, RuleSpec},
};

/// `RT_TABLE_MAIN`, the table ordinary traffic is routed from.
pub const MAIN_TABLE: u32 = 254;

/// Compile an interface name pattern that must match the whole name.
pub fn interface_regex(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerMode {
    /// Route added → install, route removed → uninstall.
    Symmetric,
    /// Route added → uninstall, route removed → install.
    Reset,
}

impl fmt::Display for ControllerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symmetric => write!(f, "symmetric"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Install,
    Uninstall,
}

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Full-match pattern selecting managed interfaces, see [`interface_regex`]
    pub interface_pattern: Regex,
    pub rule_priority_base: u32,
    pub rt_table_base: u32,
}

pub struct RouteController<O> {
    ops: O,
    options: ControllerOptions,
    mode: ControllerMode,
}

impl<O: RouteOps> RouteController<O> {
    pub fn new(ops: O, options: ControllerOptions, mode: ControllerMode) -> Self {
        info!(
            event.name = "route_controller.created",
            controller.mode = %mode,
            controller.interface_pattern = %options.interface_pattern,
            controller.rule_priority_base = options.rule_priority_base,
            controller.rt_table_base = options.rt_table_base,
            "route controller created"
        );

        Self { ops, options, mode }
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    /// Rule priority owned by interface `index`.
    pub fn rule_priority(&self, index: u32) -> Result<u32, SyncError> {
        let base = self.options.rule_priority_base;
        base.checked_add(index)
            .ok_or(SyncError::IdOverflow { base, index })
    }

    /// Routing table owned by interface `index`.
    pub fn table_id(&self, index: u32) -> Result<u32, SyncError> {
        let base = self.options.rt_table_base;
        base.checked_add(index)
            .ok_or(SyncError::IdOverflow { base, index })
    }

    pub async fn route_added(
        &self,
        links: &LinkRegistry,
        route: &RouteInfo,
    ) -> Result<(), SyncError> {
        let action = match self.mode {
            ControllerMode::Symmetric => Action::Install,
            ControllerMode::Reset => Action::Uninstall,
        };
        self.apply(links, route, action).await
    }

    pub async fn route_removed(
        &self,
        links: &LinkRegistry,
        route: &RouteInfo,
    ) -> Result<(), SyncError> {
        let action = match self.mode {
            ControllerMode::Symmetric => Action::Uninstall,
            ControllerMode::Reset => Action::Install,
        };
        self.apply(links, route, action).await
    }

    async fn apply(
        &self,
        links: &LinkRegistry,
        route: &RouteInfo,
        action: Action,
    ) -> Result<(), SyncError> {
        let Some((index, link)) = self.managed_default_route(links, route)? else {
            return Ok(());
        };

        match action {
            Action::Install => self.install(index, link, route).await,
            Action::Uninstall => self.uninstall(index, link).await,
        }
    }

    /// Resolve a route to the managed interface it is the default route of.
    ///
    /// Filter order matters: the interface lookup happens before the prefix
    /// check, so a main-table IPv4 route through an unknown index is an error
    /// even when it is not a default route.
    fn managed_default_route<'a>(
        &self,
        links: &'a LinkRegistry,
        route: &RouteInfo,
    ) -> Result<Option<(u32, &'a Link)>, SyncError> {
        if route.family != Family::Inet {
            trace!(
                event.name = "route_controller.route_filtered",
                reason = "family",
                "ignoring non-ipv4 route"
            );
            return Ok(None);
        }

        // includes the tables we create ourselves
        if route.table != MAIN_TABLE {
            trace!(
                event.name = "route_controller.route_filtered",
                reason = "table",
                route.table = route.table,
                "ignoring route outside main table"
            );
            return Ok(None);
        }

        let Some(index) = route.output_interface else {
            trace!(
                event.name = "route_controller.route_filtered",
                reason = "no_output_interface",
                "ignoring route without output interface"
            );
            return Ok(None);
        };

        let link = links.lookup(index)?;
        let matches = link
            .name()
            .is_some_and(|name| self.options.interface_pattern.is_match(name));
        if !matches {
            trace!(
                event.name = "route_controller.route_filtered",
                reason = "interface",
                network.interface.index = index,
                network.interface.name = ?link.name(),
                "ignoring route on unmanaged interface"
            );
            return Ok(None);
        }

        if route.destination_prefix_len > 0 {
            trace!(
                event.name = "route_controller.route_filtered",
                reason = "not_default",
                network.interface.index = index,
                route.destination_prefix_len = route.destination_prefix_len,
                "ignoring non-default route"
            );
            return Ok(None);
        }

        Ok(Some((index, link)))
    }

    async fn install(&self, index: u32, link: &Link, route: &RouteInfo) -> Result<(), SyncError> {
        let name = link.name().unwrap_or_default();
        let priority = self.rule_priority(index)?;
        let table = self.table_id(index)?;
        let addr = link.first_addr().ok_or_else(|| SyncError::NoAddress {
            index,
            name: name.to_string(),
        })?;

        debug!(
            event.name = "route_controller.checking_rules",
            network.interface.name = %name,
            rule.priority = priority,
            "checking for rules for default route"
        );
        if self.ops.count_rules(priority).await? > 0 {
            debug!(
                event.name = "route_controller.already_installed",
                network.interface.name = %name,
                rule.priority = priority,
                "rule already present, nothing to install"
            );
            return Ok(());
        }

        let gateway = route.gateway_v4();
        info!(
            event.name = "route_controller.installing",
            network.interface.name = %name,
            network.interface.index = index,
            network.address = %addr,
            route.gateway = ?gateway,
            route.table = table,
            rule.priority = priority,
            "setting up symmetric rule and route"
        );

        // no rollback: a failed route add leaves the rule for the next
        // removal or a reset run to clean up
        self.ops
            .add_rule(&RuleSpec {
                priority,
                source: addr.network(),
                table,
            })
            .await?;

        self.ops
            .add_default_route(&DefaultRouteSpec {
                table,
                gateway,
                output_interface: index,
                pref_source: addr.ip(),
            })
            .await?;

        Ok(())
    }

    async fn uninstall(&self, index: u32, link: &Link) -> Result<(), SyncError> {
        let name = link.name().unwrap_or_default();
        let priority = self.rule_priority(index)?;
        let table = self.table_id(index)?;

        debug!(
            event.name = "route_controller.checking_rules",
            network.interface.name = %name,
            rule.priority = priority,
            "checking for rules for default route"
        );
        if self.ops.count_rules(priority).await? == 0 {
            debug!(
                event.name = "route_controller.already_uninstalled",
                network.interface.name = %name,
                rule.priority = priority,
                "no rule present, nothing to tear down"
            );
            return Ok(());
        }

        info!(
            event.name = "route_controller.uninstalling",
            network.interface.name = %name,
            network.interface.index = index,
            route.table = table,
            rule.priority = priority,
            "tearing down symmetric rule and route"
        );

        self.ops.flush_rules(priority).await?;
        self.ops.flush_routes(table).await?;

        Ok(())
    }
}
