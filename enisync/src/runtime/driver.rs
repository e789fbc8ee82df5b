//! Process driver: snapshot replay, then (in monitor mode) live follow.
//!
//! In monitor mode the multicast subscription and the signal handlers are
//! set up before the snapshot dump, so a change that lands between the dump
//! and the first live read waits in the monitor channel instead of being
//! lost. A buffered route event that the dump already covered is applied
//! twice, which is harmless since install and uninstall are idempotent.
//!
//! Registry removals are not. A link or address removed between the
//! subscription and the dump leaves a buffered removal for an index the
//! snapshot never reported; applying it fails with `UnknownInterface` and
//! monitor mode exits non-zero. That window only exists at startup, and the
//! supervisor restarting the daemon resolves it.

use std::future::Future;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    engine::SyncEngine,
    netlink::{NetlinkMonitor, snapshot},
    notification::Notification,
    route::{
        controller::{ControllerMode, RouteController},
        ops::{NetlinkRouteOps, RouteOps},
    },
    runtime::{Runtime, RuntimeError, cli::Command, shutdown::Shutdown},
};

pub async fn run(runtime: Runtime) -> Result<(), RuntimeError> {
    let Runtime { cli, conf } = runtime;
    let command = cli.command();
    let mode = match command {
        Command::Reset => ControllerMode::Reset,
        Command::Once | Command::Monitor => ControllerMode::Symmetric,
    };

    info!(
        event.name = "driver.starting",
        command = ?command,
        controller.mode = %mode,
        interface.pattern = %conf.interface_pattern,
        rule.priority_base = conf.rule_priority_base,
        route.table_base = conf.rt_table_base,
        "starting enisync"
    );

    let (connection, handle, _) = rtnetlink::new_connection()?;
    tokio::spawn(connection);

    let live = match command {
        Command::Monitor => Some((Shutdown::install()?, NetlinkMonitor::spawn()?)),
        Command::Once | Command::Reset => None,
    };

    let controller = RouteController::new(
        NetlinkRouteOps::new(handle.clone()),
        conf.controller_options()?,
        mode,
    );
    let mut engine = SyncEngine::new(controller);

    let notifications = snapshot::collect(&handle).await?;
    replay(&mut engine, notifications).await?;

    if let Some((mut shutdown, mut monitor)) = live {
        follow(&mut engine, monitor.receiver(), shutdown.recv()).await?;
    }

    info!(event.name = "driver.finished", "enisync finished");
    Ok(())
}

/// Apply snapshot notifications in order, stopping at the first error.
pub async fn replay<O: RouteOps>(
    engine: &mut SyncEngine<O>,
    notifications: Vec<Notification>,
) -> Result<(), RuntimeError> {
    let count = notifications.len();
    for notification in notifications {
        engine.recv(notification).await?;
    }

    info!(
        event.name = "driver.snapshot_applied",
        notifications = count,
        links = engine.links().len(),
        "applied routing snapshot"
    );
    Ok(())
}

/// Apply live notifications until `shutdown` resolves.
///
/// A notification already being applied runs to completion before shutdown
/// is observed. A closed channel means the monitor died and is an error.
pub async fn follow<O: RouteOps>(
    engine: &mut SyncEngine<O>,
    notifications: &mut mpsc::UnboundedReceiver<Notification>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), RuntimeError> {
    tokio::pin!(shutdown);
    info!(event.name = "driver.following", "following live notifications");

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                debug!(event.name = "driver.shutdown", "stopping notification follow");
                return Ok(());
            }
            notification = notifications.recv() => match notification {
                Some(notification) => engine.recv(notification).await?,
                None => return Err(RuntimeError::MonitorClosed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use tokio::sync::oneshot;

    use super::*;
    use crate::{
        error::SyncError,
        notification::{AddressInfo, Family, LinkInfo, RouteInfo},
        route::{
            controller::{ControllerOptions, MAIN_TABLE, interface_regex},
            mocks::{Call, MockRouteOps},
            ops::{DefaultRouteSpec, RuleSpec},
        },
    };

    fn engine_with(ops: &MockRouteOps, mode: ControllerMode) -> SyncEngine<MockRouteOps> {
        let options = ControllerOptions {
            interface_pattern: interface_regex(r"eth\d+").unwrap(),
            rule_priority_base: 1000,
            rt_table_base: 10000,
        };
        SyncEngine::new(RouteController::new(ops.clone(), options, mode))
    }

    fn engine(mode: ControllerMode) -> (SyncEngine<MockRouteOps>, MockRouteOps) {
        let ops = MockRouteOps::new();
        (engine_with(&ops, mode), ops)
    }

    fn eth0_snapshot() -> Vec<Notification> {
        vec![
            Notification::LinkAdded(LinkInfo {
                index: 1,
                name: Some("lo".to_string()),
            }),
            Notification::LinkAdded(LinkInfo {
                index: 3,
                name: Some("eth0".to_string()),
            }),
            Notification::AddressAdded(AddressInfo {
                index: 3,
                family: Family::Inet,
                address: Some("10.0.0.5".parse().unwrap()),
                prefix_len: 24,
            }),
            Notification::RouteAdded(default_route()),
        ]
    }

    fn default_route() -> RouteInfo {
        RouteInfo {
            family: Family::Inet,
            table: MAIN_TABLE,
            destination_prefix_len: 0,
            output_interface: Some(3),
            gateway: Some(Ipv4Addr::new(10, 0, 0, 1).into()),
        }
    }

    #[tokio::test]
    async fn test_replay_installs_snapshot_state() {
        let (mut engine, ops) = engine(ControllerMode::Symmetric);
        replay(&mut engine, eth0_snapshot()).await.unwrap();

        assert_eq!(engine.links().len(), 2);
        assert_eq!(ops.rules_at(1003).len(), 1);
        assert_eq!(ops.routes_in(10003).len(), 1);
    }

    #[tokio::test]
    async fn test_replay_in_reset_mode_retracts_state() {
        let (mut engine, ops) = engine(ControllerMode::Symmetric);
        replay(&mut engine, eth0_snapshot()).await.unwrap();

        let mut reset = engine_with(&ops, ControllerMode::Reset);
        replay(&mut reset, eth0_snapshot()).await.unwrap();

        assert!(ops.rules_at(1003).is_empty());
        assert!(ops.routes_in(10003).is_empty());
    }

    #[tokio::test]
    async fn test_replay_stops_on_out_of_order_snapshot() {
        let (mut engine, ops) = engine(ControllerMode::Symmetric);
        let mut snapshot = eth0_snapshot();
        // route before its link is known
        snapshot.rotate_right(1);

        let err = replay(&mut engine, snapshot).await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Sync(SyncError::UnknownInterface { index: 3 })
        ));
        assert!(ops.calls().is_empty());
        assert!(engine.links().is_empty());
    }

    #[tokio::test]
    async fn test_follow_applies_buffered_notifications_then_errors_on_close() {
        let (mut engine, ops) = engine(ControllerMode::Symmetric);
        let (tx, mut rx) = mpsc::unbounded_channel();
        for notification in eth0_snapshot() {
            tx.send(notification).unwrap();
        }
        tx.send(Notification::RouteRemoved(default_route())).unwrap();
        drop(tx);

        let err = follow(&mut engine, &mut rx, std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::MonitorClosed));
        assert_eq!(
            ops.mutations(),
            vec![
                Call::AddRule(RuleSpec {
                    priority: 1003,
                    source: "10.0.0.0/24".parse().unwrap(),
                    table: 10003,
                }),
                Call::AddDefaultRoute(DefaultRouteSpec {
                    table: 10003,
                    gateway: Some(Ipv4Addr::new(10, 0, 0, 1)),
                    output_interface: 3,
                    pref_source: Ipv4Addr::new(10, 0, 0, 5),
                }),
                Call::FlushRules(1003),
                Call::FlushRoutes(10003),
            ]
        );
        assert!(ops.rules_at(1003).is_empty());
    }

    #[tokio::test]
    async fn test_follow_stops_on_shutdown() {
        let (mut engine, ops) = engine(ControllerMode::Symmetric);
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        stop_tx.send(()).unwrap();

        follow(&mut engine, &mut rx, async {
            let _ = stop_rx.await;
        })
        .await
        .unwrap();

        assert!(ops.calls().is_empty());
        drop(tx);
    }

    #[tokio::test]
    async fn test_follow_fails_on_removal_of_link_missing_from_snapshot() {
        let (mut engine, ops) = engine(ControllerMode::Symmetric);
        replay(&mut engine, eth0_snapshot()).await.unwrap();

        // eth1 went away after the subscription but before the dump
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Notification::LinkRemoved(LinkInfo {
            index: 4,
            name: Some("eth1".to_string()),
        }))
        .unwrap();

        let err = follow(&mut engine, &mut rx, std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Sync(SyncError::UnknownInterface { index: 4 })
        ));
        assert_eq!(engine.links().len(), 2);
        assert_eq!(ops.rules_at(1003).len(), 1);
        drop(tx);
    }

    #[tokio::test]
    async fn test_follow_propagates_sync_error() {
        let (mut engine, _ops) = engine(ControllerMode::Symmetric);
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Notification::RouteAdded(default_route())).unwrap();

        let err = follow(&mut engine, &mut rx, std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Sync(SyncError::UnknownInterface { index: 3 })
        ));
        drop(tx);
    }
}
