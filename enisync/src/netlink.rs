//! Kernel-facing notification sources: the live multicast monitor and the
//! startup snapshot.

pub mod monitor;
pub mod snapshot;

pub use monitor::{MonitorError, NetlinkMonitor};
pub use snapshot::SnapshotError;
