pub mod cli;
pub mod conf;
pub mod driver;
pub mod logging;
pub mod shutdown;

use std::{error::Error, fmt, io};

use clap::Parser;

use crate::{
    error::SyncError,
    netlink::{MonitorError, SnapshotError},
    runtime::{
        cli::Cli,
        conf::{Conf, ConfError},
    },
};

pub struct Runtime {
    pub cli: Cli,
    pub conf: Conf,
}

impl Runtime {
    pub fn new() -> Result<Self, RuntimeError> {
        let cli = Cli::parse();
        let (conf, cli) = Conf::new(cli)?;

        Ok(Runtime { cli, conf })
    }
}

#[derive(Debug)]
pub enum RuntimeError {
    Conf(ConfError),
    Sync(SyncError),
    Monitor(MonitorError),
    Snapshot(SnapshotError),
    Io(io::Error),
    /// The netlink monitor thread stopped while the driver was following it.
    MonitorClosed,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Conf(e) => e.fmt(f),
            RuntimeError::Sync(e) => e.fmt(f),
            RuntimeError::Monitor(e) => e.fmt(f),
            RuntimeError::Snapshot(e) => e.fmt(f),
            RuntimeError::Io(e) => write!(f, "i/o error: {e}"),
            RuntimeError::MonitorClosed => write!(f, "netlink monitor stopped unexpectedly"),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RuntimeError::Conf(e) => Some(e),
            RuntimeError::Sync(e) => Some(e),
            RuntimeError::Monitor(e) => Some(e),
            RuntimeError::Snapshot(e) => Some(e),
            RuntimeError::Io(e) => Some(e),
            RuntimeError::MonitorClosed => None,
        }
    }
}

impl From<ConfError> for RuntimeError {
    fn from(e: ConfError) -> Self {
        RuntimeError::Conf(e)
    }
}

impl From<SyncError> for RuntimeError {
    fn from(e: SyncError) -> Self {
        RuntimeError::Sync(e)
    }
}

impl From<MonitorError> for RuntimeError {
    fn from(e: MonitorError) -> Self {
        RuntimeError::Monitor(e)
    }
}

impl From<SnapshotError> for RuntimeError {
    fn from(e: SnapshotError) -> Self {
        RuntimeError::Snapshot(e)
    }
}

impl From<io::Error> for RuntimeError {
    fn from(e: io::Error) -> Self {
        RuntimeError::Io(e)
    }
}
