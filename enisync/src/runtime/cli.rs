use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::runtime::conf::conf_serde::level;

/// Keep per-interface policy routes in step with the main table's default
/// routes so replies leave through the interface the request arrived on.
///
/// Options left unset fall through to the config file, then to built-in
/// defaults. Serialized into the figment as its top layer, so only the values
/// actually given are emitted.
#[derive(Parser, Debug, Serialize, Deserialize)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    #[serde(skip)]
    pub command: Option<Command>,

    /// Set the path to the configuration file (e.g., "enisync.yaml").
    #[arg(short, long, value_name = "FILE", env = "ENISYNC_CONFIG_PATH")]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Interface name pattern to manage, matched against the whole name
    /// (e.g., "eth\d+").
    #[arg(short, long, value_name = "PATTERN", env = "ENISYNC_INTERFACE")]
    #[serde(
        rename = "interface_pattern",
        skip_serializing_if = "Option::is_none"
    )]
    pub interface: Option<String>,

    /// Base added to the interface index to derive each rule's priority.
    #[arg(long, value_name = "N", env = "ENISYNC_RULE_PRIORITY_BASE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_priority_base: Option<u32>,

    /// Base added to the interface index to derive each routing table id.
    #[arg(long, value_name = "N", env = "ENISYNC_RT_TABLE_BASE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rt_table_base: Option<u32>,

    /// Set the application's log level (e.g., "debug", "warn").
    #[arg(short, long, value_name = "LEVEL", env = "ENISYNC_LOG_LEVEL")]
    #[serde(
        default,
        with = "level::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub log_level: Option<Level>,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or_default()
    }
}

#[derive(Subcommand, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Command {
    /// Converge on the current routing state once and exit
    Once,
    /// Converge, then follow link, address and route changes until interrupted
    #[default]
    Monitor,
    /// Remove every rule and route a symmetric run would have installed, then exit
    Reset,
}
