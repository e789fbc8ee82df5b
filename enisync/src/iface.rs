//! In-memory model of the host's network interfaces.
//!
//! The registry is rebuilt from a fresh netlink dump on every start and then
//! kept current by link and address notifications.

pub mod registry;

pub use registry::{IfaceAddr, Link, LinkRegistry};
