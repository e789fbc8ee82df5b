// Error types for enisync

use thiserror::Error;

use crate::route::ops::RouteOpsError;

/// Errors that stop notification processing.
///
/// None of these are retried: an unknown interface means a notification was
/// lost or delivered out of order, and a failed routing primitive means the
/// kernel state raced us or we lack `CAP_NET_ADMIN`.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A link, address or route event referenced an index the registry has never seen
    #[error("unknown interface index {index}")]
    UnknownInterface { index: u32 },

    /// A default route appeared on an interface with no IPv4 address to route from
    #[error("interface {name} (#{index}) has no IPv4 address to use as routing source")]
    NoAddress { index: u32, name: String },

    /// `base + index` does not fit in a rule priority or table id
    #[error("id base {base} plus interface index {index} overflows")]
    IdOverflow { base: u32, index: u32 },

    /// The routing mutator rejected an add, flush or query
    #[error("routing primitive failed: {0}")]
    Mutation(#[from] RouteOpsError),
}
