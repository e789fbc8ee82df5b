//! Policy routing: the symmetric route controller and the kernel primitives
//! it drives.

pub mod controller;
#[cfg(test)]
pub mod mocks;
pub mod ops;

pub use controller::{ControllerMode, ControllerOptions, RouteController};
pub use ops::{NetlinkRouteOps, RouteOps};
