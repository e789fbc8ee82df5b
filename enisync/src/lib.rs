pub mod engine;
pub mod error;
pub mod iface;
pub mod netlink;
pub mod notification;
pub mod route;
pub mod runtime;
