pub mod commands;
pub mod service;

pub use service::{spawn_outbound_forwarder, HostService};
