//! §4.10 Security monitors: integrity (see [`crate::integrity`]) and
//! netguard.

pub mod netguard;
pub mod whitelist;

pub use netguard::{Connection, ConnState, NetguardMonitor, NetworkAlert, Proto};
pub use whitelist::Whitelist;
