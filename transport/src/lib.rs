//! classifyd transport: the encrypted mutual-TLS wire protocol, the
//! heartbeat/command-pull loop, command dispatch, and result
//! reporting. Never touches key material directly — every encrypted
//! body goes through a [`classifyd_core::crypto::LocalCipher`] handle
//! supplied by the caller.

pub mod command;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod policy_update;
pub mod reporter;
pub mod wire;

pub use command::{CommandPayload, CommandResultReport, RuleOutcome, StrategyExecReport};
pub use dispatcher::CommandDispatcher;
pub use error::{BundleError, TransportError};
pub use heartbeat::{HeartbeatScheduler, HeartbeatState};
pub use reporter::ResultReporter;
pub use wire::{TlsConfig, WireClient};
