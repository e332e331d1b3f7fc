//! gatekeeperd - consensus daemon for the gatekeeper approval gate.
//!
//! Listens on a Unix-domain socket for device registrations,
//! heartbeats, votes, and operation submissions, and pushes vote
//! requests out to registered device connections. The underlying
//! approval logic lives in the `gatekeeper` crate.

pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage};
pub use server::Daemon;
