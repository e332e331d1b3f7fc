//! Gatekeeper - multi-device threshold approval gate.
//!
//! Sensitive operations on a machine are gated behind a vote of the
//! owner's other devices: the machine itself is just one voice among
//! many. The gate classifies each operation descriptor, solicits
//! votes from the active devices for critical ones, tallies against a
//! fixed threshold, and records exactly one terminal decision per
//! operation. Any ambiguity - timeout, unreachable quorum, missing
//! voters - resolves to denial.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                        Gate                            │
//! │                                                        │
//! │  ┌────────────┐   ┌──────────┐   ┌───────┐   ┌──────┐ │
//! │  │ Classifier │──▶│ Registry │──▶│ Tally │──▶│ Audit│ │
//! │  └────────────┘   └──────────┘   └───────┘   └──────┘ │
//! │         │          snapshot at      per               │
//! │     critical?      vote start       vote              │
//! └────────────────────────────────────────────────────────┘
//! ```

pub mod audit;
pub mod classifier;
pub mod config;
pub mod gate;
pub mod registry;
pub mod tally;
pub mod types;

// Re-export main types
pub use audit::{AuditKind, AuditLog, AuditRecord, GateStats};
pub use classifier::OperationClassifier;
pub use config::GatekeeperConfig;
pub use gate::{Gate, LoggingSolicitor, SubmittedOperation, VoteOutcome, VoteSolicitor};
pub use registry::DeviceRegistry;
pub use tally::{tally, TallyOutcome, VoteCounts};
pub use types::*;
