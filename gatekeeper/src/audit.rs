//! Audit trail for gate decisions and discarded votes.
//!
//! Every terminal decision is appended exactly once; late and
//! unknown-device votes are recorded rather than silently dropped.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::AuditConfig;
use crate::types::{Decision, Outcome, Vote};

/// What an audit record describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditKind {
    /// Terminal decision recorded for an operation
    Decision { decision: Decision },
    /// Vote request broadcast to active devices
    VoteRequested {
        descriptor: String,
        devices_polled: usize,
    },
    /// Vote arrived after the terminal decision; discarded
    LateVote { vote: Vote },
    /// Vote from a device outside the quorum snapshot; not counted
    UnknownDevice { vote: Vote },
}

/// An entry in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique entry ID
    pub record_id: String,
    /// Operation the record concerns
    pub operation_id: uuid::Uuid,
    /// What happened
    pub kind: AuditKind,
    /// When it was recorded
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    fn new(operation_id: uuid::Uuid, kind: AuditKind) -> Self {
        Self {
            record_id: uuid::Uuid::new_v4().to_string(),
            operation_id,
            kind,
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only audit log (newest first, bounded).
pub struct AuditLog {
    entries: Arc<RwLock<VecDeque<AuditRecord>>>,
    max_entries: usize,
}

impl AuditLog {
    /// Create a new audit log with default configuration.
    pub fn new() -> Self {
        Self::with_config(AuditConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(config: AuditConfig) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::new())),
            max_entries: config.max_entries,
        }
    }

    /// Append a record.
    pub async fn record(&self, operation_id: uuid::Uuid, kind: AuditKind) {
        let mut entries = self.entries.write().await;
        entries.push_front(AuditRecord::new(operation_id, kind));

        while entries.len() > self.max_entries {
            entries.pop_back();
        }
    }

    /// Get recent records.
    pub async fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        let entries = self.entries.read().await;
        entries.iter().take(limit).cloned().collect()
    }

    /// Records for one operation, newest first.
    pub async fn for_operation(&self, operation_id: uuid::Uuid) -> Vec<AuditRecord> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|r| r.operation_id == operation_id)
            .cloned()
            .collect()
    }

    /// The terminal decision for an operation, if recorded.
    pub async fn decision_for(&self, operation_id: uuid::Uuid) -> Option<Decision> {
        let entries = self.entries.read().await;
        entries.iter().find_map(|r| match &r.kind {
            AuditKind::Decision { decision } if r.operation_id == operation_id => {
                Some(decision.clone())
            }
            _ => None,
        })
    }

    /// Session statistics over recorded decisions.
    pub async fn stats(&self) -> GateStats {
        let entries = self.entries.read().await;

        let mut stats = GateStats::default();
        for record in entries.iter() {
            match &record.kind {
                AuditKind::Decision { decision } => {
                    stats.total_decisions += 1;
                    match decision.outcome {
                        Outcome::Approved if decision.votes_for == 0 => stats.auto_approved += 1,
                        Outcome::Approved => stats.approved += 1,
                        Outcome::Denied => stats.denied += 1,
                        Outcome::TimedOut => stats.timed_out += 1,
                    }
                }
                AuditKind::LateVote { .. } => stats.late_votes += 1,
                AuditKind::UnknownDevice { .. } => stats.unknown_device_votes += 1,
                AuditKind::VoteRequested { .. } => {}
            }
        }

        stats
    }

    /// Get count.
    pub async fn count(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics over the audit log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateStats {
    /// Terminal decisions recorded
    pub total_decisions: usize,
    /// Normal operations approved without voting
    pub auto_approved: usize,
    /// Critical operations approved by quorum
    pub approved: usize,
    /// Critical operations denied
    pub denied: usize,
    /// Critical operations that timed out
    pub timed_out: usize,
    /// Votes discarded as late
    pub late_votes: usize,
    /// Votes from devices outside the snapshot
    pub unknown_device_votes: usize,
}
