//! Core types for the gatekeeper approval gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An approver device known to the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Unique device ID (self-reported; identity is not authenticated)
    pub id: String,
    /// Static trust weight in [0.0, 1.0]
    pub trust_weight: f32,
    /// When the device last registered or heartbeat
    pub last_seen_at: DateTime<Utc>,
    /// Revoked devices stay registered but never count toward quorum
    pub revoked: bool,
}

impl Device {
    /// Create a new device. Trust weight is clamped into [0.0, 1.0].
    pub fn new(id: impl Into<String>, trust_weight: f32) -> Self {
        Self {
            id: id.into(),
            trust_weight: trust_weight.clamp(0.0, 1.0),
            last_seen_at: Utc::now(),
            revoked: false,
        }
    }

    /// Whether the device heartbeat is within the staleness window.
    pub fn is_active(&self, now: DateTime<Utc>, stale_window: chrono::Duration) -> bool {
        !self.revoked && self.last_seen_at >= now - stale_window
    }
}

/// Classification of an operation descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Requires multi-device approval before execution
    Critical,
    /// Auto-approved, no votes solicited
    Normal,
}

/// A proposed operation observed by the gate.
///
/// Immutable after creation; the classification is computed once and
/// never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Unique operation ID
    pub operation_id: uuid::Uuid,
    /// Free-form descriptor (shell command or filesystem path)
    pub descriptor: String,
    /// When the operation was observed
    pub requested_at: DateTime<Utc>,
    /// Classification computed at creation
    pub classification: Classification,
}

impl OperationRequest {
    /// Create a new request with the given classification.
    pub fn new(descriptor: impl Into<String>, classification: Classification) -> Self {
        Self {
            operation_id: uuid::Uuid::new_v4(),
            descriptor: descriptor.into(),
            requested_at: Utc::now(),
            classification,
        }
    }
}

/// A device's choice on a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    /// Approve the operation
    Approve,
    /// Deny the operation
    Deny,
    /// Consume the voter without taking a side
    Abstain,
}

/// A vote cast by a device for a pending operation.
///
/// At most one vote per (operation, device); a later vote overwrites
/// the earlier one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    /// Operation being voted on
    pub operation_id: uuid::Uuid,
    /// Voting device
    pub device_id: String,
    /// The choice
    pub choice: VoteChoice,
    /// When the vote was cast
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    /// Create a new vote stamped with the current time.
    pub fn new(operation_id: uuid::Uuid, device_id: impl Into<String>, choice: VoteChoice) -> Self {
        Self {
            operation_id,
            device_id: device_id.into(),
            choice,
            cast_at: Utc::now(),
        }
    }
}

/// Terminal outcome of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Enough approvals arrived
    Approved,
    /// Approval became mathematically unreachable
    Denied,
    /// The vote window elapsed while still pending (fail-secure deny)
    TimedOut,
}

impl Outcome {
    /// Whether the caller may proceed with the underlying operation.
    ///
    /// Denied and timed-out are both "do not proceed"; there is no
    /// separate error path.
    pub fn permits_execution(&self) -> bool {
        matches!(self, Outcome::Approved)
    }
}

/// The single terminal decision record for an operation.
///
/// Created exactly once per operation and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Operation this decision terminates
    pub operation_id: uuid::Uuid,
    /// Terminal outcome
    pub outcome: Outcome,
    /// Classification of the underlying request
    pub classification: Classification,
    /// Approve votes counted
    pub votes_for: usize,
    /// Deny votes counted
    pub votes_against: usize,
    /// Active device count captured when voting began (zero for
    /// auto-approved operations)
    pub active_devices: usize,
    /// When the decision was recorded
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    /// Auto-approval decision for a NORMAL operation.
    pub fn auto_approved(operation_id: uuid::Uuid) -> Self {
        Self {
            operation_id,
            outcome: Outcome::Approved,
            classification: Classification::Normal,
            votes_for: 0,
            votes_against: 0,
            active_devices: 0,
            decided_at: Utc::now(),
        }
    }
}

/// Error types for the gatekeeper.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Vote referenced an operation the gate has never seen
    #[error("Unknown operation: {0}")]
    UnknownOperation(uuid::Uuid),

    /// Registry error
    #[error("Registry error: {0}")]
    RegistryError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Transport-level error in an adapter
    #[error("Transport error: {0}")]
    TransportError(String),
}

pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_weight_clamped() {
        let device = Device::new("phone", 1.7);
        assert_eq!(device.trust_weight, 1.0);

        let device = Device::new("cloud", -0.2);
        assert_eq!(device.trust_weight, 0.0);
    }

    #[test]
    fn test_device_activity_window() {
        let mut device = Device::new("phone", 0.9);
        let now = Utc::now();
        assert!(device.is_active(now, chrono::Duration::seconds(30)));

        device.last_seen_at = now - chrono::Duration::seconds(45);
        assert!(!device.is_active(now, chrono::Duration::seconds(30)));

        device.last_seen_at = now;
        device.revoked = true;
        assert!(!device.is_active(now, chrono::Duration::seconds(30)));
    }

    #[test]
    fn test_wire_representation() {
        let vote = Vote::new(uuid::Uuid::new_v4(), "phone", VoteChoice::Deny);
        let json = serde_json::to_string(&vote).unwrap();
        assert!(json.contains(r#""choice":"deny""#));

        let decision = Decision::auto_approved(uuid::Uuid::new_v4());
        let json = serde_json::to_string(&decision).unwrap();
        assert!(json.contains(r#""outcome":"approved""#));
        assert!(json.contains(r#""classification":"normal""#));
    }

    #[test]
    fn test_outcome_permits_execution() {
        assert!(Outcome::Approved.permits_execution());
        assert!(!Outcome::Denied.permits_execution());
        assert!(!Outcome::TimedOut.permits_execution());
    }
}
