//! Wire protocol for the consensus daemon.
//!
//! Line-delimited JSON over a Unix-domain socket. Message kinds are a
//! tagged enum so a new kind is a compile-time-checked addition, not a
//! loosely-typed field branch.

use serde::{Deserialize, Serialize};

use gatekeeper::{Decision, GateStats, VoteChoice};

/// Messages a client (device or operation source) may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Register (or re-register) an approver device. The connection
    /// starts receiving vote requests afterwards.
    Register {
        device_id: String,
        trust_weight: f32,
    },
    /// Refresh a device's staleness window.
    Heartbeat { device_id: String },
    /// Cast a vote on a pending operation.
    Vote {
        operation_id: uuid::Uuid,
        device_id: String,
        decision: VoteChoice,
    },
    /// Gate an operation descriptor; the terminal decision is pushed
    /// back on this connection when it resolves.
    Submit { descriptor: String },
    /// Request session statistics.
    Status,
}

/// Messages the daemon sends back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Request accepted (register, heartbeat, vote)
    Ack { detail: String },
    /// A critical operation awaits this device's vote
    VoteRequest {
        operation_id: uuid::Uuid,
        descriptor: String,
        timeout_ms: u64,
    },
    /// Terminal decision for a submitted operation
    Decision { decision: Decision },
    /// Session statistics
    Stats { stats: GateStats },
    /// Request could not be handled; the connection stays open
    Error { message: String },
}

impl ServerMessage {
    /// Serialize to one protocol line (no trailing newline).
    pub fn to_line(&self) -> String {
        // Serialization of these variants cannot fail; fall back to a
        // generic error frame rather than panicking.
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","message":"serialization failed"}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_tags() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"register","device_id":"phone","trust_weight":0.9}"#)
                .unwrap();
        assert!(matches!(msg, ClientMessage::Register { ref device_id, .. } if device_id == "phone"));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"submit","descriptor":"sudo apt install vlc"}"#)
                .unwrap();
        assert!(matches!(msg, ClientMessage::Submit { .. }));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"status"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Status));
    }

    #[test]
    fn test_vote_message_roundtrip() {
        let op = uuid::Uuid::new_v4();
        let msg = ClientMessage::Vote {
            operation_id: op,
            device_id: "yubikey".to_string(),
            decision: VoteChoice::Approve,
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"vote""#));
        assert!(json.contains(r#""decision":"approve""#));

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, ClientMessage::Vote { operation_id, .. } if operation_id == op));
    }

    #[test]
    fn test_server_message_to_line() {
        let line = ServerMessage::Ack {
            detail: "registered".to_string(),
        }
        .to_line();
        assert_eq!(line, r#"{"type":"ack","detail":"registered"}"#);
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_malformed_message_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }
}
