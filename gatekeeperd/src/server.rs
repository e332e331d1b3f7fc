//! Connection handling for the consensus daemon.
//!
//! Each client connection is one task reading line-delimited JSON and
//! one writer task draining an outbound queue, so vote requests can be
//! pushed to a device while it is idle. Registered device connections
//! subscribe to the gate's vote-request broadcast.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use gatekeeper::{Device, Gate, GatekeeperConfig, OperationRequest, Vote, VoteOutcome, VoteSolicitor};

use crate::protocol::{ClientMessage, ServerMessage};

/// Capacity of the vote-request broadcast; slow devices miss old
/// requests rather than stalling the gate.
const VOTE_BROADCAST_CAPACITY: usize = 64;

/// Capacity of each connection's outbound queue.
const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Solicitor that fans vote requests out to registered connections.
struct BroadcastSolicitor {
    tx: broadcast::Sender<ServerMessage>,
    timeout_ms: u64,
}

#[async_trait::async_trait]
impl VoteSolicitor for BroadcastSolicitor {
    async fn solicit(&self, request: &OperationRequest, devices: &[Device]) {
        let message = ServerMessage::VoteRequest {
            operation_id: request.operation_id,
            descriptor: request.descriptor.clone(),
            timeout_ms: self.timeout_ms,
        };

        // Send fails only when no device connection is subscribed;
        // the vote window then simply times out (fail-secure).
        match self.tx.send(message) {
            Ok(receivers) => {
                info!(
                    operation_id = %request.operation_id,
                    devices = devices.len(),
                    connections = receivers,
                    "Vote request broadcast"
                );
            }
            Err(_) => {
                warn!(
                    operation_id = %request.operation_id,
                    "No device connections to poll; operation will time out"
                );
            }
        }
    }
}

/// The consensus daemon: a gate plus its connection fan-out.
pub struct Daemon {
    gate: Gate,
    vote_requests: broadcast::Sender<ServerMessage>,
}

impl Daemon {
    /// Build a daemon around a freshly configured gate.
    pub fn new(config: GatekeeperConfig) -> Self {
        let (vote_requests, _) = broadcast::channel(VOTE_BROADCAST_CAPACITY);

        let solicitor = Arc::new(BroadcastSolicitor {
            tx: vote_requests.clone(),
            timeout_ms: config.gate.vote_timeout_ms,
        });

        Self {
            gate: Gate::with_config(config).with_solicitor(solicitor),
            vote_requests,
        }
    }

    /// The gate behind this daemon.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Serve one client connection until it closes.
    pub async fn handle_connection<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE_CAPACITY);

        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let mut line = message.to_line();
                line.push('\n');
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let mut forwarder: Option<tokio::task::JoinHandle<()>> = None;
        let mut reader = BufReader::new(read_half).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            if line.trim().is_empty() {
                continue;
            }

            let message = match serde_json::from_str::<ClientMessage>(&line) {
                Ok(message) => message,
                Err(e) => {
                    debug!(error = %e, "Malformed client frame");
                    let _ = out_tx
                        .send(ServerMessage::Error {
                            message: format!("malformed message: {}", e),
                        })
                        .await;
                    continue;
                }
            };

            Arc::clone(&self)
                .dispatch(message, &out_tx, &mut forwarder)
                .await;
        }

        if let Some(task) = forwarder {
            task.abort();
        }
        drop(out_tx);
        let _ = writer.await;
    }

    async fn dispatch(
        self: Arc<Self>,
        message: ClientMessage,
        out_tx: &mpsc::Sender<ServerMessage>,
        forwarder: &mut Option<tokio::task::JoinHandle<()>>,
    ) {
        match message {
            ClientMessage::Register {
                device_id,
                trust_weight,
            } => {
                self.gate
                    .registry()
                    .register(device_id.as_str(), trust_weight)
                    .await;

                // A registered device connection starts receiving
                // vote requests.
                if forwarder.is_none() {
                    let mut requests = self.vote_requests.subscribe();
                    let out = out_tx.clone();
                    *forwarder = Some(tokio::spawn(async move {
                        loop {
                            match requests.recv().await {
                                Ok(request) => {
                                    if out.send(request).await.is_err() {
                                        break;
                                    }
                                }
                                Err(broadcast::error::RecvError::Lagged(missed)) => {
                                    warn!(missed, "Device connection lagged behind vote requests");
                                }
                                Err(broadcast::error::RecvError::Closed) => break,
                            }
                        }
                    }));
                }

                let _ = out_tx
                    .send(ServerMessage::Ack {
                        detail: format!("registered {}", device_id),
                    })
                    .await;
            }

            ClientMessage::Heartbeat { device_id } => {
                self.gate.registry().heartbeat(&device_id).await;
                let _ = out_tx
                    .send(ServerMessage::Ack {
                        detail: "heartbeat".to_string(),
                    })
                    .await;
            }

            ClientMessage::Vote {
                operation_id,
                device_id,
                decision,
            } => {
                let vote = Vote::new(operation_id, device_id, decision);
                let reply = match self.gate.cast_vote(vote).await {
                    Ok(VoteOutcome::Recorded(_)) => ServerMessage::Ack {
                        detail: "vote recorded".to_string(),
                    },
                    Ok(VoteOutcome::Late) => ServerMessage::Ack {
                        detail: "vote arrived after decision; discarded".to_string(),
                    },
                    Ok(VoteOutcome::NotEligible) => ServerMessage::Ack {
                        detail: "device not in quorum snapshot; vote not counted".to_string(),
                    },
                    Err(e) => ServerMessage::Error {
                        message: e.to_string(),
                    },
                };
                let _ = out_tx.send(reply).await;
            }

            ClientMessage::Submit { descriptor } => {
                // Resolve in a separate task so this connection can
                // keep sending heartbeats or votes meanwhile.
                let daemon = self;
                let out = out_tx.clone();
                tokio::spawn(async move {
                    let submitted = daemon.gate.submit(descriptor).await;
                    let decision = submitted.decision().await;
                    let _ = out.send(ServerMessage::Decision { decision }).await;
                });
            }

            ClientMessage::Status => {
                let stats = self.gate.stats().await;
                let _ = out_tx.send(ServerMessage::Stats { stats }).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper::config::GateConfig;
    use gatekeeper::Outcome;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn test_daemon(threshold: usize, timeout_ms: u64) -> Arc<Daemon> {
        let config = GatekeeperConfig {
            gate: GateConfig {
                approval_threshold: threshold,
                vote_timeout_ms: timeout_ms,
                decision_history: 100,
            },
            ..GatekeeperConfig::new("test-daemon")
        };
        Arc::new(Daemon::new(config))
    }

    async fn connect(daemon: &Arc<Daemon>) -> tokio::io::DuplexStream {
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(Arc::clone(daemon).handle_connection(server));
        client
    }

    async fn send(client: &mut tokio::io::DuplexStream, line: &str) {
        client.write_all(line.as_bytes()).await.unwrap();
        client.write_all(b"\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_register_and_heartbeat_over_wire() {
        let daemon = test_daemon(2, 1_000);
        let client = connect(&daemon).await;
        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(b"{\"type\":\"register\",\"device_id\":\"phone\",\"trust_weight\":0.9}\n")
            .await
            .unwrap();
        let reply: ServerMessage =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(reply, ServerMessage::Ack { ref detail } if detail.contains("phone")));

        write
            .write_all(b"{\"type\":\"heartbeat\",\"device_id\":\"phone\"}\n")
            .await
            .unwrap();
        let reply: ServerMessage =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(reply, ServerMessage::Ack { .. }));

        assert!(daemon.gate().registry().get("phone").await.is_some());
    }

    #[tokio::test]
    async fn test_submit_normal_resolves_immediately() {
        let daemon = test_daemon(2, 1_000);
        let mut client = connect(&daemon).await;

        send(&mut client, r#"{"type":"submit","descriptor":"ls -la"}"#).await;

        let (read, _write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();
        let reply: ServerMessage =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();

        match reply {
            ServerMessage::Decision { decision } => {
                assert_eq!(decision.outcome, Outcome::Approved);
                assert_eq!(decision.votes_for, 0);
            }
            other => panic!("expected decision, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_critical_submit_with_device_votes() {
        let daemon = test_daemon(2, 2_000);

        // Two device connections register and await vote requests.
        let device_a = connect(&daemon).await;
        let (read_a, mut write_a) = tokio::io::split(device_a);
        let mut lines_a = BufReader::new(read_a).lines();
        write_a
            .write_all(b"{\"type\":\"register\",\"device_id\":\"a\",\"trust_weight\":0.9}\n")
            .await
            .unwrap();
        lines_a.next_line().await.unwrap();

        let device_b = connect(&daemon).await;
        let (read_b, mut write_b) = tokio::io::split(device_b);
        let mut lines_b = BufReader::new(read_b).lines();
        write_b
            .write_all(b"{\"type\":\"register\",\"device_id\":\"b\",\"trust_weight\":0.9}\n")
            .await
            .unwrap();
        lines_b.next_line().await.unwrap();

        // An operation source submits a critical command.
        let source = connect(&daemon).await;
        let (read_s, mut write_s) = tokio::io::split(source);
        let mut lines_s = BufReader::new(read_s).lines();
        write_s
            .write_all(b"{\"type\":\"submit\",\"descriptor\":\"sudo apt install vlc\"}\n")
            .await
            .unwrap();

        // Both devices receive the vote request and approve.
        for (lines, write, id) in [
            (&mut lines_a, &mut write_a, "a"),
            (&mut lines_b, &mut write_b, "b"),
        ] {
            let request: ServerMessage =
                serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            let ServerMessage::VoteRequest { operation_id, .. } = request else {
                panic!("expected vote request");
            };

            let vote = serde_json::json!({
                "type": "vote",
                "operation_id": operation_id,
                "device_id": id,
                "decision": "approve",
            });
            write
                .write_all(format!("{}\n", vote).as_bytes())
                .await
                .unwrap();
            let ack: ServerMessage =
                serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert!(matches!(ack, ServerMessage::Ack { .. }));
        }

        // The submitter gets an approval.
        let reply: ServerMessage =
            serde_json::from_str(&lines_s.next_line().await.unwrap().unwrap()).unwrap();
        match reply {
            ServerMessage::Decision { decision } => {
                assert_eq!(decision.outcome, Outcome::Approved);
                assert_eq!(decision.votes_for, 2);
            }
            other => panic!("expected decision, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection_open() {
        let daemon = test_daemon(2, 1_000);
        let mut client = connect(&daemon).await;

        send(&mut client, "this is not json").await;
        send(&mut client, r#"{"type":"status"}"#).await;

        let (read, _write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();

        let reply: ServerMessage =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(reply, ServerMessage::Error { .. }));

        let reply: ServerMessage =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(reply, ServerMessage::Stats { .. }));
    }
}
