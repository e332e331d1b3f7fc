//! Gate orchestration - classify, solicit votes, tally, decide.
//!
//! State machine per operation:
//!
//! ```text
//! RECEIVED -> CLASSIFIED -> AUTO_APPROVED
//!                        -> AWAITING_VOTES -> APPROVED
//!                                          -> DENIED
//!                                          -> TIMED_OUT
//! ```
//!
//! Votes are applied in arrival order and the tally recomputed after
//! each one; the first transition out of pending wins. A single
//! cancellable timer per operation enforces the vote window, and any
//! ambiguity resolves to denial.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::audit::{AuditKind, AuditLog, GateStats};
use crate::classifier::OperationClassifier;
use crate::config::GatekeeperConfig;
use crate::registry::DeviceRegistry;
use crate::tally::{tally, TallyOutcome, VoteCounts};
use crate::types::{
    Classification, Decision, Device, GateError, OperationRequest, Outcome, Result, Vote,
};

/// Outward seam for notifying devices of a pending vote.
#[async_trait::async_trait]
pub trait VoteSolicitor: Send + Sync {
    /// Broadcast a vote request to the snapshot of active devices.
    ///
    /// Implementations must not block vote collection; spawn long
    /// deliveries internally.
    async fn solicit(&self, request: &OperationRequest, devices: &[Device]);
}

/// Default solicitor that only logs the broadcast.
pub struct LoggingSolicitor;

#[async_trait::async_trait]
impl VoteSolicitor for LoggingSolicitor {
    async fn solicit(&self, request: &OperationRequest, devices: &[Device]) {
        info!(
            operation_id = %request.operation_id,
            descriptor = %request.descriptor,
            devices = devices.len(),
            "Vote request broadcast"
        );
    }
}

/// How a cast vote was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Counted; the tally after this vote
    Recorded(TallyOutcome),
    /// Arrived after the terminal decision; discarded and audited
    Late,
    /// Device was not in the quorum snapshot; audited, not counted
    NotEligible,
}

/// An operation currently awaiting votes.
struct PendingOperation {
    request: OperationRequest,
    /// Device IDs captured when voting began
    eligible: HashSet<String>,
    /// Active device count captured when voting began
    active_count: usize,
    /// Latest vote per device (last write wins)
    votes: HashMap<String, Vote>,
    decision_tx: oneshot::Sender<Decision>,
    timeout_task: tokio::task::JoinHandle<()>,
}

/// Bounded history of terminal decisions, kept for late-vote detection.
struct DecisionHistory {
    map: HashMap<uuid::Uuid, Decision>,
    order: VecDeque<uuid::Uuid>,
    capacity: usize,
}

impl DecisionHistory {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn insert(&mut self, decision: Decision) {
        self.order.push_back(decision.operation_id);
        self.map.insert(decision.operation_id, decision);

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
    }

    fn contains(&self, operation_id: &uuid::Uuid) -> bool {
        self.map.contains_key(operation_id)
    }

    fn get(&self, operation_id: &uuid::Uuid) -> Option<&Decision> {
        self.map.get(operation_id)
    }
}

/// State shared between the gate, its vote path, and per-operation
/// timeout timers.
struct GateShared {
    pending: RwLock<HashMap<uuid::Uuid, PendingOperation>>,
    decided: RwLock<DecisionHistory>,
    audit: Arc<AuditLog>,
}

impl GateShared {
    /// Record a terminal decision and wake the submitter. The pending
    /// entry must already be removed from the map.
    async fn finalize(&self, op: PendingOperation, outcome: Outcome, counts: VoteCounts) {
        let decision = Decision {
            operation_id: op.request.operation_id,
            outcome,
            classification: Classification::Critical,
            votes_for: counts.approvals,
            votes_against: counts.denials,
            active_devices: op.active_count,
            decided_at: Utc::now(),
        };

        info!(
            operation_id = %decision.operation_id,
            outcome = ?decision.outcome,
            votes_for = decision.votes_for,
            votes_against = decision.votes_against,
            "Decision recorded"
        );

        self.audit
            .record(
                decision.operation_id,
                AuditKind::Decision {
                    decision: decision.clone(),
                },
            )
            .await;

        {
            let mut decided = self.decided.write().await;
            decided.insert(decision.clone());
        }

        // The receiver may have been dropped by an impatient caller.
        let _ = op.decision_tx.send(decision);
    }

    /// Timer expiry path: resolve to TIMED_OUT if still pending.
    async fn finalize_timeout(&self, operation_id: uuid::Uuid) {
        let op = {
            let mut pending = self.pending.write().await;
            pending.remove(&operation_id)
        };

        if let Some(op) = op {
            let counts = VoteCounts::from_votes(op.votes.values());
            warn!(
                operation_id = %operation_id,
                votes_cast = counts.cast(),
                "Vote window elapsed while pending; failing secure"
            );
            self.finalize(op, Outcome::TimedOut, counts).await;
        }
    }
}

/// The approval gate.
///
/// Owns the classifier and orchestrates registry snapshots, vote
/// collection, tallying, and the audit trail. Concurrent operations
/// are independent; only the registry is shared between them.
pub struct Gate {
    config: GatekeeperConfig,
    classifier: OperationClassifier,
    registry: Arc<DeviceRegistry>,
    solicitor: Arc<dyn VoteSolicitor>,
    shared: Arc<GateShared>,
}

impl Gate {
    /// Create a gate with default configuration.
    pub fn new() -> Self {
        Self::with_config(GatekeeperConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(config: GatekeeperConfig) -> Self {
        let audit = Arc::new(AuditLog::with_config(config.audit.clone()));

        Self {
            classifier: OperationClassifier::with_config(config.classifier.clone()),
            registry: Arc::new(DeviceRegistry::with_config(config.registry.clone())),
            solicitor: Arc::new(LoggingSolicitor),
            shared: Arc::new(GateShared {
                pending: RwLock::new(HashMap::new()),
                decided: RwLock::new(DecisionHistory::new(config.gate.decision_history)),
                audit,
            }),
            config,
        }
    }

    /// Replace the vote solicitor.
    pub fn with_solicitor(mut self, solicitor: Arc<dyn VoteSolicitor>) -> Self {
        self.solicitor = solicitor;
        self
    }

    /// The device registry backing this gate.
    pub fn registry(&self) -> Arc<DeviceRegistry> {
        Arc::clone(&self.registry)
    }

    /// The audit log backing this gate.
    pub fn audit(&self) -> Arc<AuditLog> {
        Arc::clone(&self.shared.audit)
    }

    /// Session statistics.
    pub async fn stats(&self) -> GateStats {
        self.shared.audit.stats().await
    }

    /// Submit an operation descriptor for gating.
    ///
    /// Normal operations resolve immediately; critical operations
    /// open a vote window. Await the returned handle for the terminal
    /// decision.
    pub async fn submit(&self, descriptor: impl Into<String>) -> SubmittedOperation {
        let descriptor = descriptor.into();
        let classification = self.classifier.classify(&descriptor);
        let request = OperationRequest::new(descriptor, classification);

        debug!(
            operation_id = %request.operation_id,
            descriptor = %request.descriptor,
            classification = ?classification,
            "Operation received"
        );

        match classification {
            Classification::Normal => self.auto_approve(request).await,
            Classification::Critical => self.await_votes(request).await,
        }
    }

    /// Terminal path for NORMAL operations: no votes solicited.
    async fn auto_approve(&self, request: OperationRequest) -> SubmittedOperation {
        let decision = Decision::auto_approved(request.operation_id);

        info!(
            operation_id = %request.operation_id,
            descriptor = %request.descriptor,
            "Operation auto-approved"
        );

        self.shared
            .audit
            .record(
                request.operation_id,
                AuditKind::Decision {
                    decision: decision.clone(),
                },
            )
            .await;

        {
            let mut decided = self.shared.decided.write().await;
            decided.insert(decision.clone());
        }

        SubmittedOperation {
            request,
            resolution: Resolution::Ready(decision),
        }
    }

    /// Open the vote window for a CRITICAL operation.
    async fn await_votes(&self, request: OperationRequest) -> SubmittedOperation {
        let devices = self.registry.active_devices(Utc::now()).await;
        let active_count = devices.len();
        let threshold = self.config.gate.approval_threshold;

        // Quorum structurally unreachable: fewer active devices than
        // the threshold can never approve. Resolve without waiting.
        if active_count < threshold {
            warn!(
                operation_id = %request.operation_id,
                active_devices = active_count,
                threshold = threshold,
                "Quorum structurally unreachable; failing secure"
            );

            let decision = Decision {
                operation_id: request.operation_id,
                outcome: Outcome::TimedOut,
                classification: Classification::Critical,
                votes_for: 0,
                votes_against: 0,
                active_devices: active_count,
                decided_at: Utc::now(),
            };

            self.shared
                .audit
                .record(
                    request.operation_id,
                    AuditKind::Decision {
                        decision: decision.clone(),
                    },
                )
                .await;

            {
                let mut decided = self.shared.decided.write().await;
                decided.insert(decision.clone());
            }

            return SubmittedOperation {
                request,
                resolution: Resolution::Ready(decision),
            };
        }

        let (decision_tx, decision_rx) = oneshot::channel();
        let operation_id = request.operation_id;

        let timeout_task = {
            let shared = Arc::clone(&self.shared);
            let timeout = tokio::time::Duration::from_millis(self.config.gate.vote_timeout_ms);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                shared.finalize_timeout(operation_id).await;
            })
        };

        let pending = PendingOperation {
            request: request.clone(),
            eligible: devices.iter().map(|d| d.id.clone()).collect(),
            active_count,
            votes: HashMap::new(),
            decision_tx,
            timeout_task,
        };

        {
            let mut map = self.shared.pending.write().await;
            map.insert(operation_id, pending);
        }

        self.shared
            .audit
            .record(
                operation_id,
                AuditKind::VoteRequested {
                    descriptor: request.descriptor.clone(),
                    devices_polled: active_count,
                },
            )
            .await;

        self.solicitor.solicit(&request, &devices).await;

        SubmittedOperation {
            request,
            resolution: Resolution::Awaiting(decision_rx),
        }
    }

    /// Apply a vote to a pending operation.
    ///
    /// Votes after the terminal decision are discarded and audited as
    /// late; votes from devices outside the quorum snapshot are
    /// audited and never counted. A repeat vote from the same device
    /// overwrites its earlier one.
    pub async fn cast_vote(&self, vote: Vote) -> Result<VoteOutcome> {
        let operation_id = vote.operation_id;

        let (finalized, outcome) = {
            let mut pending = self.shared.pending.write().await;

            let Some(op) = pending.get_mut(&operation_id) else {
                drop(pending);
                return self.handle_missing_operation(vote).await;
            };

            if !op.eligible.contains(&vote.device_id) {
                drop(pending);
                debug!(
                    operation_id = %operation_id,
                    device_id = %vote.device_id,
                    "Vote from device outside quorum snapshot"
                );
                self.shared
                    .audit
                    .record(operation_id, AuditKind::UnknownDevice { vote })
                    .await;
                return Ok(VoteOutcome::NotEligible);
            }

            debug!(
                operation_id = %operation_id,
                device_id = %vote.device_id,
                choice = ?vote.choice,
                "Vote recorded"
            );
            op.votes.insert(vote.device_id.clone(), vote);

            let counts = VoteCounts::from_votes(op.votes.values());
            let outcome = tally(counts, op.active_count, self.config.gate.approval_threshold);

            match outcome {
                TallyOutcome::Pending => (None, outcome),
                TallyOutcome::Approved | TallyOutcome::Denied => {
                    // First transition out of pending wins; remove the
                    // entry while still holding the write lock.
                    let op = pending.remove(&operation_id).expect("entry exists");
                    (Some((op, counts)), outcome)
                }
            }
        };

        if let Some((op, counts)) = finalized {
            op.timeout_task.abort();
            let terminal = match outcome {
                TallyOutcome::Approved => Outcome::Approved,
                TallyOutcome::Denied => Outcome::Denied,
                TallyOutcome::Pending => unreachable!("pending is not terminal"),
            };
            self.shared.finalize(op, terminal, counts).await;
        }

        Ok(VoteOutcome::Recorded(outcome))
    }

    /// Vote for an operation with no pending entry: either late or
    /// unknown.
    async fn handle_missing_operation(&self, vote: Vote) -> Result<VoteOutcome> {
        let operation_id = vote.operation_id;
        let is_decided = {
            let decided = self.shared.decided.read().await;
            decided.contains(&operation_id)
        };

        if is_decided {
            warn!(
                operation_id = %operation_id,
                device_id = %vote.device_id,
                "Late vote discarded; decision already recorded"
            );
            self.shared
                .audit
                .record(operation_id, AuditKind::LateVote { vote })
                .await;
            return Ok(VoteOutcome::Late);
        }

        Err(GateError::UnknownOperation(operation_id))
    }

    /// The terminal decision for an operation, if one was recorded.
    pub async fn decision_for(&self, operation_id: uuid::Uuid) -> Option<Decision> {
        let decided = self.shared.decided.read().await;
        decided.get(&operation_id).cloned()
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolution state of a submitted operation.
enum Resolution {
    Ready(Decision),
    Awaiting(oneshot::Receiver<Decision>),
}

/// Handle returned by [`Gate::submit`].
pub struct SubmittedOperation {
    /// The immutable operation request
    pub request: OperationRequest,
    resolution: Resolution,
}

impl SubmittedOperation {
    /// Whether the decision was already terminal at submit time.
    pub fn is_resolved(&self) -> bool {
        matches!(self.resolution, Resolution::Ready(_))
    }

    /// Await the terminal decision.
    ///
    /// If the gate is torn down mid-vote the handle resolves to a
    /// timed-out decision rather than an error (fail-secure).
    pub async fn decision(self) -> Decision {
        let operation_id = self.request.operation_id;
        match self.resolution {
            Resolution::Ready(decision) => decision,
            Resolution::Awaiting(rx) => rx.await.unwrap_or_else(|_| Decision {
                operation_id,
                outcome: Outcome::TimedOut,
                classification: Classification::Critical,
                votes_for: 0,
                votes_against: 0,
                active_devices: 0,
                decided_at: Utc::now(),
            }),
        }
    }
}
