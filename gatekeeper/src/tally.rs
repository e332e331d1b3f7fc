//! Vote tally - pure threshold arithmetic over collected votes.

use crate::types::{Vote, VoteChoice};

/// Outcome of tallying the votes collected so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyOutcome {
    /// Approve votes reached the threshold
    Approved,
    /// Approval is mathematically unreachable
    Denied,
    /// Neither; the caller handles timeout
    Pending,
}

/// Running counts for a vote set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteCounts {
    /// Approve votes
    pub approvals: usize,
    /// Deny votes
    pub denials: usize,
    /// Abstentions (consume a voter, count toward neither side)
    pub abstentions: usize,
}

impl VoteCounts {
    /// Count the choices in a vote set.
    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        let mut counts = Self::default();
        for vote in votes {
            match vote.choice {
                VoteChoice::Approve => counts.approvals += 1,
                VoteChoice::Deny => counts.denials += 1,
                VoteChoice::Abstain => counts.abstentions += 1,
            }
        }
        counts
    }

    /// Total votes cast.
    pub fn cast(&self) -> usize {
        self.approvals + self.denials + self.abstentions
    }
}

/// Decide the outcome of a vote set against a threshold.
///
/// `active_device_count` is the count captured when voting began, not
/// the live registry count. Approved once `approvals >= threshold`;
/// denied once the devices that have not yet voted could no longer
/// push approvals to the threshold. With no abstentions the denial
/// condition reduces to `denials > active_device_count - threshold`.
/// Never blocks; timeout handling belongs to the gate.
pub fn tally(counts: VoteCounts, active_device_count: usize, threshold: usize) -> TallyOutcome {
    if counts.approvals >= threshold {
        return TallyOutcome::Approved;
    }

    let remaining = active_device_count.saturating_sub(counts.cast());
    if counts.approvals + remaining < threshold {
        return TallyOutcome::Denied;
    }

    TallyOutcome::Pending
}
