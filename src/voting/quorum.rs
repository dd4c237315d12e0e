use log::info;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::db::{CompletedVoters, StoreError};
use crate::models::VoterId;

/// Default threshold: a third of the membership, rounded up.
pub fn default_threshold(members: usize) -> usize {
    members.div_ceil(3)
}

/// Outcome of recording one completed voter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumUpdate {
    pub completed: usize,
    pub threshold: usize,
    // True only for the completion that took the count to the threshold
    pub reached_now: bool,
}

impl QuorumUpdate {
    pub fn has_quorum(&self) -> bool {
        self.completed >= self.threshold
    }
}

/// Counts completed voters of one ballot and reports the quorum crossing.
pub struct QuorumTracker {
    ballot: String,
    threshold: usize,
    voters: Arc<dyn CompletedVoters>,
    // Serializes add-and-check so concurrent completions see one crossing
    lock: Mutex<()>,
}

impl QuorumTracker {
    pub fn new(ballot: impl Into<String>, threshold: usize, voters: Arc<dyn CompletedVoters>) -> Self {
        Self {
            ballot: ballot.into(),
            threshold,
            voters,
            lock: Mutex::new(()),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub async fn completed(&self) -> Result<usize, StoreError> {
        self.voters.completed_count(&self.ballot).await
    }

    pub async fn has_quorum(&self) -> Result<bool, StoreError> {
        Ok(self.completed().await? >= self.threshold)
    }

    pub async fn record_completion(&self, voter: &VoterId) -> Result<QuorumUpdate, StoreError> {
        let _guard = self.lock.lock().await;

        let before = self.voters.completed_count(&self.ballot).await?;
        self.voters.add_completed(&self.ballot, voter).await?;
        let after = self.voters.completed_count(&self.ballot).await?;

        let reached_now = before < self.threshold && after >= self.threshold;
        if reached_now {
            info!(
                "Quorum reached for ballot {} ({} of {} required voters)",
                self.ballot, after, self.threshold
            );
        }

        Ok(QuorumUpdate {
            completed: after,
            threshold: self.threshold,
            reached_now,
        })
    }
}
