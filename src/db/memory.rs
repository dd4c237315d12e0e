//! In-memory session and voter storage.
//!
//! Used by tests and when no database is wanted; everything is lost on
//! restart.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{CompletedVoters, SessionStore, StoreError};
use crate::models::{Session, SessionKey, VoterId};

#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionKey, Session>>,
    completed: RwLock<HashMap<String, HashSet<VoterId>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, key: &SessionKey) -> Result<Session, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(key).cloned().unwrap_or_default())
    }

    async fn replace(&self, key: &SessionKey, session: &Session) -> Result<(), StoreError> {
        let mut session = session.clone();
        session.recompute_fulfilled();
        let mut sessions = self.sessions.write().await;
        sessions.insert(key.clone(), session);
        Ok(())
    }
}

#[async_trait]
impl CompletedVoters for MemoryStore {
    async fn add_completed(&self, ballot: &str, voter: &VoterId) -> Result<bool, StoreError> {
        let mut completed = self.completed.write().await;
        Ok(completed
            .entry(ballot.to_string())
            .or_default()
            .insert(voter.clone()))
    }

    async fn completed_count(&self, ballot: &str) -> Result<usize, StoreError> {
        let completed = self.completed.read().await;
        Ok(completed.get(ballot).map(|voters| voters.len()).unwrap_or(0))
    }
}
