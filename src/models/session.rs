use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::ballot::Ballot;

/// Identifier of a member as known to the transport (a Discord user id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoterId(pub String);

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VoterId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VoterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A member we are talking to: who they are and where replies go.
#[derive(Debug, Clone)]
pub struct Voter {
    pub id: VoterId,
    pub name: String,
    // Transport-specific reply address (the DM channel id on Discord)
    pub address: String,
}

/// Storage key of a session: `<ballot-id>:<voter-id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub ballot: String,
    pub voter: VoterId,
}

impl SessionKey {
    pub fn new(ballot: impl Into<String>, voter: VoterId) -> Self {
        Self {
            ballot: ballot.into(),
            voter,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ballot, self.voter)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    NotStarted,
    Started,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::Started => "started",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            // Older records wrote an empty status for sessions never started
            "" | "not_started" => Some(SessionStatus::NotStarted),
            "started" => Some(SessionStatus::Started),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

/// A recorded answer. Unlimited sections store yes/no per item name,
/// seat-limited sections store the chosen candidate per seat index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Vote {
    Yes,
    No,
    Chose(String),
}

impl Vote {
    pub fn is_affirmative(&self) -> bool {
        !matches!(self, Vote::No)
    }
}

impl From<String> for Vote {
    fn from(value: String) -> Self {
        match value.as_str() {
            "yes" => Vote::Yes,
            "no" => Vote::No,
            _ => Vote::Chose(value),
        }
    }
}

impl From<Vote> for String {
    fn from(vote: Vote) -> Self {
        match vote {
            Vote::Yes => "yes".to_string(),
            Vote::No => "no".to_string(),
            Vote::Chose(name) => name,
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vote::Yes => write!(f, "yes"),
            Vote::No => write!(f, "no"),
            Vote::Chose(name) => write!(f, "{}", name),
        }
    }
}

pub type SectionVotes = BTreeMap<String, Vote>;

/// One voter's progress against one ballot.
///
/// `fulfilled` is derived from `votes` and recomputed by every mutation;
/// there is no way to set it directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    status: SessionStatus,
    votes: BTreeMap<String, SectionVotes>,
    fulfilled: BTreeMap<String, u32>,
}

impl Session {
    pub fn from_parts(status: SessionStatus, votes: BTreeMap<String, SectionVotes>) -> Self {
        let mut session = Self {
            status,
            votes,
            fulfilled: BTreeMap::new(),
        };
        session.recompute_fulfilled();
        session
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn votes(&self) -> &BTreeMap<String, SectionVotes> {
        &self.votes
    }

    pub fn section_votes(&self, section: &str) -> Option<&SectionVotes> {
        self.votes.get(section)
    }

    pub fn vote(&self, section: &str, key: &str) -> Option<&Vote> {
        self.votes.get(section).and_then(|votes| votes.get(key))
    }

    pub fn fulfilled(&self, section: &str) -> u32 {
        self.fulfilled.get(section).copied().unwrap_or(0)
    }

    pub fn fulfilled_map(&self) -> &BTreeMap<String, u32> {
        &self.fulfilled
    }

    /// First start: clear any answers and open an empty map per section.
    pub fn start(&mut self, ballot: &Ballot) {
        self.status = SessionStatus::Started;
        self.votes = ballot
            .sections
            .iter()
            .map(|section| (section.title.clone(), SectionVotes::new()))
            .collect();
        self.recompute_fulfilled();
    }

    /// Reopen a completed session; prior answers stay as history.
    pub fn restart(&mut self) {
        self.status = SessionStatus::Started;
    }

    pub fn complete(&mut self) {
        self.status = SessionStatus::Completed;
    }

    pub fn record(&mut self, section: &str, key: &str, vote: Vote) {
        self.votes
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), vote);
        self.recompute_fulfilled();
    }

    pub fn abstain(&mut self, section: &str, key: &str) {
        if let Some(votes) = self.votes.get_mut(section) {
            votes.remove(key);
        }
        self.recompute_fulfilled();
    }

    pub(crate) fn recompute_fulfilled(&mut self) {
        self.fulfilled = self
            .votes
            .iter()
            .map(|(section, votes)| {
                let count = votes.values().filter(|vote| vote.is_affirmative()).count();
                (section.clone(), count as u32)
            })
            .collect();
    }
}
