use async_trait::async_trait;
use thiserror::Error;

use crate::models::Voter;
use crate::voting::ChatState;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid reply address '{0}'")]
    InvalidAddress(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    // Only set when the voter's client renders rich text
    pub rich: Option<String>,
    pub chat_state: Option<ChatState>,
}

/// Indicator published by the bot for everyone to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionStatus {
    NoElection,
    AwaitingQuorum,
    QuorumReached,
}

/// What the voting core needs from the messaging channel.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, voter: &Voter, message: OutboundMessage) -> Result<(), TransportError>;

    async fn supports_rich_text(&self, voter: &Voter) -> bool;

    async fn supports_chat_state(&self, voter: &Voter) -> bool;

    async fn set_chat_state(&self, voter: &Voter, state: ChatState) -> Result<(), TransportError>;

    async fn publish_status(&self, status: ElectionStatus);
}
