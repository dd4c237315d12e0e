use async_trait::async_trait;
use log::info;
use serenity::model::gateway::Activity;
use serenity::model::id::ChannelId;
use serenity::prelude::*;

use super::transport::{ElectionStatus, OutboundMessage, Transport, TransportError};
use crate::models::Voter;
use crate::voting::ChatState;

/// Direct messages on Discord.
///
/// Rich text goes out as Markdown; the only chat state Discord has is the
/// typing indicator, which clears itself once a message is sent.
pub struct DiscordTransport {
    ctx: Context,
    rich_text: bool,
}

impl DiscordTransport {
    pub fn new(ctx: Context, rich_text: bool) -> Self {
        Self { ctx, rich_text }
    }

    fn channel(voter: &Voter) -> Result<ChannelId, TransportError> {
        voter
            .address
            .parse::<u64>()
            .map(ChannelId)
            .map_err(|_| TransportError::InvalidAddress(voter.address.clone()))
    }
}

#[async_trait]
impl Transport for DiscordTransport {
    async fn send(&self, voter: &Voter, message: OutboundMessage) -> Result<(), TransportError> {
        let channel = Self::channel(voter)?;
        let content = message.rich.unwrap_or(message.text);
        channel
            .say(&self.ctx.http, content)
            .await
            .map_err(|e| TransportError::Delivery(e.to_string()))?;
        Ok(())
    }

    async fn supports_rich_text(&self, _voter: &Voter) -> bool {
        self.rich_text
    }

    async fn supports_chat_state(&self, _voter: &Voter) -> bool {
        true
    }

    async fn set_chat_state(&self, voter: &Voter, state: ChatState) -> Result<(), TransportError> {
        if state == ChatState::Composing {
            Self::channel(voter)?
                .broadcast_typing(&self.ctx.http)
                .await
                .map_err(|e| TransportError::Delivery(e.to_string()))?;
        }
        Ok(())
    }

    async fn publish_status(&self, status: ElectionStatus) {
        let activity = match status {
            ElectionStatus::NoElection => Activity::playing("no election running"),
            ElectionStatus::AwaitingQuorum => Activity::watching("for proxy votes"),
            ElectionStatus::QuorumReached => Activity::playing("quorum reached"),
        };
        info!("Publishing status {:?}", status);
        self.ctx.set_activity(activity).await;
    }
}
