mod discord;
pub mod transport;

pub use discord::DiscordTransport;
pub use transport::{ElectionStatus, OutboundMessage, Transport, TransportError};

use crate::models::{Voter, VoterId};
use crate::roster::Roster;
use crate::voting::{ChatState, Conversation, Prompt, VotingContext};
use crate::AppState;
use log::{error, info, warn};
use serenity::model::application::interaction::Interaction;
use serenity::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One message from a voter.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub voter: Voter,
    pub body: String,
}

/// Routes voter messages to their conversation.
///
/// Conversations live here while they are open and are dropped when they
/// finish or go idle. Messages from the same voter are handled one at a
/// time; different voters proceed in parallel.
pub struct Dispatcher {
    context: Arc<VotingContext>,
    roster: Arc<Roster>,
    conversations: Mutex<HashMap<VoterId, Conversation>>,
    voter_locks: Mutex<HashMap<VoterId, Arc<Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(context: Arc<VotingContext>, roster: Arc<Roster>) -> Self {
        Self {
            context,
            roster,
            conversations: Mutex::new(HashMap::new()),
            voter_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn voter_lock(&self, voter: &VoterId) -> Arc<Mutex<()>> {
        let mut locks = self.voter_locks.lock().await;
        Arc::clone(
            locks
                .entry(voter.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    // Drops the voter's lock entry unless another message is waiting on it
    async fn release_lock(&self, voter: &VoterId, lock: &Arc<Mutex<()>>) {
        let mut locks = self.voter_locks.lock().await;
        if Arc::strong_count(lock) <= 2 {
            locks.remove(voter);
        }
    }

    pub async fn dispatch(&self, transport: &dyn Transport, inbound: Inbound) {
        let voter = &inbound.voter;

        if !self.roster.is_member(&voter.id).await {
            warn!("Unknown user: {} ({})", voter.name, voter.id);
            return;
        }

        // A retransmit waits here until the previous message is done
        let lock = self.voter_lock(&voter.id).await;
        let _guard = lock.lock().await;

        let existing = self.conversations.lock().await.remove(&voter.id);
        let mut conversation = match existing {
            Some(conversation) => conversation,
            None => {
                let conversation = Conversation::new(voter.clone());
                info!("Opened conversation {} with {}", conversation.id(), voter.id);
                conversation
            }
        };

        if conversation.is_new() && transport.supports_chat_state(voter).await {
            if let Err(e) = transport.set_chat_state(voter, ChatState::Composing).await {
                warn!("Failed to send chat state to {}: {}", voter.id, e);
            }
        }

        match conversation.handle(&self.context, &inbound.body).await {
            Ok(turn) => {
                self.deliver(transport, voter, &turn.prompts).await;

                if turn.quorum.is_some_and(|update| update.reached_now) {
                    transport.publish_status(ElectionStatus::QuorumReached).await;
                }

                if turn.finished {
                    info!("Closed conversation {} with {}", conversation.id(), voter.id);
                    self.release_lock(&voter.id, &lock).await;
                    return;
                }
            }
            Err(e) => {
                error!("Failed to handle message from {}: {}", voter.id, e);
                self.deliver(transport, voter, &[Prompt::TemporaryFailure]).await;
            }
        }

        self.conversations
            .lock()
            .await
            .insert(voter.id.clone(), conversation);
    }

    async fn deliver(&self, transport: &dyn Transport, voter: &Voter, prompts: &[Prompt]) {
        let rich = transport.supports_rich_text(voter).await;
        let chat_state = transport.supports_chat_state(voter).await;

        for prompt in prompts {
            let rendered = prompt.render();
            let message = OutboundMessage {
                text: rendered.text,
                rich: if rich { rendered.rich } else { None },
                chat_state: chat_state.then(|| prompt.chat_state()),
            };
            if let Err(e) = transport.send(voter, message).await {
                error!("Failed to send message to {}: {}", voter.id, e);
                break;
            }
        }
    }

    /// Drop open conversations idle for at least `max_idle`. The stored
    /// sessions are untouched, so those voters can resume later.
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<VoterId> {
        let mut conversations = self.conversations.lock().await;
        let idle: Vec<VoterId> = conversations
            .iter()
            .filter(|(_, conversation)| conversation.idle_for() >= max_idle)
            .map(|(voter, _)| voter.clone())
            .collect();
        let mut locks = self.voter_locks.lock().await;
        for voter in &idle {
            if let Some(conversation) = conversations.remove(voter) {
                info!("Evicted idle conversation {} with {}", conversation.id(), voter);
            }
            if locks.get(voter).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(voter);
            }
        }
        idle
    }

    pub async fn open_conversations(&self) -> usize {
        self.conversations.lock().await.len()
    }
}

// Interaction handler entry point
pub async fn handle_interaction(state: &AppState, ctx: &Context, interaction: Interaction) {
    let result = match interaction {
        Interaction::ApplicationCommand(command) => {
            crate::commands::handle_command(state, ctx, &command).await
        }
        _ => {
            warn!("Unhandled interaction type: {:?}", interaction.kind());
            Ok(())
        }
    };

    if let Err(why) = result {
        error!("Interaction handler error: {:?}", why);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, SessionStore};
    use crate::models::{Ballot, SessionKey, SessionStatus};
    use crate::voting::export::ResultExporter;
    use crate::voting::{Election, QuorumTracker};
    use async_trait::async_trait;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingTransport {
        rich_text: bool,
        sent: std::sync::Mutex<Vec<(VoterId, OutboundMessage)>>,
        chat_states: std::sync::Mutex<Vec<ChatState>>,
        statuses: std::sync::Mutex<Vec<ElectionStatus>>,
    }

    impl RecordingTransport {
        fn texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, m)| m.text.clone()).collect()
        }

        fn clear(&self) {
            self.sent.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, voter: &Voter, message: OutboundMessage) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push((voter.id.clone(), message));
            Ok(())
        }

        async fn supports_rich_text(&self, _voter: &Voter) -> bool {
            self.rich_text
        }

        async fn supports_chat_state(&self, _voter: &Voter) -> bool {
            true
        }

        async fn set_chat_state(&self, _voter: &Voter, state: ChatState) -> Result<(), TransportError> {
            self.chat_states.lock().unwrap().push(state);
            Ok(())
        }

        async fn publish_status(&self, status: ElectionStatus) {
            self.statuses.lock().unwrap().push(status);
        }
    }

    struct Fixture {
        dispatcher: Arc<Dispatcher>,
        store: Arc<MemoryStore>,
        dir: TempDir,
    }

    fn fixture(threshold: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("roster.txt"), "1\n2\n3\n").unwrap();
        std::fs::write(dir.path().join("admins.txt"), "").unwrap();

        let mut ballot = Ballot::parse(
            r#"{"date": "2026-11-05", "sections": [
                {"title": "Membership", "items": [{"name": "A"}, {"name": "B"}]}
            ]}"#,
        )
        .unwrap();
        ballot.id = "2026".to_string();

        let store = Arc::new(MemoryStore::new());
        let election = Election {
            ballot: Arc::new(ballot),
            quorum: QuorumTracker::new("2026", threshold, store.clone()),
            exporter: ResultExporter::new(dir.path(), "2026").unwrap(),
        };
        let context = Arc::new(VotingContext {
            election: Some(Arc::new(election)),
            sessions: store.clone(),
        });
        let roster = Arc::new(Roster::load(dir.path()).unwrap());

        Fixture {
            dispatcher: Arc::new(Dispatcher::new(context, roster)),
            store,
            dir,
        }
    }

    fn inbound(id: &str, body: &str) -> Inbound {
        Inbound {
            voter: Voter {
                id: VoterId::from(id),
                name: format!("Member {}", id),
                address: format!("dm-{}", id),
            },
            body: body.to_string(),
        }
    }

    async fn vote_through(f: &Fixture, transport: &RecordingTransport, id: &str) {
        f.dispatcher.dispatch(transport, inbound(id, "hi")).await;
        for _ in 0..3 {
            f.dispatcher.dispatch(transport, inbound(id, "yes")).await;
        }
    }

    #[tokio::test]
    async fn non_members_are_ignored() {
        let f = fixture(2);
        let transport = RecordingTransport::default();
        f.dispatcher.dispatch(&transport, inbound("99", "hi")).await;

        assert!(transport.texts().is_empty());
        assert_eq!(f.dispatcher.open_conversations().await, 0);
    }

    #[tokio::test]
    async fn conversation_is_released_when_finished() {
        let f = fixture(10);
        let transport = RecordingTransport::default();

        f.dispatcher.dispatch(&transport, inbound("1", "hi")).await;
        assert_eq!(f.dispatcher.open_conversations().await, 1);
        assert_eq!(transport.chat_states.lock().unwrap().as_slice(), &[ChatState::Composing]);

        f.dispatcher.dispatch(&transport, inbound("1", "yes")).await;
        f.dispatcher.dispatch(&transport, inbound("1", "yes")).await;
        f.dispatcher.dispatch(&transport, inbound("1", "no")).await;
        assert_eq!(f.dispatcher.open_conversations().await, 0);

        let last = transport.sent.lock().unwrap().last().cloned().unwrap().1;
        assert_eq!(last.text, "Thank you for voting, Member 1!");
        assert_eq!(last.chat_state, Some(ChatState::Gone));

        // A later message starts over and sees the completed session
        transport.clear();
        f.dispatcher.dispatch(&transport, inbound("1", "hello")).await;
        assert!(transport.texts().last().unwrap().contains("recast your votes"));
    }

    #[tokio::test]
    async fn rich_text_only_for_capable_clients() {
        let f = fixture(10);
        let plain = RecordingTransport::default();
        f.dispatcher.dispatch(&plain, inbound("1", "hi")).await;
        assert!(plain.sent.lock().unwrap().iter().all(|(_, m)| m.rich.is_none()));

        let rich = RecordingTransport {
            rich_text: true,
            ..Default::default()
        };
        f.dispatcher.dispatch(&rich, inbound("2", "hi")).await;
        assert!(rich.sent.lock().unwrap().iter().any(|(_, m)| m.rich.is_some()));
    }

    #[tokio::test]
    async fn quorum_status_published_once() {
        let f = fixture(2);
        let transport = RecordingTransport::default();
        for id in ["1", "2", "3"] {
            vote_through(&f, &transport, id).await;
        }
        assert_eq!(
            transport.statuses.lock().unwrap().as_slice(),
            &[ElectionStatus::QuorumReached]
        );
    }

    #[tokio::test]
    async fn retransmits_are_serialized() {
        let f = fixture(10);
        let transport = Arc::new(RecordingTransport::default());
        f.dispatcher.dispatch(transport.as_ref(), inbound("1", "hi")).await;

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let dispatcher = Arc::clone(&f.dispatcher);
                let transport = Arc::clone(&transport);
                tokio::spawn(async move {
                    dispatcher.dispatch(transport.as_ref(), inbound("1", "yes")).await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // One "yes" consented, the other approved exactly one candidate
        let key = SessionKey::new("2026", VoterId::from("1"));
        let session = f.store.get(&key).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Started);
        assert_eq!(session.section_votes("Membership").unwrap().len(), 1);
        assert_eq!(session.fulfilled("Membership"), 1);
    }

    #[tokio::test]
    async fn idle_conversations_resume_later() {
        let f = fixture(10);
        let transport = RecordingTransport::default();
        f.dispatcher.dispatch(&transport, inbound("1", "hi")).await;
        f.dispatcher.dispatch(&transport, inbound("1", "yes")).await;

        let evicted = f.dispatcher.evict_idle(Duration::ZERO).await;
        assert_eq!(evicted, vec![VoterId::from("1")]);
        assert_eq!(f.dispatcher.open_conversations().await, 0);

        transport.clear();
        f.dispatcher.dispatch(&transport, inbound("1", "back")).await;
        assert!(transport.texts().last().unwrap().contains("resume voting"));
    }

    #[tokio::test]
    async fn voter_locks_are_dropped_with_their_conversation() {
        let f = fixture(10);
        let transport = RecordingTransport::default();
        vote_through(&f, &transport, "1").await;
        assert_eq!(f.dispatcher.open_conversations().await, 0);
        assert!(f.dispatcher.voter_locks.lock().await.is_empty());

        f.dispatcher.dispatch(&transport, inbound("2", "hi")).await;
        assert!(f.dispatcher.voter_locks.lock().await.contains_key(&VoterId::from("2")));
        f.dispatcher.evict_idle(Duration::ZERO).await;
        assert!(f.dispatcher.voter_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn failed_completion_reports_temporary_failure() {
        let f = fixture(10);
        let transport = RecordingTransport::default();
        f.dispatcher.dispatch(&transport, inbound("1", "hi")).await;
        f.dispatcher.dispatch(&transport, inbound("1", "yes")).await;
        f.dispatcher.dispatch(&transport, inbound("1", "yes")).await;

        let results = f.dir.path().join("results/2026");
        std::fs::remove_dir_all(&results).unwrap();
        std::fs::write(&results, "").unwrap();

        transport.clear();
        f.dispatcher.dispatch(&transport, inbound("1", "yes")).await;
        assert_eq!(
            transport.texts(),
            vec![Prompt::TemporaryFailure.render().text]
        );
        assert_eq!(f.dispatcher.open_conversations().await, 1);

        let key = SessionKey::new("2026", VoterId::from("1"));
        assert_eq!(f.store.get(&key).await.unwrap().status(), SessionStatus::Started);
    }

    #[tokio::test]
    async fn idle_eviction_spares_recent_conversations() {
        let f = fixture(10);
        let transport = RecordingTransport::default();
        f.dispatcher.dispatch(&transport, inbound("1", "hi")).await;

        let evicted = f.dispatcher.evict_idle(Duration::from_secs(3600)).await;
        assert!(evicted.is_empty());
        assert_eq!(f.dispatcher.open_conversations().await, 1);
    }
}
