mod commands;
mod config;
mod db;
mod handlers;
mod models;
mod roster;
mod tasks;
mod voting;

use config::Config;
use db::Database;
use handlers::{Dispatcher, DiscordTransport, ElectionStatus, Inbound, Transport};
use log::{error, info, warn};
use models::{Ballot, Voter, VoterId};
use roster::Roster;
use serenity::async_trait;
use serenity::model::application::interaction::Interaction;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use voting::export::ResultExporter;
use voting::quorum::default_threshold;
use voting::{Election, QuorumTracker, VotingContext};

/// Everything the event handlers share.
pub struct AppState {
    pub config: Config,
    pub roster: Arc<Roster>,
    pub context: Arc<VotingContext>,
    pub dispatcher: Arc<Dispatcher>,
}

struct Bot {
    state: Arc<AppState>,
    reaper_started: AtomicBool,
}

impl Bot {
    async fn current_status(&self) -> ElectionStatus {
        match &self.state.context.election {
            None => ElectionStatus::NoElection,
            Some(election) => match election.quorum.has_quorum().await {
                Ok(true) => ElectionStatus::QuorumReached,
                Ok(false) => ElectionStatus::AwaitingQuorum,
                Err(e) => {
                    error!("Failed to read quorum state: {}", e);
                    ElectionStatus::AwaitingQuorum
                }
            },
        }
    }
}

#[async_trait]
impl EventHandler for Bot {
    async fn message(&self, ctx: Context, msg: Message) {
        // Ballots are only taken in direct messages
        if msg.author.bot || msg.guild_id.is_some() {
            return;
        }

        let inbound = Inbound {
            voter: Voter {
                id: VoterId::from(msg.author.id.to_string()),
                name: msg.author.name.clone(),
                address: msg.channel_id.0.to_string(),
            },
            body: msg.content.clone(),
        };

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let transport = DiscordTransport::new(ctx, state.config.rich_text);
            state.dispatcher.dispatch(&transport, inbound).await;
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let state = Arc::clone(&self.state);

        // Spawn a task to handle the interaction concurrently
        tokio::spawn(async move {
            handlers::handle_interaction(&state, &ctx, interaction).await;
        });
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);

        if let Err(why) = commands::register_commands(&ctx).await {
            error!("Failed to register slash commands: {:?}", why);
        } else {
            info!("Successfully registered global slash commands.");
        }

        let status = self.current_status().await;
        DiscordTransport::new(ctx.clone(), self.state.config.rich_text)
            .publish_status(status)
            .await;

        // Ready fires again after a reconnect
        if !self.reaper_started.swap(true, Ordering::SeqCst) {
            let dispatcher = Arc::clone(&self.state.dispatcher);
            let max_idle = self.state.config.session_idle;
            tokio::spawn(async move {
                tasks::session_reaper::evict_idle_conversations_task(dispatcher, max_idle).await;
            });
        }
    }
}

async fn load_election(
    config: &Config,
    ballot_id: &str,
    roster: &Roster,
    database: Arc<Database>,
) -> Result<Election, Box<dyn std::error::Error + Send + Sync>> {
    let ballot = Ballot::load(&config.data_dir, ballot_id)?;
    let threshold = match config.quorum {
        Some(quorum) => quorum,
        None => default_threshold(roster.member_count().await),
    };
    let exporter = ResultExporter::new(&config.data_dir, ballot_id)?;

    info!(
        "Loaded ballot {} for {} with {} section(s); quorum is {} voters",
        ballot.id,
        ballot.date,
        ballot.sections.len(),
        threshold
    );

    Ok(Election {
        ballot: Arc::new(ballot),
        quorum: QuorumTracker::new(ballot_id, threshold, database),
        exporter,
    })
}

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let database = match Database::new(&config.database_url).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let roster = match Roster::load(&config.data_dir) {
        Ok(roster) => Arc::new(roster),
        Err(e) => {
            error!("Failed to load member roster: {}", e);
            std::process::exit(1);
        }
    };

    let election = match &config.ballot {
        Some(ballot_id) => {
            match load_election(&config, ballot_id, &roster, Arc::clone(&database)).await {
                Ok(election) => Some(Arc::new(election)),
                Err(e) => {
                    error!("Failed to load ballot {}: {}", ballot_id, e);
                    std::process::exit(1);
                }
            }
        }
        None => {
            warn!("No BALLOT configured; no election is running");
            None
        }
    };

    let context = Arc::new(VotingContext {
        election,
        sessions: database,
    });
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&context), Arc::clone(&roster)));
    let token = config.discord_token.clone();

    let bot = Bot {
        state: Arc::new(AppState {
            config,
            roster,
            context,
            dispatcher,
        }),
        reaper_started: AtomicBool::new(false),
    };

    // Slash commands arrive without any intent; votes come in as DMs
    let intents = GatewayIntents::DIRECT_MESSAGES | GatewayIntents::MESSAGE_CONTENT;

    let mut client = match Client::builder(&token, intents).event_handler(bot).await {
        Ok(client) => client,
        Err(why) => {
            error!("Error creating client: {:?}", why);
            std::process::exit(1);
        }
    };

    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }
}
