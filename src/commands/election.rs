use crate::AppState;
use crate::voting::Election;
use serenity::builder::CreateApplicationCommand;
use serenity::model::application::command::CommandOptionType;
use serenity::model::application::interaction::application_command::ApplicationCommandInteraction;
use serenity::prelude::*;

use super::send_ephemeral;

pub fn create_election_command(command: &mut CreateApplicationCommand) -> &mut CreateApplicationCommand {
    command
        .name("election")
        .description("Information about the current election")
        .create_option(|option| {
            option
                .name("status")
                .description("Show participation and quorum")
                .kind(CommandOptionType::SubCommand)
        })
}

pub fn status_line(election: &Election, completed: usize) -> String {
    let threshold = election.quorum.threshold();
    let quorum = if completed >= threshold {
        "Quorum has been reached."
    } else {
        "Quorum has not been reached yet."
    };
    format!(
        "Ballot {} for the meeting on {}: {} of {} required members have voted. {}",
        election.ballot.id, election.ballot.date, completed, threshold, quorum
    )
}

pub async fn handle_election_command(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match command.data.options.first().map(|option| option.name.as_str()) {
        Some("status") => {
            let reply = match &state.context.election {
                Some(election) => status_line(election, election.quorum.completed().await?),
                None => "No elections are being held at this time.".to_string(),
            };
            send_ephemeral(ctx, command, &reply).await?;
        }
        _ => send_ephemeral(ctx, command, "Unknown subcommand").await?,
    }
    Ok(())
}
