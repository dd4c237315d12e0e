mod election;
mod roster;

use crate::AppState;
use serenity::model::application::command::Command;
use serenity::model::application::interaction::application_command::ApplicationCommandInteraction;
use serenity::model::application::interaction::InteractionResponseType;
use serenity::prelude::*;

pub async fn register_commands(ctx: &Context) -> Result<(), serenity::Error> {
    Command::set_global_application_commands(&ctx.http, |commands| {
        commands
            .create_application_command(|command| roster::create_roster_command(command))
            .create_application_command(|command| election::create_election_command(command))
    })
    .await?;

    Ok(())
}

pub async fn handle_command(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    log::info!("Received command: {}", command.data.name);
    match command.data.name.as_str() {
        "roster" => roster::handle_roster_command(state, ctx, command).await?,
        "election" => election::handle_election_command(state, ctx, command).await?,
        _ => send_ephemeral(ctx, command, "Unknown command").await?,
    }

    Ok(())
}

async fn send_ephemeral(
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    content: &str,
) -> Result<(), serenity::Error> {
    command
        .create_interaction_response(&ctx.http, |response| {
            response
                .kind(InteractionResponseType::ChannelMessageWithSource)
                .interaction_response_data(|message| message.content(content).ephemeral(true))
        })
        .await
}
