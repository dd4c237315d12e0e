use crate::models::VoterId;
use crate::roster::RosterError;
use crate::AppState;
use log::{error, warn};
use serenity::builder::CreateApplicationCommand;
use serenity::model::application::command::CommandOptionType;
use serenity::model::application::interaction::application_command::{
    ApplicationCommandInteraction, CommandDataOption, CommandDataOptionValue,
};
use serenity::prelude::*;

use super::send_ephemeral;

pub fn create_roster_command(command: &mut CreateApplicationCommand) -> &mut CreateApplicationCommand {
    command
        .name("roster")
        .description("Manage the member roster (admins only)")
        .create_option(|option| {
            option
                .name("reload")
                .description("Reload the roster files from disk")
                .kind(CommandOptionType::SubCommand)
        })
        .create_option(|option| {
            option
                .name("add")
                .description("Add a member")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("user")
                        .description("The member to add")
                        .kind(CommandOptionType::User)
                        .required(true)
                })
        })
        .create_option(|option| {
            option
                .name("remove")
                .description("Remove a member")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("user")
                        .description("The member to remove")
                        .kind(CommandOptionType::User)
                        .required(true)
                })
        })
}

// Target user of an add/remove subcommand
fn target_user(subcommand: &CommandDataOption) -> Option<VoterId> {
    subcommand
        .options
        .iter()
        .find(|option| option.name == "user")
        .and_then(|option| match &option.resolved {
            Some(CommandDataOptionValue::User(user, _)) => Some(VoterId::from(user.id.to_string())),
            _ => None,
        })
}

pub async fn handle_roster_command(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let caller = VoterId::from(command.user.id.to_string());

    let Some(subcommand) = command.data.options.first() else {
        send_ephemeral(ctx, command, "No subcommand provided").await?;
        return Ok(());
    };

    let outcome = match subcommand.name.as_str() {
        "reload" => state
            .roster
            .reload(&caller)
            .await
            .map(|count| format!("Roster reloaded: {} members.", count)),
        "add" | "remove" => {
            let Some(target) = target_user(subcommand) else {
                send_ephemeral(ctx, command, "Please name a user.").await?;
                return Ok(());
            };
            if subcommand.name == "add" {
                state.roster.add(&caller, target.clone()).await.map(|added| {
                    if added {
                        format!("<@{}> is now a member.", target)
                    } else {
                        format!("<@{}> already is a member.", target)
                    }
                })
            } else {
                state.roster.remove(&caller, &target).await.map(|removed| {
                    if removed {
                        format!("<@{}> is no longer a member.", target)
                    } else {
                        format!("<@{}> was not a member.", target)
                    }
                })
            }
        }
        _ => {
            send_ephemeral(ctx, command, "Unknown subcommand").await?;
            return Ok(());
        }
    };

    let reply = match outcome {
        Ok(reply) => reply,
        Err(RosterError::Forbidden(who)) => {
            warn!("Forbidden roster command '{}' from {}", subcommand.name, who);
            "Forbidden: only roster admins may do that.".to_string()
        }
        Err(e) => {
            error!("Roster command '{}' failed: {}", subcommand.name, e);
            "Failed to update the roster.".to_string()
        }
    };
    send_ephemeral(ctx, command, &reply).await?;
    Ok(())
}
