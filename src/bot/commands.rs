use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Todos los comandos slash del bot
pub fn all_commands() -> Vec<CreateCommand> {
    vec![
        join_command(),
        play_command(),
        skip_command(),
        leave_command(),
        queue_command(),
        help_command(),
        activity_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

// Conexión

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Bot joins the voice channel.")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Disconnect from the voice channel.")
}

// Reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play a song from a URL")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "url", "Link to the song")
                .required(true),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skip the current song.")
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Show the current song and what is queued.")
}

// Utilidades

fn help_command() -> CreateCommand {
    CreateCommand::new("help").description("Show available commands.")
}

fn activity_command() -> CreateCommand {
    CreateCommand::new("activity")
        .description("Change the bot's activity")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "activity_type",
                "The type of activity (playing, listening, watching, streaming)",
            )
            .required(true)
            .add_string_choice("Playing", "playing")
            .add_string_choice("Listening", "listening")
            .add_string_choice("Watching", "watching")
            .add_string_choice("Streaming", "streaming"),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "activity_name", "The name of the activity")
                .required(true),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::String,
            "stream_url",
            "The URL for streaming (required for 'streaming' activity)",
        ))
}
