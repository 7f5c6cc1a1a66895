use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseFollowup,
        CreateInteractionResponseMessage, EditInteractionResponse,
    },
    gateway::ActivityData,
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    audio::{ActionLogger, PlayOutcome, PlaybackState, PlayerSnapshot, RequestContext, TrackRequest},
    bot::{action_logger, registry},
    error::MusicError,
};

const HELP_TEXT: &str =
    "Available commands: /join, /play, /skip, /leave, /queue, /activity, /help";

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let request = RequestContext {
        guild_id,
        text_channel: command.channel_id,
        user_id: command.user.id,
        user_name: command.user.name.clone(),
    };

    match command.data.name.as_str() {
        "join" => handle_join(ctx, &command, request).await?,
        "play" => handle_play(ctx, &command, request).await?,
        "skip" => handle_skip(ctx, &command, request).await?,
        "leave" => handle_leave(ctx, &command, request).await?,
        "queue" => handle_queue(ctx, &command, request).await?,
        "help" => handle_help(ctx, &command, request).await?,
        "activity" => handle_activity(ctx, &command, request).await?,
        _ => reply(ctx, &command, "❌ Comando no reconocido", true).await?,
    }

    Ok(())
}

// Handlers específicos para cada comando

async fn handle_join(ctx: &Context, command: &CommandInteraction, request: RequestContext) -> Result<()> {
    let channel = user_voice_channel(ctx, request.guild_id, request.user_id);
    let player = registry(ctx).await?.player(request.guild_id);

    match player.join(channel, request).await {
        Ok(_) => reply(ctx, command, "Joined the voice channel!", false).await,
        Err(e) => reply_error(ctx, command, e).await,
    }
}

async fn handle_play(ctx: &Context, command: &CommandInteraction, request: RequestContext) -> Result<()> {
    let url = string_option(command, "url")
        .ok_or_else(|| anyhow::anyhow!("URL no proporcionada"))?
        .trim()
        .to_string();

    // Defer la respuesta ya que puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let channel = user_voice_channel(ctx, request.guild_id, request.user_id);
    let player = registry(ctx).await?.player(request.guild_id);

    match player.play(TrackRequest::new(url.clone(), request), channel).await {
        Ok(outcome) => {
            command
                .edit_response(&ctx.http, EditInteractionResponse::new().content(play_reply(&url, &outcome)))
                .await?;
        }
        Err(e) => {
            if !e.is_user_facing() {
                warn!("No se pudo encolar {}: {}", url, e);
            }
            // La respuesta diferida es pública; el error va en un followup efímero
            command.delete_response(&ctx.http).await?;
            command
                .create_followup(
                    &ctx.http,
                    CreateInteractionResponseFollowup::new()
                        .content(e.to_string())
                        .ephemeral(true),
                )
                .await?;
        }
    }

    Ok(())
}

async fn handle_skip(ctx: &Context, command: &CommandInteraction, request: RequestContext) -> Result<()> {
    let player = registry(ctx).await?.player(request.guild_id);

    match player.skip(request).await {
        Ok(_) => reply(ctx, command, "Skipped the current song.", false).await,
        Err(e) => reply_error(ctx, command, e).await,
    }
}

async fn handle_leave(ctx: &Context, command: &CommandInteraction, request: RequestContext) -> Result<()> {
    let player = registry(ctx).await?.player(request.guild_id);

    match player.leave(request).await {
        Ok(discarded) => reply(ctx, command, leave_reply(discarded), false).await,
        Err(e) => reply_error(ctx, command, e).await,
    }
}

async fn handle_queue(ctx: &Context, command: &CommandInteraction, request: RequestContext) -> Result<()> {
    let player = registry(ctx).await?.player(request.guild_id);

    match player.snapshot().await {
        Ok(snapshot) => reply(ctx, command, format_queue(&snapshot), false).await,
        Err(e) => reply_error(ctx, command, e).await,
    }
}

async fn handle_help(ctx: &Context, command: &CommandInteraction, request: RequestContext) -> Result<()> {
    reply(ctx, command, HELP_TEXT, false).await?;

    action_logger(ctx).await?.log_action(
        format!("{} accessed the help menu.", request.user_name),
        request.guild_id,
        request.text_channel,
    );
    Ok(())
}

async fn handle_activity(ctx: &Context, command: &CommandInteraction, request: RequestContext) -> Result<()> {
    let kind = string_option(command, "activity_type").unwrap_or_default();
    let name = string_option(command, "activity_name").unwrap_or_default();
    let stream_url = string_option(command, "stream_url");

    let activity = match parse_activity(kind, name, stream_url) {
        Ok(activity) => activity,
        Err(e) => return reply(ctx, command, e.to_string(), true).await,
    };

    ctx.set_activity(Some(activity));
    info!("🎭 Actividad cambiada a {} {}", kind, name);
    reply(ctx, command, format!("Bot activity changed to {} {}!", kind, name), true).await?;

    action_logger(ctx).await?.log_action(
        format!("{} changed the bot's activity to {} {}.", request.user_name, kind, name),
        request.guild_id,
        request.text_channel,
    );
    Ok(())
}

// Utilidades

#[derive(Debug, Error, PartialEq)]
pub enum ActivityError {
    #[error("Invalid activity type! Use 'playing', 'listening', 'watching', or 'streaming'.")]
    InvalidType,

    #[error("You must provide a streaming URL for the 'streaming' activity type.")]
    MissingStreamUrl,

    #[error("The streaming URL is not valid.")]
    InvalidStreamUrl,
}

pub fn parse_activity(kind: &str, name: &str, stream_url: Option<&str>) -> Result<ActivityData, ActivityError> {
    match kind.to_lowercase().as_str() {
        "playing" => Ok(ActivityData::playing(name)),
        "listening" => Ok(ActivityData::listening(name)),
        "watching" => Ok(ActivityData::watching(name)),
        "streaming" => {
            let url = stream_url
                .filter(|url| !url.trim().is_empty())
                .ok_or(ActivityError::MissingStreamUrl)?;
            ActivityData::streaming(name, url).map_err(|_| ActivityError::InvalidStreamUrl)
        }
        _ => Err(ActivityError::InvalidType),
    }
}

fn play_reply(url: &str, outcome: &PlayOutcome) -> String {
    match outcome {
        PlayOutcome::Started => format!("Fetching: {}", url),
        PlayOutcome::Queued { position } => format!("Added to queue: {} (position {})", url, position),
    }
}

fn leave_reply(discarded: usize) -> String {
    match discarded {
        0 => "Disconnected from the voice channel.".to_string(),
        n => format!(
            "Disconnected from the voice channel. {} queued song(s) were discarded.",
            n
        ),
    }
}

fn format_queue(snapshot: &PlayerSnapshot) -> String {
    let mut lines = Vec::new();

    match (&snapshot.now_playing, &snapshot.resolving, snapshot.state) {
        (Some(title), _, _) => lines.push(format!("Now playing: {}", title)),
        (None, Some(url), _) => lines.push(format!("Loading: {}", url)),
        (None, None, PlaybackState::Stopping) => lines.push("Moving to the next song...".to_string()),
        _ => lines.push("Nothing is playing.".to_string()),
    }

    if snapshot.queued.is_empty() {
        lines.push("Queue is empty.".to_string());
    } else {
        lines.push(format!("Up next ({}):", snapshot.queued.len()));
        lines.extend(
            snapshot
                .queued
                .iter()
                .enumerate()
                .map(|(i, url)| format!("{}. {}", i + 1, url)),
        );
    }

    lines.join("\n")
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

/// Canal de voz actual del usuario según la caché
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

async fn reply(
    ctx: &Context,
    command: &CommandInteraction,
    content: impl Into<String>,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;
    Ok(())
}

async fn reply_error(ctx: &Context, command: &CommandInteraction, e: MusicError) -> Result<()> {
    if !e.is_user_facing() {
        warn!("⚠️ /{} falló: {}", command.data.name, e);
    }
    reply(ctx, command, e.to_string(), true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serenity::model::gateway::ActivityType;

    #[test]
    fn test_parse_activity_types() {
        assert_eq!(parse_activity("playing", "Music", None).unwrap().kind, ActivityType::Playing);
        assert_eq!(parse_activity("Listening", "lofi", None).unwrap().kind, ActivityType::Listening);
        assert_eq!(parse_activity("WATCHING", "you", None).unwrap().kind, ActivityType::Watching);

        let streaming = parse_activity("streaming", "live", Some("https://twitch.tv/someone")).unwrap();
        assert_eq!(streaming.kind, ActivityType::Streaming);
        assert_eq!(streaming.name, "live");
        assert!(streaming.url.is_some());
    }

    #[test]
    fn test_parse_activity_rejections() {
        assert_eq!(parse_activity("dancing", "x", None).unwrap_err(), ActivityError::InvalidType);
        assert_eq!(
            parse_activity("streaming", "live", None).unwrap_err(),
            ActivityError::MissingStreamUrl
        );
        assert_eq!(
            parse_activity("streaming", "live", Some(" ")).unwrap_err(),
            ActivityError::MissingStreamUrl
        );
        assert_eq!(
            parse_activity("streaming", "live", Some("not a url")).unwrap_err(),
            ActivityError::InvalidStreamUrl
        );
    }

    #[test]
    fn test_queue_listing() {
        let snapshot = PlayerSnapshot {
            state: PlaybackState::Playing,
            voice_channel: Some(ChannelId::new(8)),
            now_playing: Some("Song A".to_string()),
            resolving: None,
            queued: vec!["https://a.example/1".to_string(), "https://a.example/2".to_string()],
        };

        assert_eq!(
            format_queue(&snapshot),
            "Now playing: Song A\nUp next (2):\n1. https://a.example/1\n2. https://a.example/2"
        );
    }

    #[test]
    fn test_empty_queue_listing() {
        let snapshot = PlayerSnapshot {
            state: PlaybackState::Idle,
            voice_channel: None,
            now_playing: None,
            resolving: None,
            queued: Vec::new(),
        };

        assert_eq!(format_queue(&snapshot), "Nothing is playing.\nQueue is empty.");
    }

    #[test]
    fn test_replies() {
        assert_eq!(play_reply("u", &PlayOutcome::Started), "Fetching: u");
        assert_eq!(
            play_reply("u", &PlayOutcome::Queued { position: 3 }),
            "Added to queue: u (position 3)"
        );
        assert_eq!(leave_reply(0), "Disconnected from the voice channel.");
        assert_eq!(
            leave_reply(2),
            "Disconnected from the voice channel. 2 queued song(s) were discarded."
        );
    }
}
