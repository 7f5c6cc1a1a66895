//! Audit trail of bot actions, posted to a dedicated Discord channel.

use chrono::{DateTime, FixedOffset, Utc};
use serenity::{
    cache::Cache,
    http::Http,
    model::id::{ChannelId, GuildId},
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::audio::ActionLogger;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum ActionLogError {
    #[error("log guild {0} is not in the cache")]
    GuildNotFound(GuildId),

    #[error("log channel {channel} not found in guild {guild}")]
    ChannelNotFound { guild: GuildId, channel: ChannelId },

    #[error("could not post to the log channel: {0}")]
    Send(#[from] serenity::Error),
}

/// Where log entries go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogTarget {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

/// [`ActionLogger`] that posts each entry to the log channel.
///
/// Sending happens on a spawned task; a failed post is logged and dropped.
#[derive(Clone)]
pub struct DiscordActionLog {
    http: Arc<Http>,
    cache: Arc<Cache>,
    target: Option<LogTarget>,
    offset: FixedOffset,
}

impl DiscordActionLog {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>, target: Option<LogTarget>, offset: FixedOffset) -> Self {
        if target.is_none() {
            debug!("📝 Registro de acciones deshabilitado (LOG_GUILD_ID / LOG_CHANNEL_ID sin definir)");
        }

        Self {
            http,
            cache,
            target,
            offset,
        }
    }

    /// Posts the startup line.
    pub async fn announce_startup(&self) {
        let line = startup_line(Utc::now(), self.offset);
        if let Err(e) = self.post(line).await {
            warn!("No se pudo anunciar el inicio en el canal de registro: {}", e);
        }
    }

    async fn post(&self, text: String) -> Result<(), ActionLogError> {
        let Some(target) = self.target else {
            return Ok(());
        };

        let channel_exists = {
            let guild = target
                .guild_id
                .to_guild_cached(&self.cache)
                .ok_or(ActionLogError::GuildNotFound(target.guild_id))?;
            guild.channels.contains_key(&target.channel_id)
        };
        if !channel_exists {
            return Err(ActionLogError::ChannelNotFound {
                guild: target.guild_id,
                channel: target.channel_id,
            });
        }

        target.channel_id.say(&self.http, text).await?;
        Ok(())
    }

    /// Guild and channel names from the cache, ids when not cached.
    fn names(&self, guild_id: GuildId, channel_id: ChannelId) -> (String, String) {
        match guild_id.to_guild_cached(&self.cache) {
            Some(guild) => (
                guild.name.clone(),
                guild
                    .channels
                    .get(&channel_id)
                    .map(|channel| channel.name.clone())
                    .unwrap_or_else(|| channel_id.to_string()),
            ),
            None => (guild_id.to_string(), channel_id.to_string()),
        }
    }
}

impl ActionLogger for DiscordActionLog {
    fn log_action(&self, action: String, guild_id: GuildId, channel_id: ChannelId) {
        if self.target.is_none() {
            debug!("📝 {}", action);
            return;
        }

        let (server, channel) = self.names(guild_id, channel_id);
        let entry = format_log_entry(Utc::now(), self.offset, &server, &channel, &action);

        let log = self.clone();
        tokio::spawn(async move {
            if let Err(e) = log.post(entry).await {
                warn!("⚠️ Registro de acción perdido ({}): {}", e, action);
            }
        });
    }
}

pub fn format_log_entry(
    now: DateTime<Utc>,
    offset: FixedOffset,
    server: &str,
    channel: &str,
    action: &str,
) -> String {
    format!(
        "**[{}]**\n**Server**: {}\n**Channel**: #{}\n**Action**: {}",
        now.with_timezone(&offset).format(TIMESTAMP_FORMAT),
        server,
        channel,
        action
    )
}

pub fn startup_line(now: DateTime<Utc>, offset: FixedOffset) -> String {
    format!(
        "[{}] Bot started and is online.",
        now.with_timezone(&offset).format(TIMESTAMP_FORMAT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(330 * 60).unwrap()
    }

    #[test]
    fn test_entry_layout_in_configured_zone() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 20, 45, 10).unwrap();

        let entry = format_log_entry(now, ist(), "DEDZ", "music", "Queue is empty.");
        assert_eq!(
            entry,
            "**[2025-01-01 02:15:10]**\n**Server**: DEDZ\n**Channel**: #music\n**Action**: Queue is empty."
        );
    }

    #[test]
    fn test_startup_line() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();

        assert_eq!(startup_line(now, utc), "[2024-06-01 00:00:00] Bot started and is online.");
        assert_eq!(startup_line(now, ist()), "[2024-06-01 05:30:00] Bot started and is online.");
    }
}
