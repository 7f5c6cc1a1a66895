use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::PlayerSettings;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para registrar comandos en una sola guild

    // Registro de acciones
    pub log_guild_id: Option<u64>,
    pub log_channel_id: Option<u64>,
    pub log_utc_offset_minutes: i32,

    // Audio
    pub default_volume: f32,
    pub ytdlp_path: String,

    // Reproducción
    pub advance_grace_ms: u64,
    pub resolve_timeout_secs: u64,
    pub max_consecutive_failures: usize, // 0 = sin límite
    pub advance_after_error: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_vars(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Builds the configuration from an arbitrary variable lookup.
    ///
    /// `load` passes the process environment; tests pass a map.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: var("DISCORD_TOKEN")
                .filter(|token| !token.trim().is_empty())
                .context("DISCORD_TOKEN is not set")?,
            guild_id: parse_optional(&var, "GUILD_ID")?,

            log_guild_id: parse_optional(&var, "LOG_GUILD_ID")?,
            log_channel_id: parse_optional(&var, "LOG_CHANNEL_ID")?,
            log_utc_offset_minutes: parse_or(&var, "LOG_UTC_OFFSET_MINUTES", defaults.log_utc_offset_minutes)?,

            default_volume: parse_or(&var, "DEFAULT_VOLUME", defaults.default_volume)?,
            ytdlp_path: var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),

            advance_grace_ms: parse_or(&var, "ADVANCE_GRACE_MS", defaults.advance_grace_ms)?,
            resolve_timeout_secs: parse_or(&var, "RESOLVE_TIMEOUT_SECS", defaults.resolve_timeout_secs)?,
            max_consecutive_failures: parse_or(
                &var,
                "MAX_CONSECUTIVE_FAILURES",
                defaults.max_consecutive_failures,
            )?,
            advance_after_error: parse_or(&var, "ADVANCE_AFTER_ERROR", defaults.advance_after_error)?,
        };

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0.0 and 2.0
    /// - The resolve timeout must be at least one second
    /// - The log offset must be a real UTC offset (less than 24 hours)
    /// - The log guild and log channel are configured together or not at all
    /// - Discord ids are never zero
    pub fn validate(&self) -> Result<()> {
        if self.default_volume < 0.0 || self.default_volume > 2.0 {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.resolve_timeout_secs == 0 {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        if self.log_utc_offset_minutes.abs() >= 24 * 60 {
            anyhow::bail!(
                "Log UTC offset must be less than 24 hours, got: {} minutes",
                self.log_utc_offset_minutes
            );
        }

        if self.log_guild_id.is_some() != self.log_channel_id.is_some() {
            anyhow::bail!("LOG_GUILD_ID and LOG_CHANNEL_ID must be set together");
        }

        for (key, id) in [
            ("GUILD_ID", self.guild_id),
            ("LOG_GUILD_ID", self.log_guild_id),
            ("LOG_CHANNEL_ID", self.log_channel_id),
        ] {
            if id == Some(0) {
                anyhow::bail!("{} must be a non-zero Discord id", key);
            }
        }

        Ok(())
    }

    /// Playback engine settings derived from this configuration.
    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            advance_grace: Duration::from_millis(self.advance_grace_ms),
            resolve_timeout: Duration::from_secs(self.resolve_timeout_secs),
            max_consecutive_failures: self.max_consecutive_failures,
            advance_after_error: self.advance_after_error,
        }
    }

    /// Zone of the timestamps written to the action log.
    pub fn log_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.log_utc_offset_minutes * 60)
            .with_context(|| format!("Invalid log UTC offset: {} minutes", self.log_utc_offset_minutes))
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never part of the summary.
    pub fn summary(&self) -> String {
        let failures = match self.max_consecutive_failures {
            0 => "unlimited".to_string(),
            n => n.to_string(),
        };

        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Action log: {}\n  \
            Audio: {}% vol, extractor '{}'\n  \
            Playback: {} grace, {} resolve timeout, {} consecutive failures, advance after error={}",
            self.guild_id.map_or("global".to_string(), |id| format!("in guild {}", id)),
            match (self.log_guild_id, self.log_channel_id) {
                (Some(guild), Some(channel)) => format!("guild {} channel {}", guild, channel),
                _ => "disabled".to_string(),
            },
            (self.default_volume * 100.0) as u32,
            self.ytdlp_path,
            humantime::format_duration(Duration::from_millis(self.advance_grace_ms)),
            humantime::format_duration(Duration::from_secs(self.resolve_timeout_secs)),
            failures,
            self.advance_after_error
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,

            log_guild_id: None,
            log_channel_id: None,
            log_utc_offset_minutes: 330, // IST

            default_volume: 0.5,
            ytdlp_path: "yt-dlp".to_string(),

            advance_grace_ms: 1000,
            resolve_timeout_secs: 30,
            max_consecutive_failures: 10,
            advance_after_error: true,
        }
    }
}

fn parse_optional<F, T>(var: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} has an invalid value: {}", key, value)),
        _ => Ok(None),
    }
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_optional(var, key)?.unwrap_or(default))
}
