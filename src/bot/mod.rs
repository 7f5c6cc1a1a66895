//! # Bot Module
//!
//! Discord side of the bot: slash commands, gateway events and the two
//! Discord-backed collaborators of the playback core.
//!
//! ## Architecture
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`]. Shared state lives in
//! the client's `TypeMap`, inserted by `main` once the client is built:
//!
//! - [`PlayerRegistryKey`]: the per-guild [`PlayerRegistry`]
//! - [`ActionLogKey`]: the [`DiscordActionLog`] used by commands that only log
//!
//! Player notices go through [`notice::DiscordNotifier`].

use anyhow::{Context as _, Result};
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, OnlineStatus, Ready, VoiceState},
    async_trait,
    gateway::ActivityData,
    prelude::TypeMapKey,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod action_log;
pub mod commands;
pub mod handlers;
pub mod notice;

use crate::{
    audio::{voice::SongbirdGateway, PlayerRegistry},
    config::Config,
    sources::YtDlpResolver,
};

pub use action_log::{DiscordActionLog, LogTarget};
pub use notice::DiscordNotifier;

/// The registry as wired in production.
pub type MusicRegistry = PlayerRegistry<YtDlpResolver, SongbirdGateway>;

pub struct PlayerRegistryKey;

impl TypeMapKey for PlayerRegistryKey {
    type Value = Arc<MusicRegistry>;
}

pub struct ActionLogKey;

impl TypeMapKey for ActionLogKey {
    type Value = DiscordActionLog;
}

pub(crate) async fn registry(ctx: &Context) -> Result<Arc<MusicRegistry>> {
    ctx.data
        .read()
        .await
        .get::<PlayerRegistryKey>()
        .cloned()
        .context("Registro de players no inicializado")
}

pub(crate) async fn action_logger(ctx: &Context) -> Result<DiscordActionLog> {
    ctx.data
        .read()
        .await
        .get::<ActionLogKey>()
        .cloned()
        .context("Registro de acciones no inicializado")
}

/// Main Discord event handler.
pub struct MusicBot {
    config: Arc<Config>,
}

impl MusicBot {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Registers slash commands, per guild when `GUILD_ID` is set
    /// (propagates in seconds) or globally otherwise (up to an hour).
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .context("No se pudieron registrar comandos de guild")?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx)
                    .await
                    .context("No se pudieron registrar comandos globales")?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        ctx.set_presence(Some(ActivityData::playing("Music🎧")), OnlineStatus::DoNotDisturb);

        match action_logger(&ctx).await {
            Ok(log) => log.announce_startup().await,
            Err(e) => warn!("{:?}", e),
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Tears the guild's player down when the bot is removed from voice by
    /// someone else (kicked, channel deleted, moved out).
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }
        let Some(guild_id) = new.guild_id else {
            return;
        };

        debug!(
            "🔌 Bot fuera de voz en guild {} (canal anterior: {:?})",
            guild_id,
            old.and_then(|state| state.channel_id)
        );

        match registry(&ctx).await {
            Ok(registry) => {
                if let Some(player) = registry.existing(guild_id) {
                    player.disconnected().await;
                }
            }
            Err(e) => warn!("{:?}", e),
        }
    }
}
