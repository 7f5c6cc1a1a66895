use anyhow::Result;
use serenity::{
    model::{
        gateway::GatewayIntents,
        id::{ChannelId, GuildId},
    },
    Client,
};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;

use crate::audio::{voice::SongbirdGateway, PlayerRegistry};
use crate::bot::{
    ActionLogKey, DiscordActionLog, DiscordNotifier, LogTarget, MusicBot, PlayerRegistryKey,
};
use crate::config::Config;
use crate::sources::YtDlpResolver;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay_music=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Relay Music v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config.ytdlp_path).await;
    }

    info!("{}", config.summary());

    // Solo hacen falta guilds (caché de canales) y estados de voz
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let songbird = Songbird::serenity();
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(MusicBot::new(config.clone()))
        .register_songbird_with(songbird.clone())
        .await?;

    let target = config
        .log_guild_id
        .zip(config.log_channel_id)
        .map(|(guild, channel)| LogTarget {
            guild_id: GuildId::new(guild),
            channel_id: ChannelId::new(channel),
        });
    let action_log = DiscordActionLog::new(
        client.http.clone(),
        client.cache.clone(),
        target,
        config.log_offset()?,
    );

    let registry = PlayerRegistry::new(
        Arc::new(YtDlpResolver::new(config.ytdlp_path.clone())?),
        Arc::new(SongbirdGateway::new(songbird, config.default_volume)),
        config.player_settings(),
        Arc::new(DiscordNotifier::new(client.http.clone())),
        Arc::new(action_log.clone()),
    );

    {
        let mut data = client.data.write().await;
        data.insert::<PlayerRegistryKey>(Arc::new(registry));
        data.insert::<ActionLogKey>(action_log);
    }

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("⚠️ Señal de shutdown recibida, cerrando...");
                shard_manager.shutdown_all().await;
            }
            Err(e) => error!("Error al registrar Ctrl+C: {:?}", e),
        }
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(ytdlp_path: &str) -> Result<()> {
    // La decodificación la hace symphonia; solo yt-dlp es externo
    let yt_dlp = async_process::Command::new(ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    if yt_dlp.status.success() {
        println!("OK {}", String::from_utf8_lossy(&yt_dlp.stdout).trim());
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes: {} no funciona", ytdlp_path);
    }
}
