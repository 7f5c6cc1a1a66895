use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::{
    audio::{
        engine::{Command, PlaybackEngine, PlayerServices},
        ActionLogger, Notifier, PlayOutcome, PlayerSettings, PlayerSnapshot, RequestContext,
        TrackRequest, VoiceGateway, VoiceLink,
    },
    error::MusicError,
    sources::StreamResolver,
};

const COMMAND_BUFFER: usize = 64;

/// Handle to one guild's playback engine.
///
/// Cheap to clone; every method is a request/reply round trip to the engine
/// task, so the engine sees commands in the order they were sent.
#[derive(Clone)]
pub struct PlayerHandle {
    guild_id: GuildId,
    commands: mpsc::Sender<Command>,
}

impl PlayerHandle {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Connects to `channel`, the requester's current voice channel.
    pub async fn join(
        &self,
        channel: Option<ChannelId>,
        context: RequestContext,
    ) -> Result<ChannelId, MusicError> {
        self.request(|reply| Command::Join { channel, context, reply })
            .await?
    }

    /// Queues `request`, joining `channel` first when not connected.
    pub async fn play(
        &self,
        request: TrackRequest,
        channel: Option<ChannelId>,
    ) -> Result<PlayOutcome, MusicError> {
        self.request(|reply| Command::Play { request, channel, reply })
            .await?
    }

    /// Stops the current track; returns its title.
    pub async fn skip(&self, context: RequestContext) -> Result<String, MusicError> {
        self.request(|reply| Command::Skip { context, reply }).await?
    }

    /// Disconnects; returns how many queued requests were discarded.
    pub async fn leave(&self, context: RequestContext) -> Result<usize, MusicError> {
        self.request(|reply| Command::Leave { context, reply }).await?
    }

    /// Tells the engine the bot was removed from voice by someone else.
    pub async fn disconnected(&self) {
        if self.commands.send(Command::Disconnected).await.is_err() {
            warn!("Player de guild {} no disponible", self.guild_id);
        }
    }

    pub async fn snapshot(&self) -> Result<PlayerSnapshot, MusicError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, MusicError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| MusicError::PlayerUnavailable)?;
        response.await.map_err(|_| MusicError::PlayerUnavailable)
    }
}

/// One playback engine per guild, spawned on first use.
pub struct PlayerRegistry<R, G> {
    players: DashMap<GuildId, PlayerHandle>,
    services: PlayerServices<R, G>,
}

impl<R, G> PlayerRegistry<R, G>
where
    R: StreamResolver,
    G: VoiceGateway,
    G::Link: VoiceLink<Stream = R::Stream>,
{
    pub fn new(
        resolver: Arc<R>,
        gateway: Arc<G>,
        settings: PlayerSettings,
        notifier: Arc<dyn Notifier>,
        logger: Arc<dyn ActionLogger>,
    ) -> Self {
        Self {
            players: DashMap::new(),
            services: PlayerServices {
                resolver,
                gateway,
                settings,
                notifier,
                logger,
            },
        }
    }

    /// Returns the guild's player, starting a new engine if there is none
    /// or the previous one stopped.
    pub fn player(&self, guild_id: GuildId) -> PlayerHandle {
        let mut entry = self
            .players
            .entry(guild_id)
            .or_insert_with(|| self.spawn(guild_id));

        if entry.is_closed() {
            warn!("🔄 Player de guild {} detenido, reiniciando", guild_id);
            *entry = self.spawn(guild_id);
        }

        entry.clone()
    }

    /// The guild's player if one is already running.
    pub fn existing(&self, guild_id: GuildId) -> Option<PlayerHandle> {
        self.players
            .get(&guild_id)
            .filter(|handle| !handle.is_closed())
            .map(|handle| handle.clone())
    }

    fn spawn(&self, guild_id: GuildId) -> PlayerHandle {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let engine = PlaybackEngine::new(guild_id, self.services.clone(), receiver);
        tokio::spawn(engine.run());

        info!("🎛️ Nuevo player para guild {}", guild_id);
        PlayerHandle { guild_id, commands }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::*;
    use crate::audio::PlaybackState;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_same_guild_reuses_player() {
        let h = Harness::new(test_settings());

        let again = h.registry.player(guild());
        assert!(again.commands.same_channel(&h.player.commands));
        assert!(h.registry.existing(guild()).is_some());
        assert!(h.registry.existing(GuildId::new(1)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guilds_have_independent_queues() {
        let h = Harness::new(test_settings());
        let other = h.registry.player(GuildId::new(1));
        assert_eq!(other.guild_id(), GuildId::new(1));

        h.play("a").await.unwrap();
        h.wait_for(|s| s.state == PlaybackState::Playing).await;

        let snapshot = other.snapshot().await.unwrap();
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert_eq!(snapshot.voice_channel, None);
        assert!(snapshot.queued.is_empty());
    }
}
