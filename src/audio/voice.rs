use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::Input,
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{CompletionSignal, VoiceGateway, VoiceLink},
    error::MusicError,
};

/// Opens voice connections through the songbird manager.
pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    volume: f32,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>, volume: f32) -> Self {
        Self { manager, volume }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    type Link = SongbirdLink;

    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<SongbirdLink, MusicError> {
        let call = self.manager.join(guild_id, channel_id).await.map_err(|e| {
            error!("Error al obtener handler de voz: {:?}", e);
            MusicError::Connection(e.to_string())
        })?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
        Ok(SongbirdLink {
            manager: self.manager.clone(),
            guild_id,
            call,
            current: Mutex::new(None),
            volume: self.volume,
        })
    }
}

/// A songbird `Call` plus the handle of the track it is playing.
pub struct SongbirdLink {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    call: Arc<tokio::sync::Mutex<Call>>,
    current: Mutex<Option<TrackHandle>>,
    volume: f32,
}

#[async_trait]
impl VoiceLink for SongbirdLink {
    type Stream = Input;

    async fn play(&self, stream: Input, done: CompletionSignal) -> Result<(), MusicError> {
        let track = {
            let mut call = self.call.lock().await;
            call.play_input(stream)
        };

        if let Err(e) = track.set_volume(self.volume) {
            warn!("No se pudo ajustar el volumen en guild {}: {}", self.guild_id, e);
        }

        let attach = |event: TrackEvent, handler: TrackFinished| {
            track
                .add_event(Event::Track(event), handler)
                .map_err(|e| MusicError::Transport(format!("could not watch the track: {}", e)))
        };
        attach(TrackEvent::End, TrackFinished::End(done.clone()))
            .and_then(|_| attach(TrackEvent::Error, TrackFinished::Error(done)))
            .inspect_err(|_| {
                let _ = track.stop();
            })?;

        if let Some(previous) = self.current.lock().replace(track) {
            let _ = previous.stop();
        }
        Ok(())
    }

    async fn stop(&self) {
        if let Some(track) = self.current.lock().take() {
            if let Err(e) = track.stop() {
                debug!("Track ya detenido en guild {}: {}", self.guild_id, e);
            }
        }
    }

    async fn disconnect(&self) -> Result<(), MusicError> {
        self.stop().await;
        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| MusicError::Connection(e.to_string()))
    }
}

/// Forwards the end of a track to the engine that started it.
enum TrackFinished {
    End(CompletionSignal),
    Error(CompletionSignal),
}

#[async_trait]
impl VoiceEventHandler for TrackFinished {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match self {
            TrackFinished::End(signal) => {
                debug!("🎵 Fin de track para sesión {:?}", signal.session());
                signal.finished(None);
            }
            TrackFinished::Error(signal) => {
                let reason = match ctx {
                    EventContext::Track(tracks) => tracks
                        .iter()
                        .find_map(|(state, _)| match &state.playing {
                            PlayMode::Errored(e) => Some(e.to_string()),
                            _ => None,
                        })
                        .unwrap_or_else(|| "unknown playback error".to_string()),
                    _ => "unknown playback error".to_string(),
                };
                error!("❌ Error en track de la sesión {:?}: {}", signal.session(), reason);
                signal.finished(Some(reason));
            }
        }
        None
    }
}
