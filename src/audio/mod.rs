//! # Audio Module
//!
//! Queue-driven playback for the bot, one independent player per guild.
//!
//! ## Architecture
//!
//! ### [`queue`] - Playback Queue
//! - Strict FIFO of [`queue::TrackRequest`]s, duplicates kept as distinct entries
//!
//! ### [`engine`] - Playback Engine
//! - One task per guild owning the queue, the voice connection and the
//!   current session
//! - State machine `Idle -> Resolving -> Playing -> Stopping -> ...`
//! - Resolution failures skip to the next request without stalling the queue
//!
//! ### [`player`] - Player Registry
//! - Maps each guild to the handle of its engine task
//!
//! ### [`voice`] - Songbird backend
//! - Implements [`VoiceGateway`] / [`VoiceLink`] on top of a songbird `Call`
//!
//! ## Completion hand-off
//!
//! The audio driver reports the end of a track from its own event task. It
//! never touches engine state: it only sends a message through the
//! [`CompletionSignal`] it was given, and the engine task consumes it.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::MusicError;

pub mod engine;
pub mod player;
pub mod queue;
pub mod voice;

#[cfg(test)]
mod testing;

pub use engine::{PlaybackState, PlayerSnapshot, PlayOutcome};
pub use player::{PlayerHandle, PlayerRegistry};
pub use queue::TrackRequest;

/// Who asked for something, and where the answer should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub guild_id: GuildId,
    pub text_channel: ChannelId,
    pub user_id: UserId,
    pub user_name: String,
}

/// Tunables of the playback engine.
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    /// Pause between the end of a session and the next advance.
    pub advance_grace: Duration,
    /// Upper bound for one stream resolution.
    pub resolve_timeout: Duration,
    /// Consecutive resolution failures tolerated before halting, 0 = never halt.
    pub max_consecutive_failures: usize,
    /// Keep advancing after a transport error instead of going idle.
    pub advance_after_error: bool,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            advance_grace: Duration::from_secs(1),
            resolve_timeout: Duration::from_secs(30),
            max_consecutive_failures: 10,
            advance_after_error: true,
        }
    }
}

/// User-facing notices (now playing, errors, queue empty).
///
/// Implementations must return immediately; delivery happens in the background.
pub trait Notifier: Send + Sync {
    fn notify(&self, channel: ChannelId, message: String);
}

/// Best-effort audit log of meaningful transitions.
///
/// Implementations must return immediately and swallow their own failures.
pub trait ActionLogger: Send + Sync {
    fn log_action(&self, action: String, guild_id: GuildId, channel_id: ChannelId);
}

/// Opens voice connections.
#[async_trait]
pub trait VoiceGateway: Send + Sync + 'static {
    type Link: VoiceLink;

    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Self::Link, MusicError>;
}

/// An established voice connection.
#[async_trait]
pub trait VoiceLink: Send + Sync + 'static {
    type Stream: Send + 'static;

    /// Starts `stream`; `done` must be fired when it stops for any reason.
    async fn play(&self, stream: Self::Stream, done: CompletionSignal) -> Result<(), MusicError>;

    /// Stops the current stream, if any.
    async fn stop(&self);

    async fn disconnect(&self) -> Result<(), MusicError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub(crate) u64);

/// Message sent by the audio driver when a session stops.
#[derive(Debug)]
pub(crate) struct Completion {
    pub session: SessionId,
    pub error: Option<String>,
}

/// One-shot "playback finished" signal handed to a [`VoiceLink`].
///
/// Clones share the same session; the engine acts on the first signal only.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    session: SessionId,
    tx: mpsc::UnboundedSender<Completion>,
}

impl CompletionSignal {
    pub(crate) fn new(session: SessionId, tx: mpsc::UnboundedSender<Completion>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Reports the end of the session, with the transport error if there was one.
    pub fn finished(&self, error: Option<String>) {
        let completion = Completion {
            session: self.session,
            error,
        };

        if self.tx.send(completion).is_err() {
            debug!("Player gone, dropping completion for session {:?}", self.session);
        }
    }
}
