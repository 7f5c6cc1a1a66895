use std::time::Duration;
use thiserror::Error;

/// Errors produced by the playback core.
///
/// The `Display` text of every variant is what the user sees in Discord, so
/// keep them short and phrased as replies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MusicError {
    #[error("You need to be in a voice channel to use this command.")]
    UserNotInVoice,

    #[error("I'm already in a voice channel.")]
    AlreadyConnected,

    #[error("I'm not in a voice channel.")]
    NotConnected,

    #[error("No music is playing to skip.")]
    NothingPlaying,

    #[error("Could not connect to the voice channel: {0}")]
    Connection(String),

    #[error("{0}")]
    Resolution(String),

    #[error("Timed out after {} while fetching the stream", humantime::format_duration(*.0))]
    ResolutionTimeout(Duration),

    #[error("Playback failed: {0}")]
    Transport(String),

    #[error("The music player for this server is not running, try again.")]
    PlayerUnavailable,
}

impl MusicError {
    /// Errors caused by the user's own situation; replied to ephemerally.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            MusicError::UserNotInVoice
                | MusicError::AlreadyConnected
                | MusicError::NotConnected
                | MusicError::NothingPlaying
        )
    }
}
