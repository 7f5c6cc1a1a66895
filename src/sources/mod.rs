//! Stream resolution: turning a user-supplied URL into something playable.

pub mod ytdlp;

use async_trait::async_trait;

use crate::error::MusicError;

pub use ytdlp::YtDlpResolver;

/// A stream ready to be handed to the voice backend, with its display title.
#[derive(Debug)]
pub struct ResolvedStream<S> {
    pub title: String,
    pub stream: S,
}

/// Trait común para los proveedores de streams
#[cfg_attr(test, mockall::automock(type Stream = String;))]
#[async_trait]
pub trait StreamResolver: Send + Sync + 'static {
    type Stream: Send + 'static;

    /// Resuelve una URL a un stream reproducible y su título
    async fn resolve(&self, url: &str) -> Result<ResolvedStream<Self::Stream>, MusicError>;
}
