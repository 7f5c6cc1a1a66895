use serenity::{http::Http, model::id::ChannelId};
use std::sync::Arc;
use tracing::warn;

use crate::audio::Notifier;

/// Posts player notices ("Now playing: ...", errors) to the requesting channel.
pub struct DiscordNotifier {
    http: Arc<Http>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

impl Notifier for DiscordNotifier {
    fn notify(&self, channel: ChannelId, message: String) {
        let http = self.http.clone();
        tokio::spawn(async move {
            if let Err(e) = channel.say(&http, &message).await {
                warn!("No se pudo enviar aviso al canal {}: {:?}", channel, e);
            }
        });
    }
}
