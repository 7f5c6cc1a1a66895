//! Fakes shared by the audio tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::watch;

use crate::{
    audio::{
        ActionLogger, CompletionSignal, Notifier, PlayOutcome, PlayerHandle, PlayerRegistry,
        PlayerSettings, PlayerSnapshot, RequestContext, TrackRequest, VoiceGateway, VoiceLink,
    },
    error::MusicError,
    sources::{ResolvedStream, StreamResolver},
};

pub fn guild() -> GuildId {
    GuildId::new(42)
}

pub fn voice() -> ChannelId {
    ChannelId::new(8)
}

pub fn context() -> RequestContext {
    RequestContext {
        guild_id: guild(),
        text_channel: ChannelId::new(7),
        user_id: UserId::new(99),
        user_name: "listener".to_string(),
    }
}

pub fn test_settings() -> PlayerSettings {
    PlayerSettings {
        advance_grace: Duration::from_secs(1),
        resolve_timeout: Duration::from_secs(60),
        max_consecutive_failures: 0,
        advance_after_error: true,
    }
}

pub fn title(url: &str) -> String {
    format!("Title of {}", url)
}

pub fn is_playing(snapshot: &PlayerSnapshot, url: &str) -> bool {
    snapshot.now_playing.as_deref() == Some(title(url).as_str())
}

/// Resolves any URL to its title, except `bad*` (fails) and `hang*` (never answers).
///
/// `hold` parks every resolution until `release`.
pub struct ScriptedResolver {
    calls: Mutex<Vec<String>>,
    open: watch::Sender<bool>,
}

impl Default for ScriptedResolver {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            open: watch::channel(true).0,
        }
    }
}

impl ScriptedResolver {
    pub fn hold(&self) {
        self.open.send_replace(false);
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl StreamResolver for ScriptedResolver {
    type Stream = String;

    async fn resolve(&self, url: &str) -> Result<ResolvedStream<String>, MusicError> {
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;

        self.calls.lock().push(url.to_string());

        if url.starts_with("bad") {
            return Err(MusicError::Resolution(format!("unsupported URL: {}", url)));
        }
        if url.starts_with("hang") {
            std::future::pending::<()>().await;
        }

        Ok(ResolvedStream {
            title: title(url),
            stream: url.to_string(),
        })
    }
}

#[derive(Default)]
pub struct LinkState {
    played: Mutex<Vec<String>>,
    signals: Mutex<Vec<CompletionSignal>>,
    active: AtomicBool,
    overlapped: AtomicBool,
    stops: AtomicUsize,
    disconnected: AtomicBool,
}

impl LinkState {
    pub fn played(&self) -> Vec<String> {
        self.played.lock().clone()
    }

    pub fn signal(&self, index: usize) -> CompletionSignal {
        self.signals.lock()[index].clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// True if a stream was started while another one was still running.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }
}

pub struct FakeLink(Arc<LinkState>);

#[async_trait]
impl VoiceLink for FakeLink {
    type Stream = String;

    async fn play(&self, stream: String, done: CompletionSignal) -> Result<(), MusicError> {
        if self.0.active.swap(true, Ordering::SeqCst) {
            self.0.overlapped.store(true, Ordering::SeqCst);
        }
        self.0.played.lock().push(stream);
        self.0.signals.lock().push(done);
        Ok(())
    }

    async fn stop(&self) {
        self.0.active.store(false, Ordering::SeqCst);
        self.0.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn disconnect(&self) -> Result<(), MusicError> {
        self.0.active.store(false, Ordering::SeqCst);
        self.0.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeGateway {
    links: Mutex<Vec<Arc<LinkState>>>,
}

impl FakeGateway {
    pub fn connects(&self) -> usize {
        self.links.lock().len()
    }

    pub fn link(&self, index: usize) -> Arc<LinkState> {
        self.links.lock()[index].clone()
    }

    /// Ends the stream playing on the newest link, like the driver would.
    pub fn finish_current(&self, error: Option<&str>) {
        let link = self.links.lock().last().cloned().expect("no connection");
        link.active.store(false, Ordering::SeqCst);
        let signal = link.signals.lock().last().cloned().expect("nothing played");
        signal.finished(error.map(str::to_string));
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    type Link = FakeLink;

    async fn connect(&self, _guild_id: GuildId, _channel_id: ChannelId) -> Result<FakeLink, MusicError> {
        let state = Arc::new(LinkState::default());
        self.links.lock().push(state.clone());
        Ok(FakeLink(state))
    }
}

/// Records notices and action log entries in order.
#[derive(Default)]
pub struct Recorder {
    notices: Mutex<Vec<String>>,
    actions: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().clone()
    }
}

impl Notifier for Recorder {
    fn notify(&self, _channel: ChannelId, message: String) {
        self.notices.lock().push(message);
    }
}

impl ActionLogger for Recorder {
    fn log_action(&self, action: String, _guild_id: GuildId, _channel_id: ChannelId) {
        self.actions.lock().push(action);
    }
}

pub struct Harness<R: StreamResolver = ScriptedResolver> {
    pub registry: PlayerRegistry<R, FakeGateway>,
    pub resolver: Arc<R>,
    pub gateway: Arc<FakeGateway>,
    pub recorder: Arc<Recorder>,
    pub player: PlayerHandle,
}

impl Harness<ScriptedResolver> {
    pub fn new(settings: PlayerSettings) -> Self {
        Self::with_resolver(ScriptedResolver::default(), settings)
    }
}

impl<R: StreamResolver<Stream = String>> Harness<R> {
    pub fn with_resolver(resolver: R, settings: PlayerSettings) -> Self {
        let resolver = Arc::new(resolver);
        let gateway = Arc::new(FakeGateway::default());
        let recorder = Arc::new(Recorder::default());
        let registry = PlayerRegistry::new(
            resolver.clone(),
            gateway.clone(),
            settings,
            recorder.clone(),
            recorder.clone(),
        );
        let player = registry.player(guild());

        Self {
            registry,
            resolver,
            gateway,
            recorder,
            player,
        }
    }

    pub async fn play(&self, url: &str) -> Result<PlayOutcome, MusicError> {
        self.player
            .play(TrackRequest::new(url, context()), Some(voice()))
            .await
    }

    pub async fn join(&self, channel: Option<ChannelId>) -> Result<ChannelId, MusicError> {
        self.player.join(channel, context()).await
    }

    pub async fn skip(&self) -> Result<String, MusicError> {
        self.player.skip(context()).await
    }

    pub async fn leave(&self) -> Result<usize, MusicError> {
        self.player.leave(context()).await
    }

    /// Polls the engine until `done` holds; virtual time advances meanwhile.
    pub async fn wait_for(&self, done: impl Fn(&PlayerSnapshot) -> bool) -> PlayerSnapshot {
        for _ in 0..2000 {
            let snapshot = self.player.snapshot().await.expect("player stopped");
            if done(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never reached: {:?}", self.player.snapshot().await);
    }

    pub async fn wait_for_notices(&self, count: usize) {
        for _ in 0..2000 {
            if self.recorder.notices().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} notices, got {:?}", count, self.recorder.notices());
    }
}
