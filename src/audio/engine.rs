//! Per-guild playback engine.
//!
//! Every guild gets one [`PlaybackEngine`] running as its own task. The task
//! owns the queue, the voice connection and the current session; everything
//! else talks to it through messages:
//!
//! - commands from the bot, each answered through a oneshot channel
//! - [`Completion`]s from the audio driver, through [`CompletionSignal`]
//! - internal events from the tasks it spawns (stream resolution, grace timer)
//!
//! Resolution and the grace timer run in spawned tasks and report back with
//! a ticket. A ticket is only honoured while the engine is still in the phase
//! that issued it, so results arriving after a skip, a leave or a reconnect
//! are dropped.

use serenity::model::id::{ChannelId, GuildId};
use serenity::prelude::Mentionable;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        queue::{PlaybackQueue, TrackRequest},
        ActionLogger, Completion, CompletionSignal, Notifier, PlayerSettings, RequestContext,
        SessionId, VoiceGateway, VoiceLink,
    },
    error::MusicError,
    sources::{ResolvedStream, StreamResolver},
};

/// Observable state of a guild's engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing resolving or playing.
    Idle,
    /// Fetching the stream for the head of the queue.
    Resolving,
    /// A session is bound to the connection.
    Playing,
    /// The last session stopped; the next advance is pending.
    Stopping,
}

/// Result of a successful `play`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The request is being resolved right away.
    Started,
    /// The request waits in the queue; 1 is the next one up.
    Queued { position: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub state: PlaybackState,
    pub voice_channel: Option<ChannelId>,
    pub now_playing: Option<String>,
    pub resolving: Option<String>,
    pub queued: Vec<String>,
}

pub(crate) enum Command {
    Join {
        channel: Option<ChannelId>,
        context: RequestContext,
        reply: oneshot::Sender<Result<ChannelId, MusicError>>,
    },
    Play {
        request: TrackRequest,
        channel: Option<ChannelId>,
        reply: oneshot::Sender<Result<PlayOutcome, MusicError>>,
    },
    Skip {
        context: RequestContext,
        reply: oneshot::Sender<Result<String, MusicError>>,
    },
    Leave {
        context: RequestContext,
        reply: oneshot::Sender<Result<usize, MusicError>>,
    },
    Disconnected,
    Snapshot {
        reply: oneshot::Sender<PlayerSnapshot>,
    },
}

enum Internal<S> {
    Resolved {
        ticket: u64,
        result: Result<ResolvedStream<S>, MusicError>,
    },
    GraceElapsed {
        ticket: u64,
    },
}

/// Shared collaborators of every engine.
pub(crate) struct PlayerServices<R, G> {
    pub resolver: Arc<R>,
    pub gateway: Arc<G>,
    pub settings: PlayerSettings,
    pub notifier: Arc<dyn Notifier>,
    pub logger: Arc<dyn ActionLogger>,
}

impl<R, G> Clone for PlayerServices<R, G> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            gateway: self.gateway.clone(),
            settings: self.settings.clone(),
            notifier: self.notifier.clone(),
            logger: self.logger.clone(),
        }
    }
}

struct Connection<L> {
    link: L,
    channel: ChannelId,
}

struct PlaybackSession {
    id: SessionId,
    title: String,
    request: TrackRequest,
}

enum Phase {
    Idle,
    Resolving {
        ticket: u64,
        request: TrackRequest,
        task: AbortHandle,
    },
    Playing(PlaybackSession),
    Stopping {
        ticket: u64,
    },
}

pub(crate) struct PlaybackEngine<R, G>
where
    R: StreamResolver,
    G: VoiceGateway,
{
    guild_id: GuildId,
    services: PlayerServices<R, G>,
    queue: PlaybackQueue,
    connection: Option<Connection<G::Link>>,
    phase: Phase,
    next_ticket: u64,
    next_session: u64,
    consecutive_failures: usize,
    last_context: Option<RequestContext>,
    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    internal_tx: mpsc::UnboundedSender<Internal<R::Stream>>,
    internal: mpsc::UnboundedReceiver<Internal<R::Stream>>,
}

impl<R, G> PlaybackEngine<R, G>
where
    R: StreamResolver,
    G: VoiceGateway,
    G::Link: VoiceLink<Stream = R::Stream>,
{
    pub(crate) fn new(
        guild_id: GuildId,
        services: PlayerServices<R, G>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (internal_tx, internal) = mpsc::unbounded_channel();

        Self {
            guild_id,
            services,
            queue: PlaybackQueue::new(),
            connection: None,
            phase: Phase::Idle,
            next_ticket: 0,
            next_session: 0,
            consecutive_failures: 0,
            last_context: None,
            commands,
            completions_tx,
            completions,
            internal_tx,
            internal,
        }
    }

    /// Processes messages until every [`PlayerHandle`](super::PlayerHandle) is dropped.
    pub(crate) async fn run(mut self) {
        debug!("🎛️ Player iniciado para guild {}", self.guild_id);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(completion) = self.completions.recv() => self.on_completion(completion),
                Some(event) = self.internal.recv() => self.on_internal(event).await,
            }
        }

        if self.connection.is_some() {
            self.teardown().await;
        }
        debug!("🎛️ Player detenido para guild {}", self.guild_id);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join { channel, context, reply } => {
                let _ = reply.send(self.join(channel, &context).await);
            }
            Command::Play { request, channel, reply } => {
                let _ = reply.send(self.play(request, channel).await);
            }
            Command::Skip { context, reply } => {
                let _ = reply.send(self.skip(&context).await);
            }
            Command::Leave { context, reply } => {
                let _ = reply.send(self.leave(&context).await);
            }
            Command::Disconnected => self.disconnected().await,
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    // Conexión

    async fn join(
        &mut self,
        channel: Option<ChannelId>,
        context: &RequestContext,
    ) -> Result<ChannelId, MusicError> {
        let channel = channel.ok_or(MusicError::UserNotInVoice)?;
        if self.connection.is_some() {
            return Err(MusicError::AlreadyConnected);
        }

        self.connect(channel, context).await?;
        Ok(channel)
    }

    async fn connect(&mut self, channel: ChannelId, context: &RequestContext) -> Result<(), MusicError> {
        let link = self.services.gateway.connect(self.guild_id, channel).await?;
        self.connection = Some(Connection { link, channel });

        info!("🔊 Conectado al canal {} en guild {}", channel, self.guild_id);
        self.log(
            context,
            format!("Joined voice channel: {} by {}.", channel.mention(), context.user_name),
        );
        Ok(())
    }

    async fn leave(&mut self, context: &RequestContext) -> Result<usize, MusicError> {
        if self.connection.is_none() {
            return Err(MusicError::NotConnected);
        }

        let discarded = self.teardown().await;
        self.log(
            context,
            format!("Bot disconnected from the voice channel by {}.", context.user_name),
        );
        Ok(discarded)
    }

    async fn disconnected(&mut self) {
        if self.connection.is_none() {
            return;
        }

        let discarded = self.teardown().await;
        warn!(
            "🔌 Desconectado externamente en guild {} ({} requests descartados)",
            self.guild_id, discarded
        );
        if let Some(context) = self.last_context.clone() {
            self.log(&context, "Bot was disconnected from the voice channel.".to_string());
        }
    }

    /// Stops whatever is in flight, clears the queue and drops the connection.
    async fn teardown(&mut self) -> usize {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Resolving { request, task, .. } => {
                task.abort();
                debug!("Resolución cancelada: {}", request.url);
            }
            Phase::Playing(session) => {
                if let Some(connection) = &self.connection {
                    connection.link.stop().await;
                }
                debug!("Sesión {:?} detenida: {}", session.id, session.title);
            }
            Phase::Stopping { .. } | Phase::Idle => {}
        }

        let discarded = self.queue.clear();
        self.consecutive_failures = 0;

        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.link.disconnect().await {
                warn!("Error al desconectar en guild {}: {}", self.guild_id, e);
            }
            info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        }

        discarded
    }

    // Cola y reproducción

    async fn play(
        &mut self,
        request: TrackRequest,
        channel: Option<ChannelId>,
    ) -> Result<PlayOutcome, MusicError> {
        if self.connection.is_none() {
            let channel = channel.ok_or(MusicError::UserNotInVoice)?;
            self.connect(channel, &request.context).await?;
        }

        let context = request.context.clone();
        let url = request.url.clone();
        self.last_context = Some(context.clone());

        let mut position = self.queue.enqueue(request);
        if matches!(self.phase, Phase::Idle) {
            self.consecutive_failures = 0;
            self.advance();
            if position == 1 {
                return Ok(PlayOutcome::Started);
            }
            // Requests left over from a halted run went first.
            position -= 1;
        }

        self.log(&context, format!("Added to queue: {} by {}.", url, context.user_name));
        Ok(PlayOutcome::Queued { position })
    }

    async fn skip(&mut self, context: &RequestContext) -> Result<String, MusicError> {
        let session = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Playing(session) => session,
            other => {
                self.phase = other;
                return Err(MusicError::NothingPlaying);
            }
        };

        if let Some(connection) = &self.connection {
            connection.link.stop().await;
        }

        info!("⏭️ Saltado en guild {}: {}", self.guild_id, session.title);
        self.last_context = Some(context.clone());
        self.log(context, format!("{} skipped the current song.", context.user_name));
        self.schedule_advance();

        Ok(session.title)
    }

    /// Pulls the next request and starts resolving it.
    ///
    /// Only called from `Idle` or `Stopping`; resolution happens in a spawned
    /// task so failures loop back through the message queue, never the stack.
    fn advance(&mut self) {
        self.phase = Phase::Idle;

        if self.connection.is_none() {
            debug!("Sin conexión en guild {}, no se avanza", self.guild_id);
            return;
        }

        let Some(request) = self.queue.next_request() else {
            info!("📭 Cola vacía en guild {}", self.guild_id);
            if let Some(context) = self.last_context.clone() {
                self.notify(&context, "Queue is empty.".to_string());
                self.log(&context, "Queue is empty.".to_string());
            }
            return;
        };

        let ticket = self.issue_ticket();
        let resolver = self.services.resolver.clone();
        let timeout = self.services.settings.resolve_timeout;
        let events = self.internal_tx.clone();
        let url = request.url.clone();

        let task = tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, resolver.resolve(&url)).await {
                Ok(result) => result,
                Err(_) => Err(MusicError::ResolutionTimeout(timeout)),
            };
            let _ = events.send(Internal::Resolved { ticket, result });
        });

        debug!(
            "🔎 Resolviendo {} (ticket {}, en cola desde {})",
            request.url, ticket, request.added_at
        );
        self.phase = Phase::Resolving {
            ticket,
            request,
            task: task.abort_handle(),
        };
    }

    async fn on_internal(&mut self, event: Internal<R::Stream>) {
        match event {
            Internal::Resolved { ticket, result } => self.on_resolved(ticket, result).await,
            Internal::GraceElapsed { ticket } => {
                if matches!(self.phase, Phase::Stopping { ticket: current } if current == ticket) {
                    self.advance();
                } else {
                    debug!("Ignorando temporizador obsoleto (ticket {})", ticket);
                }
            }
        }
    }

    async fn on_resolved(&mut self, ticket: u64, result: Result<ResolvedStream<R::Stream>, MusicError>) {
        let request = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Resolving { ticket: current, request, .. } if current == ticket => request,
            other => {
                self.phase = other;
                debug!("Descartando resolución obsoleta (ticket {})", ticket);
                return;
            }
        };

        let started = match result {
            Ok(resolved) => self.start_session(&request, resolved).await,
            Err(e) => Err(e),
        };

        if let Err(e) = started {
            self.on_resolution_failure(&request, e);
        }
    }

    async fn start_session(
        &mut self,
        request: &TrackRequest,
        resolved: ResolvedStream<R::Stream>,
    ) -> Result<(), MusicError> {
        let id = SessionId(self.next_session);
        self.next_session += 1;

        let connection = self.connection.as_ref().ok_or(MusicError::NotConnected)?;
        let signal = CompletionSignal::new(id, self.completions_tx.clone());
        connection.link.play(resolved.stream, signal).await?;

        self.consecutive_failures = 0;
        info!("🎵 Reproduciendo en guild {}: {}", self.guild_id, resolved.title);
        self.notify(&request.context, format!("Now playing: {}", resolved.title));
        self.log(
            &request.context,
            format!("Now playing: {} by {}.", resolved.title, request.context.user_name),
        );

        self.phase = Phase::Playing(PlaybackSession {
            id,
            title: resolved.title,
            request: request.clone(),
        });
        Ok(())
    }

    fn on_resolution_failure(&mut self, request: &TrackRequest, e: MusicError) {
        self.consecutive_failures += 1;
        warn!("❌ No se pudo reproducir {}: {}", request.url, e);
        self.notify(&request.context, format!("Error occurred: {}", e));
        self.log(&request.context, format!("Error while playing {}: {}", request.url, e));

        let limit = self.services.settings.max_consecutive_failures;
        if limit > 0 && self.consecutive_failures >= limit {
            let message = format!(
                "Stopped after {} consecutive failures, {} request(s) left in the queue.",
                self.consecutive_failures,
                self.queue.len()
            );
            warn!("⛔ Guild {}: {}", self.guild_id, message);
            self.notify(&request.context, message.clone());
            self.log(&request.context, message);
            self.phase = Phase::Idle;
            return;
        }

        self.advance();
    }

    fn on_completion(&mut self, completion: Completion) {
        let session = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Playing(session) if session.id == completion.session => session,
            other => {
                self.phase = other;
                debug!("Ignorando completion tardío de la sesión {:?}", completion.session);
                return;
            }
        };

        match completion.error {
            Some(transport) => {
                let e = MusicError::Transport(transport);
                error!("❌ Error en track '{}' para guild {}: {}", session.title, self.guild_id, e);
                self.log(&session.request.context, format!("Error playing {}: {}", session.title, e));

                if !self.services.settings.advance_after_error {
                    return;
                }
            }
            None => info!("🎵 Track terminó en guild {}: {}", self.guild_id, session.title),
        }

        self.schedule_advance();
    }

    /// Enters `Stopping` and advances once the grace interval has passed.
    fn schedule_advance(&mut self) {
        let ticket = self.issue_ticket();
        let grace = self.services.settings.advance_grace;
        let events = self.internal_tx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = events.send(Internal::GraceElapsed { ticket });
        });

        self.phase = Phase::Stopping { ticket };
    }

    fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            state: self.state(),
            voice_channel: self.connection.as_ref().map(|connection| connection.channel),
            now_playing: match &self.phase {
                Phase::Playing(session) => Some(session.title.clone()),
                _ => None,
            },
            resolving: match &self.phase {
                Phase::Resolving { request, .. } => Some(request.url.clone()),
                _ => None,
            },
            queued: self.queue.urls(),
        }
    }

    fn state(&self) -> PlaybackState {
        match self.phase {
            Phase::Idle => PlaybackState::Idle,
            Phase::Resolving { .. } => PlaybackState::Resolving,
            Phase::Playing(_) => PlaybackState::Playing,
            Phase::Stopping { .. } => PlaybackState::Stopping,
        }
    }

    fn issue_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn notify(&self, context: &RequestContext, message: String) {
        self.services.notifier.notify(context.text_channel, message);
    }

    fn log(&self, context: &RequestContext, action: String) {
        self.services
            .logger
            .log_action(action, context.guild_id, context.text_channel);
    }
}
