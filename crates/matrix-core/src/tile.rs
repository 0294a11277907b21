//! TileSessionController drives one tile's media session through
//! open → monitor → playing / failed.
//!
//! Every open attempt bumps `attempt_token`.  The monitor and deadline timers
//! are tokio tasks that only send `TileEvent`s tagged with the token they were
//! armed under; the control loop feeds those back through `handle_event`,
//! which drops anything whose token is no longer current.  Each attempt gets a
//! brand new media session, and the previous one goes to `dispose_async`.

use std::sync::Arc;
use std::time::Duration;

use matrix_proto::protocol::SessionStatus;
use matrix_proto::ChannelId;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::event::TileEvent;
use crate::media::{dispose_async, MediaBackend, MediaError, MediaSession, MediaState, SessionId, SurfaceId};
use crate::resolver::ChannelResolver;

/// How often an Opening tile looks at its session state.
pub const POLL_INTERVAL: Duration = Duration::from_millis(120);

/// Why an attempt ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TileFailure {
    #[error("player refused to open the stream")]
    OpenFailure,
    #[error("no playback before the open deadline")]
    Timeout,
    #[error("stream terminated ({0:?})")]
    StreamTerminated(MediaState),
}

/// Collaborators shared by every tile controller.
#[derive(Clone)]
pub struct TileContext {
    pub backend: Arc<dyn MediaBackend>,
    pub resolver: Arc<dyn ChannelResolver>,
    pub events: mpsc::UnboundedSender<TileEvent>,
    pub open_timeout: Duration,
}

#[derive(Default)]
struct AttemptTimers {
    poll: Option<AbortHandle>,
    deadline: Option<AbortHandle>,
}

impl AttemptTimers {
    fn cancel(&mut self) {
        if let Some(h) = self.poll.take() {
            h.abort();
        }
        if let Some(h) = self.deadline.take() {
            h.abort();
        }
    }

    fn is_armed(&self) -> bool {
        self.poll.is_some() || self.deadline.is_some()
    }
}

pub struct TileSessionController {
    tile: usize,
    label: String,
    ctx: TileContext,
    surface: Option<SurfaceId>,
    fullscreen: bool,
    /// `None` only while paused for fullscreen or after shutdown.
    session: Option<Box<dyn MediaSession>>,
    status: SessionStatus,
    status_text: String,
    assigned_channel: Option<ChannelId>,
    pending_channel: Option<ChannelId>,
    attempt_token: u64,
    last_failure: Option<TileFailure>,
    paused: bool,
    shut_down: bool,
    timers: AttemptTimers,
}

impl TileSessionController {
    pub fn new(tile: usize, ctx: TileContext, surface: Option<SurfaceId>) -> Self {
        Self::build(tile, format!("Tile {}", tile + 1), ctx, surface, false)
    }

    /// Controller for the exclusive fullscreen surface.  Opens with the
    /// player's fullscreen option set.
    pub fn fullscreen(tile: usize, ctx: TileContext, surface: Option<SurfaceId>) -> Self {
        Self::build(tile, "Fullscreen".to_string(), ctx, surface, true)
    }

    fn build(
        tile: usize,
        label: String,
        ctx: TileContext,
        surface: Option<SurfaceId>,
        fullscreen: bool,
    ) -> Self {
        let status_text = format!("{}: Idle", label);
        let mut controller = Self {
            tile,
            label,
            ctx,
            surface,
            fullscreen,
            session: None,
            status: SessionStatus::Idle,
            status_text,
            assigned_channel: None,
            pending_channel: None,
            attempt_token: 0,
            last_failure: None,
            paused: false,
            shut_down: false,
            timers: AttemptTimers::default(),
        };
        controller.session = Some(controller.fresh_session());
        controller
    }

    // ── accessors ─────────────────────────────────────────────────────────────

    pub fn tile(&self) -> usize {
        self.tile
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Channel last confirmed playing.  Survives a fullscreen pause.
    pub fn assigned_channel(&self) -> Option<ChannelId> {
        self.assigned_channel
    }

    /// Channel of the attempt in flight.
    pub fn pending_channel(&self) -> Option<ChannelId> {
        self.pending_channel
    }

    pub fn attempt_token(&self) -> u64 {
        self.attempt_token
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id())
    }

    pub fn last_failure(&self) -> Option<TileFailure> {
        self.last_failure
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn timers_armed(&self) -> bool {
        self.timers.is_armed()
    }

    // ── commands ──────────────────────────────────────────────────────────────

    /// Start showing `channel`.  A no-op when that channel is already playing;
    /// otherwise the current attempt is superseded and a fresh session opens.
    pub fn play_channel(&mut self, channel: ChannelId) {
        if self.shut_down {
            warn!("{}: play {} after shutdown ignored", self.label, channel);
            return;
        }

        let live = self
            .session
            .as_ref()
            .map_or(false, |s| s.state() == MediaState::Playing);
        if self.status == SessionStatus::Playing && self.assigned_channel == Some(channel) && live {
            debug!("{}: {} already playing", self.label, channel);
            return;
        }

        self.timers.cancel();
        self.attempt_token += 1;
        let token = self.attempt_token;
        self.pending_channel = Some(channel);
        self.paused = false;
        self.last_failure = None;

        let fresh = self.fresh_session();
        self.replace_session(Some(fresh));
        self.set_status(
            SessionStatus::Opening,
            format!("{}: Opening {}...", self.label, channel),
        );

        let url = self.ctx.resolver.url(channel);
        let mut options = self.ctx.resolver.open_options();
        options.fullscreen = self.fullscreen;
        let opened = match self.session.as_mut() {
            Some(session) => session.open(&url, &options),
            None => Err(MediaError::Released),
        };
        if let Err(e) = opened {
            warn!("{}: open {} failed: {}", self.label, channel, e);
            self.fail(token, TileFailure::OpenFailure);
            return;
        }

        info!("{}: opening {} (attempt {})", self.label, channel, token);
        self.arm_timers(token);
    }

    /// Drop whatever is showing and sit idle on a fresh session.
    pub fn stop_to_idle(&mut self) {
        if self.shut_down {
            return;
        }
        self.timers.cancel();
        self.attempt_token += 1;
        let fresh = self.fresh_session();
        self.replace_session(Some(fresh));
        self.assigned_channel = None;
        self.pending_channel = None;
        self.paused = false;
        self.set_status(SessionStatus::Idle, format!("{}: Idle", self.label));
    }

    /// Give up the session while the channel is shown fullscreen elsewhere.
    /// The assigned channel is kept so the tile can be resumed with
    /// `play_channel`.
    pub fn pause_for_fullscreen(&mut self) {
        if self.shut_down {
            return;
        }
        self.timers.cancel();
        self.attempt_token += 1;
        self.replace_session(None);
        if let Some(ch) = self.pending_channel.take() {
            self.assigned_channel = Some(ch);
        }
        self.paused = true;
        let text = match self.assigned_channel {
            Some(ch) => format!("{}: {} (fullscreen)", self.label, ch),
            None => format!("{}: Idle", self.label),
        };
        self.set_status(SessionStatus::Idle, text);
    }

    /// Cancel timers and tear the session down.  Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.timers.cancel();
        self.attempt_token += 1;
        self.replace_session(None);
        debug!("{}: shut down", self.label);
    }

    /// Feed a timer message back in.  Stale tokens are ignored.
    pub fn handle_event(&mut self, event: &TileEvent) {
        match *event {
            TileEvent::Poll { token, .. } => self.on_poll(token),
            TileEvent::Deadline { token, .. } => self.on_deadline(token),
            TileEvent::StatusChanged { .. } => {}
        }
    }

    // ── attempt lifecycle ─────────────────────────────────────────────────────

    fn is_current(&self, token: u64) -> bool {
        token == self.attempt_token && self.status == SessionStatus::Opening
    }

    fn on_poll(&mut self, token: u64) {
        if !self.is_current(token) {
            return;
        }
        let Some(state) = self.session.as_ref().map(|s| s.state()) else {
            return;
        };
        match state {
            MediaState::Playing => self.mark_playing(),
            s if s.is_terminal() => self.fail(token, TileFailure::StreamTerminated(s)),
            _ => {}
        }
    }

    fn on_deadline(&mut self, token: u64) {
        if !self.is_current(token) {
            debug!("{}: stale deadline for attempt {}", self.label, token);
            return;
        }
        let state = self.session.as_ref().map(|s| s.state());
        if state == Some(MediaState::Playing) {
            self.mark_playing();
        } else {
            self.fail(token, TileFailure::Timeout);
        }
    }

    fn mark_playing(&mut self) {
        self.timers.cancel();
        self.assigned_channel = self.pending_channel;
        let text = match self.assigned_channel {
            Some(ch) => format!("{}: {} playing", self.label, ch),
            None => format!("{}: playing", self.label),
        };
        info!("{}", text);
        self.set_status(SessionStatus::Playing, text);
    }

    /// Move the current attempt to `Failed`.  Runs at most once per attempt:
    /// a second call for the same token finds the status already changed.
    fn fail(&mut self, token: u64, reason: TileFailure) {
        if !self.is_current(token) {
            return;
        }
        self.timers.cancel();
        let text = match self.pending_channel {
            Some(ch) => format!("{}: No stream on {}", self.label, ch),
            None => format!("{}: No stream", self.label),
        };
        warn!("{} ({})", text, reason);

        let fresh = self.fresh_session();
        self.replace_session(Some(fresh));
        self.assigned_channel = None;
        self.pending_channel = None;
        self.last_failure = Some(reason);
        self.set_status(SessionStatus::Failed, text);
    }

    fn arm_timers(&mut self, token: u64) {
        let tile = self.tile;

        let tx = self.ctx.events.clone();
        let timeout = self.ctx.open_timeout;
        let deadline = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(TileEvent::Deadline { tile, token });
        });

        let tx = self.ctx.events.clone();
        let poll = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(TileEvent::Poll { tile, token }).is_err() {
                    break;
                }
            }
        });

        self.timers.deadline = Some(deadline.abort_handle());
        self.timers.poll = Some(poll.abort_handle());
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    fn fresh_session(&self) -> Box<dyn MediaSession> {
        let mut session = self.ctx.backend.new_session();
        if let Some(surface) = self.surface {
            session.bind_display_surface(surface);
        }
        session
    }

    fn replace_session(&mut self, next: Option<Box<dyn MediaSession>>) {
        if let Some(old) = std::mem::replace(&mut self.session, next) {
            dispose_async(old);
        }
    }

    fn set_status(&mut self, status: SessionStatus, text: String) {
        self.status = status;
        self.status_text = text.clone();
        let _ = self.ctx.events.send(TileEvent::StatusChanged {
            tile: self.tile,
            status,
            channel: self.assigned_channel,
            text,
        });
    }
}

impl Drop for TileSessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
