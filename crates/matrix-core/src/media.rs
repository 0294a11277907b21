//! Media session contract.
//!
//! A `MediaSession` is one stream connection attempt in an external player.
//! The tile controller only ever opens it, polls its coarse state, and hands it
//! to `dispose_async` when done.  Backends must keep `open` and `state`
//! non-blocking; `stop` and `release` may block and are only called from a
//! detached worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::debug;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one media session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Native drawable a session renders into (X11 window id, HWND, NSView).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// Coarse, polled player state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    Idle,
    Opening,
    Playing,
    Ended,
    Error,
    Stopped,
}

impl MediaState {
    /// The attempt is over without (or after) playback.
    pub fn is_terminal(self) -> bool {
        matches!(self, MediaState::Ended | MediaState::Error | MediaState::Stopped)
    }
}

/// Per-open options handed to the player along with the URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub user: Option<String>,
    pub password: Option<String>,
    /// RTP interleaved over the RTSP TCP connection.
    pub tcp: bool,
    pub network_caching: Duration,
    pub fullscreen: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("player binary not found")]
    BinaryNotFound,
    #[error("failed to start player: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("session already released")]
    Released,
    #[error("open rejected: {0}")]
    Rejected(String),
    #[error("player IPC: {0}")]
    Ipc(String),
}

pub trait MediaSession: Send + Sync {
    fn id(&self) -> SessionId;

    /// Associate video output with a native drawable.  Must precede `open`.
    fn bind_display_surface(&mut self, surface: SurfaceId);

    /// Begin connecting.  Returns immediately; errors here mean the attempt
    /// could not even start.
    fn open(&mut self, url: &str, options: &OpenOptions) -> Result<(), MediaError>;

    fn state(&self) -> MediaState;

    fn stop(&mut self) -> Result<(), MediaError>;

    fn release(&mut self) -> Result<(), MediaError>;
}

/// Factory for fresh, unopened sessions.
pub trait MediaBackend: Send + Sync {
    fn new_session(&self) -> Box<dyn MediaSession>;
}

/// Stop and release `session` on a detached worker.  Best effort: errors are
/// logged at debug level and dropped, and there is no ordering relative to
/// whatever the caller opens next.
pub fn dispose_async(session: Box<dyn MediaSession>) {
    let work = move || {
        let mut session = session;
        let id = session.id();
        if let Err(e) = session.stop() {
            debug!("session {:?}: stop failed: {}", id, e);
        }
        if let Err(e) = session.release() {
            debug!("session {:?}: release failed: {}", id, e);
        }
    };

    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            rt.spawn_blocking(work);
        }
        Err(_) => {
            std::thread::spawn(work);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(MediaState::Ended.is_terminal());
        assert!(MediaState::Error.is_terminal());
        assert!(MediaState::Stopped.is_terminal());
        assert!(!MediaState::Opening.is_terminal());
        assert!(!MediaState::Playing.is_terminal());
        assert!(!MediaState::Idle.is_terminal());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert!(b > a);
    }
}
