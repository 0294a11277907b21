//! In-memory media backend.
//!
//! Sessions follow a script chosen per URL instead of talking to a player.
//! The daemon uses it for headless dry runs; tests use the ledger to observe
//! which sessions were created, opened and released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::media::{MediaBackend, MediaError, MediaSession, MediaState, OpenOptions, SessionId, SurfaceId};

/// How a scripted session behaves once opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Reports `Playing` as soon as it is opened.
    Play,
    /// Stays `Opening` until someone calls `set_state`.
    Stall,
    /// `open` fails synchronously.
    Reject,
    /// Opens, then reports `Error`.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRecord {
    pub session: SessionId,
    pub url: String,
    pub surface: Option<SurfaceId>,
    pub fullscreen: bool,
}

struct Ledger {
    default: Script,
    scripts: HashMap<String, Script>,
    states: HashMap<SessionId, MediaState>,
    created: usize,
    opens: Vec<OpenRecord>,
    released: Vec<SessionId>,
}

#[derive(Clone)]
pub struct ScriptedBackend {
    ledger: Arc<Mutex<Ledger>>,
}

impl ScriptedBackend {
    pub fn new(default: Script) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(Ledger {
                default,
                scripts: HashMap::new(),
                states: HashMap::new(),
                created: 0,
                opens: Vec::new(),
                released: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Override the script for one exact URL.
    pub fn script_url(&self, url: impl Into<String>, script: Script) {
        self.lock().scripts.insert(url.into(), script);
    }

    /// Force the state a session reports on its next poll.
    pub fn set_state(&self, session: SessionId, state: MediaState) {
        self.lock().states.insert(session, state);
    }

    /// Number of sessions handed out so far.
    pub fn created(&self) -> usize {
        self.lock().created
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.lock().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens.len()
    }

    pub fn clear_opens(&self) {
        self.lock().opens.clear();
    }

    pub fn released(&self) -> Vec<SessionId> {
        self.lock().released.clone()
    }
}

impl MediaBackend for ScriptedBackend {
    fn new_session(&self) -> Box<dyn MediaSession> {
        let id = SessionId::next();
        {
            let mut ledger = self.lock();
            ledger.created += 1;
            ledger.states.insert(id, MediaState::Idle);
        }
        Box::new(ScriptedSession {
            id,
            surface: None,
            released: false,
            backend: self.clone(),
        })
    }
}

struct ScriptedSession {
    id: SessionId,
    surface: Option<SurfaceId>,
    released: bool,
    backend: ScriptedBackend,
}

impl MediaSession for ScriptedSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn bind_display_surface(&mut self, surface: SurfaceId) {
        self.surface = Some(surface);
    }

    fn open(&mut self, url: &str, options: &OpenOptions) -> Result<(), MediaError> {
        if self.released {
            return Err(MediaError::Released);
        }
        let mut ledger = self.backend.lock();
        ledger.opens.push(OpenRecord {
            session: self.id,
            url: url.to_string(),
            surface: self.surface,
            fullscreen: options.fullscreen,
        });
        let script = ledger.scripts.get(url).copied().unwrap_or(ledger.default);
        let state = match script {
            Script::Play => MediaState::Playing,
            Script::Stall => MediaState::Opening,
            Script::Fail => MediaState::Error,
            Script::Reject => {
                ledger.states.insert(self.id, MediaState::Error);
                return Err(MediaError::Rejected(url.to_string()));
            }
        };
        ledger.states.insert(self.id, state);
        Ok(())
    }

    fn state(&self) -> MediaState {
        self.backend
            .lock()
            .states
            .get(&self.id)
            .copied()
            .unwrap_or(MediaState::Idle)
    }

    fn stop(&mut self) -> Result<(), MediaError> {
        self.backend.lock().states.insert(self.id, MediaState::Stopped);
        Ok(())
    }

    fn release(&mut self) -> Result<(), MediaError> {
        if !self.released {
            self.released = true;
            self.backend.lock().released.push(self.id);
        }
        Ok(())
    }
}
