use crate::channel::{lenient_assignment, normalize_assignment, Assignment, ChannelId};
use crate::protocol::MatrixState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// What survives a restart: layout, mode, the virtual window and the channel
/// each tile was showing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentState {
    #[serde(default = "default_tile_count")]
    pub tile_count: usize,
    #[serde(default)]
    pub focused_tile: usize,
    #[serde(default)]
    pub virtual_mode: bool,
    #[serde(default = "default_active_count")]
    pub active_channel_count: usize,
    #[serde(default)]
    pub viewport_column: usize,
    #[serde(default = "empty_assignment", deserialize_with = "lenient_assignment")]
    pub direct_assignment: Assignment,
    #[serde(default = "empty_assignment", deserialize_with = "lenient_assignment")]
    pub virtual_assignment: Assignment,
}

fn default_tile_count() -> usize {
    4
}

fn default_active_count() -> usize {
    16
}

fn empty_assignment() -> Assignment {
    normalize_assignment(Vec::new())
}

impl Default for PersistentState {
    fn default() -> Self {
        Self {
            tile_count: default_tile_count(),
            focused_tile: 0,
            virtual_mode: false,
            active_channel_count: default_active_count(),
            viewport_column: 0,
            direct_assignment: empty_assignment(),
            virtual_assignment: normalize_assignment(ChannelId::all().map(Some).collect()),
        }
    }
}

impl PersistentState {
    /// Missing or unreadable files yield `None`; the caller falls back to
    /// defaults.
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<PersistentState>(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("ignoring malformed state file {}: {}", path.display(), e);
                None
            }
        }
    }

    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Holds the latest published `MatrixState` for the socket and HTTP servers.
/// Only the coordinator publishes; everyone else reads.
pub struct StateManager {
    state: Arc<RwLock<MatrixState>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MatrixState::default())),
        }
    }

    pub fn arc(&self) -> Arc<RwLock<MatrixState>> {
        Arc::clone(&self.state)
    }

    pub async fn get_state(&self) -> MatrixState {
        self.state.read().await.clone()
    }

    /// Replace the snapshot, bumping the revision.  Returns the new revision.
    pub async fn publish(&self, mut next: MatrixState) -> u64 {
        let mut state = self.state.write().await;
        next.rev = state.rev + 1;
        *state = next;
        state.rev
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
