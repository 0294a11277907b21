use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check it on connect.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a control client to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Channel button: plays on the focused tile (direct) or jumps the
    /// virtual window to the channel.
    PressChannel { channel: u8 },
    FocusTile { tile: usize },
    SetTileCount { count: usize },
    SetActiveCount { count: usize },
    SetVirtual { enabled: bool },
    ScrollLeft,
    ScrollRight,
    /// Positive = right, negative = left.
    ScrollBy { columns: i32 },
    /// Stop the focused tile (direct mode only).
    ClearTile,
    OpenFullscreen { tile: Option<usize> },
    CloseFullscreen,
    ApplyView { name: String },
    SaveView { name: String },
    DeleteView { name: String },
    GetState,
}

/// Messages sent from the daemon to control clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect.
    Hello {
        protocol_version: u32,
        rev: u64,
        state: MatrixState,
    },
    State {
        data: MatrixState,
    },
    /// One tile changed status.  The full state follows separately.
    TileStatus {
        tile: usize,
        status: SessionStatus,
        channel: Option<ChannelId>,
        text: String,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Coarse lifecycle state of one tile's stream session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    /// Open issued, waiting for the player to report playback.
    Opening,
    Playing,
    /// Last attempt failed; the tile holds a fresh session and accepts a retry.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TileSnapshot {
    pub tile: usize,
    pub visible: bool,
    /// Grid position while visible.
    pub row: Option<usize>,
    pub col: Option<usize>,
    pub status: SessionStatus,
    pub channel: Option<ChannelId>,
    pub pending_channel: Option<ChannelId>,
    /// Display text, e.g. "Tile 3: CH5 playing".
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FullscreenInfo {
    pub tile: usize,
    pub channel: ChannelId,
    pub status: SessionStatus,
}

/// Snapshot of everything a client needs to draw the matrix.  `rev` is
/// incremented on every publish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MatrixState {
    #[serde(default)]
    pub rev: u64,
    pub tile_count: usize,
    pub rows: usize,
    pub cols: usize,
    pub virtual_mode: bool,
    pub active_list: Vec<ChannelId>,
    pub viewport_column: usize,
    pub max_viewport_column: usize,
    /// 1-based inclusive range of active-list positions on screen, virtual mode.
    pub window: Option<(usize, usize)>,
    pub focused_tile: usize,
    pub fullscreen: Option<FullscreenInfo>,
    pub tiles: Vec<TileSnapshot>,
    #[serde(default)]
    pub views: Vec<String>,
}

/// Largest frame body accepted from a peer.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Body length announced by the frame header at the start of `data`,
    /// or `None` while the header is incomplete.
    pub fn frame_len(data: &[u8]) -> Option<usize> {
        let header: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(header) as usize)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
