use matrix_proto::protocol::{Command, MatrixState, SessionStatus};
use matrix_proto::ChannelId;
use tokio::sync::oneshot;

/// Messages from tile controllers (and their timers) back into the control
/// loop.  Timer messages carry the attempt token they were issued under.
#[derive(Debug, Clone, PartialEq)]
pub enum TileEvent {
    /// Monitor tick: time to look at the session state.
    Poll { tile: usize, token: u64 },
    /// Open deadline elapsed.
    Deadline { tile: usize, token: u64 },
    /// A controller changed status.
    StatusChanged {
        tile: usize,
        status: SessionStatus,
        channel: Option<ChannelId>,
        text: String,
    },
}

impl TileEvent {
    pub fn tile(&self) -> usize {
        match self {
            TileEvent::Poll { tile, .. }
            | TileEvent::Deadline { tile, .. }
            | TileEvent::StatusChanged { tile, .. } => *tile,
        }
    }
}

/// External inputs into the coordinator loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// A command from the control socket or HTTP API.
    ClientCommand(Command),
    /// A command whose sender wants the state published after it ran.
    ClientRequest(Command, oneshot::Sender<MatrixState>),
    Shutdown,
}

/// What the coordinator announces to listeners after handling input.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// The published `MatrixState` changed; fetch it from the state manager.
    StateUpdated,
    TileStatus {
        tile: usize,
        status: SessionStatus,
        channel: Option<ChannelId>,
        text: String,
    },
    /// A command could not be carried out.
    CommandFailed(String),
    /// A log line from the tracing broadcast layer.
    Log(String),
}
