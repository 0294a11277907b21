/// MatrixCoordinator: single-owner event loop for the tile matrix.
///
/// Owns every tile controller, the scroll engine, the view store and the
/// fullscreen takeover.  Client commands arrive as `CoreEvent`s; controller
/// timers and status changes arrive as `TileEvent`s on a second channel.
/// Nothing else mutates matrix state.
///
/// After each handled command the coordinator saves the state file, publishes
/// a fresh `MatrixState` through the `StateManager` and broadcasts
/// `BroadcastMessage::StateUpdated`.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use matrix_proto::channel::{normalize_assignment, Assignment};
use matrix_proto::config::Config;
use matrix_proto::protocol::{Command, FullscreenInfo, MatrixState, SessionStatus, TileSnapshot};
use matrix_proto::state::{PersistentState, StateManager};
use matrix_proto::views::{ViewRecord, ViewStore};
use matrix_proto::ChannelId;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::event::{BroadcastMessage, CoreEvent, TileEvent};
use crate::grid::{active_list_from_assignment, GridDims, TILE_SLOTS};
use crate::media::{MediaBackend, SurfaceId};
use crate::scroll::{TileDriver, VirtualScrollEngine};
use crate::tile::{TileContext, TileSessionController};

/// Event index of the dedicated fullscreen controller.
pub const FULLSCREEN_TILE: usize = TILE_SLOTS;

// ── TileBank ──────────────────────────────────────────────────────────────────

/// The fixed set of tile controllers, one per physical slot.
pub struct TileBank {
    tiles: Vec<TileSessionController>,
}

impl TileBank {
    fn new(ctx: &TileContext, config: &Config) -> Self {
        let tiles = (0..TILE_SLOTS)
            .map(|idx| {
                let surface = config.tile_surface(idx).map(SurfaceId);
                TileSessionController::new(idx, ctx.clone(), surface)
            })
            .collect();
        Self { tiles }
    }

    pub fn get(&self, tile: usize) -> Option<&TileSessionController> {
        self.tiles.get(tile)
    }

    fn get_mut(&mut self, tile: usize) -> Option<&mut TileSessionController> {
        self.tiles.get_mut(tile)
    }

    /// Channel the tile is showing or trying to show.
    fn intended_channel(&self, tile: usize) -> Option<ChannelId> {
        self.get(tile)
            .and_then(|t| t.pending_channel().or(t.assigned_channel()))
    }

    fn handle_event(&mut self, event: &TileEvent) {
        if let Some(t) = self.tiles.get_mut(event.tile()) {
            t.handle_event(event);
        }
    }

    fn shutdown_all(&mut self) {
        for t in &mut self.tiles {
            t.shutdown();
        }
    }
}

impl TileDriver for TileBank {
    fn play_channel(&mut self, tile: usize, channel: ChannelId) {
        if let Some(t) = self.tiles.get_mut(tile) {
            t.play_channel(channel);
        }
    }

    fn stop_to_idle(&mut self, tile: usize) {
        if let Some(t) = self.tiles.get_mut(tile) {
            let settled = t.status() == SessionStatus::Idle
                && !t.is_paused()
                && t.assigned_channel().is_none()
                && t.pending_channel().is_none();
            if !settled {
                t.stop_to_idle();
            }
        }
    }
}

struct Fullscreen {
    tile: usize,
    channel: ChannelId,
    controller: TileSessionController,
}

// ── MatrixCoordinator ─────────────────────────────────────────────────────────

pub struct MatrixCoordinator {
    config: Config,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ctx: TileContext,
    tile_rx: mpsc::UnboundedReceiver<TileEvent>,
    bank: TileBank,
    engine: VirtualScrollEngine,
    fullscreen: Option<Fullscreen>,
    views: ViewStore,
    state_file: PathBuf,
    tile_count: usize,
    virtual_mode: bool,
    focused_tile: usize,
    /// Last direct-mode channel per tile.  Kept while virtual mode is on.
    direct_assignment: Assignment,
}

impl MatrixCoordinator {
    pub fn new(
        config: Config,
        backend: Arc<dyn MediaBackend>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let (tile_tx, tile_rx) = mpsc::unbounded_channel();
        let ctx = TileContext {
            backend,
            resolver: Arc::new(config.stream.clone()),
            events: tile_tx,
            open_timeout: Duration::from_millis(config.stream.open_timeout_ms),
        };
        let bank = TileBank::new(&ctx, &config);

        let state_file = config.app.state_file.clone();
        let saved = PersistentState::load(&state_file).unwrap_or_else(|| PersistentState {
            tile_count: config.app.default_tiles,
            ..PersistentState::default()
        });
        let tile_count = saved.tile_count.clamp(1, TILE_SLOTS);
        let engine = VirtualScrollEngine::new(
            tile_count,
            &active_list_from_assignment(&saved.virtual_assignment),
            saved.active_channel_count,
            saved.viewport_column,
        );
        let views = ViewStore::open(config.app.views_file.clone());
        debug!(
            "view store {} holds {} views",
            views.path().display(),
            views.list_names().len()
        );

        Ok(Self {
            config,
            state_manager: Arc::new(StateManager::new()),
            broadcast_tx,
            ctx,
            tile_rx,
            bank,
            engine,
            fullscreen: None,
            views,
            state_file,
            tile_count,
            virtual_mode: saved.virtual_mode,
            focused_tile: saved.focused_tile,
            direct_assignment: normalize_assignment(saved.direct_assignment),
        })
    }

    /// Borrow the state manager (for the socket and HTTP servers).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run the event loop.  Returns on `Shutdown` or when every command
    /// sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("MatrixCoordinator: starting event loop");
        self.restore();
        self.publish().await;

        loop {
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("MatrixCoordinator: event channel closed, shutting down");
                        break;
                    }
                    Some(CoreEvent::Shutdown) => {
                        info!("MatrixCoordinator: shutdown requested");
                        break;
                    }
                    Some(CoreEvent::ClientCommand(cmd)) => {
                        self.process_command(cmd).await;
                    }
                    Some(CoreEvent::ClientRequest(cmd, reply)) => {
                        self.process_command(cmd).await;
                        let _ = reply.send(self.state_manager.get_state().await);
                    }
                },
                Some(evt) = self.tile_rx.recv() => {
                    self.handle_tile_event(evt).await;
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Handle one client command, then save and publish.  Errors go to the
    /// log and to clients; the loop keeps running.
    async fn process_command(&mut self, cmd: Command) {
        info!("MatrixCoordinator: command {:?}", cmd);
        if let Err(e) = self.handle_command(cmd).await {
            error!("MatrixCoordinator: command error: {}", e);
            let _ = self.broadcast_tx.send(BroadcastMessage::CommandFailed(e.to_string()));
        }
        self.save_state().await;
        self.publish().await;
    }

    /// Put the saved layout back on screen.
    pub fn restore(&mut self) {
        self.clamp_focus();
        if self.virtual_mode {
            info!(
                "restoring virtual matrix: {} tiles, {} channels, viewport {}",
                self.tile_count,
                self.engine.active_count(),
                self.engine.viewport()
            );
            self.engine.reload(&mut self.bank);
            return;
        }
        info!("restoring direct matrix: {} tiles", self.tile_count);
        for tile in 0..self.tile_count {
            if let Some(ch) = self.direct_assignment.get(tile).copied().flatten() {
                self.bank.play_channel(tile, ch);
            }
        }
    }

    // ── tile events ───────────────────────────────────────────────────────────

    async fn handle_tile_event(&mut self, evt: TileEvent) {
        match evt {
            TileEvent::StatusChanged {
                tile,
                status,
                channel,
                text,
            } => {
                let _ = self.broadcast_tx.send(BroadcastMessage::TileStatus {
                    tile,
                    status,
                    channel,
                    text,
                });
                self.publish().await;
            }
            timer if timer.tile() == FULLSCREEN_TILE => {
                if let Some(fs) = self.fullscreen.as_mut() {
                    fs.controller.handle_event(&timer);
                }
            }
            timer => self.bank.handle_event(&timer),
        }
    }

    // ── command handlers ──────────────────────────────────────────────────────

    pub async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::PressChannel { channel } => self.press_channel(channel)?,
            Command::FocusTile { tile } => self.focus_tile(tile)?,
            Command::SetTileCount { count } => self.set_tile_count(count)?,
            Command::SetActiveCount { count } => self.set_active_count(count)?,
            Command::SetVirtual { enabled } => self.set_virtual(enabled),
            Command::ScrollLeft => self.scroll(-1)?,
            Command::ScrollRight => self.scroll(1)?,
            Command::ScrollBy { columns } => self.scroll(i64::from(columns))?,
            Command::ClearTile => self.clear_tile()?,
            Command::OpenFullscreen { tile } => self.open_fullscreen(tile)?,
            Command::CloseFullscreen => {
                if !self.close_fullscreen() {
                    debug!("close fullscreen: nothing open");
                }
            }
            Command::ApplyView { name } => self.apply_view(&name)?,
            Command::SaveView { name } => self.save_view(&name).await?,
            Command::DeleteView { name } => self.delete_view(&name).await?,
            Command::GetState => {
                // State is published after every command
            }
        }
        Ok(())
    }

    fn press_channel(&mut self, channel: u8) -> anyhow::Result<()> {
        let ch = ChannelId::new(channel).ok_or_else(|| anyhow!("channel {} out of range", channel))?;
        self.close_fullscreen();
        if self.virtual_mode {
            let outcome = self.engine.jump_to_channel(ch, self.focused_tile, &mut self.bank);
            info!("jump to {}: {:?}", ch, outcome);
        } else {
            self.bank.play_channel(self.focused_tile, ch);
        }
        Ok(())
    }

    fn focus_tile(&mut self, tile: usize) -> anyhow::Result<()> {
        if self.placement(tile).is_none() {
            bail!("tile {} is not visible", tile + 1);
        }
        self.focused_tile = tile;
        Ok(())
    }

    fn set_tile_count(&mut self, count: usize) -> anyhow::Result<()> {
        if !(1..=TILE_SLOTS).contains(&count) {
            bail!("tile count must be 1..={}, got {}", TILE_SLOTS, count);
        }
        self.close_fullscreen();
        self.tile_count = count;
        if self.virtual_mode {
            self.engine.set_tile_count(count, &mut self.bank);
        } else {
            self.reshape_engine();
            for tile in count..TILE_SLOTS {
                self.bank.stop_to_idle(tile);
            }
        }
        self.clamp_focus();
        Ok(())
    }

    fn set_active_count(&mut self, count: usize) -> anyhow::Result<()> {
        if !(1..=TILE_SLOTS).contains(&count) {
            bail!("active channel count must be 1..={}, got {}", TILE_SLOTS, count);
        }
        if self.virtual_mode {
            self.close_fullscreen();
            self.engine.set_active_count(count, &mut self.bank);
            self.clamp_focus();
        } else {
            let active = self.engine.active_list().to_vec();
            self.engine
                .reshape(self.tile_count, &active, count, self.engine.viewport());
        }
        Ok(())
    }

    fn set_virtual(&mut self, enabled: bool) {
        if enabled == self.virtual_mode {
            return;
        }
        self.close_fullscreen();
        if enabled {
            self.direct_assignment = self.current_direct_assignment();
            self.virtual_mode = true;
            let active = self.engine.active_list().to_vec();
            self.engine
                .set_active_list(&active, active.len(), 0, &mut self.bank);
        } else {
            self.virtual_mode = false;
            for tile in self.tile_count..TILE_SLOTS {
                self.bank.stop_to_idle(tile);
            }
        }
        info!("virtual mode {}", if enabled { "on" } else { "off" });
        self.clamp_focus();
    }

    fn scroll(&mut self, columns: i64) -> anyhow::Result<()> {
        if !self.virtual_mode {
            bail!("scrolling needs virtual mode");
        }
        self.close_fullscreen();
        let moved = self.engine.scroll_by(columns, &mut self.bank);
        debug!(
            "scroll {}: moved {} to viewport {}",
            columns,
            moved,
            self.engine.viewport()
        );
        Ok(())
    }

    fn clear_tile(&mut self) -> anyhow::Result<()> {
        if self.virtual_mode {
            bail!("clear is only available in direct mode");
        }
        self.close_fullscreen();
        self.bank.stop_to_idle(self.focused_tile);
        Ok(())
    }

    // ── fullscreen ────────────────────────────────────────────────────────────

    fn open_fullscreen(&mut self, tile: Option<usize>) -> anyhow::Result<()> {
        let tile = tile.unwrap_or(self.focused_tile);
        if self.placement(tile).is_none() {
            bail!("tile {} is not visible", tile + 1);
        }
        let channel = self
            .bank
            .intended_channel(tile)
            .ok_or_else(|| anyhow!("tile {} has no channel", tile + 1))?;
        self.close_fullscreen();

        if let Some(t) = self.bank.get_mut(tile) {
            t.pause_for_fullscreen();
        }
        let surface = self.config.display.fullscreen_surface.map(SurfaceId);
        let mut controller = TileSessionController::fullscreen(FULLSCREEN_TILE, self.ctx.clone(), surface);
        controller.play_channel(channel);
        info!("fullscreen: tile {} on {}", tile + 1, channel);
        self.fullscreen = Some(Fullscreen {
            tile,
            channel,
            controller,
        });
        Ok(())
    }

    /// Tear the fullscreen controller down and resume its tile.  Returns
    /// whether anything was open.
    fn close_fullscreen(&mut self) -> bool {
        let Some(mut fs) = self.fullscreen.take() else {
            return false;
        };
        fs.controller.shutdown();
        let channel = if self.virtual_mode {
            self.engine.channel_for_tile(fs.tile).unwrap_or(fs.channel)
        } else {
            fs.channel
        };
        info!("fullscreen closed: tile {} back on {}", fs.tile + 1, channel);
        self.bank.play_channel(fs.tile, channel);
        true
    }

    // ── views ─────────────────────────────────────────────────────────────────

    fn apply_view(&mut self, name: &str) -> anyhow::Result<()> {
        let record = self
            .views
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no view named {:?}", name))?;
        self.close_fullscreen();

        self.tile_count = record.tile_count.clamp(1, TILE_SLOTS);
        self.virtual_mode = record.virtual_mode;
        if record.virtual_mode {
            let list = active_list_from_assignment(&record.channel_assignment);
            let count = record.active_channel_count.unwrap_or(list.len());
            let viewport = record.viewport_column.unwrap_or(0);
            self.engine.reshape(self.tile_count, &list, count, viewport);
            self.engine.reload(&mut self.bank);
        } else {
            self.reshape_engine();
            for tile in 0..TILE_SLOTS {
                let ch = if tile < self.tile_count {
                    record.channel_assignment.get(tile).copied().flatten()
                } else {
                    None
                };
                match ch {
                    Some(ch) => self.bank.play_channel(tile, ch),
                    None => self.bank.stop_to_idle(tile),
                }
            }
        }
        self.clamp_focus();
        info!("applied view {:?}", name);
        Ok(())
    }

    async fn save_view(&mut self, name: &str) -> anyhow::Result<()> {
        let record = if self.virtual_mode {
            ViewRecord {
                tile_count: self.tile_count,
                virtual_mode: true,
                active_channel_count: Some(self.engine.active_count()),
                viewport_column: Some(self.engine.viewport()),
                channel_assignment: normalize_assignment(
                    self.engine.active_list().iter().copied().map(Some).collect(),
                ),
            }
        } else {
            ViewRecord {
                tile_count: self.tile_count,
                virtual_mode: false,
                active_channel_count: None,
                viewport_column: None,
                channel_assignment: self.current_direct_assignment(),
            }
        };
        self.views.save_view(name, record).await?;
        info!("saved view {:?}", name.trim());
        Ok(())
    }

    async fn delete_view(&mut self, name: &str) -> anyhow::Result<()> {
        if !self.views.delete(name).await? {
            bail!("no view named {:?}", name);
        }
        info!("deleted view {:?}", name);
        Ok(())
    }

    // ── state ─────────────────────────────────────────────────────────────────

    /// Screen position of a tile, `None` when hidden.
    fn placement(&self, tile: usize) -> Option<(usize, usize)> {
        if self.virtual_mode {
            return self.engine.placement(tile);
        }
        if tile >= self.tile_count {
            return None;
        }
        let cols = GridDims::for_tiles(self.tile_count).cols;
        Some((tile / cols, tile % cols))
    }

    fn clamp_focus(&mut self) {
        if self.placement(self.focused_tile).is_none() {
            self.focused_tile = 0;
        }
    }

    /// Keep the engine's geometry in step while in direct mode.
    fn reshape_engine(&mut self) {
        let active = self.engine.active_list().to_vec();
        let count = active.len();
        self.engine
            .reshape(self.tile_count, &active, count, self.engine.viewport());
    }

    fn current_direct_assignment(&self) -> Assignment {
        let slots = (0..TILE_SLOTS)
            .map(|tile| {
                if tile < self.tile_count {
                    self.bank.intended_channel(tile)
                } else {
                    None
                }
            })
            .collect();
        normalize_assignment(slots)
    }

    fn persistent_state(&self) -> PersistentState {
        let direct_assignment = if self.virtual_mode {
            self.direct_assignment.clone()
        } else {
            self.current_direct_assignment()
        };
        PersistentState {
            tile_count: self.tile_count,
            focused_tile: self.focused_tile,
            virtual_mode: self.virtual_mode,
            active_channel_count: self.engine.active_count(),
            viewport_column: self.engine.viewport(),
            direct_assignment,
            virtual_assignment: normalize_assignment(
                self.engine.active_list().iter().copied().map(Some).collect(),
            ),
        }
    }

    async fn save_state(&self) {
        if let Err(e) = self.persistent_state().save(&self.state_file).await {
            warn!("failed to save state to {}: {}", self.state_file.display(), e);
        }
    }

    pub fn snapshot(&self) -> MatrixState {
        let dims = GridDims::for_tiles(self.tile_count);
        let tiles = (0..TILE_SLOTS)
            .filter_map(|idx| {
                let t = self.bank.get(idx)?;
                let placement = self.placement(idx);
                Some(TileSnapshot {
                    tile: idx,
                    visible: placement.is_some(),
                    row: placement.map(|(row, _)| row),
                    col: placement.map(|(_, col)| col),
                    status: t.status(),
                    channel: t.assigned_channel(),
                    pending_channel: t.pending_channel(),
                    text: t.status_text().to_string(),
                })
            })
            .collect();

        MatrixState {
            rev: 0,
            tile_count: self.tile_count,
            rows: dims.rows,
            cols: dims.cols,
            virtual_mode: self.virtual_mode,
            active_list: self.engine.active_list().to_vec(),
            viewport_column: self.engine.viewport(),
            max_viewport_column: self.engine.max_viewport(),
            window: if self.virtual_mode {
                self.engine.window()
            } else {
                None
            },
            focused_tile: self.focused_tile,
            fullscreen: self.fullscreen.as_ref().map(|fs| FullscreenInfo {
                tile: fs.tile,
                channel: fs.channel,
                status: fs.controller.status(),
            }),
            tiles,
            views: self.views.list_names(),
        }
    }

    async fn publish(&self) {
        self.state_manager.publish(self.snapshot()).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn cleanup(&mut self) {
        info!("MatrixCoordinator: cleanup, saving state and stopping tiles");
        self.save_state().await;
        if let Some(mut fs) = self.fullscreen.take() {
            fs.controller.shutdown();
        }
        self.bank.shutdown_all();
    }
}
