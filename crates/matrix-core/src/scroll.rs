//! Virtual scroll engine.
//!
//! The Active List is laid out column-major over `rows`: logical cell
//! `(abs_col, row)` shows `active[abs_col * rows + row]`.  On screen, tiles are
//! grouped into columns of `rows` tiles; the engine keeps those groups in a
//! `VecDeque` ordered left to right.  Scrolling by one column rotates a group
//! from one end to the other and reloads only that group, so every other tile
//! keeps its session.

use std::collections::VecDeque;

use matrix_proto::ChannelId;
use tracing::debug;

use crate::grid::{max_viewport, normalize_active_list, GridDims, TILE_SLOTS};

/// The engine's only way of touching tiles.
pub trait TileDriver {
    fn play_channel(&mut self, tile: usize, channel: ChannelId);
    fn stop_to_idle(&mut self, tile: usize);
}

/// What `jump_to_channel` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpOutcome {
    /// The channel was already listed; the window moved (possibly by zero).
    Scrolled { viewport: usize },
    /// The channel replaced the Active List entry under the focused tile.
    Replaced { tile: usize },
    /// The channel was appended to the Active List and the window rebuilt.
    Appended { viewport: usize },
}

pub struct VirtualScrollEngine {
    active: Vec<ChannelId>,
    tile_count: usize,
    dims: GridDims,
    viewport: usize,
    /// Tile indices per on-screen column, left to right.
    columns: VecDeque<Vec<usize>>,
}

impl VirtualScrollEngine {
    /// Build without touching any tile.  Call `reload` to drive them.
    pub fn new(tile_count: usize, active: &[ChannelId], active_count: usize, viewport: usize) -> Self {
        let mut engine = Self {
            active: Vec::new(),
            tile_count: 1,
            dims: GridDims::for_tiles(1),
            viewport: 0,
            columns: VecDeque::new(),
        };
        engine.reshape(tile_count, active, active_count, viewport);
        engine
    }

    // ── accessors ─────────────────────────────────────────────────────────────

    pub fn active_list(&self) -> &[ChannelId] {
        &self.active
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn tile_count(&self) -> usize {
        self.tile_count
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn viewport(&self) -> usize {
        self.viewport
    }

    pub fn max_viewport(&self) -> usize {
        max_viewport(self.active.len(), self.dims)
    }

    /// Tiles currently on screen, in column order.
    pub fn visible_tiles(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns.iter().flatten().copied()
    }

    /// 1-based inclusive Active List positions on screen.
    pub fn window(&self) -> Option<(usize, usize)> {
        let start = self.viewport * self.dims.rows;
        let end = ((self.viewport + self.dims.cols) * self.dims.rows).min(self.active.len());
        (start < end).then_some((start + 1, end))
    }

    /// Active List entry at a logical cell, `None` past the end.
    pub fn cell_channel(&self, abs_col: usize, row: usize) -> Option<ChannelId> {
        if row >= self.dims.rows {
            return None;
        }
        self.active.get(abs_col * self.dims.rows + row).copied()
    }

    /// Screen position `(row, col)` of a visible tile.
    pub fn placement(&self, tile: usize) -> Option<(usize, usize)> {
        self.columns.iter().enumerate().find_map(|(col, tiles)| {
            tiles.iter().position(|&t| t == tile).map(|row| (row, col))
        })
    }

    /// Channel a visible tile should be showing.
    pub fn channel_for_tile(&self, tile: usize) -> Option<ChannelId> {
        let (row, col) = self.placement(tile)?;
        self.cell_channel(self.viewport + col, row)
    }

    // ── mutation ──────────────────────────────────────────────────────────────

    /// Rebuild the column partition and drive every tile.  Used whenever the
    /// shape changes.
    pub fn reload(&mut self, driver: &mut dyn TileDriver) {
        self.rebuild_columns();
        debug!(
            "virtual reload: {}x{} viewport {} of {} channels",
            self.dims.rows,
            self.dims.cols,
            self.viewport,
            self.active.len()
        );
        for col in 0..self.columns.len() {
            self.reload_column(col, driver);
        }
        for tile in self.dims.cells()..TILE_SLOTS {
            driver.stop_to_idle(tile);
        }
    }

    /// Change shape without driving tiles.  The viewport is clamped at once;
    /// the next `reload` puts the result on screen.
    pub fn reshape(&mut self, tile_count: usize, active: &[ChannelId], active_count: usize, viewport: usize) {
        self.tile_count = tile_count.clamp(1, TILE_SLOTS);
        self.active = normalize_active_list(active, active_count);
        self.viewport = viewport;
        self.rebuild_columns();
    }

    pub fn set_tile_count(&mut self, tile_count: usize, driver: &mut dyn TileDriver) {
        let active = std::mem::take(&mut self.active);
        let count = active.len();
        self.reshape(tile_count, &active, count, self.viewport);
        self.reload(driver);
    }

    /// Grow or shrink the Active List to `count`, then reload.
    pub fn set_active_count(&mut self, count: usize, driver: &mut dyn TileDriver) {
        let active = std::mem::take(&mut self.active);
        self.reshape(self.tile_count, &active, count, self.viewport);
        self.reload(driver);
    }

    /// Replace the Active List and viewport wholesale, then reload.
    pub fn set_active_list(
        &mut self,
        list: &[ChannelId],
        count: usize,
        viewport: usize,
        driver: &mut dyn TileDriver,
    ) {
        self.reshape(self.tile_count, list, count, viewport);
        self.reload(driver);
    }

    /// Move the window one column right.  Returns `false` at the bound.
    pub fn scroll_right(&mut self, driver: &mut dyn TileDriver) -> bool {
        if self.viewport >= self.max_viewport() || self.columns.is_empty() {
            return false;
        }
        if let Some(col) = self.columns.pop_front() {
            self.columns.push_back(col);
        }
        self.viewport += 1;
        let last = self.columns.len() - 1;
        self.reload_column(last, driver);
        true
    }

    /// Move the window one column left.  Returns `false` at the bound.
    pub fn scroll_left(&mut self, driver: &mut dyn TileDriver) -> bool {
        if self.viewport == 0 || self.columns.is_empty() {
            return false;
        }
        if let Some(col) = self.columns.pop_back() {
            self.columns.push_front(col);
        }
        self.viewport -= 1;
        self.reload_column(0, driver);
        true
    }

    /// Rotate one column at a time, stopping at the bound.  Returns how many
    /// columns actually moved (signed).
    pub fn scroll_by(&mut self, delta: i64, driver: &mut dyn TileDriver) -> i64 {
        let mut moved = 0;
        if delta > 0 {
            while moved < delta && self.scroll_right(driver) {
                moved += 1;
            }
        } else {
            while moved > delta && self.scroll_left(driver) {
                moved -= 1;
            }
        }
        moved
    }

    /// Bring `channel` under the focused tile's on-screen column.
    pub fn jump_to_channel(
        &mut self,
        channel: ChannelId,
        focused_tile: usize,
        driver: &mut dyn TileDriver,
    ) -> JumpOutcome {
        if let Some(idx) = self.active.iter().position(|&c| c == channel) {
            let focus_col = self.placement(focused_tile).map_or(0, |(_, col)| col);
            let target_col = idx / self.dims.rows;
            let desired = target_col.saturating_sub(focus_col).min(self.max_viewport());
            let delta = desired as i64 - self.viewport as i64;
            self.scroll_by(delta, driver);
            debug!("jump to {}: column {} viewport {}", channel, target_col, self.viewport);
            return JumpOutcome::Scrolled {
                viewport: self.viewport,
            };
        }

        if let Some((row, col)) = self.placement(focused_tile) {
            let idx = (self.viewport + col) * self.dims.rows + row;
            if let Some(slot) = self.active.get_mut(idx) {
                *slot = channel;
                driver.play_channel(focused_tile, channel);
                return JumpOutcome::Replaced { tile: focused_tile };
            }
        }

        self.active.push(channel);
        self.reload(driver);
        self.jump_to_channel(channel, focused_tile, driver);
        JumpOutcome::Appended {
            viewport: self.viewport,
        }
    }

    // ── internals ─────────────────────────────────────────────────────────────

    fn rebuild_columns(&mut self) {
        self.dims = GridDims::for_tiles(self.tile_count);
        self.viewport = self.viewport.min(self.max_viewport());
        let rows = self.dims.rows;
        self.columns = (0..self.dims.cols)
            .map(|c| (c * rows..c * rows + rows).collect())
            .collect();
    }

    fn reload_column(&self, col: usize, driver: &mut dyn TileDriver) {
        let Some(tiles) = self.columns.get(col) else {
            return;
        };
        let abs_col = self.viewport + col;
        for (row, &tile) in tiles.iter().enumerate() {
            match self.cell_channel(abs_col, row) {
                Some(ch) => driver.play_channel(tile, ch),
                None => driver.stop_to_idle(tile),
            }
        }
    }
}
