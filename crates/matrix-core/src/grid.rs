//! Grid geometry and Active List normalization.

use matrix_proto::channel::{Assignment, MAX_CHANNELS};
use matrix_proto::ChannelId;

/// Physical tiles the coordinator keeps around, whatever the tile count.
pub const TILE_SLOTS: usize = MAX_CHANNELS as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDims {
    pub rows: usize,
    pub cols: usize,
}

impl GridDims {
    /// Layout for `n` tiles (clamped to `1..=16`).  The even counts 4..14 get
    /// two wide rows; everything else is as square as possible.
    pub fn for_tiles(n: usize) -> Self {
        let n = n.clamp(1, TILE_SLOTS);
        if matches!(n, 4 | 6 | 8 | 10 | 12 | 14) {
            return Self { rows: 2, cols: n / 2 };
        }
        let cols = ceil_sqrt(n);
        let rows = (n + cols - 1) / cols;
        Self { rows, cols }
    }

    pub fn cells(&self) -> usize {
        self.rows * self.cols
    }
}

fn ceil_sqrt(n: usize) -> usize {
    let mut c = 1;
    while c * c < n {
        c += 1;
    }
    c
}

/// Logical columns needed for `len` Active List entries.
pub fn total_columns(len: usize, rows: usize) -> usize {
    if rows == 0 {
        return 0;
    }
    (len + rows - 1) / rows
}

/// Largest valid viewport offset.
pub fn max_viewport(len: usize, dims: GridDims) -> usize {
    total_columns(len, dims.rows).saturating_sub(dims.cols)
}

/// Dedupe `list`, then truncate or pad it to `count` (clamped to `1..=16`).
/// Padding appends unused channels in ascending order.
pub fn normalize_active_list(list: &[ChannelId], count: usize) -> Vec<ChannelId> {
    let count = count.clamp(1, TILE_SLOTS);
    let mut out: Vec<ChannelId> = Vec::with_capacity(count);
    for &ch in list {
        if out.len() == count {
            break;
        }
        if !out.contains(&ch) {
            out.push(ch);
        }
    }
    for ch in ChannelId::all() {
        if out.len() == count {
            break;
        }
        if !out.contains(&ch) {
            out.push(ch);
        }
    }
    out
}

/// Active List stored in a virtual assignment: the assigned channels in slot
/// order, deduplicated.  Empty yields `1..=16`.
pub fn active_list_from_assignment(assignment: &Assignment) -> Vec<ChannelId> {
    let mut out = Vec::new();
    for ch in assignment.iter().flatten() {
        if !out.contains(ch) {
            out.push(*ch);
        }
    }
    if out.is_empty() {
        out = ChannelId::all().collect();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chans(ns: &[u8]) -> Vec<ChannelId> {
        ns.iter().map(|&n| ChannelId::new(n).unwrap()).collect()
    }

    #[test]
    fn test_grid_rule() {
        let expect = [
            (1, 1, 1),
            (2, 1, 2),
            (3, 2, 2),
            (4, 2, 2),
            (5, 2, 3),
            (6, 2, 3),
            (7, 3, 3),
            (8, 2, 4),
            (9, 3, 3),
            (10, 2, 5),
            (11, 3, 4),
            (12, 2, 6),
            (13, 4, 4),
            (14, 2, 7),
            (15, 4, 4),
            (16, 4, 4),
        ];
        for (n, rows, cols) in expect {
            assert_eq!(GridDims::for_tiles(n), GridDims { rows, cols }, "n={}", n);
            assert!(GridDims::for_tiles(n).cells() >= n);
        }
        assert_eq!(GridDims::for_tiles(0), GridDims::for_tiles(1));
        assert_eq!(GridDims::for_tiles(40), GridDims::for_tiles(16));
    }

    #[test]
    fn test_viewport_bound() {
        let dims = GridDims::for_tiles(4);
        assert_eq!(total_columns(16, 2), 8);
        assert_eq!(max_viewport(16, dims), 6);
        assert_eq!(max_viewport(3, dims), 0);
        assert_eq!(max_viewport(5, dims), 1);
    }

    #[test]
    fn test_normalize_pads_ascending_and_truncates() {
        assert_eq!(normalize_active_list(&chans(&[5, 3, 5]), 4), chans(&[5, 3, 1, 2]));
        assert_eq!(normalize_active_list(&chans(&[9, 8, 7, 6]), 2), chans(&[9, 8]));
        assert_eq!(normalize_active_list(&[], 0), chans(&[1]));
        assert_eq!(normalize_active_list(&chans(&[2]), 99).len(), 16);
    }

    #[test]
    fn test_active_list_from_assignment() {
        let mut a: Assignment = vec![None; 16];
        a[0] = ChannelId::new(4);
        a[1] = ChannelId::new(2);
        a[5] = ChannelId::new(4);
        assert_eq!(active_list_from_assignment(&a), chans(&[4, 2]));
        assert_eq!(active_list_from_assignment(&vec![None; 16]).len(), 16);
    }
}
