//! Binary disk masks used as matched filters by the candidate locator.

use std::collections::HashMap;
use std::sync::Arc;

/// Square binary disk of side `2 * radius + 1`.
///
/// Cell `(col, row)` is set when `dx² + dy² < radius²`, with `dx = col - radius`
/// and `dy = row - radius`. A zero radius gives a single unset cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMask {
    radius: u32,
    cells: Vec<bool>,
    /// Half-open `[start, end)` column spans of set cells, one list per row.
    row_spans: Vec<Vec<(usize, usize)>>,
}

impl RegionMask {
    /// Build the disk for `radius`. Prefer [`MaskCache::get`] in per-frame code.
    pub fn disk(radius: u32) -> Self {
        let side = 2 * radius as usize + 1;
        let r = radius as i64;
        let r_sq = r * r;
        let mut cells = vec![false; side * side];
        for row in 0..side {
            let dy = row as i64 - r;
            for col in 0..side {
                let dx = col as i64 - r;
                cells[row * side + col] = dx * dx + dy * dy < r_sq;
            }
        }

        let row_spans = (0..side)
            .map(|row| spans_of(&cells[row * side..(row + 1) * side]))
            .collect();

        Self {
            radius,
            cells,
            row_spans,
        }
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    /// Side length in cells.
    pub fn side(&self) -> usize {
        2 * self.radius as usize + 1
    }

    /// Whether cell `(col, row)` is set. Out-of-range cells are unset.
    pub fn is_set(&self, col: usize, row: usize) -> bool {
        let side = self.side();
        col < side && row < side && self.cells[row * side + col]
    }

    /// Number of set cells.
    pub fn area(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    pub(crate) fn row_spans(&self) -> &[Vec<(usize, usize)>] {
        &self.row_spans
    }
}

fn spans_of(row: &[bool]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, &set) in row.iter().enumerate() {
        match (set, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, row.len()));
    }
    spans
}

/// Memoized disk masks keyed by radius.
///
/// Owned by one tracker instance, so separate runs never share state.
#[derive(Debug, Default)]
pub struct MaskCache {
    masks: HashMap<u32, Arc<RegionMask>>,
}

impl MaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the disk for `radius`, building it on first request.
    pub fn get(&mut self, radius: u32) -> Arc<RegionMask> {
        self.masks
            .entry(radius)
            .or_insert_with(|| {
                tracing::debug!(radius, "building disk mask");
                Arc::new(RegionMask::disk(radius))
            })
            .clone()
    }

    /// Number of distinct radii built so far.
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_matches_strict_inequality() {
        for r in 0u32..12 {
            let m = RegionMask::disk(r);
            let side = 2 * r as usize + 1;
            assert_eq!(m.side(), side);
            let ri = r as i64;
            for row in 0..side {
                for col in 0..side {
                    let dx = col as i64 - ri;
                    let dy = row as i64 - ri;
                    assert_eq!(m.is_set(col, row), dx * dx + dy * dy < ri * ri);
                }
            }
        }
    }

    #[test]
    fn zero_radius_is_a_single_empty_cell() {
        let m = RegionMask::disk(0);
        assert_eq!(m.side(), 1);
        assert_eq!(m.area(), 0);
        assert!(m.row_spans().iter().all(|s| s.is_empty()));
    }

    #[test]
    fn row_spans_cover_exactly_the_set_cells() {
        let m = RegionMask::disk(7);
        let mut from_spans = 0;
        for (row, spans) in m.row_spans().iter().enumerate() {
            for &(s, e) in spans {
                for col in s..e {
                    assert!(m.is_set(col, row));
                }
                from_spans += e - s;
            }
        }
        assert_eq!(from_spans, m.area());
        // Radius 1: only the center is strictly inside.
        assert_eq!(RegionMask::disk(1).area(), 1);
    }

    #[test]
    fn cache_reuses_masks() {
        let mut cache = MaskCache::new();
        let a = cache.get(5);
        let b = cache.get(5);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, RegionMask::disk(5));
        cache.get(3);
        assert_eq!(cache.len(), 2);
    }
}
