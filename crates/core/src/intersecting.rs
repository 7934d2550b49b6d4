//! Column scanline structure for polygon interiors.
//!
//! [`IntersectingTiles`] records which tiles lie inside a polygon, one tile
//! column (a north-south stripe of the grid) at a time. For every ring
//! segment we decide on which side of the segment the polygon interior lies:
//! if the interior is north of the segment (towards smaller `y`, since tile
//! rows grow south) the segment is the southern cap of an interval and
//! contributes an upper row bound to the columns it crosses, otherwise a
//! lower row bound. After all segments are in, the bounds of
//! each column are sorted and pair up into `(min, max)` row intervals that
//! cover the interior plus the configured leeway.
//!
//! The structure is scratch owned by a single polygon rasterization: fill it
//! with [`evaluate_segment`](IntersectingTiles::evaluate_segment), seal it
//! with [`sort_bounds`](IntersectingTiles::sort_bounds), then drain it
//! through the column cursor.

use std::f64::consts::PI;

/// Marks a bounds entry that was merged away; sorts last and fails the
/// validity check at emission.
const INVALID_BOUND: u32 = u32::MAX;

/// Per-polygon accumulator of column-wise row intervals.
pub struct IntersectingTiles {
    /// Tile x of the first column.
    offset_x: u32,
    /// One past the largest valid tile id; bounds at or beyond it are
    /// dropped at emission.
    max_tile_id: u32,
    leeway: f64,
    /// Lower row bounds per column.
    min_bounds: Vec<Vec<u32>>,
    /// Upper row bounds per column.
    max_bounds: Vec<Vec<u32>>,
    current_column: usize,
    next_idx_min: usize,
    next_idx_max: usize,
}

impl IntersectingTiles {
    /// Create the accumulator for a polygon whose bounding box spans
    /// `[x_min, x_max]` in fractional tile coordinates at the target zoom.
    /// Columns are allocated for that range inflated by `leeway` on both
    /// sides.
    pub fn new(x_min: f64, x_max: f64, map_width: u32, leeway: f64) -> Self {
        let offset_x = (x_min - leeway) as u32;
        let columns = ((x_max + leeway) as u32 - offset_x + 1) as usize;
        Self {
            offset_x,
            max_tile_id: map_width,
            leeway,
            min_bounds: vec![Vec::new(); columns],
            max_bounds: vec![Vec::new(); columns],
            current_column: 0,
            next_idx_min: 0,
            next_idx_max: 0,
        }
    }

    fn column_index(&self, x: u32) -> usize {
        (x - self.offset_x) as usize
    }

    fn add_minimum(&mut self, x: u32, min: f64) {
        let idx = self.column_index(x);
        self.min_bounds[idx].push((min - self.leeway) as u32);
    }

    fn add_maximum(&mut self, x: u32, max: f64) {
        let idx = self.column_index(x);
        self.max_bounds[idx].push((max + self.leeway) as u32);
    }

    fn add_bound(&mut self, x: u32, y1: f64, y2: f64, interior_north: bool) {
        if interior_north {
            // The interval extends north of the segment, so the segment's
            // southern extent is its maximum row; rows grow south.
            self.add_maximum(x, y1.max(y2));
        } else {
            self.add_minimum(x, y1.min(y2));
        }
    }

    /// True when the polygon interior lies north of the directed segment,
    /// i.e. towards smaller tile rows. The y inputs grow south, hence the
    /// sign flip inside the `atan2`.
    fn interior_side_north(x1: f64, y1: f64, x2: f64, y2: f64) -> bool {
        let angle = (y1 - y2).atan2(x2 - x1);
        angle < PI / 2.0 && angle > -PI / 2.0
    }

    /// Record one ring segment, given in fractional tile coordinates.
    ///
    /// The interior side is inferred from the segment direction alone: rings
    /// must be wound so that walking the ring keeps the polygon interior on
    /// the correct side, with inner rings wound opposite to the outer ring
    /// (the usual OGC convention of counterclockwise outer and clockwise
    /// inner rings in lon/lat satisfies this).
    pub fn evaluate_segment(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) {
        // Segments that stay within one column strip cannot be paired with a
        // crossing on the far side, so they contribute both a lower and an
        // upper bound. Most building outlines land here.
        if (x1.min(x2) - self.leeway) as u32 == (x1.max(x2) + self.leeway) as u32 {
            self.add_minimum(x1 as u32, y1.min(y2));
            self.add_maximum(x1 as u32, y1.max(y2));
            return;
        }

        // Which side the interior is on depends on the original direction,
        // so this must happen before the endpoints are reordered.
        let interior_north = Self::interior_side_north(x1, y1, x2, y2);

        let (x1, y1, x2, y2) = if x2 < x1 {
            (x2, y2, x1, y1)
        } else {
            (x1, y1, x2, y2)
        };

        let start = (x1 - self.leeway) as u32;
        let end = (x2 + self.leeway) as u32;
        for x in start..=end {
            self.add_bound(x, y1, y2, interior_north);
            // A column the segment fully crosses is entered and left again,
            // one bound per crossing.
            if x != start && x != end {
                self.add_bound(x, y1, y2, interior_north);
            }
        }
    }

    /// Sort all column bounds and collapse overlapping intervals. Must be
    /// called once, after the last segment and before the first emission.
    pub fn sort_bounds(&mut self) {
        for bounds in &mut self.min_bounds {
            bounds.sort_unstable();
        }
        for bounds in &mut self.max_bounds {
            bounds.sort_unstable();
        }

        // Collapse interval pairs that overlap their predecessor into the
        // later slot and invalidate the earlier one.
        for column in 0..self.min_bounds.len().min(self.max_bounds.len()) {
            let mins = &mut self.min_bounds[column];
            let maxs = &mut self.max_bounds[column];
            for entry in 1..mins.len().min(maxs.len()) {
                if mins[entry] <= maxs[entry - 1] {
                    mins[entry] = mins[entry].min(mins[entry - 1]);
                    maxs[entry] = maxs[entry].max(maxs[entry - 1]);
                    mins[entry - 1] = INVALID_BOUND;
                    maxs[entry - 1] = INVALID_BOUND;
                }
            }
        }

        // Push the invalidated sentinels to the tail.
        for bounds in &mut self.min_bounds {
            bounds.sort_unstable();
        }
        for bounds in &mut self.max_bounds {
            bounds.sort_unstable();
        }
    }

    /// True while the current column still has unread bound pairs.
    pub fn column_has_intervals(&self) -> bool {
        self.next_idx_min < self.min_bounds[self.current_column].len()
            && self.next_idx_max < self.max_bounds[self.current_column].len()
    }

    /// Pop the next `(min_row, max_row)` interval of the current column.
    ///
    /// Returns `None` when the pair contains an invalidated or out-of-map
    /// bound. Calling this past the end of the column is a bug in the
    /// caller; check [`column_has_intervals`](Self::column_has_intervals).
    pub fn next_pair(&mut self) -> Option<(u32, u32)> {
        assert!(
            self.column_has_intervals(),
            "next_pair called past the end of tile column {}",
            self.current_x()
        );
        let min = self.min_bounds[self.current_column][self.next_idx_min];
        self.next_idx_min += 1;
        let max = self.max_bounds[self.current_column][self.next_idx_max];
        self.next_idx_max += 1;
        if min < self.max_tile_id && max < self.max_tile_id {
            Some((min, max))
        } else {
            None
        }
    }

    /// Advance the cursor to the next column, resetting the pair indices.
    /// Returns false once the last column has been passed.
    pub fn move_to_next_column(&mut self) -> bool {
        self.current_column += 1;
        self.next_idx_min = 0;
        self.next_idx_max = 0;
        self.current_column < self.min_bounds.len() && self.current_column < self.max_bounds.len()
    }

    /// Tile x of the column the cursor is on.
    pub fn current_x(&self) -> u32 {
        self.offset_x + self.current_column as u32
    }
}
