//! Dirty tile set generation.
//!
//! [`ExpireSet`] accumulates the tiles touched by changed map features at a
//! fixed maximum zoom, then projects the set down to every requested lower
//! zoom on output. Geometries arrive either as primitive lon/lat calls
//! ([`from_point`](ExpireSet::from_point),
//! [`from_line_lon_lat`](ExpireSet::from_line_lon_lat),
//! [`from_bbox_lon_lat`](ExpireSet::from_bbox_lon_lat)) or as raw EWKB
//! ([`from_wkb`](ExpireSet::from_wkb), [`from_db`](ExpireSet::from_db)).
//!
//! Internally the set stores quadkeys at maxzoom only. Lower zoom levels are
//! derived during [`output_and_destroy`](ExpireSet::output_and_destroy) by
//! right-shifting sorted quadkeys, which deduplicates sibling tiles without
//! an auxiliary set.
//!
//! Every rasterized shape is inflated by [`TILE_EXPIRY_LEEWAY`], a fraction
//! of a tile of slop that absorbs reprojection and floating point drift, so
//! a feature touching a tile border also expires the neighbor.

use std::collections::HashSet;
use std::path::Path;

use crate::ewkb::{self, Parser};
use crate::intersecting::IntersectingTiles;
use crate::output::{TileListFile, TileWriter};
use crate::projection::{Projection, EARTH_CIRCUMFERENCE};
use crate::quadkey::{quadkey_to_xy, xy_to_quadkey, MAX_QUADKEY_ZOOM};
use crate::{Error, Result};

/// How many tiles worth of space to leave around a changed feature, as a
/// fraction of a tile.
pub const TILE_EXPIRY_LEEWAY: f64 = 0.1;

/// Source of stored geometries for features addressed by OSM id, typically
/// backed by a database table. Rows are hex-encoded EWKB as the database
/// hands them out.
pub trait WkbSource {
    fn wkb_rows(&mut self, osm_id: i64) -> Vec<String>;
}

/// Accumulator for the tiles that must be re-rendered.
///
/// One instance per importer worker; instances are combined at the end of
/// the run with [`merge_and_destroy`](Self::merge_and_destroy) and drained
/// once through [`output_and_destroy`](Self::output_and_destroy).
pub struct ExpireSet {
    maxzoom: u32,
    /// Number of tiles across the world at maxzoom.
    map_width: u32,
    /// Width of one tile in projection meters.
    tile_width: f64,
    /// Polygons whose unprojected bounding box exceeds this (in projection
    /// units) are expired as ring outlines only.
    max_bbox: f64,
    projection: Projection,
    /// Last inserted tile; consecutive identical inserts skip the hash
    /// lookup, which the scanline fill hits constantly.
    last_tile_x: u32,
    last_tile_y: u32,
    dirty_tiles: HashSet<u64>,
}

impl ExpireSet {
    /// Create a set expiring tiles at `maxzoom`.
    ///
    /// A `maxzoom` of 0 disables geometry-driven expiry: [`from_wkb`](Self::from_wkb)
    /// and [`from_db`](Self::from_db) become no-ops.
    pub fn new(maxzoom: u32, max_bbox: f64, projection: Projection) -> Self {
        assert!(
            maxzoom <= MAX_QUADKEY_ZOOM,
            "maxzoom {} exceeds the quadkey limit of {}",
            maxzoom,
            MAX_QUADKEY_ZOOM
        );
        let map_width = 1u32 << maxzoom;
        Self {
            maxzoom,
            map_width,
            tile_width: EARTH_CIRCUMFERENCE / f64::from(map_width),
            max_bbox,
            projection,
            last_tile_x: map_width + 1,
            last_tile_y: map_width + 1,
            dirty_tiles: HashSet::new(),
        }
    }

    /// The configured maximum zoom.
    pub fn maxzoom(&self) -> u32 {
        self.maxzoom
    }

    /// Number of dirty tiles currently held at maxzoom.
    pub fn dirty_tile_count(&self) -> usize {
        self.dirty_tiles.len()
    }

    /// Mark a single tile at maxzoom as dirty. Coordinates outside the map
    /// are dropped silently.
    fn expire_tile(&mut self, x: u32, y: u32) {
        if x >= self.map_width || y >= self.map_width {
            return;
        }
        if self.last_tile_x == x && self.last_tile_y == y {
            return;
        }
        self.dirty_tiles.insert(xy_to_quadkey(x, y, self.maxzoom));
        self.last_tile_x = x;
        self.last_tile_y = y;
    }

    /// Clamp a fractional tile coordinate into the valid domain.
    fn normalise_tile_coord(&self, coord: f64) -> f64 {
        coord.clamp(0.0, f64::from(self.map_width))
    }

    /// Expire the tile containing a point, plus its leeway buffer.
    ///
    /// Coordinates are in the units of the configured projection.
    pub fn from_point(&mut self, lon: f64, lat: f64) {
        let (tile_x, tile_y) = self.projection.coords_to_tile(lon, lat, self.map_width);
        self.from_bbox(tile_x, tile_y, tile_x, tile_y);
    }

    /// Expire all tiles intersecting a bounding box given in projection
    /// units. `(min_x, min_y)` is the southwest corner; the y axis flips on
    /// the way to tile rows.
    pub fn from_bbox_lon_lat(&mut self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) {
        let (tile_x_min, tile_y_max) = self.projection.coords_to_tile(min_x, min_y, self.map_width);
        let (tile_x_max, tile_y_min) = self.projection.coords_to_tile(max_x, max_y, self.map_width);
        self.from_bbox(tile_x_min, tile_y_min, tile_x_max, tile_y_max);
    }

    /// Expire all tiles intersecting a bounding box in fractional tile
    /// coordinates, inflated by the leeway buffer.
    pub fn from_bbox(&mut self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) {
        self.from_bbox_without_buffer(
            (min_x - TILE_EXPIRY_LEEWAY) as u32,
            (min_y - TILE_EXPIRY_LEEWAY) as u32,
            (max_x + TILE_EXPIRY_LEEWAY) as u32,
            (max_y + TILE_EXPIRY_LEEWAY) as u32,
        );
    }

    /// Expire every tile in the closed integer rectangle, no buffer.
    pub fn from_bbox_without_buffer(&mut self, min_x: u32, min_y: u32, max_x: u32, max_y: u32) {
        for x in min_x..=max_x {
            for y in min_y..=max_y {
                self.expire_tile(x, y);
            }
        }
    }

    /// Expire the tiles under a north-south line at tile column `x`, from
    /// row `y1` down to row `y2` (`y1 <= y2`). The end tiles get the full
    /// bbox buffer; the column in between is marked as is.
    pub fn expire_vertical_line(&mut self, x: f64, y1: f64, y2: f64) {
        debug_assert!(y1 <= y2, "vertical line must run north to south");
        self.from_bbox(x, y1, x, y1);
        for y in (y1 + 1.0) as u32..y2 as u32 {
            self.expire_tile(x as u32, y);
        }
        self.from_bbox(x, y2, x, y2);
    }

    /// Expire every tile a line from `(x1, y1)` to `(x2, y2)` enters, with
    /// `x1 < x2` and no buffer. Endpoints are clamped into the map domain;
    /// a line wholly outside is a no-op.
    ///
    /// The walk marks the start tile, then the tile entered at each integer
    /// column crossing, then the tile entered at each integer row crossing
    /// (picking the upper or lower neighbor from the line direction).
    pub fn expire_line(&mut self, mut x1: f64, mut y1: f64, mut x2: f64, mut y2: f64) {
        debug_assert!(x1 < x2);
        let incline = (y2 - y1) / (x2 - x1);
        let y_intercept = y2 - incline * x2;

        // Horizontal line outside the map north/south edges.
        if incline == 0.0 && (y_intercept < 0.0 || y_intercept > f64::from(self.map_width)) {
            return;
        }
        // Everything west of the map; x1 < x2 <= 0.
        if x2 <= 0.0 {
            return;
        }
        if x1 < 0.0 {
            x1 = 0.0;
            y1 = y_intercept;
        }
        // Coordinates beyond map_width are harmless (expire_tile drops
        // them); negative ones are not, because the walk works in unsigned
        // tile ids.
        if y1 < 0.0 {
            y1 = 0.0;
            x1 = -y_intercept / incline;
        }
        if y2 < 0.0 {
            y2 = 0.0;
            x2 = -y_intercept / incline;
        }

        self.expire_tile(x1 as u32, y1 as u32);
        // Tiles entered through their western edge.
        for x in (x1 + 1.0) as u32..=x2 as u32 {
            let y = incline * f64::from(x) + y_intercept;
            self.expire_tile(x, y as u32);
        }
        // Tiles entered through their northern or southern edge.
        let min_y = y1.min(y2);
        let max_y = y1.max(y2);
        for y in (min_y + 1.0) as u32..=max_y as u32 {
            let x = (f64::from(y) - y_intercept) / incline;
            if y2 > y1 {
                // Heading south: the row crossing enters the lower tile.
                self.expire_tile(x as u32, y);
            } else {
                self.expire_tile(x as u32, y - 1);
            }
        }
    }

    /// Expire all tiles within the leeway buffer of a line segment, with
    /// `x1 <= x2` and a span of at most half the map.
    ///
    /// Nearly vertical segments reduce to one or two buffered vertical
    /// lines. Everything else is approximated by a tube: two parallels of
    /// the segment offset by the leeway on either side, each rasterized with
    /// [`expire_line`](Self::expire_line).
    pub fn expire_line_segment(&mut self, x1: f64, mut y1: f64, x2: f64, mut y2: f64) {
        debug_assert!(x1 <= x2);
        debug_assert!(x2 - x1 <= f64::from(self.map_width) / 2.0);
        if x1 == x2 && y1 == y2 {
            // Degenerate segment, just a point.
            return;
        }
        // Guard the slope computation below against a vanishing x span.
        if x2 - x1 < 1.0 && (x2 as u32 == x1 as u32 || x2 - x1 < 1e-8) {
            if y2 < y1 {
                std::mem::swap(&mut y1, &mut y2);
            }
            let x_buffer_west = self.normalise_tile_coord(x1 - TILE_EXPIRY_LEEWAY);
            self.expire_vertical_line(x_buffer_west, y1, y2);
            // The eastern parallel only matters if it leaves the column the
            // western one already covered.
            let x_buffer_east = self.normalise_tile_coord(x1 + TILE_EXPIRY_LEEWAY);
            if x_buffer_west as u32 != x_buffer_east as u32 {
                self.expire_vertical_line(x_buffer_east, y1, y2);
            }
            return;
        }

        let segment_length = ((y2 - y1) * (y2 - y1) + (x2 - x1) * (x2 - x1)).sqrt();
        let x_norm = (x2 - x1) / segment_length;
        let y_norm = (y2 - y1) / segment_length;
        let x_buffer = TILE_EXPIRY_LEEWAY * x_norm;
        let y_buffer = TILE_EXPIRY_LEEWAY * y_norm;
        // The two parallels, each extended by the buffer at both ends.
        // Normal vector to the right is (-y, x), to the left (y, -x).
        self.expire_line(
            x1 - x_buffer - y_buffer,
            y1 - y_buffer + x_buffer,
            x2 + x_buffer - y_buffer,
            y2 + y_buffer + x_buffer,
        );
        self.expire_line(
            x1 - x_buffer + y_buffer,
            y1 - y_buffer - x_buffer,
            x2 + x_buffer + y_buffer,
            y2 + y_buffer - x_buffer,
        );
    }

    /// Expire all tiles under a line segment given in projection units,
    /// splitting at the antimeridian when the segment wraps.
    pub fn from_line_lon_lat(&mut self, lon_a: f64, lat_a: f64, lon_b: f64, lat_b: f64) {
        let (mut tile_x_a, mut tile_y_a) =
            self.projection.coords_to_tile(lon_a, lat_a, self.map_width);
        let (mut tile_x_b, mut tile_y_b) =
            self.projection.coords_to_tile(lon_b, lat_b, self.map_width);
        // Rasterization walks west to east.
        if tile_x_a > tile_x_b {
            std::mem::swap(&mut tile_x_a, &mut tile_x_b);
            std::mem::swap(&mut tile_y_a, &mut tile_y_b);
        }
        let map_width = f64::from(self.map_width);
        if tile_x_b - tile_x_a > map_width / 2.0 {
            // The short way around crosses the 180th meridian; split there.
            if tile_x_b == map_width && tile_x_a == 0.0 {
                // Both endpoints sit on the meridian itself; the intercept
                // computation below would divide by zero.
                self.expire_line_segment(0.0, tile_y_a, 0.0, tile_y_b);
                return;
            }
            // Intercept theorem; x_distance is the westward distance from
            // the left point to the meridian.
            let x_distance = map_width + tile_x_a - tile_x_b;
            let y_split = tile_y_a + (tile_y_b - tile_y_a) * (tile_x_a / x_distance);
            self.expire_line_segment(0.0, y_split, tile_x_a, tile_y_a);
            self.expire_line_segment(tile_x_b, tile_y_b, map_width, y_split);
        } else {
            self.expire_line_segment(tile_x_a, tile_y_a, tile_x_b, tile_y_b);
        }
    }

    /// Expire tiles for one EWKB geometry.
    ///
    /// Supports point, linestring, polygon, multilinestring and
    /// multipolygon. Unknown geometry types and malformed input are logged
    /// with the `osm_id` and skipped; a `maxzoom` of 0 turns this into a
    /// no-op.
    pub fn from_wkb(&mut self, wkb: &[u8], osm_id: i64) {
        if self.maxzoom == 0 {
            return;
        }
        if let Err(err) = self.from_wkb_inner(wkb, osm_id) {
            log::warn!("OSM id {}: invalid geometry, cannot expire: {}", osm_id, err);
        }
    }

    fn from_wkb_inner(&mut self, wkb: &[u8], osm_id: i64) -> ewkb::Result<()> {
        let mut parser = Parser::new(wkb);
        match parser.read_header()? {
            ewkb::WKB_POINT => self.from_wkb_point(&mut parser)?,
            ewkb::WKB_LINE => self.from_wkb_line(&mut parser)?,
            ewkb::WKB_POLYGON => self.from_wkb_polygon(&mut parser)?,
            ewkb::WKB_MULTI_LINE => {
                let count = parser.read_length()?;
                for _ in 0..count {
                    parser.read_header()?;
                    self.from_wkb_line(&mut parser)?;
                }
            }
            ewkb::WKB_MULTI_POLYGON => {
                let count = parser.read_length()?;
                for _ in 0..count {
                    parser.read_header()?;
                    self.from_wkb_polygon(&mut parser)?;
                }
            }
            other => {
                log::warn!(
                    "OSM id {}: unknown geometry type {}, cannot expire",
                    osm_id,
                    other
                );
            }
        }
        Ok(())
    }

    fn from_wkb_point(&mut self, wkb: &mut Parser) -> ewkb::Result<()> {
        let c = wkb.read_point()?;
        self.from_point(c.x, c.y);
        Ok(())
    }

    fn from_wkb_line(&mut self, wkb: &mut Parser) -> ewkb::Result<()> {
        let size = wkb.read_length()?;
        if size == 0 {
            return Ok(());
        }
        if size == 1 {
            return self.from_wkb_point(wkb);
        }
        let mut prev = wkb.read_point()?;
        for _ in 1..size {
            let cur = wkb.read_point()?;
            self.from_line_lon_lat(prev.x, prev.y, cur.x, cur.y);
            prev = cur;
        }
        Ok(())
    }

    fn from_wkb_polygon(&mut self, wkb: &mut Parser) -> ewkb::Result<()> {
        let num_rings = wkb.read_length()?;
        if num_rings == 0 {
            return Ok(());
        }
        let start = wkb.save_pos();

        // First pass over the outer ring: unprojected bounding box.
        let num_points = wkb.read_length()?;
        if num_points == 0 {
            return Ok(());
        }
        let first = wkb.read_point()?;
        let (mut min, mut max) = (first, first);
        for _ in 1..num_points {
            let c = wkb.read_point()?;
            min.x = min.x.min(c.x);
            min.y = min.y.min(c.y);
            max.x = max.x.max(c.x);
            max.y = max.y.max(c.y);
        }
        wkb.rewind(start);

        // Polygons wider than max_bbox are almost always broken importer
        // artifacts or antimeridian wraps; filling them would expire half
        // the globe. Expire their ring outlines only.
        if max.x - min.x > self.max_bbox || max.y - min.y > self.max_bbox {
            for _ in 0..num_rings {
                self.from_wkb_line(wkb)?;
            }
            return Ok(());
        }

        // Corners swap on projection: the northern source edge becomes the
        // smaller tile row.
        let (min_x, min_y) = self.projection.coords_to_tile(min.x, max.y, self.map_width);
        let (max_x, max_y) = self.projection.coords_to_tile(max.x, min.y, self.map_width);

        // A polygon inside a single tile column needs no scanline; its
        // bounding box covers exactly the same tiles.
        if min_x as u32 == max_x as u32 {
            self.from_bbox(min_x, min_y, max_x, max_y);
            return Ok(());
        }

        wkb.rewind(start);
        let mut tiles =
            IntersectingTiles::new(min_x, max_x, self.map_width, TILE_EXPIRY_LEEWAY);
        for ring in 0..num_rings {
            let ring_size = wkb.read_length()?;
            if ring_size <= 1 && ring == 0 {
                // Degenerate outer ring; drop the whole polygon.
                return Ok(());
            }
            if ring_size <= 3 {
                // A degenerate inner ring cannot un-expire anything. Its
                // points still have to be consumed to keep the cursor on
                // the next ring.
                for _ in 0..ring_size {
                    wkb.read_point()?;
                }
                continue;
            }
            let mut prev = wkb.read_point()?;
            for _ in 1..ring_size {
                let cur = wkb.read_point()?;
                let (tile_x_a, tile_y_a) =
                    self.projection.coords_to_tile(prev.x, prev.y, self.map_width);
                let (tile_x_b, tile_y_b) =
                    self.projection.coords_to_tile(cur.x, cur.y, self.map_width);
                tiles.evaluate_segment(tile_x_a, tile_y_a, tile_x_b, tile_y_b);
                prev = cur;
            }
        }

        tiles.sort_bounds();
        loop {
            while tiles.column_has_intervals() {
                if let Some((min_row, max_row)) = tiles.next_pair() {
                    self.from_bbox_without_buffer(
                        tiles.current_x(),
                        min_row,
                        tiles.current_x(),
                        max_row,
                    );
                }
            }
            if !tiles.move_to_next_column() {
                break;
            }
        }
        Ok(())
    }

    /// Expire tiles for every geometry stored for `osm_id` in the given
    /// source. Returns the number of rows processed, or `None` when expiry
    /// is disabled.
    pub fn from_db<S: WkbSource>(&mut self, source: &mut S, osm_id: i64) -> Option<usize> {
        if self.maxzoom == 0 {
            return None;
        }
        let rows = source.wkb_rows(osm_id);
        let count = rows.len();
        for hex in rows {
            match ewkb::wkb_from_hex(&hex) {
                Ok(bytes) => self.from_wkb(&bytes, osm_id),
                Err(err) => {
                    log::warn!("OSM id {}: bad geometry row, cannot expire: {}", osm_id, err)
                }
            }
        }
        Some(count)
    }

    /// Move every dirty tile of `other` into this set, leaving `other`
    /// empty. Fails if the two sets were configured for different tile
    /// grids.
    pub fn merge_and_destroy(&mut self, other: &mut ExpireSet) -> Result<()> {
        if self.map_width != other.map_width {
            return Err(Error::MergeMismatch {
                what: "map_width",
                ours: f64::from(self.map_width),
                theirs: f64::from(other.map_width),
            });
        }
        if self.tile_width != other.tile_width {
            return Err(Error::MergeMismatch {
                what: "tile_width",
                ours: self.tile_width,
                theirs: other.tile_width,
            });
        }
        if self.dirty_tiles.is_empty() {
            self.dirty_tiles = std::mem::take(&mut other.dirty_tiles);
        } else {
            self.dirty_tiles.extend(other.dirty_tiles.drain());
        }
        Ok(())
    }

    /// Emit every dirty tile on all zoom levels in `[minzoom, maxzoom]`,
    /// draining the set.
    ///
    /// Tiles at maxzoom are emitted in ascending quadkey (Z-order); the
    /// enclosing tiles at lower zooms are interleaved, each emitted exactly
    /// once. Sorting the quadkeys puts sibling tiles next to each other, so
    /// comparing each ancestor against the previous quadkey's ancestor is
    /// enough to deduplicate.
    ///
    /// # Panics
    ///
    /// Panics if `minzoom > maxzoom`.
    pub fn output_and_destroy<W: TileWriter>(&mut self, writer: &mut W, minzoom: u32) {
        assert!(
            minzoom <= self.maxzoom,
            "minzoom {} exceeds maxzoom {}",
            minzoom,
            self.maxzoom
        );
        let mut tiles_maxzoom: Vec<u64> = self.dirty_tiles.drain().collect();
        tiles_maxzoom.sort_unstable();

        // Initialized beyond any valid quadkey so the first tile never
        // compares equal.
        let mut last_quadkey = 1u64 << (2 * self.maxzoom);
        for &quadkey in &tiles_maxzoom {
            for dz in 0..=self.maxzoom - minzoom {
                let ancestor = quadkey >> (2 * dz);
                if ancestor == last_quadkey >> (2 * dz) {
                    // Sibling of the previous tile at this zoom, already
                    // written.
                    continue;
                }
                let (x, y) = quadkey_to_xy(ancestor, self.maxzoom - dz);
                writer.write_tile(x, y, self.maxzoom - dz);
            }
            last_quadkey = quadkey;
        }
    }

    /// Append the expiry list to the file at `path`; see
    /// [`output_and_destroy`](Self::output_and_destroy) and [`TileListFile`].
    pub fn output_and_destroy_to_file<P: AsRef<Path>>(&mut self, path: P, minzoom: u32) {
        let mut writer = TileListFile::append(path);
        self.output_and_destroy(&mut writer, minzoom);
    }
}
