//! Core library for computing dirty slippy-map tiles from changed OSM
//! features.
//!
//! When an importer applies a diff to its database, every map tile that
//! overlaps a changed feature has to be re-rendered. This crate takes the
//! changed geometries (as primitive coordinates or PostGIS EWKB), rasterizes
//! them onto the tile grid at a configured maximum zoom with a small buffer,
//! and finally emits the dirty tiles for every zoom level down to a
//! configured minimum, each tile at most once per zoom.
//!
//! The dirty set is held as 64-bit [quadkeys](quadkey) at maxzoom only;
//! lower zoom levels are derived during output by right shifts over the
//! sorted set, which deduplicates sibling tiles for free.
//!
//! # Examples
//!
//! ```
//! use expire_tiles_core::{ExpireSet, Projection, TileWriter};
//!
//! struct Collect(Vec<(u32, u32, u32)>);
//!
//! impl TileWriter for Collect {
//!     fn write_tile(&mut self, x: u32, y: u32, zoom: u32) {
//!         self.0.push((x, y, zoom));
//!     }
//! }
//!
//! let mut set = ExpireSet::new(15, 20_000.0, Projection::SphereMerc);
//! set.from_point(1_000_000.0, 6_800_000.0);
//!
//! let mut out = Collect(Vec::new());
//! set.output_and_destroy(&mut out, 13);
//! assert_eq!(out.0.len(), 3); // one tile on each of z15, z14, z13
//! ```

use thiserror::Error;

pub mod ewkb;
pub mod expire;
pub mod intersecting;
pub mod output;
pub mod projection;
pub mod quadkey;

/// Errors that abort an expiry operation.
///
/// Geometry-level problems (unknown types, malformed EWKB) are not errors:
/// they are logged and the feature is skipped.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot merge tile expiry sets when {what} does not match: {ours} != {theirs}")]
    MergeMismatch {
        what: &'static str,
        ours: f64,
        theirs: f64,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

pub use expire::{ExpireSet, WkbSource, TILE_EXPIRY_LEEWAY};
pub use intersecting::IntersectingTiles;
pub use output::{TileListFile, TileWriter};
pub use projection::{Projection, EARTH_CIRCUMFERENCE};
