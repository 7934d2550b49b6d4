//! Projection of database coordinates onto the tile grid.
//!
//! The expiry engine works in fractional tile coordinates at the configured
//! maximum zoom: `x` grows east from the antimeridian, `y` grows south from
//! the north edge of the Web Mercator square. This module maps coordinates as
//! they arrive from the database into that space.
//!
//! Two source reference systems are supported, matching the importer's two
//! built-in output projections: EPSG:3857 (coordinates already in spherical
//! Mercator meters) and EPSG:4326 (lon/lat degrees, converted to Mercator
//! meters first).

use std::f64::consts::PI;

/// Circumference of the earth at the equator in EPSG:3857 meters.
pub const EARTH_CIRCUMFERENCE: f64 = 40_075_016.68;

/// Spherical earth radius used by the Web Mercator projection.
const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitudes beyond this are clamped before projecting; `tan` blows up at the
/// poles.
const MAX_LATITUDE: f64 = 89.99;

/// Source reference system of the geometries fed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// EPSG:3857, coordinates in spherical Mercator meters.
    SphereMerc,
    /// EPSG:4326, coordinates in lon/lat degrees.
    LatLong,
}

impl Projection {
    /// Look up a projection by EPSG id. Returns `None` for unsupported ids.
    pub fn from_srid(srid: u32) -> Option<Self> {
        match srid {
            3857 => Some(Projection::SphereMerc),
            4326 => Some(Projection::LatLong),
            _ => None,
        }
    }

    /// The EPSG id of this projection.
    pub fn srid(&self) -> u32 {
        match self {
            Projection::SphereMerc => 3857,
            Projection::LatLong => 4326,
        }
    }

    /// Convert a coordinate in this projection's units to fractional tile
    /// coordinates on a `map_width` x `map_width` tile grid.
    ///
    /// The y axis flips: larger projected y (further north) maps to a smaller
    /// tile row.
    pub fn coords_to_tile(&self, x: f64, y: f64, map_width: u32) -> (f64, f64) {
        let (merc_x, merc_y) = match self {
            Projection::SphereMerc => (x, y),
            Projection::LatLong => lonlat_to_merc(x, y),
        };
        let width = f64::from(map_width);
        (
            width * (0.5 + merc_x / EARTH_CIRCUMFERENCE),
            width * (0.5 - merc_y / EARTH_CIRCUMFERENCE),
        )
    }
}

/// Project lon/lat degrees to spherical Mercator meters.
fn lonlat_to_merc(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = lon.to_radians() * EARTH_RADIUS;
    let y = (PI / 4.0 + lat.to_radians() / 2.0).tan().ln() * EARTH_RADIUS;
    (x, y)
}
