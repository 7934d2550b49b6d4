//! Expiry driven by EWKB geometries, end to end: dispatch over every
//! supported geometry type, polygon interior filling with holes, oversized
//! and degenerate polygons, and the database-row entry point.
//!
//! Fixtures are built from `geo` geometries and encoded with geozero's EWKB
//! writer; a small raw builder covers the degenerate shapes `geo` cannot
//! represent. All fixtures are EPSG:4326 lon/lat.

use std::collections::BTreeSet;

use expire_tiles_core::{ExpireSet, Projection, TileWriter, WkbSource};
use geo::{line_string, point, Geometry, LineString, MultiLineString, MultiPolygon, Polygon};
use geozero::{CoordDimensions, ToWkb};

struct TileSet(BTreeSet<(u32, u32, u32)>);

impl TileSet {
    fn new() -> Self {
        TileSet(BTreeSet::new())
    }
}

impl TileWriter for TileSet {
    fn write_tile(&mut self, x: u32, y: u32, zoom: u32) {
        assert!(
            self.0.insert((zoom, x, y)),
            "tile {}/{}/{} emitted twice",
            zoom,
            x,
            y
        );
    }
}

fn drain(set: &mut ExpireSet, minzoom: u32) -> BTreeSet<(u32, u32, u32)> {
    let mut out = TileSet::new();
    set.output_and_destroy(&mut out, minzoom);
    out.0
}

fn ewkb(geom: &Geometry) -> Vec<u8> {
    geom.to_ewkb(CoordDimensions::xy(), Some(4326))
        .expect("fixture encoding should succeed")
}

/// EWKB polygon builder for degenerate rings that `geo` would silently
/// close or reject.
fn raw_polygon(rings: &[&[(f64, f64)]]) -> Vec<u8> {
    let mut bytes = vec![1u8];
    bytes.extend_from_slice(&0x2000_0003u32.to_le_bytes());
    bytes.extend_from_slice(&4326u32.to_le_bytes());
    bytes.extend_from_slice(&(rings.len() as u32).to_le_bytes());
    for ring in rings {
        bytes.extend_from_slice(&(ring.len() as u32).to_le_bytes());
        for &(x, y) in *ring {
            bytes.extend_from_slice(&x.to_le_bytes());
            bytes.extend_from_slice(&y.to_le_bytes());
        }
    }
    bytes
}

/// Outer ring of the six-corner test polygon, counterclockwise.
fn hexagon_outer() -> LineString {
    LineString::from(vec![
        (13.4989, 52.3512),
        (13.5727, 52.3512),
        (13.5727, 52.3836),
        (13.4989, 52.3836),
        (13.49666, 52.36135),
        (13.48731, 52.35558),
        (13.4989, 52.3512),
    ])
}

/// Inner ring for the same polygon, wound clockwise.
fn hexagon_inner() -> LineString {
    LineString::from(vec![
        (13.5053, 52.3563),
        (13.5053, 52.3811),
        (13.5679, 52.3811),
        (13.5679, 52.3563),
        (13.5053, 52.3563),
    ])
}

fn tile_block(
    zoom: u32,
    x_range: std::ops::RangeInclusive<u32>,
    y_range: std::ops::RangeInclusive<u32>,
) -> BTreeSet<(u32, u32, u32)> {
    let mut tiles = BTreeSet::new();
    for x in x_range {
        for y in y_range.clone() {
            tiles.insert((zoom, x, y));
        }
    }
    tiles
}

#[test]
fn test_point() {
    let mut set = ExpireSet::new(15, 0.1, Projection::LatLong);
    set.from_wkb(&ewkb(&Geometry::Point(point!(x: 13.5, y: 52.5))), 1);
    assert_eq!(drain(&mut set, 15), BTreeSet::from([(15, 17612, 10749)]));
}

#[test]
fn test_linestring() {
    let line = Geometry::LineString(line_string![
        (x: 13.35, y: 52.45),
        (x: 13.4, y: 52.5),
        (x: 13.5, y: 52.5),
    ]);
    let mut set = ExpireSet::new(12, 0.1, Projection::LatLong);
    set.from_wkb(&ewkb(&line), 2);
    assert_eq!(
        drain(&mut set, 12),
        BTreeSet::from([
            (12, 2199, 1344),
            (12, 2200, 1343),
            (12, 2200, 1344),
            (12, 2201, 1343),
        ])
    );
}

#[test]
fn test_multilinestring() {
    let lines = Geometry::MultiLineString(MultiLineString::new(vec![
        line_string![(x: 13.35, y: 52.45), (x: 13.4, y: 52.5)],
        line_string![(x: 13.5, y: 52.5), (x: 13.55, y: 52.45)],
    ]));
    let mut set = ExpireSet::new(12, 0.1, Projection::LatLong);
    set.from_wkb(&ewkb(&lines), 3);
    assert_eq!(
        drain(&mut set, 12),
        BTreeSet::from([
            (12, 2199, 1344),
            (12, 2200, 1343),
            (12, 2200, 1344),
            (12, 2201, 1343),
            (12, 2201, 1344),
            (12, 2202, 1344),
        ])
    );
}

#[test]
fn test_polygon_interior_is_filled() {
    let polygon = Geometry::Polygon(Polygon::new(hexagon_outer(), vec![]));
    let mut set = ExpireSet::new(14, 0.1, Projection::LatLong);
    set.from_wkb(&ewkb(&polygon), 4);

    let mut expected = tile_block(14, 8806..=8809, 5383..=5385);
    expected.insert((14, 8805, 5384));
    expected.insert((14, 8805, 5385));
    assert_eq!(drain(&mut set, 14), expected);
}

#[test]
fn test_polygon_inner_ring_leaves_hole() {
    let polygon = Geometry::Polygon(Polygon::new(hexagon_outer(), vec![hexagon_inner()]));
    let mut set = ExpireSet::new(14, 0.1, Projection::LatLong);
    set.from_wkb(&ewkb(&polygon), 4);

    let tiles = drain(&mut set, 14);
    // The two tiles fully inside the hole stay clean.
    assert!(!tiles.contains(&(14, 8807, 5384)));
    assert!(!tiles.contains(&(14, 8808, 5384)));
    let mut expected = tile_block(14, 8806..=8809, 5383..=5385);
    expected.insert((14, 8805, 5384));
    expected.insert((14, 8805, 5385));
    expected.remove(&(14, 8807, 5384));
    expected.remove(&(14, 8808, 5384));
    assert_eq!(tiles, expected);
}

#[test]
fn test_polygon_pyramid_output() {
    let polygon = Geometry::Polygon(Polygon::new(hexagon_outer(), vec![hexagon_inner()]));
    let mut set = ExpireSet::new(14, 0.1, Projection::LatLong);
    set.from_wkb(&ewkb(&polygon), 4);

    let tiles = drain(&mut set, 13);
    let z13: BTreeSet<_> = tiles.iter().filter(|t| t.0 == 13).copied().collect();
    assert_eq!(
        z13,
        BTreeSet::from([
            (13, 4402, 2692),
            (13, 4403, 2691),
            (13, 4403, 2692),
            (13, 4404, 2691),
            (13, 4404, 2692),
        ])
    );
    assert_eq!(tiles.len(), 17);
}

#[test]
fn test_multipolygon() {
    let squares = Geometry::MultiPolygon(MultiPolygon::new(vec![
        Polygon::new(
            LineString::from(vec![
                (13.0, 52.0),
                (13.1, 52.0),
                (13.1, 52.1),
                (13.0, 52.1),
                (13.0, 52.0),
            ]),
            vec![],
        ),
        Polygon::new(
            LineString::from(vec![
                (13.4, 52.4),
                (13.5, 52.4),
                (13.5, 52.5),
                (13.4, 52.5),
                (13.4, 52.4),
            ]),
            vec![],
        ),
    ]));
    let mut set = ExpireSet::new(13, 1.0, Projection::LatLong);
    set.from_wkb(&ewkb(&squares), 5);

    let mut expected = tile_block(13, 4391..=4394, 2702..=2706);
    expected.extend(tile_block(13, 4400..=4403, 2687..=2691));
    assert_eq!(drain(&mut set, 13), expected);
}

#[test]
fn test_oversized_polygon_expires_outline_only() {
    let ring = LineString::from(vec![
        (-20.0, -20.0),
        (20.0, -20.0),
        (20.0, 20.0),
        (-20.0, 20.0),
        (-20.0, -20.0),
    ]);
    let polygon = Geometry::Polygon(Polygon::new(ring, vec![]));

    // Bounding box 40 degrees across; above the threshold only the ring
    // outline is expired and the interior stays clean.
    let mut outline = ExpireSet::new(6, 30.0, Projection::LatLong);
    outline.from_wkb(&ewkb(&polygon), 6);
    let outline_tiles = drain(&mut outline, 6);
    assert_eq!(outline_tiles.len(), 28);
    assert!(!outline_tiles.contains(&(6, 32, 32)));
    assert!(outline_tiles
        .iter()
        .all(|&(_, x, y)| x == 28 || x == 35 || y == 28 || y == 35));

    // With a permissive threshold the same polygon fills.
    let mut filled = ExpireSet::new(6, 100.0, Projection::LatLong);
    filled.from_wkb(&ewkb(&polygon), 6);
    let filled_tiles = drain(&mut filled, 6);
    assert_eq!(filled_tiles, tile_block(6, 28..=35, 28..=35));
}

#[test]
fn test_single_column_polygon_shortcut() {
    let ring = LineString::from(vec![
        (1.0, 1.0),
        (1.2, 1.0),
        (1.2, 3.0),
        (1.0, 3.0),
        (1.0, 1.0),
    ]);
    let polygon = Geometry::Polygon(Polygon::new(ring, vec![]));
    let mut set = ExpireSet::new(6, 100.0, Projection::LatLong);
    set.from_wkb(&ewkb(&polygon), 7);
    assert_eq!(drain(&mut set, 6), BTreeSet::from([(6, 32, 31)]));
}

#[test]
fn test_degenerate_outer_ring_expires_nothing() {
    let wkb = raw_polygon(&[&[(13.0, 52.0), (13.1, 52.1)]]);
    let mut set = ExpireSet::new(13, 1.0, Projection::LatLong);
    set.from_wkb(&wkb, 8);
    assert_eq!(set.dirty_tile_count(), 0);
}

#[test]
fn test_degenerate_inner_ring_is_skipped() {
    let square: &[(f64, f64)] = &[
        (13.0, 52.0),
        (13.1, 52.0),
        (13.1, 52.1),
        (13.0, 52.1),
        (13.0, 52.0),
    ];
    let triangle: &[(f64, f64)] = &[(13.02, 52.02), (13.03, 52.02), (13.02, 52.03)];

    let mut with_inner = ExpireSet::new(13, 1.0, Projection::LatLong);
    with_inner.from_wkb(&raw_polygon(&[square, triangle]), 9);

    let mut without_inner = ExpireSet::new(13, 1.0, Projection::LatLong);
    without_inner.from_wkb(&raw_polygon(&[square]), 9);

    let tiles = drain(&mut with_inner, 13);
    assert_eq!(tiles, drain(&mut without_inner, 13));
    assert_eq!(tiles, tile_block(13, 4391..=4394, 2702..=2706));
}

#[test]
fn test_unknown_geometry_type_is_skipped() {
    let multipoint = Geometry::MultiPoint(vec![point!(x: 13.5, y: 52.5)].into());
    let mut set = ExpireSet::new(13, 1.0, Projection::LatLong);
    set.from_wkb(&ewkb(&multipoint), 10);
    assert_eq!(set.dirty_tile_count(), 0);
}

#[test]
fn test_truncated_wkb_is_skipped() {
    let polygon = Geometry::Polygon(Polygon::new(hexagon_outer(), vec![]));
    let bytes = ewkb(&polygon);
    let mut set = ExpireSet::new(13, 1.0, Projection::LatLong);
    set.from_wkb(&bytes[..bytes.len() / 2], 11);
    assert_eq!(set.dirty_tile_count(), 0);
}

/// Table adapter stub handing out a fixed list of hex rows per id.
struct FixedRows(Vec<String>);

impl WkbSource for FixedRows {
    fn wkb_rows(&mut self, _osm_id: i64) -> Vec<String> {
        self.0.clone()
    }
}

#[test]
fn test_from_db_expires_all_rows() {
    let to_hex = |bytes: &[u8]| -> String {
        bytes.iter().map(|b| format!("{:02X}", b)).collect()
    };
    let point_row = to_hex(&ewkb(&Geometry::Point(point!(x: 13.5, y: 52.5))));
    let line_row = to_hex(&ewkb(&Geometry::LineString(
        line_string![(x: 13.35, y: 52.45), (x: 13.4, y: 52.5)],
    )));
    let mut source = FixedRows(vec![point_row, line_row]);

    let mut set = ExpireSet::new(15, 0.1, Projection::LatLong);
    assert_eq!(set.from_db(&mut source, 99), Some(2));
    let tiles = drain(&mut set, 15);
    assert!(tiles.contains(&(15, 17612, 10749)));
    assert!(tiles.len() > 1);
}

#[test]
fn test_from_db_disabled_at_zoom_zero() {
    let mut source = FixedRows(vec!["01".to_string()]);
    let mut set = ExpireSet::new(0, 0.1, Projection::LatLong);
    assert_eq!(set.from_db(&mut source, 99), None);
}
