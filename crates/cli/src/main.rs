//! CLI for expire-tiles - compute dirty tile lists from EWKB geometries
//!
//! This is a thin wrapper around the expire-tiles-core library. It reads
//! hex-encoded EWKB geometries (one per line, optionally prefixed with an
//! OSM id) and appends the expired tiles to the output list.

use anyhow::{bail, Context, Result};
use clap::Parser;
use expire_tiles_core::{ewkb, ExpireSet, Projection};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "expire-tiles",
    about = "Compute the dirty slippy-map tiles for changed OSM features",
    version
)]
struct Args {
    /// Input file with one geometry per line ("<osm_id> <hex-ewkb>" or just
    /// "<hex-ewkb>"); use "-" for stdin
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output tile list, appended as z/x/y lines
    #[arg(short, long, default_value = "dirty_tiles")]
    output: PathBuf,

    /// Maximum zoom level to expire at (0 disables expiry)
    #[arg(long, default_value = "14")]
    max_zoom: u32,

    /// Minimum zoom level to project the tile set down to (defaults to the
    /// maximum zoom)
    #[arg(long)]
    min_zoom: Option<u32>,

    /// Width threshold in projection units above which polygons are expired
    /// as outlines only
    #[arg(long, default_value = "20000")]
    max_bbox: f64,

    /// EPSG id of the input coordinates (3857 or 4326)
    #[arg(long, default_value = "3857")]
    srs: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let projection = Projection::from_srid(args.srs)
        .with_context(|| format!("Unsupported SRS {}", args.srs))?;

    let min_zoom = args.min_zoom.unwrap_or(args.max_zoom);
    if min_zoom > args.max_zoom {
        bail!(
            "Minimum zoom {} must not exceed maximum zoom {}",
            min_zoom,
            args.max_zoom
        );
    }

    let reader: Box<dyn BufRead> = if args.input.as_os_str() == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        Box::new(BufReader::new(std::fs::File::open(&args.input).with_context(
            || format!("Failed to open input file {}", args.input.display()),
        )?))
    };

    let mut set = ExpireSet::new(args.max_zoom, args.max_bbox, projection);
    let mut features = 0u64;
    for (number, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Either "<osm_id> <hex>" or a bare hex geometry.
        let (osm_id, hex) = match line.split_once(char::is_whitespace) {
            Some((id, rest)) => (
                id.parse::<i64>()
                    .with_context(|| format!("Bad OSM id {:?} on line {}", id, number + 1))?,
                rest.trim(),
            ),
            None => (0, line),
        };

        match ewkb::wkb_from_hex(hex) {
            Ok(bytes) => {
                set.from_wkb(&bytes, osm_id);
                features += 1;
            }
            Err(err) => log::warn!("line {}: skipping geometry: {}", number + 1, err),
        }
    }

    let dirty = set.dirty_tile_count();
    set.output_and_destroy_to_file(&args.output, min_zoom);

    println!(
        "✓ Expired {} tiles at z{} from {} features into {}",
        dirty,
        args.max_zoom,
        features,
        args.output.display()
    );

    Ok(())
}
