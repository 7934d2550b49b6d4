//! Sinks for the expired tile list.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Capability to receive expired tiles, one `(x, y, zoom)` triple at a time.
///
/// Production code writes to a [`TileListFile`]; tests usually collect into a
/// set.
pub trait TileWriter {
    fn write_tile(&mut self, x: u32, y: u32, zoom: u32);
}

/// Appending file sink producing one `zoom/x/y` line per tile.
///
/// The file is opened in append mode so lists from consecutive runs
/// accumulate. If the file cannot be opened, a warning is logged once and
/// every write becomes a no-op; losing the expiry list is not fatal to the
/// import.
pub struct TileListFile {
    file: Option<File>,
    written: u64,
}

impl TileListFile {
    /// Open `path` for appending.
    pub fn append<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(err) => {
                log::warn!(
                    "failed to open expired tiles file {}: {}; tile expiry list will not be written",
                    path.display(),
                    err
                );
                None
            }
        };
        Self { file, written: 0 }
    }

    /// Number of tiles written so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl TileWriter for TileListFile {
    fn write_tile(&mut self, x: u32, y: u32, zoom: u32) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Err(err) = writeln!(file, "{}/{}/{}", zoom, x, y) {
            log::warn!("failed to write expired tile list: {}", err);
            self.file = None;
            return;
        }
        self.written += 1;
        if self.written % 1000 == 0 {
            log::debug!("wrote {}K expired tiles", self.written / 1000);
        }
    }
}
