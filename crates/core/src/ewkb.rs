//! Cursor-style parser for PostGIS extended WKB.
//!
//! The importer stores geometries as EWKB: standard OGC WKB with an optional
//! SRID stamped into the type word. The expiry engine only ever walks a
//! geometry forwards (with one save/rewind per polygon to take two passes
//! over its rings), so the parser is a thin bounds-checked cursor rather
//! than a full decoder into geometry types.
//!
//! Every nested geometry carries its own byte-order flag; the cursor honors
//! it for all subsequent reads. Z and M dimensions are not supported and are
//! reported as an error so the caller can skip the feature.
//!
//! # Example
//!
//! ```
//! use expire_tiles_core::ewkb::{wkb_from_hex, Parser, WKB_POINT};
//!
//! let bytes = wkb_from_hex("0101000000000000000000F03F0000000000000040").unwrap();
//! let mut parser = Parser::new(&bytes);
//! assert_eq!(parser.read_header().unwrap(), WKB_POINT);
//! let point = parser.read_point().unwrap();
//! assert_eq!((point.x, point.y), (1.0, 2.0));
//! ```

use geo::Coord;

/// WKB geometry type code for a point.
pub const WKB_POINT: u32 = 1;
/// WKB geometry type code for a linestring.
pub const WKB_LINE: u32 = 2;
/// WKB geometry type code for a polygon.
pub const WKB_POLYGON: u32 = 3;
/// WKB geometry type code for a multilinestring.
pub const WKB_MULTI_LINE: u32 = 5;
/// WKB geometry type code for a multipolygon.
pub const WKB_MULTI_POLYGON: u32 = 6;

const EWKB_Z_FLAG: u32 = 0x8000_0000;
const EWKB_M_FLAG: u32 = 0x4000_0000;
const EWKB_SRID_FLAG: u32 = 0x2000_0000;

/// Errors raised while walking an EWKB byte stream.
#[derive(Debug, thiserror::Error)]
pub enum EwkbError {
    #[error("geometry truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("geometry type {type_code:#x} has Z or M dimensions, which are not supported")]
    UnsupportedDimensions { type_code: u32 },

    #[error("invalid hex geometry: {0}")]
    InvalidHex(String),
}

pub type Result<T> = std::result::Result<T, EwkbError>;

/// Decode a hex-encoded EWKB row as the database hands it out.
pub fn wkb_from_hex(hex: &str) -> Result<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return Err(EwkbError::InvalidHex(format!(
            "odd number of digits ({})",
            hex.len()
        )));
    }
    let digit = |c: u8| -> Result<u8> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err(EwkbError::InvalidHex(format!("bad digit {:?}", c as char))),
        }
    };
    hex.as_bytes()
        .chunks(2)
        .map(|pair| Ok(digit(pair[0])? << 4 | digit(pair[1])?))
        .collect()
}

/// Forward cursor over one EWKB geometry.
pub struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> Parser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            little_endian: true,
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(EwkbError::Truncated { offset: self.pos })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().expect("slice length checked");
        Ok(if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    fn read_f64(&mut self) -> Result<f64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("slice length checked");
        Ok(if self.little_endian {
            f64::from_le_bytes(bytes)
        } else {
            f64::from_be_bytes(bytes)
        })
    }

    /// Read a geometry header: byte-order flag, type word, and the SRID if
    /// one is stamped in. Returns the bare geometry type code.
    pub fn read_header(&mut self) -> Result<u32> {
        let order = self.take(1)?[0];
        self.little_endian = order != 0;
        let raw = self.read_u32()?;
        if raw & (EWKB_Z_FLAG | EWKB_M_FLAG) != 0 {
            return Err(EwkbError::UnsupportedDimensions { type_code: raw });
        }
        if raw & EWKB_SRID_FLAG != 0 {
            self.read_u32()?;
        }
        Ok(raw & !EWKB_SRID_FLAG)
    }

    /// Read an element count (ring count, point count, member count).
    pub fn read_length(&mut self) -> Result<u32> {
        self.read_u32()
    }

    /// Read one coordinate pair.
    pub fn read_point(&mut self) -> Result<Coord> {
        let x = self.read_f64()?;
        let y = self.read_f64()?;
        Ok(Coord { x, y })
    }

    /// Remember the current cursor position for a later [`rewind`](Self::rewind).
    pub fn save_pos(&self) -> usize {
        self.pos
    }

    /// Move the cursor back to a position from [`save_pos`](Self::save_pos).
    pub fn rewind(&mut self, pos: usize) {
        debug_assert!(pos <= self.data.len());
        self.pos = pos;
    }
}
