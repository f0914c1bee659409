use crate::error::{GeometryError, Result};
use wkb::reader::Wkb;

const MAGIC: [u8; 2] = [0x47, 0x50];
const HEADER_LEN: usize = 8;

/// Parsed fixed part of a GeoPackage geometry header.
// cf. https://www.geopackage.org/spec140/index.html#gpb_format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct GpkgHeader {
    pub srs_id: i32,
    pub is_empty: bool,
    /// Offset of the WKB payload.
    pub wkb_offset: usize,
}

pub(crate) fn read_header(b: &[u8]) -> std::result::Result<GpkgHeader, GeometryError> {
    if b.len() < HEADER_LEN {
        return Err(GeometryError::InvalidGpkgGeometryLength {
            len: b.len(),
            minimum: HEADER_LEN,
        });
    }
    if b[0..2] != MAGIC {
        return Err(GeometryError::InvalidGpkgGeometryMagic(u16::from_be_bytes([
            b[0], b[1],
        ])));
    }

    let flags = b[3];
    let envelope_size: usize = match flags & 0b00001110 {
        0b00000000 => 0,  // no envelope
        0b00000010 => 32, // [minx, maxx, miny, maxy]
        0b00000100 => 48, // [minx, maxx, miny, maxy, minz, maxz]
        0b00000110 => 48, // [minx, maxx, miny, maxy, minm, maxm]
        0b00001000 => 64, // [minx, maxx, miny, maxy, minz, maxz, minm, maxm]
        _ => return Err(GeometryError::InvalidGpkgGeometryFlags(flags)),
    };
    let wkb_offset = HEADER_LEN + envelope_size;
    if b.len() < wkb_offset {
        return Err(GeometryError::InvalidGpkgGeometryEnvelope {
            len: b.len(),
            required: wkb_offset,
        });
    }

    let srs_bytes = [b[4], b[5], b[6], b[7]];
    let srs_id = if flags & 0b00000001 == 1 {
        i32::from_le_bytes(srs_bytes)
    } else {
        i32::from_be_bytes(srs_bytes)
    };

    Ok(GpkgHeader {
        srs_id,
        is_empty: flags & 0b00010000 != 0,
        wkb_offset,
    })
}

/// Strip GeoPackage header and envelope bytes to access raw WKB.
pub(crate) fn gpkg_geometry_to_wkb(b: &[u8]) -> Result<Wkb<'_>> {
    let header = read_header(b)?;
    let wkb = Wkb::try_new(&b[header.wkb_offset..]).map_err(GeometryError::from)?;
    Ok(wkb)
}

/// SRID stored in the header of a GeoPackage geometry blob.
pub(crate) fn gpkg_geometry_srs_id(b: &[u8]) -> Result<i32> {
    Ok(read_header(b)?.srs_id)
}

/// Prefix WKB bytes with a GeoPackage header carrying `srs_id` and no envelope.
pub(crate) fn wkb_to_gpkg_geometry(wkb: &[u8], srs_id: i32, is_empty: bool) -> Vec<u8> {
    // little endian SRS ID, no envelope
    let mut flags = 0x01u8;
    if is_empty {
        flags |= 0b00010000;
    }

    let mut geom = Vec::with_capacity(wkb.len() + HEADER_LEN);
    geom.extend_from_slice(&MAGIC);
    geom.push(0x00); // version
    geom.push(flags);
    geom.extend_from_slice(&srs_id.to_le_bytes());
    geom.extend_from_slice(wkb);
    geom
}
