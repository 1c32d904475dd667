//! TIFF / BigTIFF vocabulary shared by the reader and writer.
//!
//! Only the tags the pipeline reads or writes are named here. Values are
//! laid out as in the TIFF 6.0 and BigTIFF specifications.

use std::collections::BTreeMap;

use crate::coord::{Bounds, Crs};

pub(crate) mod tag {
    pub const NEW_SUBFILE_TYPE: u16 = 254;
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const PHOTOMETRIC: u16 = 262;
    pub const STRIP_OFFSETS: u16 = 273;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const ROWS_PER_STRIP: u16 = 278;
    pub const STRIP_BYTE_COUNTS: u16 = 279;
    pub const PLANAR_CONFIG: u16 = 284;
    pub const PREDICTOR: u16 = 317;
    pub const TILE_WIDTH: u16 = 322;
    pub const TILE_LENGTH: u16 = 323;
    pub const TILE_OFFSETS: u16 = 324;
    pub const TILE_BYTE_COUNTS: u16 = 325;
    pub const EXTRA_SAMPLES: u16 = 338;
    pub const SAMPLE_FORMAT: u16 = 339;
    pub const MODEL_PIXEL_SCALE: u16 = 33550;
    pub const MODEL_TIEPOINT: u16 = 33922;
    pub const GEO_KEY_DIRECTORY: u16 = 34735;
    pub const GEO_DOUBLE_PARAMS: u16 = 34736;
    pub const GEO_ASCII_PARAMS: u16 = 34737;
    pub const GDAL_METADATA: u16 = 42112;
    pub const GDAL_NODATA: u16 = 42113;
}

pub(crate) mod compression {
    pub const NONE: u16 = 1;
    pub const DEFLATE: u16 = 8;
    pub const PACKBITS: u16 = 32773;
    pub const DEFLATE_LEGACY: u16 = 32946;
}

pub(crate) mod field_type {
    pub const BYTE: u16 = 1;
    pub const ASCII: u16 = 2;
    pub const SHORT: u16 = 3;
    pub const LONG: u16 = 4;
    pub const RATIONAL: u16 = 5;
    pub const SBYTE: u16 = 6;
    pub const UNDEFINED: u16 = 7;
    pub const SSHORT: u16 = 8;
    pub const SLONG: u16 = 9;
    pub const SRATIONAL: u16 = 10;
    pub const FLOAT: u16 = 11;
    pub const DOUBLE: u16 = 12;
    pub const IFD: u16 = 13;
    pub const LONG8: u16 = 16;
    pub const SLONG8: u16 = 17;
    pub const IFD8: u16 = 18;
}

pub(crate) const PREDICTOR_NONE: u16 = 1;
pub(crate) const PREDICTOR_HORIZONTAL: u16 = 2;

pub(crate) const SAMPLE_FORMAT_UINT: u16 = 1;
pub(crate) const SAMPLE_FORMAT_FLOAT: u16 = 3;

/// Size in bytes of one value of a TIFF field type.
pub(crate) fn field_size(field_type: u16) -> Option<usize> {
    use field_type::*;
    match field_type {
        BYTE | ASCII | SBYTE | UNDEFINED => Some(1),
        SHORT | SSHORT => Some(2),
        LONG | SLONG | FLOAT | IFD => Some(4),
        RATIONAL | SRATIONAL | DOUBLE | LONG8 | SLONG8 | IFD8 => Some(8),
        _ => None,
    }
}

/// Byte order declared in the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn u16(self, b: &[u8]) -> u16 {
        let a = [b[0], b[1]];
        match self {
            ByteOrder::Little => u16::from_le_bytes(a),
            ByteOrder::Big => u16::from_be_bytes(a),
        }
    }

    pub fn u32(self, b: &[u8]) -> u32 {
        let a = [b[0], b[1], b[2], b[3]];
        match self {
            ByteOrder::Little => u32::from_le_bytes(a),
            ByteOrder::Big => u32::from_be_bytes(a),
        }
    }

    pub fn u64(self, b: &[u8]) -> u64 {
        let mut a = [0u8; 8];
        a.copy_from_slice(&b[..8]);
        match self {
            ByteOrder::Little => u64::from_le_bytes(a),
            ByteOrder::Big => u64::from_be_bytes(a),
        }
    }

    pub fn f32(self, b: &[u8]) -> f32 {
        f32::from_bits(self.u32(b))
    }

    pub fn f64(self, b: &[u8]) -> f64 {
        f64::from_bits(self.u64(b))
    }
}

/// A tag value as written by this crate (always little-endian).
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TagValue {
    Short(Vec<u16>),
    Long(Vec<u32>),
    Long8(Vec<u64>),
    Double(Vec<f64>),
    Ascii(String),
}

impl TagValue {
    fn field_type(&self) -> u16 {
        match self {
            TagValue::Short(_) => field_type::SHORT,
            TagValue::Long(_) => field_type::LONG,
            TagValue::Long8(_) => field_type::LONG8,
            TagValue::Double(_) => field_type::DOUBLE,
            TagValue::Ascii(_) => field_type::ASCII,
        }
    }

    fn count(&self) -> u64 {
        match self {
            TagValue::Short(v) => v.len() as u64,
            TagValue::Long(v) => v.len() as u64,
            TagValue::Long8(v) => v.len() as u64,
            TagValue::Double(v) => v.len() as u64,
            TagValue::Ascii(s) => s.len() as u64 + 1,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            TagValue::Short(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            TagValue::Long(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            TagValue::Long8(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            TagValue::Double(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            TagValue::Ascii(s) => {
                out.extend_from_slice(s.as_bytes());
                out.push(0);
            }
        }
        out
    }
}

/// Serialized image file directory.
pub(crate) struct EncodedIfd {
    pub bytes: Vec<u8>,
    /// Position of the next-IFD pointer within `bytes`
    pub next_pointer_at: usize,
}

/// Encodes one IFD that will be written at file offset `start`.
///
/// Values too large for the entry are placed directly after the entry
/// table. Returns `None` if an offset does not fit a classic TIFF.
pub(crate) fn encode_ifd(
    entries: &BTreeMap<u16, TagValue>,
    start: u64,
    big: bool,
) -> Option<EncodedIfd> {
    let (count_size, entry_size, pointer_size) = if big { (8, 20, 8) } else { (2, 12, 4) };
    let table_len = count_size + entries.len() * entry_size + pointer_size;
    let external_start = start + table_len as u64;

    let mut bytes = Vec::with_capacity(table_len);
    let mut external: Vec<u8> = Vec::new();

    if big {
        bytes.extend_from_slice(&(entries.len() as u64).to_le_bytes());
    } else {
        bytes.extend_from_slice(&u16::try_from(entries.len()).ok()?.to_le_bytes());
    }

    for (tag, value) in entries {
        let data = value.to_bytes();
        bytes.extend_from_slice(&tag.to_le_bytes());
        bytes.extend_from_slice(&value.field_type().to_le_bytes());
        if big {
            bytes.extend_from_slice(&value.count().to_le_bytes());
        } else {
            bytes.extend_from_slice(&u32::try_from(value.count()).ok()?.to_le_bytes());
        }

        if data.len() <= pointer_size {
            let mut inline = data;
            inline.resize(pointer_size, 0);
            bytes.extend_from_slice(&inline);
        } else {
            let offset = external_start + external.len() as u64;
            if big {
                bytes.extend_from_slice(&offset.to_le_bytes());
            } else {
                bytes.extend_from_slice(&u32::try_from(offset).ok()?.to_le_bytes());
            }
            external.extend_from_slice(&data);
            if external.len() % 2 == 1 {
                external.push(0);
            }
        }
    }

    let next_pointer_at = bytes.len();
    bytes.extend(std::iter::repeat(0u8).take(pointer_size));
    bytes.extend_from_slice(&external);

    Some(EncodedIfd {
        bytes,
        next_pointer_at,
    })
}

/// Writes a next-IFD (or header) pointer into a little-endian buffer.
pub(crate) fn patch_pointer(buf: &mut [u8], at: usize, value: u64, big: bool) -> Option<()> {
    if big {
        buf.get_mut(at..at + 8)?.copy_from_slice(&value.to_le_bytes());
    } else {
        let value = u32::try_from(value).ok()?;
        buf.get_mut(at..at + 4)?.copy_from_slice(&value.to_le_bytes());
    }
    Some(())
}

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;
const USER_DEFINED: u16 = 32767;

/// Georeferencing carried by GeoTIFF tags.
///
/// Tag contents are kept verbatim so outputs carry exactly the
/// georeferencing of their inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoReference {
    pub pixel_scale: [f64; 3],
    pub tiepoint: [f64; 6],
    pub geo_keys: Vec<u16>,
    pub geo_doubles: Vec<f64>,
    pub geo_ascii: Option<String>,
}

impl GeoReference {
    /// North-up georeferencing for a raster whose top-left corner is at
    /// (`origin_x`, `origin_y`) in the given EPSG coordinate system.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64, epsg: u16) -> Self {
        let geographic = epsg == 4326;
        let (model_type, crs_key) = if geographic {
            (2, GEOGRAPHIC_TYPE)
        } else {
            (1, PROJECTED_CS_TYPE)
        };
        Self {
            pixel_scale: [pixel_width, pixel_height, 0.0],
            tiepoint: [0.0, 0.0, 0.0, origin_x, origin_y, 0.0],
            geo_keys: vec![
                1, 1, 0, 3, //
                GT_MODEL_TYPE, 0, 1, model_type, //
                GT_RASTER_TYPE, 0, 1, 1, //
                crs_key, 0, 1, epsg,
            ],
            geo_doubles: Vec::new(),
            geo_ascii: None,
        }
    }

    /// Model coordinates of the raster's top-left corner.
    pub fn origin(&self) -> (f64, f64) {
        let [i, j, _, x, y, _] = self.tiepoint;
        (x - i * self.pixel_scale[0], y + j * self.pixel_scale[1])
    }

    /// Pixel width and height in model units.
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.pixel_scale[0], self.pixel_scale[1])
    }

    /// EPSG code declared by the geo key directory, if any.
    pub fn epsg(&self) -> Option<u16> {
        let keys = &self.geo_keys;
        if keys.len() < 4 {
            return None;
        }
        let count = keys[3] as usize;
        let mut found = None;
        for entry in keys[4..].chunks_exact(4).take(count) {
            let (id, location, value) = (entry[0], entry[1], entry[3]);
            if location != 0 || value == USER_DEFINED {
                continue;
            }
            match id {
                PROJECTED_CS_TYPE => return Some(value),
                GEOGRAPHIC_TYPE => found = Some(value),
                _ => {}
            }
        }
        found
    }

    /// Coordinate system of the raster, when it is one we can transform.
    pub fn crs(&self) -> Option<Crs> {
        self.epsg().and_then(|code| Crs::from_epsg(code).ok())
    }

    /// Extent of a `width` x `height` raster in model units.
    pub fn bounds(&self, width: u32, height: u32) -> Bounds {
        let (left, top) = self.origin();
        let (sx, sy) = self.pixel_size();
        Bounds::new(left, top - sy * f64::from(height), left + sx * f64::from(width), top)
    }

    /// True if both rasters share origin, pixel size, and coordinate system.
    pub fn aligned_with(&self, other: &GeoReference) -> bool {
        fn close(a: f64, b: f64) -> bool {
            (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
        }
        let (ax, ay) = self.origin();
        let (bx, by) = other.origin();
        let (asx, asy) = self.pixel_size();
        let (bsx, bsy) = other.pixel_size();
        close(ax, bx)
            && close(ay, by)
            && close(asx, bsx)
            && close(asy, bsy)
            && self.epsg() == other.epsg()
    }

    pub(crate) fn tags(&self, entries: &mut BTreeMap<u16, TagValue>) {
        entries.insert(tag::MODEL_PIXEL_SCALE, TagValue::Double(self.pixel_scale.to_vec()));
        entries.insert(tag::MODEL_TIEPOINT, TagValue::Double(self.tiepoint.to_vec()));
        entries.insert(tag::GEO_KEY_DIRECTORY, TagValue::Short(self.geo_keys.clone()));
        if !self.geo_doubles.is_empty() {
            entries.insert(tag::GEO_DOUBLE_PARAMS, TagValue::Double(self.geo_doubles.clone()));
        }
        if let Some(ascii) = &self.geo_ascii {
            entries.insert(tag::GEO_ASCII_PARAMS, TagValue::Ascii(ascii.clone()));
        }
    }
}

/// Renders key/value pairs as a GDAL_METADATA XML document.
pub(crate) fn gdal_metadata_xml(items: &[(String, String)]) -> String {
    let mut xml = String::from("<GDALMetadata>\n");
    for (key, value) in items {
        xml.push_str(&format!(
            "  <Item name=\"{}\">{}</Item>\n",
            xml_escape(key),
            xml_escape(value)
        ));
    }
    xml.push_str("</GDALMetadata>");
    xml
}

/// Extracts key/value pairs from a GDAL_METADATA XML document.
pub fn parse_gdal_metadata(xml: &str) -> Vec<(String, String)> {
    let mut items = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Item name=\"") {
        rest = &rest[start + 12..];
        let Some(name_end) = rest.find('"') else { break };
        let name = xml_unescape(&rest[..name_end]);
        let Some(open_end) = rest.find('>') else { break };
        let Some(close) = rest.find("</Item>") else { break };
        if close < open_end {
            break;
        }
        items.push((name, xml_unescape(&rest[open_end + 1..close])));
        rest = &rest[close + 7..];
    }
    items
}

pub(crate) fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_order() {
        assert_eq!(ByteOrder::Little.u16(&[0x2a, 0x00]), 42);
        assert_eq!(ByteOrder::Big.u16(&[0x00, 0x2a]), 42);
        assert_eq!(ByteOrder::Big.u32(&[0, 0, 1, 0]), 256);
    }

    #[test]
    fn test_encode_ifd_inline_and_external() {
        let mut entries = BTreeMap::new();
        entries.insert(tag::IMAGE_WIDTH, TagValue::Long(vec![100]));
        entries.insert(tag::MODEL_TIEPOINT, TagValue::Double(vec![0.0; 6]));
        let ifd = encode_ifd(&entries, 1000, false).unwrap();

        // count + 2 entries + pointer, then 48 bytes of doubles
        assert_eq!(ifd.next_pointer_at, 2 + 2 * 12);
        assert_eq!(ifd.bytes.len(), 2 + 24 + 4 + 48);
        // external offset of the tiepoint entry
        let off = u32::from_le_bytes(ifd.bytes[2 + 12 + 8..2 + 12 + 12].try_into().unwrap());
        assert_eq!(off, 1000 + 30);
    }

    #[test]
    fn test_classic_offset_overflow() {
        let mut entries = BTreeMap::new();
        entries.insert(tag::MODEL_TIEPOINT, TagValue::Double(vec![0.0; 6]));
        assert!(encode_ifd(&entries, u64::from(u32::MAX), false).is_none());
        assert!(encode_ifd(&entries, u64::from(u32::MAX), true).is_some());
    }

    #[test]
    fn test_georeference_epsg_and_bounds() {
        let geo = GeoReference::north_up(150_000.0, 170_000.0, 0.4, 0.4, 31370);
        assert_eq!(geo.epsg(), Some(31370));
        assert_eq!(geo.crs(), Some(Crs::BelgianLambert72));
        let b = geo.bounds(1000, 500);
        assert_eq!(b.min_x, 150_000.0);
        assert_eq!(b.max_y, 170_000.0);
        assert!((b.max_x - 150_400.0).abs() < 1e-9);
        assert!((b.min_y - 169_800.0).abs() < 1e-9);
    }

    #[test]
    fn test_alignment() {
        let a = GeoReference::north_up(0.0, 10.0, 1.0, 1.0, 3857);
        let b = GeoReference::north_up(0.0, 10.0, 1.0, 1.0, 3857);
        let c = GeoReference::north_up(0.5, 10.0, 1.0, 1.0, 3857);
        assert!(a.aligned_with(&b));
        assert!(!a.aligned_with(&c));
    }

    #[test]
    fn test_gdal_metadata_parse_inverse() {
        let items = vec![
            ("LAYER_TYPE".to_string(), "NDVI".to_string()),
            ("FORMULA".to_string(), "(NIR - Red) / (NIR + Red)".to_string()),
            ("ENCODING".to_string(), "a < b & c".to_string()),
        ];
        let xml = gdal_metadata_xml(&items);
        assert!(xml.contains("a &lt; b &amp; c"));
        assert_eq!(parse_gdal_metadata(&xml), items);
    }
}
