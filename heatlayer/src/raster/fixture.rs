//! Minimal uncompressed GeoTIFF writer for synthetic inputs.
//!
//! Produces stripped, chunky, 8-bit or float32 rasters with any number
//! of bands.
//! Used to stage raw imagery in tests and local demos.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use super::tiff::{compression, encode_ifd, patch_pointer, tag, GeoReference, TagValue, SAMPLE_FORMAT_FLOAT};

#[derive(Debug, Clone)]
enum Planes {
    Byte(Vec<Vec<u8>>),
    Float(Vec<Vec<f32>>),
}

impl Planes {
    fn lengths(&self) -> Vec<usize> {
        match self {
            Planes::Byte(p) => p.iter().map(Vec::len).collect(),
            Planes::Float(p) => p.iter().map(Vec::len).collect(),
        }
    }

    fn sample_bytes(&self) -> usize {
        match self {
            Planes::Byte(_) => 1,
            Planes::Float(_) => 4,
        }
    }

    /// Appends every band's sample at `at`, interleaved.
    fn push_pixel(&self, at: usize, buf: &mut Vec<u8>) {
        match self {
            Planes::Byte(p) => buf.extend(p.iter().map(|band| band[at])),
            Planes::Float(p) => {
                for band in p {
                    buf.extend_from_slice(&band[at].to_le_bytes());
                }
            }
        }
    }
}

/// Description of a synthetic raster.
#[derive(Debug, Clone)]
pub struct StripTiff {
    width: u32,
    height: u32,
    planes: Planes,
    rows_per_strip: u32,
    geo: Option<GeoReference>,
    nodata: Option<u8>,
}

impl StripTiff {
    /// `planes` holds one row-major buffer of `width * height` per band.
    pub fn new(width: u32, height: u32, planes: Vec<Vec<u8>>) -> Self {
        Self {
            width,
            height,
            planes: Planes::Byte(planes),
            rows_per_strip: 64,
            geo: None,
            nodata: None,
        }
    }

    /// Every band filled with one constant value.
    pub fn filled(width: u32, height: u32, values: &[u8]) -> Self {
        let len = width as usize * height as usize;
        Self::new(width, height, values.iter().map(|&v| vec![v; len]).collect())
    }

    /// Like [`StripTiff::new`] with 32-bit float samples.
    pub fn float32(width: u32, height: u32, planes: Vec<Vec<f32>>) -> Self {
        Self {
            planes: Planes::Float(planes),
            ..Self::new(width, height, Vec::new())
        }
    }

    pub fn rows_per_strip(mut self, rows: u32) -> Self {
        self.rows_per_strip = rows.max(1);
        self
    }

    pub fn geo(mut self, geo: GeoReference) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn nodata(mut self, value: u8) -> Self {
        self.nodata = Some(value);
        self
    }
}

/// Writes `layout` as a classic little-endian TIFF.
pub fn write_strip_tiff(path: &Path, layout: &StripTiff) -> io::Result<()> {
    let lengths = layout.planes.lengths();
    let bands = lengths.len();
    let pixels = layout.width as usize * layout.height as usize;
    if bands == 0 || lengths.iter().any(|&len| len != pixels) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "every band needs width * height samples",
        ));
    }

    let mut buf = vec![b'I', b'I', 42, 0, 0, 0, 0, 0];
    let sample_bytes = layout.planes.sample_bytes();
    let row_bytes = layout.width as usize * bands * sample_bytes;
    let mut offsets = Vec::new();
    let mut counts = Vec::new();
    let mut row = 0u32;
    while row < layout.height {
        let rows = layout.rows_per_strip.min(layout.height - row);
        offsets.push(buf.len() as u32);
        counts.push(rows * row_bytes as u32);
        for y in row..row + rows {
            for x in 0..layout.width {
                let at = (y * layout.width + x) as usize;
                layout.planes.push_pixel(at, &mut buf);
            }
        }
        row += rows;
    }
    if buf.len() % 2 == 1 {
        buf.push(0);
    }

    let mut entries = BTreeMap::new();
    entries.insert(tag::IMAGE_WIDTH, TagValue::Long(vec![layout.width]));
    entries.insert(tag::IMAGE_LENGTH, TagValue::Long(vec![layout.height]));
    entries.insert(tag::BITS_PER_SAMPLE, TagValue::Short(vec![8 * sample_bytes as u16; bands]));
    entries.insert(tag::COMPRESSION, TagValue::Short(vec![compression::NONE]));
    entries.insert(tag::PHOTOMETRIC, TagValue::Short(vec![if bands >= 3 { 2 } else { 1 }]));
    entries.insert(tag::STRIP_OFFSETS, TagValue::Long(offsets));
    entries.insert(tag::SAMPLES_PER_PIXEL, TagValue::Short(vec![bands as u16]));
    entries.insert(tag::ROWS_PER_STRIP, TagValue::Long(vec![layout.rows_per_strip]));
    entries.insert(tag::STRIP_BYTE_COUNTS, TagValue::Long(counts));
    entries.insert(tag::PLANAR_CONFIG, TagValue::Short(vec![1]));
    if let Planes::Float(_) = layout.planes {
        entries.insert(tag::SAMPLE_FORMAT, TagValue::Short(vec![SAMPLE_FORMAT_FLOAT; bands]));
    }
    if bands > 3 {
        entries.insert(tag::EXTRA_SAMPLES, TagValue::Short(vec![0; bands - 3]));
    }
    if let Some(geo) = &layout.geo {
        geo.tags(&mut entries);
    }
    if let Some(nodata) = layout.nodata {
        entries.insert(tag::GDAL_NODATA, TagValue::Ascii(nodata.to_string()));
    }

    let start = buf.len() as u64;
    let ifd = encode_ifd(&entries, start, false)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "raster too large"))?;
    patch_pointer(&mut buf, 4, start, false)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "raster too large"))?;
    buf.extend_from_slice(&ifd.bytes);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, buf)
}
