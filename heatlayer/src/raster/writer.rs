//! Tiled, compressed, overview-carrying GeoTIFF writer.
//!
//! Output is single-band `u8` with `block_size` square tiles, Deflate
//! compression and horizontal differencing. Full-resolution tiles are
//! streamed as windows arrive; overview tiles are then built as a
//! cascade, each level read back tile by tile from the one before.
//!
//! Everything is written to `<target>.partial` and renamed into place
//! by [`CogWriter::finish`]. Dropping an unfinished writer removes the
//! partial file.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{GrayImage, Luma};
use tracing::{debug, warn};

use super::error::RasterError;
use super::overview::downsample_into;
use super::quantize::NODATA;
use super::tiff::{
    compression, encode_ifd, gdal_metadata_xml, patch_pointer, tag, GeoReference, TagValue,
    PREDICTOR_HORIZONTAL, SAMPLE_FORMAT_UINT,
};
use super::window::Window;

/// Classic TIFF addresses at most 4 GiB; switch to BigTIFF well before.
const CLASSIC_LIMIT: u64 = 3_900_000_000;

/// Output layout options.
#[derive(Debug, Clone)]
pub struct CogOptions {
    pub block_size: u32,
    pub overview_levels: u8,
    pub geo: Option<GeoReference>,
    pub metadata: Vec<(String, String)>,
}

impl Default for CogOptions {
    fn default() -> Self {
        Self {
            block_size: 512,
            overview_levels: 5,
            geo: None,
            metadata: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct LevelTiles {
    width: u32,
    height: u32,
    across: u32,
    down: u32,
    offsets: Vec<u64>,
    counts: Vec<u64>,
}

impl LevelTiles {
    fn new(width: u32, height: u32, block: u32) -> Self {
        let across = width.div_ceil(block);
        let down = height.div_ceil(block);
        let n = across as usize * down as usize;
        Self {
            width,
            height,
            across,
            down,
            offsets: vec![0; n],
            counts: vec![0; n],
        }
    }

    fn index(&self, tx: u32, ty: u32) -> usize {
        (ty * self.across + tx) as usize
    }

    fn missing(&self) -> usize {
        self.counts.iter().filter(|&&c| c == 0).count()
    }
}

/// Path of the in-progress file for `target`.
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}

/// Streaming writer for one output raster.
#[derive(Debug)]
pub struct CogWriter {
    target: PathBuf,
    partial: PathBuf,
    file: File,
    big: bool,
    block: u32,
    levels: Vec<LevelTiles>,
    cursor: u64,
    options: CogOptions,
    finished: bool,
}

impl CogWriter {
    pub fn create(
        target: impl AsRef<Path>,
        width: u32,
        height: u32,
        options: CogOptions,
    ) -> Result<Self, RasterError> {
        let target = target.as_ref().to_path_buf();
        let block = options.block_size;
        if width == 0 || height == 0 {
            return Err(RasterError::InvalidTiling(format!(
                "output has zero extent ({}x{})",
                width, height
            )));
        }
        if block == 0 || block % 16 != 0 {
            return Err(RasterError::InvalidTiling(format!(
                "block size {} is not a positive multiple of 16",
                block
            )));
        }

        let mut levels = vec![LevelTiles::new(width, height, block)];
        for _ in 0..options.overview_levels {
            let prev = &levels[levels.len() - 1];
            levels.push(LevelTiles::new(
                prev.width.div_ceil(2),
                prev.height.div_ceil(2),
                block,
            ));
        }
        let uncompressed: u64 = levels
            .iter()
            .map(|l| u64::from(l.across) * u64::from(l.down) * u64::from(block) * u64::from(block))
            .sum();
        let big = uncompressed > CLASSIC_LIMIT;

        let partial = partial_path(&target);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&partial)
            .map_err(|e| RasterError::io(&partial, e))?;

        let header: Vec<u8> = if big {
            let mut h = vec![b'I', b'I'];
            h.extend_from_slice(&43u16.to_le_bytes());
            h.extend_from_slice(&8u16.to_le_bytes());
            h.extend_from_slice(&0u16.to_le_bytes());
            h.extend_from_slice(&0u64.to_le_bytes());
            h
        } else {
            vec![b'I', b'I', 42, 0, 0, 0, 0, 0]
        };
        if let Err(e) = file.write_all(&header) {
            let _ = fs::remove_file(&partial);
            return Err(RasterError::io(&partial, e));
        }

        debug!(
            target = %target.display(),
            width,
            height,
            bigtiff = big,
            levels = levels.len(),
            "Created raster writer"
        );

        Ok(Self {
            target,
            partial,
            file,
            big,
            block,
            levels,
            cursor: header.len() as u64,
            options,
            finished: false,
        })
    }

    pub fn is_bigtiff(&self) -> bool {
        self.big
    }

    /// Writes one window of quantized codes.
    ///
    /// The window must start on a block boundary and span whole blocks
    /// except where it reaches the raster edge.
    pub fn write_window(&mut self, window: Window, data: &[u8]) -> Result<(), RasterError> {
        let base = &self.levels[0];
        let (width, height, block) = (base.width, base.height, self.block);
        if !window.fits(width, height) {
            return Err(RasterError::WindowOutOfBounds {
                window,
                width,
                height,
            });
        }
        let aligned = window.col_off % block == 0
            && window.row_off % block == 0
            && (window.width % block == 0 || window.col_end() == width)
            && (window.height % block == 0 || window.row_end() == height);
        if !aligned {
            return Err(RasterError::InvalidTiling(format!(
                "window {} is not aligned to {}px blocks",
                window, block
            )));
        }
        if data.len() != window.pixel_count() {
            return Err(RasterError::InvalidTiling(format!(
                "window {} given {} samples",
                window,
                data.len()
            )));
        }

        for ty in window.row_off / block..window.row_end().div_ceil(block) {
            for tx in window.col_off / block..window.col_end().div_ceil(block) {
                let (x0, y0) = (tx * block, ty * block);
                let cols = block.min(width - x0) as usize;
                let rows = block.min(height - y0);
                let mut tile = GrayImage::from_pixel(block, block, Luma([NODATA]));
                {
                    let buf: &mut [u8] = &mut tile;
                    for r in 0..rows {
                        let src = ((y0 + r - window.row_off) * window.width + (x0 - window.col_off))
                            as usize;
                        let dst = (r * block) as usize;
                        buf[dst..dst + cols].copy_from_slice(&data[src..src + cols]);
                    }
                }
                self.store_tile(0, tx, ty, &tile)?;
            }
        }
        Ok(())
    }

    /// Builds overviews, writes directories and renames into place.
    pub fn finish(mut self) -> Result<PathBuf, RasterError> {
        let missing = self.levels[0].missing();
        if missing > 0 {
            return Err(RasterError::InvalidTiling(format!(
                "{} full-resolution tiles were never written",
                missing
            )));
        }
        for level in 1..self.levels.len() {
            self.build_overview(level)?;
        }
        self.write_directories()?;

        let partial = self.partial.clone();
        self.file.sync_all().map_err(|e| RasterError::io(&partial, e))?;
        fs::rename(&self.partial, &self.target).map_err(|e| RasterError::io(&partial, e))?;
        self.finished = true;
        debug!(target = %self.target.display(), bytes = self.cursor, "Raster committed");
        Ok(self.target.clone())
    }

    fn build_overview(&mut self, level: usize) -> Result<(), RasterError> {
        let half = self.block / 2;
        let (across, down) = (self.levels[level].across, self.levels[level].down);
        let (prev_across, prev_down) = (self.levels[level - 1].across, self.levels[level - 1].down);
        for ty in 0..down {
            for tx in 0..across {
                let mut out = GrayImage::from_pixel(self.block, self.block, Luma([NODATA]));
                for qy in 0..2 {
                    for qx in 0..2 {
                        let (sx, sy) = (tx * 2 + qx, ty * 2 + qy);
                        if sx >= prev_across || sy >= prev_down {
                            continue;
                        }
                        let source = self.load_tile(level - 1, sx, sy)?;
                        downsample_into(&source, &mut out, qx * half, qy * half);
                    }
                }
                self.store_tile(level, tx, ty, &out)?;
            }
        }
        Ok(())
    }

    fn store_tile(&mut self, level: usize, tx: u32, ty: u32, tile: &GrayImage) -> Result<(), RasterError> {
        let partial = &self.partial;
        let encoded = encode_tile(tile.as_raw(), self.block).map_err(|e| RasterError::io(partial, e))?;
        let index = self.levels[level].index(tx, ty);
        if self.levels[level].counts[index] != 0 {
            return Err(RasterError::InvalidTiling(format!(
                "tile ({}, {}) of level {} written twice",
                tx, ty, level
            )));
        }
        self.file
            .seek(SeekFrom::Start(self.cursor))
            .and_then(|_| self.file.write_all(&encoded))
            .map_err(|e| RasterError::io(partial, e))?;
        let lvl = &mut self.levels[level];
        lvl.offsets[index] = self.cursor;
        lvl.counts[index] = encoded.len() as u64;
        self.cursor += encoded.len() as u64;
        Ok(())
    }

    fn load_tile(&mut self, level: usize, tx: u32, ty: u32) -> Result<GrayImage, RasterError> {
        let lvl = &self.levels[level];
        let index = lvl.index(tx, ty);
        let mut raw = vec![0u8; lvl.counts[index] as usize];
        self.file
            .seek(SeekFrom::Start(lvl.offsets[index]))
            .and_then(|_| self.file.read_exact(&mut raw))
            .map_err(|e| RasterError::io(&self.partial, e))?;
        decode_tile(&raw, self.block).ok_or_else(|| {
            RasterError::malformed(&self.partial, format!("tile ({}, {}) of level {} unreadable", tx, ty, level))
        })
    }

    fn level_entries(&self, level: usize) -> BTreeMap<u16, TagValue> {
        let lvl = &self.levels[level];
        let mut entries = BTreeMap::new();
        entries.insert(tag::NEW_SUBFILE_TYPE, TagValue::Long(vec![u32::from(level > 0)]));
        entries.insert(tag::IMAGE_WIDTH, TagValue::Long(vec![lvl.width]));
        entries.insert(tag::IMAGE_LENGTH, TagValue::Long(vec![lvl.height]));
        entries.insert(tag::BITS_PER_SAMPLE, TagValue::Short(vec![8]));
        entries.insert(tag::COMPRESSION, TagValue::Short(vec![compression::DEFLATE]));
        entries.insert(tag::PHOTOMETRIC, TagValue::Short(vec![1]));
        entries.insert(tag::SAMPLES_PER_PIXEL, TagValue::Short(vec![1]));
        entries.insert(tag::PLANAR_CONFIG, TagValue::Short(vec![1]));
        entries.insert(tag::PREDICTOR, TagValue::Short(vec![PREDICTOR_HORIZONTAL]));
        entries.insert(tag::TILE_WIDTH, TagValue::Long(vec![self.block]));
        entries.insert(tag::TILE_LENGTH, TagValue::Long(vec![self.block]));
        entries.insert(tag::SAMPLE_FORMAT, TagValue::Short(vec![SAMPLE_FORMAT_UINT]));
        entries.insert(tag::GDAL_NODATA, TagValue::Ascii(NODATA.to_string()));
        if self.big {
            entries.insert(tag::TILE_OFFSETS, TagValue::Long8(lvl.offsets.clone()));
            entries.insert(tag::TILE_BYTE_COUNTS, TagValue::Long8(lvl.counts.clone()));
        } else {
            // CLASSIC_LIMIT keeps every offset below 4 GiB
            entries.insert(
                tag::TILE_OFFSETS,
                TagValue::Long(lvl.offsets.iter().map(|&o| o as u32).collect()),
            );
            entries.insert(
                tag::TILE_BYTE_COUNTS,
                TagValue::Long(lvl.counts.iter().map(|&c| c as u32).collect()),
            );
        }
        if level == 0 {
            if let Some(geo) = &self.options.geo {
                geo.tags(&mut entries);
            }
            if !self.options.metadata.is_empty() {
                entries.insert(
                    tag::GDAL_METADATA,
                    TagValue::Ascii(gdal_metadata_xml(&self.options.metadata)),
                );
            }
        }
        entries
    }

    fn write_directories(&mut self) -> Result<(), RasterError> {
        let overflow = || RasterError::InvalidTiling("output exceeds classic TIFF addressing".into());
        if !self.big && self.cursor > CLASSIC_LIMIT {
            warn!(bytes = self.cursor, "Compressed output larger than classic TIFF limit");
            return Err(overflow());
        }

        let mut position = self.cursor + self.cursor % 2;
        let mut placed = Vec::with_capacity(self.levels.len());
        for level in 0..self.levels.len() {
            let ifd = encode_ifd(&self.level_entries(level), position, self.big).ok_or_else(overflow)?;
            let len = ifd.bytes.len() as u64;
            placed.push((position, ifd));
            position += len + len % 2;
        }
        for i in 0..placed.len().saturating_sub(1) {
            let next = placed[i + 1].0;
            let at = placed[i].1.next_pointer_at;
            patch_pointer(&mut placed[i].1.bytes, at, next, self.big).ok_or_else(overflow)?;
        }

        let mut header_pointer = vec![0u8; 8];
        patch_pointer(&mut header_pointer, 0, placed[0].0, self.big).ok_or_else(overflow)?;
        let pointer_at = if self.big { 8 } else { 4 };
        let pointer_len = if self.big { 8 } else { 4 };

        let partial = self.partial.clone();
        let io = |e| RasterError::io(&partial, e);
        for (offset, ifd) in &placed {
            self.file.seek(SeekFrom::Start(*offset)).map_err(io)?;
            self.file.write_all(&ifd.bytes).map_err(io)?;
        }
        self.file.seek(SeekFrom::Start(pointer_at)).map_err(io)?;
        self.file.write_all(&header_pointer[..pointer_len]).map_err(io)?;
        self.file.flush().map_err(io)?;
        self.cursor = position;
        Ok(())
    }
}

impl Drop for CogWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.partial);
        }
    }
}

/// Applies horizontal differencing and Deflate to one tile.
fn encode_tile(pixels: &[u8], block: u32) -> std::io::Result<Vec<u8>> {
    let mut diffed = pixels.to_vec();
    for row in diffed.chunks_exact_mut(block as usize) {
        for i in (1..row.len()).rev() {
            row[i] = row[i].wrapping_sub(row[i - 1]);
        }
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&diffed)?;
    encoder.finish()
}

/// Inverse of [`encode_tile`].
fn decode_tile(bytes: &[u8], block: u32) -> Option<GrayImage> {
    let mut pixels = Vec::with_capacity((block * block) as usize);
    ZlibDecoder::new(bytes).read_to_end(&mut pixels).ok()?;
    for row in pixels.chunks_exact_mut(block as usize) {
        for i in 1..row.len() {
            row[i] = row[i].wrapping_add(row[i - 1]);
        }
    }
    GrayImage::from_raw(block, block, pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::reader::RasterReader;
    use tempfile::TempDir;

    fn options(block: u32, levels: u8) -> CogOptions {
        CogOptions {
            block_size: block,
            overview_levels: levels,
            ..Default::default()
        }
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/data/processed/ndvi.tif")),
            PathBuf::from("/data/processed/ndvi.tif.partial")
        );
    }

    #[test]
    fn test_tile_codec_inverts() {
        let pixels: Vec<u8> = (0..32 * 32).map(|i| (i * 7 % 255) as u8).collect();
        let encoded = encode_tile(&pixels, 32).unwrap();
        let decoded = decode_tile(&encoded, 32).unwrap();
        assert_eq!(decoded.as_raw(), &pixels);
    }

    #[test]
    fn test_writes_readable_tiled_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.tif");
        let (w, h) = (50, 40);
        let data: Vec<u8> = (0..w * h).map(|i| (i % 200) as u8).collect();

        let mut writer = CogWriter::create(&target, w, h, options(32, 2)).unwrap();
        writer.write_window(Window::full(w, h), &data).unwrap();
        assert!(partial_path(&target).exists());
        writer.finish().unwrap();
        assert!(!partial_path(&target).exists());

        let mut reader = RasterReader::open(&target).unwrap();
        assert_eq!(reader.level_count(), 3);
        let info = reader.level_info(0).unwrap().clone();
        assert!(info.tiled);
        assert_eq!(info.block_width, 32);
        assert_eq!(info.compression, compression::DEFLATE);
        assert_eq!(info.predictor, PREDICTOR_HORIZONTAL);
        assert_eq!(reader.nodata(), Some(255.0));

        let band = reader.read_window(&[0], Window::full(w, h)).unwrap();
        let expected: Vec<f32> = data.iter().map(|&v| f32::from(v)).collect();
        assert_eq!(band[0], expected);

        let l1 = reader.level_info(1).unwrap().clone();
        assert!(l1.overview);
        assert_eq!((l1.width, l1.height), (25, 20));
        let l2 = reader.level_info(2).unwrap();
        assert_eq!((l2.width, l2.height), (13, 10));
    }

    #[test]
    fn test_overview_values_average_valid_pixels() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("ov.tif");
        // left column valid, right column nodata
        let data = vec![10, NODATA, 20, NODATA];
        let mut writer = CogWriter::create(&target, 2, 2, options(16, 1)).unwrap();
        writer.write_window(Window::full(2, 2), &data).unwrap();
        writer.finish().unwrap();

        let mut reader = RasterReader::open(&target).unwrap();
        reader.select_level(1).unwrap();
        let ov = reader.read_window(&[0], Window::full(1, 1)).unwrap();
        assert_eq!(ov[0], vec![15.0]);
    }

    #[test]
    fn test_unfinished_writer_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("abandoned.tif");
        {
            let mut writer = CogWriter::create(&target, 64, 64, options(32, 1)).unwrap();
            writer.write_window(Window::new(0, 0, 32, 32), &[1; 32 * 32]).unwrap();
        }
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[test]
    fn test_finish_requires_every_tile() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("holes.tif");
        let mut writer = CogWriter::create(&target, 64, 32, options(32, 0)).unwrap();
        writer.write_window(Window::new(0, 0, 32, 32), &[1; 32 * 32]).unwrap();
        assert!(matches!(writer.finish(), Err(RasterError::InvalidTiling(_))));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[test]
    fn test_unaligned_window_rejected() {
        let dir = TempDir::new().unwrap();
        let mut writer = CogWriter::create(dir.path().join("a.tif"), 64, 64, options(32, 0)).unwrap();
        let err = writer.write_window(Window::new(16, 0, 32, 32), &[0; 32 * 32]);
        assert!(matches!(err, Err(RasterError::InvalidTiling(_))));
    }

    #[test]
    fn test_metadata_and_georeference_written() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("meta.tif");
        let geo = GeoReference::north_up(4.3, 50.9, 0.001, 0.001, 4326);
        let opts = CogOptions {
            block_size: 16,
            overview_levels: 1,
            geo: Some(geo.clone()),
            metadata: vec![("LAYER_TYPE".into(), "NDVI".into())],
        };
        let mut writer = CogWriter::create(&target, 16, 16, opts).unwrap();
        writer.write_window(Window::full(16, 16), &[127; 256]).unwrap();
        writer.finish().unwrap();

        let reader = RasterReader::open(&target).unwrap();
        assert_eq!(reader.geo_reference(), Some(&geo));
        assert_eq!(reader.metadata_item("LAYER_TYPE").as_deref(), Some("NDVI"));
    }
}
