//! Windowed GeoTIFF reader.
//!
//! Reads classic TIFF and BigTIFF in either byte order, stripped or
//! tiled, chunky or planar, with 8/16-bit unsigned or 32-bit float
//! samples. Uncompressed, Deflate and PackBits chunks are decoded.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::ZlibDecoder;

use super::error::RasterError;
use super::tiff::{
    compression, field_size, field_type, parse_gdal_metadata, tag, ByteOrder, GeoReference,
    PREDICTOR_HORIZONTAL, PREDICTOR_NONE, SAMPLE_FORMAT_FLOAT, SAMPLE_FORMAT_UINT,
};
use super::window::Window;

/// Upper bound on IFDs followed before the chain is considered corrupt.
const MAX_IFDS: usize = 64;

/// Decoded samples kept between window reads.
const CHUNK_CACHE_BYTES: usize = 256 << 20;

/// Summary of one image (full resolution or overview) in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelInfo {
    pub width: u32,
    pub height: u32,
    pub bands: usize,
    pub bits_per_sample: u16,
    pub compression: u16,
    pub predictor: u16,
    pub tiled: bool,
    pub block_width: u32,
    pub block_height: u32,
    pub overview: bool,
}

#[derive(Debug, Clone)]
struct ImageLayout {
    info: LevelInfo,
    planar: u16,
    sample_format: u16,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
    nodata: Option<f64>,
    geo: Option<GeoReference>,
    metadata: Option<String>,
}

impl ImageLayout {
    fn chunks_across(&self) -> u32 {
        self.info.width.div_ceil(self.info.block_width)
    }

    fn chunks_down(&self) -> u32 {
        self.info.height.div_ceil(self.info.block_height)
    }
}

/// Decoded chunks keyed by (level, chunk index), evicted oldest first.
///
/// A strip spans every window in its row band, so without this each
/// window along the row would inflate the same strip again.
#[derive(Debug)]
struct ChunkCache {
    budget: usize,
    bytes: usize,
    entries: HashMap<(usize, usize), Arc<[f32]>>,
    order: VecDeque<(usize, usize)>,
    decodes: usize,
}

impl ChunkCache {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            bytes: 0,
            entries: HashMap::new(),
            order: VecDeque::new(),
            decodes: 0,
        }
    }

    fn get_or_decode(
        &mut self,
        key: (usize, usize),
        decode: impl FnOnce() -> Result<Vec<f32>, RasterError>,
    ) -> Result<Arc<[f32]>, RasterError> {
        if let Some(chunk) = self.entries.get(&key) {
            return Ok(Arc::clone(chunk));
        }
        let chunk: Arc<[f32]> = decode()?.into();
        self.decodes += 1;

        let size = std::mem::size_of_val(&chunk[..]);
        if size > self.budget {
            return Ok(chunk);
        }
        while self.bytes + size > self.budget {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&oldest) {
                self.bytes -= std::mem::size_of_val(&evicted[..]);
            }
        }
        self.entries.insert(key, Arc::clone(&chunk));
        self.order.push_back(key);
        self.bytes += size;
        Ok(chunk)
    }
}

/// Random-access reader over a GeoTIFF file.
pub struct RasterReader {
    path: PathBuf,
    file: File,
    order: ByteOrder,
    levels: Vec<ImageLayout>,
    current: usize,
    chunks: ChunkCache,
}

impl std::fmt::Debug for RasterReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterReader")
            .field("path", &self.path)
            .field("levels", &self.levels.len())
            .field("current", &self.current)
            .field("cached_chunks", &self.chunks.entries.len())
            .finish()
    }
}

impl RasterReader {
    /// Opens a file and parses every image directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RasterError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|e| RasterError::io(&path, e))?;

        let mut header = [0u8; 16];
        read_at(&mut file, &path, 0, &mut header[..8])?;
        let order = match &header[0..2] {
            b"II" => ByteOrder::Little,
            b"MM" => ByteOrder::Big,
            _ => return Err(RasterError::malformed(&path, "missing byte-order mark")),
        };
        let (big, first_ifd) = match order.u16(&header[2..4]) {
            42 => (false, u64::from(order.u32(&header[4..8]))),
            43 => {
                read_at(&mut file, &path, 0, &mut header)?;
                if order.u16(&header[4..6]) != 8 {
                    return Err(RasterError::malformed(&path, "BigTIFF offset size is not 8"));
                }
                (true, order.u64(&header[8..16]))
            }
            v => {
                return Err(RasterError::malformed(&path, format!("unknown TIFF version {}", v)))
            }
        };

        let mut parser = IfdParser {
            file: &mut file,
            path: &path,
            order,
            big,
        };
        let mut levels = Vec::new();
        let mut next = first_ifd;
        let mut seen = 0;
        while next != 0 {
            if seen == MAX_IFDS {
                return Err(RasterError::malformed(&path, "IFD chain does not terminate"));
            }
            let (entries, following) = parser.read_ifd(next)?;
            let subfile = parser.first_integer(&entries, tag::NEW_SUBFILE_TYPE)?.unwrap_or(0);
            // bit 2 marks transparency masks
            if subfile & 4 == 0 {
                levels.push(parser.layout(&entries, subfile & 1 == 1)?);
            }
            next = following;
            seen += 1;
        }
        if levels.is_empty() {
            return Err(RasterError::malformed(&path, "no image directories"));
        }

        Ok(Self {
            path,
            file,
            order,
            levels,
            current: 0,
            chunks: ChunkCache::new(CHUNK_CACHE_BYTES),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Width of the selected level.
    pub fn width(&self) -> u32 {
        self.levels[self.current].info.width
    }

    /// Height of the selected level.
    pub fn height(&self) -> u32 {
        self.levels[self.current].info.height
    }

    pub fn band_count(&self) -> usize {
        self.levels[self.current].info.bands
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.levels[self.current].info.bits_per_sample
    }

    /// Nodata value of the selected level.
    pub fn nodata(&self) -> Option<f64> {
        self.levels[self.current].nodata
    }

    /// Georeferencing of the full-resolution image.
    pub fn geo_reference(&self) -> Option<&GeoReference> {
        self.levels[0].geo.as_ref()
    }

    /// Raw GDAL_METADATA document of the full-resolution image.
    pub fn metadata_xml(&self) -> Option<&str> {
        self.levels[0].metadata.as_deref()
    }

    /// Value of one GDAL_METADATA item.
    pub fn metadata_item(&self, name: &str) -> Option<String> {
        let xml = self.metadata_xml()?;
        parse_gdal_metadata(xml)
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Number of images: the full-resolution one plus overviews.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn level_info(&self, level: usize) -> Option<&LevelInfo> {
        self.levels.get(level).map(|l| &l.info)
    }

    /// Selects the image subsequent reads address.
    pub fn select_level(&mut self, level: usize) -> Result<(), RasterError> {
        if level >= self.levels.len() {
            return Err(RasterError::malformed(
                &self.path,
                format!("level {} requested, file has {}", level, self.levels.len()),
            ));
        }
        self.current = level;
        Ok(())
    }

    /// Reads `bands` (zero-based) over `window` from the selected level.
    ///
    /// Returns one row-major buffer per requested band.
    pub fn read_window(
        &mut self,
        bands: &[usize],
        window: Window,
    ) -> Result<Vec<Vec<f32>>, RasterError> {
        let level = self.current;
        let layout = &self.levels[level];
        let info = &layout.info;
        for &band in bands {
            if band >= info.bands {
                return Err(RasterError::BandOutOfRange {
                    band,
                    count: info.bands,
                });
            }
        }
        if !window.fits(info.width, info.height) {
            return Err(RasterError::WindowOutOfBounds {
                window,
                width: info.width,
                height: info.height,
            });
        }

        let mut out = vec![vec![0f32; window.pixel_count()]; bands.len()];
        let (bw, bh) = (info.block_width, info.block_height);
        let across = layout.chunks_across();
        let per_plane = (across * layout.chunks_down()) as usize;

        for cy in window.row_off / bh..=(window.row_end() - 1) / bh {
            for cx in window.col_off / bw..=(window.col_end() - 1) / bw {
                let chunk_index = (cy * across + cx) as usize;
                let x0 = cx * bw;
                let y0 = cy * bh;
                let xs = window.col_off.max(x0)..window.col_end().min(x0 + bw);
                let ys = window.row_off.max(y0)..window.row_end().min(y0 + bh);

                if layout.planar == 1 {
                    let chunk = self.chunks.get_or_decode((level, chunk_index), || {
                        decode_chunk(&mut self.file, &self.path, self.order, layout, chunk_index, cy)
                    })?;
                    let spp = info.bands;
                    for (dst, &band) in out.iter_mut().zip(bands) {
                        for y in ys.clone() {
                            for x in xs.clone() {
                                let src = ((y - y0) * bw + (x - x0)) as usize * spp + band;
                                let at = ((y - window.row_off) * window.width
                                    + (x - window.col_off)) as usize;
                                dst[at] = chunk[src];
                            }
                        }
                    }
                } else {
                    for (dst, &band) in out.iter_mut().zip(bands) {
                        let index = band * per_plane + chunk_index;
                        let chunk = self.chunks.get_or_decode((level, index), || {
                            decode_chunk(&mut self.file, &self.path, self.order, layout, index, cy)
                        })?;
                        for y in ys.clone() {
                            for x in xs.clone() {
                                let src = ((y - y0) * bw + (x - x0)) as usize;
                                let at = ((y - window.row_off) * window.width
                                    + (x - window.col_off)) as usize;
                                dst[at] = chunk[src];
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Decodes one strip or tile into samples.
///
/// `chunk_row` is the chunk's row index, used to size the final strip.
fn decode_chunk(
    file: &mut File,
    path: &Path,
    order: ByteOrder,
    layout: &ImageLayout,
    index: usize,
    chunk_row: u32,
) -> Result<Vec<f32>, RasterError> {
    let info = &layout.info;
    let spp = if layout.planar == 1 { info.bands } else { 1 };
    let rows = if info.tiled {
        info.block_height
    } else {
        info.block_height.min(info.height - chunk_row * info.block_height)
    };
    let row_samples = info.block_width as usize * spp;
    let sample_bytes = usize::from(info.bits_per_sample / 8);
    let expected = row_samples * rows as usize * sample_bytes;

    let offset = *layout
        .offsets
        .get(index)
        .ok_or_else(|| RasterError::malformed(path, format!("chunk {} has no offset", index)))?;
    let count = layout.byte_counts.get(index).copied().unwrap_or(0);
    if count == 0 {
        let fill = layout.nodata.unwrap_or(0.0) as f32;
        return Ok(vec![fill; row_samples * rows as usize]);
    }

    let mut raw = vec![0u8; count as usize];
    read_at(file, path, offset, &mut raw)?;

    let mut bytes = match info.compression {
        compression::NONE => raw,
        compression::DEFLATE | compression::DEFLATE_LEGACY => {
            let mut inflated = Vec::with_capacity(expected);
            ZlibDecoder::new(&raw[..])
                .read_to_end(&mut inflated)
                .map_err(|e| RasterError::malformed(path, format!("chunk {}: {}", index, e)))?;
            inflated
        }
        compression::PACKBITS => unpack_bits(&raw, expected),
        other => {
            return Err(RasterError::unsupported(path, format!("compression {}", other)));
        }
    };
    if bytes.len() < expected {
        return Err(RasterError::malformed(
            path,
            format!("chunk {} holds {} bytes, expected {}", index, bytes.len(), expected),
        ));
    }
    bytes.truncate(expected);

    let horizontal = layout.info.predictor == PREDICTOR_HORIZONTAL;
    let samples = match (info.bits_per_sample, layout.sample_format) {
        (8, _) => {
            if horizontal {
                for row in bytes.chunks_exact_mut(row_samples) {
                    for i in spp..row.len() {
                        row[i] = row[i].wrapping_add(row[i - spp]);
                    }
                }
            }
            bytes.into_iter().map(f32::from).collect()
        }
        (16, _) => {
            let mut values: Vec<u16> = bytes.chunks_exact(2).map(|b| order.u16(b)).collect();
            if horizontal {
                for row in values.chunks_exact_mut(row_samples) {
                    for i in spp..row.len() {
                        row[i] = row[i].wrapping_add(row[i - spp]);
                    }
                }
            }
            values.into_iter().map(f32::from).collect()
        }
        _ => bytes.chunks_exact(4).map(|b| order.f32(b)).collect(),
    };
    Ok(samples)
}

/// PackBits run-length decoding.
fn unpack_bits(input: &[u8], expected: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(expected);
    let mut i = 0;
    while i < input.len() && out.len() < expected {
        let n = input[i] as i8;
        i += 1;
        if n >= 0 {
            let len = n as usize + 1;
            let end = (i + len).min(input.len());
            out.extend_from_slice(&input[i..end]);
            i = end;
        } else if n != -128 {
            if let Some(&b) = input.get(i) {
                out.extend(std::iter::repeat(b).take((1 - n as isize) as usize));
            }
            i += 1;
        }
    }
    out
}

fn read_at(file: &mut File, path: &Path, offset: u64, buf: &mut [u8]) -> Result<(), RasterError> {
    file.seek(SeekFrom::Start(offset))
        .and_then(|_| file.read_exact(buf))
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                RasterError::malformed(path, format!("truncated at offset {}", offset))
            } else {
                RasterError::io(path, e)
            }
        })
}

#[derive(Debug, Clone)]
struct RawEntry {
    tag: u16,
    field_type: u16,
    count: u64,
    value: [u8; 8],
}

struct IfdParser<'a> {
    file: &'a mut File,
    path: &'a Path,
    order: ByteOrder,
    big: bool,
}

impl IfdParser<'_> {
    fn read_ifd(&mut self, offset: u64) -> Result<(Vec<RawEntry>, u64), RasterError> {
        let (count_size, entry_size, pointer_size) =
            if self.big { (8, 20, 8) } else { (2, 12, 4) };

        let mut count_buf = [0u8; 8];
        read_at(self.file, self.path, offset, &mut count_buf[..count_size])?;
        let count = if self.big {
            self.order.u64(&count_buf)
        } else {
            u64::from(self.order.u16(&count_buf))
        };
        if count > 4096 {
            return Err(RasterError::malformed(self.path, format!("IFD with {} entries", count)));
        }

        let mut table = vec![0u8; count as usize * entry_size + pointer_size];
        read_at(self.file, self.path, offset + count_size as u64, &mut table)?;

        let mut entries = Vec::with_capacity(count as usize);
        for raw in table.chunks_exact(entry_size).take(count as usize) {
            let mut value = [0u8; 8];
            let count = if self.big {
                value.copy_from_slice(&raw[12..20]);
                self.order.u64(&raw[4..12])
            } else {
                value[..4].copy_from_slice(&raw[8..12]);
                u64::from(self.order.u32(&raw[4..8]))
            };
            entries.push(RawEntry {
                tag: self.order.u16(&raw[0..2]),
                field_type: self.order.u16(&raw[2..4]),
                count,
                value,
            });
        }

        let pointer = &table[count as usize * entry_size..];
        let next = if self.big {
            self.order.u64(pointer)
        } else {
            u64::from(self.order.u32(pointer))
        };
        Ok((entries, next))
    }

    fn entry_bytes(&mut self, entry: &RawEntry) -> Result<Vec<u8>, RasterError> {
        let size = field_size(entry.field_type).ok_or_else(|| {
            RasterError::malformed(
                self.path,
                format!("tag {} has unknown type {}", entry.tag, entry.field_type),
            )
        })?;
        let total = (size as u64)
            .checked_mul(entry.count)
            .filter(|t| *t < 1 << 32)
            .ok_or_else(|| RasterError::malformed(self.path, format!("tag {} too large", entry.tag)))?
            as usize;
        let inline = if self.big { 8 } else { 4 };
        if total <= inline {
            return Ok(entry.value[..total].to_vec());
        }
        let offset = if self.big {
            self.order.u64(&entry.value)
        } else {
            u64::from(self.order.u32(&entry.value))
        };
        let mut buf = vec![0u8; total];
        read_at(self.file, self.path, offset, &mut buf)?;
        Ok(buf)
    }

    fn integers(&mut self, entries: &[RawEntry], tag: u16) -> Result<Option<Vec<u64>>, RasterError> {
        let Some(entry) = entries.iter().find(|e| e.tag == tag) else {
            return Ok(None);
        };
        let bytes = self.entry_bytes(entry)?;
        let order = self.order;
        let values = match entry.field_type {
            field_type::BYTE | field_type::UNDEFINED => bytes.iter().map(|&b| u64::from(b)).collect(),
            field_type::SHORT => bytes.chunks_exact(2).map(|b| u64::from(order.u16(b))).collect(),
            field_type::LONG | field_type::IFD => {
                bytes.chunks_exact(4).map(|b| u64::from(order.u32(b))).collect()
            }
            field_type::LONG8 | field_type::IFD8 => bytes.chunks_exact(8).map(|b| order.u64(b)).collect(),
            other => {
                return Err(RasterError::malformed(
                    self.path,
                    format!("tag {} has non-integer type {}", tag, other),
                ))
            }
        };
        Ok(Some(values))
    }

    fn first_integer(&mut self, entries: &[RawEntry], tag: u16) -> Result<Option<u64>, RasterError> {
        Ok(self.integers(entries, tag)?.and_then(|v| v.first().copied()))
    }

    fn doubles(&mut self, entries: &[RawEntry], tag: u16) -> Result<Option<Vec<f64>>, RasterError> {
        let Some(entry) = entries.iter().find(|e| e.tag == tag) else {
            return Ok(None);
        };
        let bytes = self.entry_bytes(entry)?;
        let order = self.order;
        let values = match entry.field_type {
            field_type::DOUBLE => bytes.chunks_exact(8).map(|b| order.f64(b)).collect(),
            field_type::FLOAT => bytes.chunks_exact(4).map(|b| f64::from(order.f32(b))).collect(),
            _ => return Ok(None),
        };
        Ok(Some(values))
    }

    fn ascii(&mut self, entries: &[RawEntry], tag: u16) -> Result<Option<String>, RasterError> {
        let Some(entry) = entries.iter().find(|e| e.tag == tag) else {
            return Ok(None);
        };
        let bytes = self.entry_bytes(entry)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(Some(text.trim_end_matches('\0').to_string()))
    }

    fn required(&mut self, entries: &[RawEntry], tag: u16) -> Result<u64, RasterError> {
        self.first_integer(entries, tag)?
            .ok_or_else(|| RasterError::malformed(self.path, format!("missing tag {}", tag)))
    }

    fn layout(&mut self, entries: &[RawEntry], overview: bool) -> Result<ImageLayout, RasterError> {
        let path = self.path;
        let width = self.required(entries, tag::IMAGE_WIDTH)? as u32;
        let height = self.required(entries, tag::IMAGE_LENGTH)? as u32;
        if width == 0 || height == 0 {
            return Err(RasterError::malformed(path, "zero image extent"));
        }
        let bands = self.first_integer(entries, tag::SAMPLES_PER_PIXEL)?.unwrap_or(1) as usize;

        let bits = self.integers(entries, tag::BITS_PER_SAMPLE)?.unwrap_or_else(|| vec![1]);
        let bits_per_sample = bits[0] as u16;
        if bits.iter().any(|&b| b != bits[0]) {
            return Err(RasterError::unsupported(path, "mixed bit depths"));
        }
        let sample_format = self
            .first_integer(entries, tag::SAMPLE_FORMAT)?
            .unwrap_or(u64::from(SAMPLE_FORMAT_UINT)) as u16;
        match (bits_per_sample, sample_format) {
            (8 | 16, SAMPLE_FORMAT_UINT) | (32, SAMPLE_FORMAT_FLOAT) => {}
            (b, f) => {
                return Err(RasterError::unsupported(
                    path,
                    format!("{}-bit samples of format {}", b, f),
                ))
            }
        }

        let compression = self
            .first_integer(entries, tag::COMPRESSION)?
            .unwrap_or(u64::from(compression::NONE)) as u16;
        let predictor = self
            .first_integer(entries, tag::PREDICTOR)?
            .unwrap_or(u64::from(PREDICTOR_NONE)) as u16;
        if predictor != PREDICTOR_NONE
            && !(predictor == PREDICTOR_HORIZONTAL && sample_format == SAMPLE_FORMAT_UINT)
        {
            return Err(RasterError::unsupported(path, format!("predictor {}", predictor)));
        }
        let planar = self.first_integer(entries, tag::PLANAR_CONFIG)?.unwrap_or(1) as u16;

        let tile_width = self.first_integer(entries, tag::TILE_WIDTH)?;
        let (tiled, block_width, block_height, offsets, byte_counts) = match tile_width {
            Some(tw) => (
                true,
                tw as u32,
                self.required(entries, tag::TILE_LENGTH)? as u32,
                self.integers(entries, tag::TILE_OFFSETS)?,
                self.integers(entries, tag::TILE_BYTE_COUNTS)?,
            ),
            None => {
                let rows = self.first_integer(entries, tag::ROWS_PER_STRIP)?.unwrap_or(u64::from(height));
                (
                    false,
                    width,
                    rows.min(u64::from(height)) as u32,
                    self.integers(entries, tag::STRIP_OFFSETS)?,
                    self.integers(entries, tag::STRIP_BYTE_COUNTS)?,
                )
            }
        };
        if block_width == 0 || block_height == 0 {
            return Err(RasterError::malformed(path, "zero block size"));
        }
        let offsets = offsets.ok_or_else(|| RasterError::malformed(path, "missing chunk offsets"))?;
        let byte_counts =
            byte_counts.ok_or_else(|| RasterError::malformed(path, "missing chunk byte counts"))?;

        let planes = if planar == 2 { bands } else { 1 };
        let expected = width.div_ceil(block_width) as usize
            * height.div_ceil(block_height) as usize
            * planes;
        if offsets.len() < expected || byte_counts.len() < expected {
            return Err(RasterError::malformed(
                path,
                format!("{} chunks declared, {} required", offsets.len(), expected),
            ));
        }

        let nodata = self
            .ascii(entries, tag::GDAL_NODATA)?
            .and_then(|s| s.trim().parse::<f64>().ok());

        let geo = match (
            self.doubles(entries, tag::MODEL_PIXEL_SCALE)?,
            self.doubles(entries, tag::MODEL_TIEPOINT)?,
        ) {
            (Some(scale), Some(tie)) if scale.len() >= 3 && tie.len() >= 6 => Some(GeoReference {
                pixel_scale: [scale[0], scale[1], scale[2]],
                tiepoint: [tie[0], tie[1], tie[2], tie[3], tie[4], tie[5]],
                geo_keys: self
                    .integers(entries, tag::GEO_KEY_DIRECTORY)?
                    .unwrap_or_default()
                    .into_iter()
                    .map(|k| k as u16)
                    .collect(),
                geo_doubles: self.doubles(entries, tag::GEO_DOUBLE_PARAMS)?.unwrap_or_default(),
                geo_ascii: self.ascii(entries, tag::GEO_ASCII_PARAMS)?,
            }),
            _ => None,
        };
        let metadata = self.ascii(entries, tag::GDAL_METADATA)?;

        Ok(ImageLayout {
            info: LevelInfo {
                width,
                height,
                bands,
                bits_per_sample,
                compression,
                predictor,
                tiled,
                block_width,
                block_height,
                overview,
            },
            planar,
            sample_format,
            offsets,
            byte_counts,
            nodata,
            geo,
            metadata,
        })
    }
}
