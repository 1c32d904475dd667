//! Per-pixel transforms and the windowed engine that applies them.
//!
//! The engine walks the output as a grid of windows, reads only the
//! window from each input, applies the transform per pixel and streams
//! the quantized result into a [`CogWriter`]. Peak memory is bounded by
//! the window size, not the raster size, and the output does not depend
//! on the window size.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::error::RasterError;
use super::quantize::{ValueDomain, NODATA};
use super::reader::RasterReader;
use super::window::WindowGrid;
use super::writer::{CogOptions, CogWriter};

/// Windows between progress log lines.
const PROGRESS_EVERY: usize = 100;

/// A pure function from input samples to one output value.
pub trait PixelTransform: Send + Sync {
    /// Short name, also written as the LAYER_TYPE metadata item.
    fn name(&self) -> &str;

    /// Value domain of the output.
    fn domain(&self) -> ValueDomain;

    /// Number of input bands consumed per pixel.
    fn arity(&self) -> usize;

    /// Computes one output value. `None` or a non-finite value marks the
    /// pixel as nodata.
    fn apply(&self, inputs: &[f32]) -> Option<f32>;

    /// Descriptive metadata items for the output raster.
    fn metadata(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// `(a - b) / (a + b)`, undefined where `a + b == 0` or the quotient
/// overflows.
#[derive(Debug, Clone)]
pub struct NormalizedDifference {
    name: &'static str,
    formula: &'static str,
}

impl NormalizedDifference {
    /// Vegetation index over (NIR, red).
    pub fn ndvi() -> Self {
        Self {
            name: "NDVI",
            formula: "(NIR - Red) / (NIR + Red)",
        }
    }

    /// Water index over (green, NIR).
    pub fn ndwi() -> Self {
        Self {
            name: "NDWI",
            formula: "(Green - NIR) / (Green + NIR)",
        }
    }
}

impl PixelTransform for NormalizedDifference {
    fn name(&self) -> &str {
        self.name
    }

    fn domain(&self) -> ValueDomain {
        ValueDomain::Signed
    }

    fn arity(&self) -> usize {
        2
    }

    fn apply(&self, inputs: &[f32]) -> Option<f32> {
        let (a, b) = (inputs[0], inputs[1]);
        let sum = a + b;
        if sum == 0.0 {
            return None;
        }
        let ratio = (a - b) / sum;
        ratio.is_finite().then_some(ratio)
    }

    fn metadata(&self) -> Vec<(String, String)> {
        vec![
            ("FORMULA".into(), self.formula.into()),
            ("VALUE_RANGE".into(), "-1 to 1".into()),
        ]
    }
}

/// A model mapping vegetation index to heat risk.
pub trait HeatModel: Send + Sync {
    fn version(&self) -> &str;
    fn formula(&self) -> &str;
    fn predict(&self, ndvi: f32) -> f32;
}

/// Less vegetation means more heat: `clip(1 - (ndvi + 1) / 2, 0, 1)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderModel;

impl HeatModel for PlaceholderModel {
    fn version(&self) -> &str {
        "placeholder_v1"
    }

    fn formula(&self) -> &str {
        "heat = clip(1 - (ndvi + 1) / 2, 0, 1)"
    }

    fn predict(&self, ndvi: f32) -> f32 {
        (1.0 - (ndvi + 1.0) / 2.0).clamp(0.0, 1.0)
    }
}

/// Heat-risk prediction driven by a [`HeatModel`].
#[derive(Clone)]
pub struct HeatRisk {
    model: Arc<dyn HeatModel>,
}

impl HeatRisk {
    pub fn new(model: Arc<dyn HeatModel>) -> Self {
        Self { model }
    }

    pub fn model_version(&self) -> &str {
        self.model.version()
    }
}

impl std::fmt::Debug for HeatRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeatRisk")
            .field("model", &self.model.version())
            .finish()
    }
}

impl PixelTransform for HeatRisk {
    fn name(&self) -> &str {
        "UHI_PREDICTION"
    }

    fn domain(&self) -> ValueDomain {
        ValueDomain::Unit
    }

    fn arity(&self) -> usize {
        1
    }

    fn apply(&self, inputs: &[f32]) -> Option<f32> {
        Some(self.model.predict(inputs[0]))
    }

    fn metadata(&self) -> Vec<(String, String)> {
        vec![
            ("MODEL_VERSION".into(), self.model.version().into()),
            ("FORMULA".into(), self.model.formula().into()),
            ("VALUE_RANGE".into(), "0 (cool) to 1 (hot)".into()),
        ]
    }
}

/// How samples of an input band become transform inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDecoding {
    /// Sample value used as-is; the file's nodata value and non-finite
    /// samples mark gaps
    Raw,
    /// 8-bit quantized layer decoded in the given domain
    Encoded(ValueDomain),
}

impl SampleDecoding {
    /// Decoding for a derived index layer: quantized when 8-bit, raw otherwise.
    pub fn for_index_layer(reader: &RasterReader) -> Self {
        if reader.bits_per_sample() == 8 {
            SampleDecoding::Encoded(ValueDomain::Signed)
        } else {
            SampleDecoding::Raw
        }
    }

    fn decode(self, sample: f32, nodata: Option<f64>) -> Option<f32> {
        match self {
            SampleDecoding::Raw => {
                if !sample.is_finite() || nodata.is_some_and(|n| f64::from(sample) == n) {
                    None
                } else {
                    Some(sample)
                }
            }
            SampleDecoding::Encoded(domain) => domain.decode(sample as u8),
        }
    }
}

/// One band of one input file.
#[derive(Debug, Clone)]
pub struct InputBand {
    pub path: PathBuf,
    /// Zero-based band index
    pub band: usize,
    pub decoding: SampleDecoding,
}

impl InputBand {
    pub fn raw(path: impl Into<PathBuf>, band: usize) -> Self {
        Self {
            path: path.into(),
            band,
            decoding: SampleDecoding::Raw,
        }
    }

    pub fn encoded(path: impl Into<PathBuf>, band: usize, domain: ValueDomain) -> Self {
        Self {
            path: path.into(),
            band,
            decoding: SampleDecoding::Encoded(domain),
        }
    }
}

/// Window, block, and overview layout of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tiling {
    pub window_size: u32,
    pub block_size: u32,
    pub overview_levels: u8,
}

impl Default for Tiling {
    fn default() -> Self {
        Self {
            window_size: 2048,
            block_size: 512,
            overview_levels: 5,
        }
    }
}

/// Everything needed to produce one derived raster.
pub struct TransformRequest<'a> {
    pub inputs: Vec<InputBand>,
    pub output: PathBuf,
    pub transform: &'a dyn PixelTransform,
    pub tiling: Tiling,
    /// Extra metadata items, e.g. source paths
    pub metadata: Vec<(String, String)>,
}

/// Outcome of a completed transform.
#[derive(Debug, Clone, Serialize)]
pub struct TransformSummary {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub windows: usize,
    pub nodata_pixels: u64,
    pub overview_levels: u8,
}

/// Fails unless all readers share extent and georeferencing.
pub fn check_coregistered(readers: &[&RasterReader]) -> Result<(), RasterError> {
    let Some(first) = readers.first() else {
        return Ok(());
    };
    for other in &readers[1..] {
        if (other.width(), other.height()) != (first.width(), first.height()) {
            return Err(RasterError::GeometryMismatch(format!(
                "{} is {}x{} but {} is {}x{}",
                first.path().display(),
                first.width(),
                first.height(),
                other.path().display(),
                other.width(),
                other.height()
            )));
        }
        let aligned = match (first.geo_reference(), other.geo_reference()) {
            (Some(a), Some(b)) => a.aligned_with(b),
            (None, None) => true,
            _ => false,
        };
        if !aligned {
            return Err(RasterError::GeometryMismatch(format!(
                "{} and {} have different georeferencing",
                first.path().display(),
                other.path().display()
            )));
        }
    }
    Ok(())
}

/// Applies a transform window by window and commits the output.
pub fn run_transform(request: TransformRequest<'_>) -> Result<TransformSummary, RasterError> {
    let transform = request.transform;
    if request.inputs.len() != transform.arity() {
        return Err(RasterError::Arity {
            name: transform.name().to_string(),
            expected: transform.arity(),
            got: request.inputs.len(),
        });
    }

    // One reader per distinct file; `slots` maps each input to (reader, band position).
    let mut sources: Vec<(RasterReader, Vec<usize>)> = Vec::new();
    let mut slots = Vec::with_capacity(request.inputs.len());
    for input in &request.inputs {
        let source = match sources.iter().position(|(r, _)| r.path() == input.path) {
            Some(i) => i,
            None => {
                sources.push((RasterReader::open(&input.path)?, Vec::new()));
                sources.len() - 1
            }
        };
        let bands = &mut sources[source].1;
        let position = match bands.iter().position(|&b| b == input.band) {
            Some(p) => p,
            None => {
                bands.push(input.band);
                bands.len() - 1
            }
        };
        slots.push((source, position));
    }
    for (reader, bands) in &sources {
        if let Some(&band) = bands.iter().find(|&&b| b >= reader.band_count()) {
            return Err(RasterError::BandOutOfRange {
                band,
                count: reader.band_count(),
            });
        }
    }
    let readers: Vec<&RasterReader> = sources.iter().map(|(r, _)| r).collect();
    check_coregistered(&readers)?;

    let (width, height) = (sources[0].0.width(), sources[0].0.height());
    let grid = WindowGrid::new(
        width,
        height,
        request.tiling.window_size,
        request.tiling.block_size,
    )?;
    let domain = transform.domain();

    let mut metadata = vec![("LAYER_TYPE".to_string(), transform.name().to_string())];
    metadata.extend(transform.metadata());
    metadata.push(("ENCODING".into(), domain.encoding_description().into()));
    metadata.push(("DECODE_FORMULA".into(), domain.decode_formula().into()));
    metadata.extend(request.metadata);

    let mut writer = CogWriter::create(
        &request.output,
        width,
        height,
        CogOptions {
            block_size: request.tiling.block_size,
            overview_levels: request.tiling.overview_levels,
            geo: sources[0].0.geo_reference().cloned(),
            metadata,
        },
    )?;

    info!(
        transform = transform.name(),
        output = %request.output.display(),
        width,
        height,
        windows = grid.len(),
        bigtiff = writer.is_bigtiff(),
        "Starting windowed transform"
    );

    let nodata: Vec<Option<f64>> = sources.iter().map(|(r, _)| r.nodata()).collect();
    let mut values = vec![0f32; request.inputs.len()];
    let mut nodata_pixels = 0u64;
    let total = grid.len();

    for (i, window) in grid.windows().enumerate() {
        let blocks = sources
            .iter_mut()
            .map(|(reader, bands)| reader.read_window(bands, window))
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = vec![NODATA; window.pixel_count()];
        'pixel: for (p, code) in out.iter_mut().enumerate() {
            for (k, input) in request.inputs.iter().enumerate() {
                let (source, position) = slots[k];
                match input.decoding.decode(blocks[source][position][p], nodata[source]) {
                    Some(v) => values[k] = v,
                    None => {
                        nodata_pixels += 1;
                        continue 'pixel;
                    }
                }
            }
            match transform.apply(&values) {
                Some(v) if v.is_finite() => *code = domain.encode(v)?,
                _ => nodata_pixels += 1,
            }
        }
        writer.write_window(window, &out)?;

        if (i + 1) % PROGRESS_EVERY == 0 {
            info!(
                transform = transform.name(),
                done = i + 1,
                total,
                "Transform progress"
            );
        }
    }

    let output = writer.finish()?;
    info!(
        transform = transform.name(),
        output = %output.display(),
        nodata_pixels,
        "Transform complete"
    );

    Ok(TransformSummary {
        output,
        width,
        height,
        windows: total,
        nodata_pixels,
        overview_levels: request.tiling.overview_levels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndvi_values() {
        let ndvi = NormalizedDifference::ndvi();
        assert_eq!(ndvi.apply(&[200.0, 100.0]), Some(1.0 / 3.0));
        assert_eq!(ndvi.apply(&[0.0, 0.0]), None);
        assert_eq!(ndvi.apply(&[50.0, 0.0]), Some(1.0));
        // numerator overflows
        assert_eq!(ndvi.apply(&[f32::MAX, -f32::MAX / 2.0]), None);
    }

    #[test]
    fn test_ndwi_orientation() {
        // (green - nir) / (green + nir)
        let ndwi = NormalizedDifference::ndwi();
        assert_eq!(ndwi.apply(&[100.0, 300.0]), Some(-0.5));
    }

    #[test]
    fn test_placeholder_model() {
        let m = PlaceholderModel;
        assert_eq!(m.predict(-1.0), 1.0);
        assert_eq!(m.predict(1.0), 0.0);
        assert_eq!(m.predict(0.0), 0.5);
        assert_eq!(m.predict(3.0), 0.0);
    }

    #[test]
    fn test_heat_risk_metadata() {
        let heat = HeatRisk::new(Arc::new(PlaceholderModel));
        assert_eq!(heat.domain(), ValueDomain::Unit);
        assert_eq!(heat.model_version(), "placeholder_v1");
        assert!(heat
            .metadata()
            .iter()
            .any(|(k, v)| k == "MODEL_VERSION" && v == "placeholder_v1"));
    }

    #[test]
    fn test_sample_decoding() {
        assert_eq!(SampleDecoding::Raw.decode(5.0, Some(5.0)), None);
        assert_eq!(SampleDecoding::Raw.decode(6.0, Some(5.0)), Some(6.0));
        assert_eq!(SampleDecoding::Raw.decode(f32::NAN, None), None);
        assert_eq!(SampleDecoding::Raw.decode(f32::INFINITY, None), None);
        assert_eq!(SampleDecoding::Raw.decode(f32::NEG_INFINITY, Some(0.0)), None);
        let enc = SampleDecoding::Encoded(ValueDomain::Signed);
        assert_eq!(enc.decode(255.0, None), None);
        assert_eq!(enc.decode(254.0, None), Some(1.0));
    }
}
