//! PNG quick-look rendering of a derived layer's coarsest overview.

use std::path::Path;

use image::{Rgba, RgbaImage};

use super::error::RasterError;
use super::quantize::{MAX_CODE, NODATA};
use super::reader::RasterReader;
use super::window::Window;

/// Colour stops from low (blue) through neutral (pale yellow) to high (red).
const RAMP: [(f32, [u8; 3]); 5] = [
    (0.0, [49, 54, 149]),
    (0.25, [116, 173, 209]),
    (0.5, [255, 255, 191]),
    (0.75, [244, 109, 67]),
    (1.0, [165, 0, 38]),
];

fn ramp_colour(code: u8) -> Rgba<u8> {
    if code == NODATA {
        return Rgba([0, 0, 0, 0]);
    }
    let t = f32::from(code.min(MAX_CODE)) / f32::from(MAX_CODE);
    for pair in RAMP.windows(2) {
        let (t0, c0) = pair[0];
        let (t1, c1) = pair[1];
        if t <= t1 {
            let f = (t - t0) / (t1 - t0);
            let mix = |a: u8, b: u8| (f32::from(a) + (f32::from(b) - f32::from(a)) * f).round() as u8;
            return Rgba([mix(c0[0], c1[0]), mix(c0[1], c1[1]), mix(c0[2], c1[2]), 255]);
        }
    }
    let [r, g, b] = RAMP[RAMP.len() - 1].1;
    Rgba([r, g, b, 255])
}

/// Renders the coarsest level of `input` to a PNG at `output`.
///
/// Returns the rendered dimensions.
pub fn render_preview(input: &Path, output: &Path) -> Result<(u32, u32), RasterError> {
    let mut reader = RasterReader::open(input)?;
    reader.select_level(reader.level_count() - 1)?;
    let (w, h) = (reader.width(), reader.height());
    let band = reader.read_window(&[0], Window::full(w, h))?;

    let image = RgbaImage::from_fn(w, h, |x, y| {
        let sample = band[0][(y * w + x) as usize];
        ramp_colour(sample.clamp(0.0, 255.0) as u8)
    });
    image
        .save_with_format(output, image::ImageFormat::Png)
        .map_err(|e| match e {
            image::ImageError::IoError(io) => RasterError::io(output, io),
            other => RasterError::malformed(output, other.to_string()),
        })?;
    Ok((w, h))
}
