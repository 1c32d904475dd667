//! Nodata-aware 2x2 reduction for overview levels.

use image::{GrayImage, Luma};

use super::quantize::NODATA;

/// Downsampling factors of the first `levels` overviews (2, 4, 8, ...).
pub fn overview_factors(levels: u8) -> Vec<u32> {
    (1..=u32::from(levels)).map(|k| 1u32 << k).collect()
}

/// Averages the valid codes of a 2x2 block, rounding half up.
///
/// The result is nodata only when all four inputs are nodata.
pub fn average_valid(codes: [u8; 4]) -> u8 {
    let (sum, count) = codes
        .iter()
        .filter(|&&c| c != NODATA)
        .fold((0u32, 0u32), |(s, n), &c| (s + u32::from(c), n + 1));
    if count == 0 {
        NODATA
    } else {
        ((sum + count / 2) / count) as u8
    }
}

/// Halves `source` into the quadrant of `target` starting at (`x0`, `y0`).
pub fn downsample_into(source: &GrayImage, target: &mut GrayImage, x0: u32, y0: u32) {
    let (w, h) = (source.width() / 2, source.height() / 2);
    for y in 0..h {
        for x in 0..w {
            let (sx, sy) = (x * 2, y * 2);
            let codes = [
                source.get_pixel(sx, sy)[0],
                source.get_pixel(sx + 1, sy)[0],
                source.get_pixel(sx, sy + 1)[0],
                source.get_pixel(sx + 1, sy + 1)[0],
            ];
            target.put_pixel(x0 + x, y0 + y, Luma([average_valid(codes)]));
        }
    }
}
