//! Rectangular processing windows and the grid that covers a raster.

use std::fmt;

use super::error::RasterError;

/// Pixel rectangle within a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub col_off: u32,
    pub row_off: u32,
    pub width: u32,
    pub height: u32,
}

impl Window {
    pub fn new(col_off: u32, row_off: u32, width: u32, height: u32) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    /// Window covering an entire raster.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn col_end(&self) -> u32 {
        self.col_off + self.width
    }

    pub fn row_end(&self) -> u32 {
        self.row_off + self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// True if the window lies inside a `width` x `height` raster.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && u64::from(self.col_off) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.row_off) + u64::from(self.height) <= u64::from(height)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.col_off, self.row_off
        )
    }
}

/// Row-major partition of a raster into windows.
///
/// Windows are `window_size` square except along the right and bottom
/// edges. `window_size` must be a positive multiple of `block_size` so
/// every window starts on an output block boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGrid {
    width: u32,
    height: u32,
    window_size: u32,
}

impl WindowGrid {
    pub fn new(
        width: u32,
        height: u32,
        window_size: u32,
        block_size: u32,
    ) -> Result<Self, RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::InvalidTiling(format!(
                "raster has zero extent ({}x{})",
                width, height
            )));
        }
        if block_size == 0 || window_size == 0 || window_size % block_size != 0 {
            return Err(RasterError::InvalidTiling(format!(
                "window size {} is not a positive multiple of block size {}",
                window_size, block_size
            )));
        }
        Ok(Self {
            width,
            height,
            window_size,
        })
    }

    pub fn columns(&self) -> u32 {
        self.width.div_ceil(self.window_size)
    }

    pub fn rows(&self) -> u32 {
        self.height.div_ceil(self.window_size)
    }

    pub fn len(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn windows(&self) -> Windows {
        Windows {
            grid: *self,
            next: 0,
        }
    }
}

/// Iterator over the windows of a [`WindowGrid`].
#[derive(Debug, Clone)]
pub struct Windows {
    grid: WindowGrid,
    next: usize,
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.next >= self.grid.len() {
            return None;
        }
        let columns = self.grid.columns() as usize;
        let col = (self.next % columns) as u32;
        let row = (self.next / columns) as u32;
        self.next += 1;

        let size = self.grid.window_size;
        let col_off = col * size;
        let row_off = row * size;
        Some(Window::new(
            col_off,
            row_off,
            size.min(self.grid.width - col_off),
            size.min(self.grid.height - row_off),
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.grid.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Windows {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_covers_raster_exactly_once() {
        let grid = WindowGrid::new(5000, 3000, 2048, 512).unwrap();
        assert_eq!(grid.columns(), 3);
        assert_eq!(grid.rows(), 2);

        let mut covered = 0usize;
        for w in grid.windows() {
            assert!(w.fits(5000, 3000));
            assert_eq!(w.col_off % 512, 0);
            assert_eq!(w.row_off % 512, 0);
            covered += w.pixel_count();
        }
        assert_eq!(covered, 5000 * 3000);
    }

    #[test]
    fn test_edge_windows_are_clipped() {
        let grid = WindowGrid::new(5000, 3000, 2048, 512).unwrap();
        let last = grid.windows().last().unwrap();
        assert_eq!(last, Window::new(4096, 2048, 904, 952));
    }

    #[test]
    fn test_window_must_be_block_multiple() {
        assert!(matches!(
            WindowGrid::new(100, 100, 1000, 512),
            Err(RasterError::InvalidTiling(_))
        ));
        assert!(WindowGrid::new(100, 100, 1024, 512).is_ok());
    }

    #[test]
    fn test_zero_extent_rejected() {
        assert!(WindowGrid::new(0, 10, 512, 512).is_err());
    }

    #[test]
    fn test_single_window_for_small_raster() {
        let grid = WindowGrid::new(40, 30, 2048, 512).unwrap();
        let windows: Vec<_> = grid.windows().collect();
        assert_eq!(windows, vec![Window::full(40, 30)]);
    }

    #[test]
    fn test_fits() {
        assert!(Window::new(0, 0, 10, 10).fits(10, 10));
        assert!(!Window::new(1, 0, 10, 10).fits(10, 10));
        assert!(!Window::new(0, 0, 0, 10).fits(10, 10));
    }
}
