//! Locating raw orthophotos.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::PipelineError;
use crate::entity::LayerKind;
use crate::raster::RasterReader;

/// Where raw rasters come from.
pub trait RawSource: Send + Sync {
    /// Path of a readable raster for a raw layer kind.
    fn locate(&self, kind: LayerKind) -> Result<PathBuf, PipelineError>;
}

/// Raw rasters unpacked under `<root>/rgb` and `<root>/nir`.
///
/// The first `*.tif`/`*.tiff` in sorted order is used. A file counts as
/// present only if it opens as a TIFF.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn directory(&self, kind: LayerKind) -> PathBuf {
        self.root.join(kind.layer_name())
    }
}

impl RawSource for DirectorySource {
    fn locate(&self, kind: LayerKind) -> Result<PathBuf, PipelineError> {
        if kind.is_derived() {
            return Err(PipelineError::Configuration(format!(
                "{} is not a raw layer",
                kind
            )));
        }
        let dir = self.directory(kind);
        let path = first_tiff(&dir)?.ok_or_else(|| {
            PipelineError::NotFound(format!("no .tif file under {}", dir.display()))
        })?;
        RasterReader::open(&path)?;
        debug!(kind = %kind, path = %path.display(), "Raw raster located");
        Ok(path)
    }
}

fn first_tiff(dir: &Path) -> Result<Option<PathBuf>, PipelineError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PipelineError::Io(format!("{}: {}", dir.display(), e))),
    };
    let mut tiffs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
        })
        .collect();
    tiffs.sort();
    Ok(tiffs.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::fixture::{write_strip_tiff, StripTiff};
    use crate::stage::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_locates_first_sorted_tiff() {
        let dir = TempDir::new().unwrap();
        let rgb = dir.path().join("rgb");
        write_strip_tiff(&rgb.join("b.tif"), &StripTiff::filled(4, 4, &[1, 2, 3])).unwrap();
        write_strip_tiff(&rgb.join("a.TIF"), &StripTiff::filled(4, 4, &[1, 2, 3])).unwrap();
        fs::write(rgb.join("0-readme.txt"), "x").unwrap();

        let source = DirectorySource::new(dir.path());
        assert_eq!(source.locate(LayerKind::Rgb).unwrap(), rgb.join("a.TIF"));
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = DirectorySource::new(dir.path()).locate(LayerKind::Nir).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_unreadable_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("nir")).unwrap();
        fs::write(dir.path().join("nir").join("x.tif"), b"not a tiff").unwrap();
        let err = DirectorySource::new(dir.path()).locate(LayerKind::Nir).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_derived_kind_rejected() {
        let dir = TempDir::new().unwrap();
        let err = DirectorySource::new(dir.path()).locate(LayerKind::Ndvi).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
