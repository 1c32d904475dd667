//! `preview <layer> --out <png>`

use std::path::Path;

use heatlayer::raster::render_preview;
use tracing::info;

use crate::error::CliError;
use crate::runner::prepare_output;

/// Renders the coarsest overview of an encoded layer to a PNG.
pub fn run(layer: &Path, out: &Path) -> Result<(), CliError> {
    let out = prepare_output(out)?;
    let (width, height) = render_preview(layer, &out)?;
    info!(layer = %layer.display(), out = %out.display(), width, height, "Preview written");
    println!("Wrote {} ({} x {})", out.display(), width, height);
    Ok(())
}
