//! Offline raster computation, without the entity store.

use std::path::PathBuf;

use clap::Subcommand;
use heatlayer::config::ConfigFile;
use heatlayer::raster::{
    run_transform, HeatRisk, InputBand, NormalizedDifference, RasterReader, SampleDecoding,
    TransformRequest, TransformSummary,
};
use heatlayer::service::heat_model;
use tracing::info;

use crate::error::CliError;
use crate::runner::prepare_output;

/// Compute subcommands.
#[derive(Debug, Subcommand)]
pub enum ComputeCommands {
    /// Vegetation index from the NIR band and the red band of the RGB image
    Ndvi {
        #[command(flatten)]
        inputs: IndexInputs,
    },

    /// Water index from the green band of the RGB image and the NIR band
    Ndwi {
        #[command(flatten)]
        inputs: IndexInputs,
    },

    /// Heat-risk prediction from an NDVI layer
    Heat {
        /// NDVI layer (8-bit encoded or raw float)
        #[arg(long)]
        ndvi: PathBuf,

        /// Output GeoTIFF
        #[arg(long)]
        out: PathBuf,

        /// Model version (defaults to [prediction] model_version)
        #[arg(long)]
        model: Option<String>,
    },
}

/// Inputs shared by the index computations.
#[derive(Debug, clap::Args)]
pub struct IndexInputs {
    /// RGB orthophoto
    #[arg(long)]
    rgb: PathBuf,

    /// Near-infrared orthophoto
    #[arg(long)]
    nir: PathBuf,

    /// Output GeoTIFF
    #[arg(long)]
    out: PathBuf,

    /// One-based red band of the RGB image (defaults to [index] red_band)
    #[arg(long)]
    red_band: Option<usize>,

    /// One-based green band of the RGB image (defaults to [index] green_band)
    #[arg(long)]
    green_band: Option<usize>,

    /// One-based band of the NIR image (defaults to [index] nir_band)
    #[arg(long)]
    nir_band: Option<usize>,
}

/// Run a compute subcommand.
pub fn run(command: ComputeCommands, config: &ConfigFile) -> Result<(), CliError> {
    let summary = match command {
        ComputeCommands::Ndvi { inputs } => {
            let nir = zero_based("nir", inputs.nir_band.unwrap_or(config.index.nir_band))?;
            let red = zero_based("red", inputs.red_band.unwrap_or(config.index.red_band))?;
            let transform = NormalizedDifference::ndvi();
            run_transform(TransformRequest {
                inputs: vec![InputBand::raw(&inputs.nir, nir), InputBand::raw(&inputs.rgb, red)],
                output: prepare_output(&inputs.out)?,
                transform: &transform,
                tiling: config.raster.tiling(),
                metadata: sources(&inputs.nir, &inputs.rgb),
            })?
        }
        ComputeCommands::Ndwi { inputs } => {
            let green = zero_based("green", inputs.green_band.unwrap_or(config.index.green_band))?;
            let nir = zero_based("nir", inputs.nir_band.unwrap_or(config.index.nir_band))?;
            let transform = NormalizedDifference::ndwi();
            run_transform(TransformRequest {
                inputs: vec![InputBand::raw(&inputs.rgb, green), InputBand::raw(&inputs.nir, nir)],
                output: prepare_output(&inputs.out)?,
                transform: &transform,
                tiling: config.raster.tiling(),
                metadata: sources(&inputs.rgb, &inputs.nir),
            })?
        }
        ComputeCommands::Heat { ndvi, out, model } => {
            let version = model.unwrap_or_else(|| config.prediction.model_version.clone());
            let model = heat_model(&version).map_err(|e| CliError::Config(e.to_string()))?;
            let decoding = SampleDecoding::for_index_layer(&RasterReader::open(&ndvi)?);
            let transform = HeatRisk::new(model);
            run_transform(TransformRequest {
                inputs: vec![InputBand {
                    path: ndvi.clone(),
                    band: 0,
                    decoding,
                }],
                output: prepare_output(&out)?,
                transform: &transform,
                tiling: config.raster.tiling(),
                metadata: vec![("SOURCE_NDVI".to_string(), ndvi.display().to_string())],
            })?
        }
    };
    report(&summary);
    Ok(())
}

fn zero_based(name: &str, band: usize) -> Result<usize, CliError> {
    band.checked_sub(1)
        .ok_or_else(|| CliError::Config(format!("{} band numbers start at 1", name)))
}

fn sources(a: &std::path::Path, b: &std::path::Path) -> Vec<(String, String)> {
    vec![
        ("SOURCE_A".to_string(), a.display().to_string()),
        ("SOURCE_B".to_string(), b.display().to_string()),
    ]
}

fn report(summary: &TransformSummary) {
    info!(
        output = %summary.output.display(),
        windows = summary.windows,
        "Transform complete"
    );
    println!("Wrote {}", summary.output.display());
    println!("  Size:      {} x {}", summary.width, summary.height);
    println!("  Windows:   {}", summary.windows);
    println!("  Nodata:    {} pixels", summary.nodata_pixels);
    println!("  Overviews: {}", summary.overview_levels);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_based_bands() {
        assert_eq!(zero_based("red", 1).unwrap(), 0);
        assert_eq!(zero_based("nir", 4).unwrap(), 3);
        assert!(matches!(zero_based("red", 0), Err(CliError::Config(_))));
    }
}
