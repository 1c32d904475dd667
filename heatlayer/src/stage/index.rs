//! NDVI and NDWI from the raw RGB and NIR layers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use super::freshness::{outputs_current, register};
use super::{output_footprint, resolve_input, PipelineError, Reaction, RunReport, Trigger};
use crate::entity::{Area, Entity, EntityId, EntityType, GeospatialLayer, LayerKind};
use crate::raster::{run_transform, InputBand, NormalizedDifference, Tiling, TransformRequest};
use crate::store::{EntityStore, UpsertOutcome};
use crate::subscription::{EntitySelector, SubscriptionIntent};

/// Attributes whose change means a layer's raster was rewritten.
pub(crate) const LAYER_WATCH: [&str; 2] = ["filePath", "dateCreated"];

/// Zero-based band positions within the input rasters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBands {
    pub red: usize,
    pub green: usize,
    pub nir: usize,
}

impl IndexBands {
    /// From one-based band numbers.
    pub fn from_one_based(red: usize, green: usize, nir: usize) -> Result<Self, PipelineError> {
        let zero = |name: &str, n: usize| {
            n.checked_sub(1)
                .ok_or_else(|| PipelineError::Configuration(format!("{} band numbers start at 1", name)))
        };
        Ok(Self {
            red: zero("red", red)?,
            green: zero("green", green)?,
            nir: zero("nir", nir)?,
        })
    }
}

impl Default for IndexBands {
    fn default() -> Self {
        Self {
            red: 0,
            green: 1,
            nir: 0,
        }
    }
}

/// Recomputes both indices whenever a raw input changes.
pub struct IndexReaction {
    store: Arc<dyn EntityStore>,
    rgb: EntityId,
    nir: EntityId,
    bands: IndexBands,
    area: Area,
    resolution_cm: u32,
    workspace: String,
    processed_dir: PathBuf,
    tiling: Tiling,
    intent: SubscriptionIntent,
}

impl IndexReaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn EntityStore>,
        rgb: EntityId,
        nir: EntityId,
        bands: IndexBands,
        area: Area,
        resolution_cm: u32,
        workspace: impl Into<String>,
        processed_dir: impl Into<PathBuf>,
        tiling: Tiling,
        endpoint: impl Into<String>,
    ) -> Self {
        let intent = SubscriptionIntent::new(
            [
                EntitySelector::of_id(EntityType::GeoSpatialLayer, rgb.clone()),
                EntitySelector::of_id(EntityType::GeoSpatialLayer, nir.clone()),
            ],
            LAYER_WATCH,
            endpoint,
        )
        .with_description("Recompute NDVI/NDWI when raw layers change");
        Self {
            store,
            rgb,
            nir,
            bands,
            area,
            resolution_cm,
            workspace: workspace.into(),
            processed_dir: processed_dir.into(),
            tiling,
            intent,
        }
    }

    pub fn output_path(&self, kind: LayerKind) -> PathBuf {
        self.processed_dir
            .join(format!("{}_{}.tif", kind.layer_name(), self.area.file_suffix()))
    }

    async fn compute(&self) -> Result<RunReport, PipelineError> {
        let rgb = resolve_input(self.store.as_ref(), &self.rgb).await?;
        let nir = resolve_input(self.store.as_ref(), &self.nir).await?;
        expect_kind(&rgb, LayerKind::Rgb)?;
        expect_kind(&nir, LayerKind::Nir)?;

        let ndvi_out = self.output_path(LayerKind::Ndvi);
        let ndwi_out = self.output_path(LayerKind::Ndwi);
        let mut report = RunReport::default();
        let outputs = [ndvi_out.as_path(), ndwi_out.as_path()];
        let polygon = if outputs_current(&outputs, &[rgb.file_path(), nir.file_path()]) {
            debug!(path = %ndvi_out.display(), "Index layers newer than their inputs; not recomputed");
            output_footprint(&ndvi_out)?
        } else {
            let jobs = IndexJobs {
                rgb: rgb.file_path().to_path_buf(),
                nir: nir.file_path().to_path_buf(),
                bands: self.bands,
                tiling: self.tiling,
                ndvi_out: ndvi_out.clone(),
                ndwi_out: ndwi_out.clone(),
            };
            let polygon = tokio::task::spawn_blocking(move || jobs.run()).await??;
            report.outputs.extend([ndwi_out, ndvi_out]);
            polygon
        };

        // NDVI last: the prediction stage keys on it and should find NDWI current.
        for kind in [LayerKind::Ndwi, LayerKind::Ndvi] {
            let path = self.output_path(kind);
            let layer = GeospatialLayer::new(kind, &self.area, &path, self.resolution_cm, &self.workspace)
                .with_bounding_polygon(polygon.clone());
            let (entity, outcome) = register(self.store.as_ref(), Entity::from(layer)).await?;
            info!(entity_id = %entity.id(), outcome = ?outcome, "Index layer registered");
            match outcome {
                UpsertOutcome::Unchanged => report.skipped.push(entity.id().clone()),
                _ => report.entities.push(entity.id().clone()),
            }
        }
        Ok(report)
    }
}

fn expect_kind(entity: &Entity, kind: LayerKind) -> Result<(), PipelineError> {
    match entity {
        Entity::Layer(layer) if layer.kind == kind => Ok(()),
        _ => Err(PipelineError::Configuration(format!(
            "{} is configured as the {} input but is not a {} layer",
            entity.id(),
            kind,
            kind
        ))),
    }
}

/// Blocking half of an index run.
struct IndexJobs {
    rgb: PathBuf,
    nir: PathBuf,
    bands: IndexBands,
    tiling: Tiling,
    ndvi_out: PathBuf,
    ndwi_out: PathBuf,
}

impl IndexJobs {
    fn run(self) -> Result<Option<crate::coord::GeoPolygon>, PipelineError> {
        let sources = |a: &Path, b: &Path| {
            vec![
                ("SOURCE_A".to_string(), a.display().to_string()),
                ("SOURCE_B".to_string(), b.display().to_string()),
            ]
        };

        let ndvi = NormalizedDifference::ndvi();
        run_transform(TransformRequest {
            inputs: vec![
                InputBand::raw(&self.nir, self.bands.nir),
                InputBand::raw(&self.rgb, self.bands.red),
            ],
            output: self.ndvi_out.clone(),
            transform: &ndvi,
            tiling: self.tiling,
            metadata: sources(&self.nir, &self.rgb),
        })?;

        let ndwi = NormalizedDifference::ndwi();
        run_transform(TransformRequest {
            inputs: vec![
                InputBand::raw(&self.rgb, self.bands.green),
                InputBand::raw(&self.nir, self.bands.nir),
            ],
            output: self.ndwi_out.clone(),
            transform: &ndwi,
            tiling: self.tiling,
            metadata: sources(&self.rgb, &self.nir),
        })?;

        output_footprint(&self.ndvi_out)
    }
}

impl Reaction for IndexReaction {
    fn name(&self) -> &str {
        "index"
    }

    fn intent(&self) -> Option<&SubscriptionIntent> {
        Some(&self.intent)
    }

    fn execute<'a>(&'a self, _trigger: &'a Trigger) -> BoxFuture<'a, Result<RunReport, PipelineError>> {
        Box::pin(self.compute())
    }
}
