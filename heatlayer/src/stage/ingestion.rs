//! Registers raw orthophotos as layer entities.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use super::freshness::register;
use super::{PipelineError, RawSource, Reaction, RunReport, Trigger};
use crate::entity::{Area, Entity, GeospatialLayer, LayerKind};
use crate::raster::{self, check_coregistered, RasterReader};
use crate::store::{EntityStore, UpsertOutcome};
use crate::subscription::SubscriptionIntent;

/// Finds the RGB and NIR rasters and registers them.
///
/// Not driven by notifications: runs on manual and reconcile triggers.
pub struct IngestionReaction {
    store: Arc<dyn EntityStore>,
    source: Arc<dyn RawSource>,
    area: Area,
    resolution_cm: u32,
    workspace: String,
}

impl IngestionReaction {
    pub fn new(
        store: Arc<dyn EntityStore>,
        source: Arc<dyn RawSource>,
        area: Area,
        resolution_cm: u32,
        workspace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            source,
            area,
            resolution_cm,
            workspace: workspace.into(),
        }
    }

    async fn ingest(&self) -> Result<RunReport, PipelineError> {
        let source = Arc::clone(&self.source);
        let (area, resolution_cm, workspace) =
            (self.area.clone(), self.resolution_cm, self.workspace.clone());
        let layers = tokio::task::spawn_blocking(move || {
            prepare(source.as_ref(), &area, resolution_cm, &workspace)
        })
        .await??;
        let mut report = RunReport::default();
        for layer in layers {
            let (entity, outcome) = register(self.store.as_ref(), Entity::from(layer)).await?;
            info!(
                entity_id = %entity.id(),
                path = %entity.file_path().display(),
                outcome = ?outcome,
                "Raw layer registered"
            );
            match outcome {
                UpsertOutcome::Unchanged => report.skipped.push(entity.id().clone()),
                _ => report.entities.push(entity.id().clone()),
            }
        }
        Ok(report)
    }
}

/// Locates both rasters, checks they line up and builds their records.
fn prepare(
    source: &dyn RawSource,
    area: &Area,
    resolution_cm: u32,
    workspace: &str,
) -> Result<[GeospatialLayer; 2], PipelineError> {
    let rgb_path = source.locate(LayerKind::Rgb)?;
    let nir_path = source.locate(LayerKind::Nir)?;
    let rgb = RasterReader::open(&rgb_path)?;
    let nir = RasterReader::open(&nir_path)?;
    check_coregistered(&[&rgb, &nir])?;
    let polygon = raster::footprint(&rgb);

    Ok([(LayerKind::Rgb, rgb_path), (LayerKind::Nir, nir_path)].map(|(kind, path)| {
        GeospatialLayer::new(kind, area, path, resolution_cm, workspace)
            .with_bounding_polygon(polygon.clone())
    }))
}

impl Reaction for IngestionReaction {
    fn name(&self) -> &str {
        "ingestion"
    }

    fn intent(&self) -> Option<&SubscriptionIntent> {
        None
    }

    fn execute<'a>(&'a self, _trigger: &'a Trigger) -> BoxFuture<'a, Result<RunReport, PipelineError>> {
        Box::pin(self.ingest())
    }
}
