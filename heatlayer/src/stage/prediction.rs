//! Heat-risk prediction from the index layers.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use super::freshness::{outputs_current, register};
use super::index::LAYER_WATCH;
use super::{output_footprint, resolve_input, PipelineError, Reaction, RunReport, Trigger};
use crate::entity::{Area, Entity, EntityId, EntityType, LayerKind, PredictionEntity, HEAT_MAP_LAYER};
use crate::raster::{
    run_transform, HeatModel, HeatRisk, InputBand, RasterReader, SampleDecoding, Tiling,
    TransformRequest,
};
use crate::store::{EntityStore, StoreError, UpsertOutcome};
use crate::subscription::{EntitySelector, SubscriptionIntent};

/// Predicts heat risk whenever NDVI or NDWI is recomputed.
///
/// NDVI is required. NDWI is optional: when it is absent the run goes on
/// without it and it is left out of `inputLayers`.
pub struct PredictionReaction {
    store: Arc<dyn EntityStore>,
    ndvi: EntityId,
    ndwi: EntityId,
    model: Arc<dyn HeatModel>,
    area: Area,
    workspace: String,
    processed_dir: PathBuf,
    tiling: Tiling,
    intent: SubscriptionIntent,
}

impl PredictionReaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn EntityStore>,
        ndvi: EntityId,
        ndwi: EntityId,
        model: Arc<dyn HeatModel>,
        area: Area,
        workspace: impl Into<String>,
        processed_dir: impl Into<PathBuf>,
        tiling: Tiling,
        endpoint: impl Into<String>,
    ) -> Self {
        let intent = SubscriptionIntent::new(
            [
                EntitySelector::of_id(EntityType::GeoSpatialLayer, ndvi.clone()),
                EntitySelector::of_id(EntityType::GeoSpatialLayer, ndwi.clone()),
            ],
            LAYER_WATCH,
            endpoint,
        )
        .with_description("Predict heat risk when index layers change");
        Self {
            store,
            ndvi,
            ndwi,
            model,
            area,
            workspace: workspace.into(),
            processed_dir: processed_dir.into(),
            tiling,
            intent,
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.processed_dir
            .join(format!("{}_{}.tif", HEAT_MAP_LAYER, self.area.file_suffix()))
    }

    async fn predict(&self) -> Result<RunReport, PipelineError> {
        let ndvi = resolve_input(self.store.as_ref(), &self.ndvi).await?;
        if !matches!(&ndvi, Entity::Layer(l) if l.kind == LayerKind::Ndvi) {
            return Err(PipelineError::Configuration(format!(
                "{} is configured as the NDVI input but is not an NDVI layer",
                ndvi.id()
            )));
        }
        let mut inputs = vec![ndvi.id().clone()];
        match resolve_input(self.store.as_ref(), &self.ndwi).await {
            Ok(ndwi) => inputs.push(ndwi.id().clone()),
            Err(PipelineError::NotFound(reason)) => {
                warn!(entity_id = %self.ndwi, reason = %reason, "NDWI unavailable; predicting from NDVI only");
            }
            Err(e) => return Err(e),
        }

        let ndvi_path = ndvi.file_path().to_path_buf();
        let output = self.output_path();
        let mut report = RunReport::default();
        let polygon = if self.stored_model().await?.as_deref() == Some(self.model.version())
            && outputs_current(&[output.as_path()], &[ndvi_path.as_path()])
        {
            debug!(path = %output.display(), "Prediction newer than NDVI; not recomputed");
            output_footprint(&output)?
        } else {
            let model = Arc::clone(&self.model);
            let tiling = self.tiling;
            let job_output = output.clone();
            let polygon = tokio::task::spawn_blocking(move || {
                let decoding = SampleDecoding::for_index_layer(&RasterReader::open(&ndvi_path)?);
                let heat = HeatRisk::new(model);
                run_transform(TransformRequest {
                    inputs: vec![InputBand {
                        path: ndvi_path.clone(),
                        band: 0,
                        decoding,
                    }],
                    output: job_output.clone(),
                    transform: &heat,
                    tiling,
                    metadata: vec![("SOURCE_NDVI".into(), ndvi_path.display().to_string())],
                })?;
                output_footprint(&job_output)
            })
            .await??;
            report.outputs.push(output.clone());
            polygon
        };

        let entity = Entity::from(
            PredictionEntity::new(&self.area, &output, self.model.version(), inputs, &self.workspace)
                .with_bounding_polygon(polygon),
        );
        let (entity, outcome) = register(self.store.as_ref(), entity).await?;
        info!(
            entity_id = %entity.id(),
            model = self.model.version(),
            outcome = ?outcome,
            "Heat-risk prediction registered"
        );
        match outcome {
            UpsertOutcome::Unchanged => report.skipped.push(entity.id().clone()),
            _ => report.entities.push(entity.id().clone()),
        }
        Ok(report)
    }

    /// Model version of the stored prediction, if there is one.
    async fn stored_model(&self) -> Result<Option<String>, PipelineError> {
        match self.store.get(&EntityId::for_heat_map(&self.area)).await {
            Ok(Entity::Prediction(p)) => Ok(Some(p.model_version)),
            Ok(_) | Err(StoreError::NotFound(_)) | Err(StoreError::InvalidPayload(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Reaction for PredictionReaction {
    fn name(&self) -> &str {
        "prediction"
    }

    fn intent(&self) -> Option<&SubscriptionIntent> {
        Some(&self.intent)
    }

    fn execute<'a>(&'a self, _trigger: &'a Trigger) -> BoxFuture<'a, Result<RunReport, PipelineError>> {
        Box::pin(self.predict())
    }
}
