//! Tests for stages and reactions

use super::*;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use proptest::prelude::*;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use crate::entity::{Area, EntityType, GeospatialLayer, LayerKind};
use crate::publish::{MemoryMapServer, PathMap, PublicationResolver};
use crate::raster::fixture::{write_strip_tiff, StripTiff};
use crate::raster::{GeoReference, PlaceholderModel, Tiling, Window};
use crate::store::MemoryEntityStore;
use crate::subscription::EntitySelector;

const W: u32 = 64;
const H: u32 = 48;

fn area() -> Area {
    Area::new("brussels", "2024")
}

fn tiling() -> Tiling {
    Tiling {
        window_size: 32,
        block_size: 16,
        overview_levels: 2,
    }
}

fn lambert() -> GeoReference {
    GeoReference::north_up(148_000.0, 171_000.0, 0.4, 0.4, 31370)
}

fn read_codes(path: &Path) -> Vec<f32> {
    let mut reader = RasterReader::open(path).unwrap();
    let (w, h) = (reader.width(), reader.height());
    reader.read_window(&[0], Window::full(w, h)).unwrap().remove(0)
}

/// Registers a raw layer entity backed by a synthetic raster.
fn stage_raw(store: &MemoryEntityStore, dir: &Path, kind: LayerKind, values: &[u8]) -> EntityId {
    let path = dir.join(kind.layer_name()).join("input.tif");
    write_strip_tiff(&path, &StripTiff::filled(W, H, values).geo(lambert())).unwrap();
    let entity = Entity::from(GeospatialLayer::new(kind, &area(), path, 40, "uhi"));
    store.upsert(&entity);
    entity.id().clone()
}

fn index_reaction(store: Arc<MemoryEntityStore>, processed: &Path) -> IndexReaction {
    IndexReaction::new(
        store,
        EntityId::for_layer("RGB", &area()),
        EntityId::for_layer("NIR", &area()),
        IndexBands::default(),
        area(),
        40,
        "uhi",
        processed,
        tiling(),
        "http://index:8000/react",
    )
}

fn prediction_reaction(store: Arc<MemoryEntityStore>, processed: &Path) -> PredictionReaction {
    PredictionReaction::new(
        store,
        EntityId::for_layer("NDVI", &area()),
        EntityId::for_layer("NDWI", &area()),
        Arc::new(PlaceholderModel),
        area(),
        "uhi",
        processed,
        tiling(),
        "http://prediction:8000/react",
    )
}

/// Reaction that blocks until released and counts its runs.
struct GatedReaction {
    intent: SubscriptionIntent,
    gate: Semaphore,
    runs: AtomicUsize,
}

impl GatedReaction {
    fn watching(id: EntityId) -> Self {
        Self {
            intent: SubscriptionIntent::new(
                [EntitySelector::of_id(EntityType::GeoSpatialLayer, id)],
                ["filePath"],
                "http://test/react",
            ),
            gate: Semaphore::new(0),
            runs: AtomicUsize::new(0),
        }
    }
}

impl Reaction for GatedReaction {
    fn name(&self) -> &str {
        "gated"
    }

    fn intent(&self) -> Option<&SubscriptionIntent> {
        Some(&self.intent)
    }

    fn execute<'a>(&'a self, _trigger: &'a Trigger) -> BoxFuture<'a, Result<RunReport, PipelineError>> {
        Box::pin(async move {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.gate
                .acquire()
                .await
                .map_err(|e| PipelineError::Internal(e.to_string()))?
                .forget();
            Ok(RunReport::default())
        })
    }
}

fn layer_event(kind: LayerKind, path: &str) -> NotificationEvent {
    let entity = Entity::from(GeospatialLayer::new(kind, &area(), path, 40, "uhi"));
    NotificationEvent::for_entities("urn:ngsi-ld:Subscription:test", [&entity])
}

#[tokio::test]
async fn test_burst_during_run_collapses() {
    let reaction = Arc::new(GatedReaction::watching(EntityId::for_layer("RGB", &area())));
    let stage = Arc::new(Stage::new(reaction.clone()));

    let ReactOutcome::Accepted(handle) = stage.react(layer_event(LayerKind::Rgb, "/data/raw/rgb/a.tif")) else {
        panic!("first notification should start a run");
    };
    for _ in 0..5 {
        assert!(matches!(
            stage.react(layer_event(LayerKind::Rgb, "/data/raw/rgb/a.tif")),
            ReactOutcome::Skipped
        ));
    }
    reaction.gate.add_permits(1);
    let record = handle.await.unwrap();
    assert!(record.success);
    assert_eq!(record.trigger, TriggerKind::Notification);
    assert_eq!(reaction.runs.load(Ordering::SeqCst), 1);

    // Reconciliation afterwards runs exactly once more.
    reaction.gate.add_permits(1);
    assert!(stage.run(Trigger::Reconcile).await.success);
    assert_eq!(reaction.runs.load(Ordering::SeqCst), 2);

    let status = stage.status();
    assert_eq!(status.triggers_skipped, 5);
    assert_eq!(status.runs_succeeded, 2);
    assert!(!status.running);
}

#[tokio::test]
async fn test_manual_run_waits_instead_of_dropping() {
    let reaction = Arc::new(GatedReaction::watching(EntityId::for_layer("RGB", &area())));
    let stage = Arc::new(Stage::new(reaction.clone()));

    let ReactOutcome::Accepted(first) = stage.react(layer_event(LayerKind::Rgb, "/a.tif")) else {
        panic!("expected a run");
    };
    let manual = {
        let stage = Arc::clone(&stage);
        tokio::spawn(async move { stage.run(Trigger::Manual).await })
    };
    assert!(stage.try_run(Trigger::Reconcile).await.is_none());

    reaction.gate.add_permits(2);
    assert!(first.await.unwrap().success);
    assert!(manual.await.unwrap().success);
    assert_eq!(reaction.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unwatched_notification_is_ignored() {
    let reaction = Arc::new(GatedReaction::watching(EntityId::for_layer("RGB", &area())));
    let stage = Arc::new(Stage::new(reaction.clone()));

    assert!(matches!(
        stage.react(layer_event(LayerKind::Ndvi, "/data/processed/ndvi.tif")),
        ReactOutcome::Ignored
    ));
    assert!(matches!(stage.react(NotificationEvent::default()), ReactOutcome::Ignored));
    assert_eq!(reaction.runs.load(Ordering::SeqCst), 0);
    assert_eq!(stage.status().triggers_ignored, 2);
}

proptest! {
    #[test]
    fn prop_only_watched_entities_trigger(
        picks in prop::collection::vec((0usize..4, 0usize..3), 1..20)
    ) {
        let watched = EntityId::for_layer("NIR", &area());
        let stage = Stage::new(Arc::new(GatedReaction::watching(watched.clone())));
        let areas = [area(), Area::new("gent", "2024"), Area::new("brussels", "2023")];

        for (kind, place) in picks {
            let kind = LayerKind::ALL[kind];
            let entity = Entity::from(GeospatialLayer::new(kind, &areas[place], "/x.tif", 40, "uhi"));
            let event = NotificationEvent::for_entities("sub", [&entity]);
            prop_assert_eq!(stage.is_relevant(&event), *entity.id() == watched);
        }
    }
}

#[tokio::test]
async fn test_index_run_writes_rasters_then_entities() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    // red=100 green=50 blue=10, NIR=200
    stage_raw(&store, dir.path(), LayerKind::Rgb, &[100, 50, 10]);
    stage_raw(&store, dir.path(), LayerKind::Nir, &[200]);

    let processed = dir.path().join("processed");
    let stage = Stage::new(Arc::new(index_reaction(store.clone(), &processed)));
    let record = stage.run(Trigger::Manual).await;
    assert!(record.success, "{:?}", record.error);

    let report = record.report.unwrap();
    assert_eq!(
        report.entities,
        vec![
            EntityId::for_layer("NDWI", &area()),
            EntityId::for_layer("NDVI", &area())
        ]
    );

    // (200-100)/(200+100) = 1/3 -> 169
    let ndvi_path = processed.join("ndvi_brussels_2024.tif");
    assert!(read_codes(&ndvi_path).iter().all(|&c| c == 169.0));
    // (50-200)/(50+200) = -0.6 -> round(0.2 * 254) = 51
    let ndwi_path = processed.join("ndwi_brussels_2024.tif");
    assert!(read_codes(&ndwi_path).iter().all(|&c| c == 51.0));

    let Some(Entity::Layer(ndvi)) = store.entity(&EntityId::for_layer("NDVI", &area())) else {
        panic!("NDVI entity missing");
    };
    assert_eq!(ndvi.file_path, ndvi_path);
    assert!(ndvi.bounding_polygon.is_some());
    assert!(ndvi.publish);
}

#[tokio::test]
async fn test_index_reconcile_with_unchanged_inputs_is_silent() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    stage_raw(&store, dir.path(), LayerKind::Rgb, &[100, 50, 10]);
    stage_raw(&store, dir.path(), LayerKind::Nir, &[200]);
    let processed = dir.path().join("processed");
    let downstream = prediction_reaction(store.clone(), &processed);
    let intent = downstream.intent().unwrap().clone();
    store.create_subscription("urn:ngsi-ld:Subscription:prediction", &intent).await.unwrap();

    let index = Stage::new(Arc::new(index_reaction(store.clone(), &processed)));
    assert!(index.run(Trigger::Reconcile).await.success);
    assert_eq!(store.take_deliveries().len(), 2);
    let ndvi_id = EntityId::for_layer("NDVI", &area());
    let before = store.entity(&ndvi_id).unwrap();

    let record = index.run(Trigger::Reconcile).await;
    assert!(record.success, "{:?}", record.error);
    assert_eq!(store.take_deliveries().len(), 0);
    assert_eq!(store.entity(&ndvi_id).unwrap(), before);
    let report = record.report.unwrap();
    assert!(report.outputs.is_empty());
    assert!(report.entities.is_empty());
    assert_eq!(report.skipped.len(), 2);
}

#[tokio::test]
async fn test_index_recomputes_after_input_rewrite() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    stage_raw(&store, dir.path(), LayerKind::Rgb, &[100, 50, 10]);
    stage_raw(&store, dir.path(), LayerKind::Nir, &[200]);
    let processed = dir.path().join("processed");
    let index = Stage::new(Arc::new(index_reaction(store.clone(), &processed)));
    assert!(index.run(Trigger::Manual).await.success);

    // same path, new content, written later than the outputs
    let nir_path = dir.path().join("nir").join("input.tif");
    write_strip_tiff(&nir_path, &StripTiff::filled(W, H, &[100]).geo(lambert())).unwrap();
    let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
    std::fs::OpenOptions::new()
        .write(true)
        .open(&nir_path)
        .unwrap()
        .set_modified(later)
        .unwrap();

    let record = index.run(Trigger::Reconcile).await;
    assert!(record.success, "{:?}", record.error);
    assert_eq!(record.report.unwrap().outputs.len(), 2);
    // (100-100)/(100+100) = 0 -> 127
    assert!(read_codes(&processed.join("ndvi_brussels_2024.tif")).iter().all(|&c| c == 127.0));
}

#[tokio::test]
async fn test_ingestion_rerun_keeps_raw_records() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("raw");
    write_strip_tiff(&raw.join("rgb").join("ortho.tif"), &StripTiff::filled(W, H, &[1, 2, 3]).geo(lambert())).unwrap();
    write_strip_tiff(&raw.join("nir").join("ortho.tif"), &StripTiff::filled(W, H, &[4]).geo(lambert())).unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    let stage = Stage::new(Arc::new(IngestionReaction::new(
        store.clone(),
        Arc::new(DirectorySource::new(&raw)),
        area(),
        40,
        "uhi",
    )));

    assert!(stage.run(Trigger::Reconcile).await.success);
    let rgb_id = EntityId::for_layer("RGB", &area());
    let before = store.entity(&rgb_id).unwrap();
    let record = stage.run(Trigger::Reconcile).await;
    assert_eq!(record.report.unwrap().skipped.len(), 2);
    assert_eq!(store.entity(&rgb_id).unwrap().timestamp(), before.timestamp());
}

#[tokio::test]
async fn test_index_missing_input_entity_fails_visibly() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    stage_raw(&store, dir.path(), LayerKind::Rgb, &[100, 50, 10]);

    let processed = dir.path().join("processed");
    let stage = Stage::new(Arc::new(index_reaction(store.clone(), &processed)));
    let record = stage.run(Trigger::Manual).await;
    assert!(!record.success);
    assert_eq!(record.error_kind, Some(ErrorKind::NotFound));
    assert_eq!(store.entity_count(), 1);
    assert!(!processed.join("ndvi_brussels_2024.tif").exists());
}

#[tokio::test]
async fn test_index_missing_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    stage_raw(&store, dir.path(), LayerKind::Rgb, &[100, 50, 10]);
    let nir_path = dir.path().join("nir").join("input.tif");
    stage_raw(&store, dir.path(), LayerKind::Nir, &[200]);
    std::fs::remove_file(&nir_path).unwrap();

    let stage = Stage::new(Arc::new(index_reaction(store, &dir.path().join("processed"))));
    let record = stage.run(Trigger::Manual).await;
    assert_eq!(record.error_kind, Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_index_store_outage_is_connectivity() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    stage_raw(&store, dir.path(), LayerKind::Rgb, &[100, 50, 10]);
    stage_raw(&store, dir.path(), LayerKind::Nir, &[200]);
    store.set_offline(true);

    let stage = Stage::new(Arc::new(index_reaction(store, &dir.path().join("processed"))));
    let record = stage.run(Trigger::Reconcile).await;
    assert_eq!(record.error_kind, Some(ErrorKind::Connectivity));
    assert_eq!(stage.status().runs_failed, 1);
}

#[tokio::test]
async fn test_index_geometry_mismatch() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    stage_raw(&store, dir.path(), LayerKind::Rgb, &[100, 50, 10]);
    let nir_path = dir.path().join("nir").join("input.tif");
    write_strip_tiff(&nir_path, &StripTiff::filled(W / 2, H, &[200]).geo(lambert())).unwrap();
    store.upsert(&Entity::from(GeospatialLayer::new(LayerKind::Nir, &area(), &nir_path, 40, "uhi")));

    let processed = dir.path().join("processed");
    let stage = Stage::new(Arc::new(index_reaction(store.clone(), &processed)));
    let record = stage.run(Trigger::Manual).await;
    assert_eq!(record.error_kind, Some(ErrorKind::GeometryMismatch));
    assert!(store.entity(&EntityId::for_layer("NDVI", &area())).is_none());
}

#[tokio::test]
async fn test_prediction_without_ndwi() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    let ndvi_path = dir.path().join("processed").join("ndvi_brussels_2024.tif");
    write_strip_tiff(&ndvi_path, &StripTiff::filled(W, H, &[169]).geo(lambert())).unwrap();
    store.upsert(&Entity::from(GeospatialLayer::new(LayerKind::Ndvi, &area(), &ndvi_path, 40, "uhi")));

    let processed = dir.path().join("processed");
    let stage = Stage::new(Arc::new(prediction_reaction(store.clone(), &processed)));
    let record = stage.run(Trigger::Manual).await;
    assert!(record.success, "{:?}", record.error);

    // ndvi 169 -> 0.3307; heat = 1 - 1.3307 / 2 = 0.3346 -> 85
    let output = processed.join("uhi_prediction_brussels_2024.tif");
    assert!(read_codes(&output).iter().all(|&c| c == 85.0));

    let Some(Entity::Prediction(prediction)) = store.entity(&EntityId::for_heat_map(&area())) else {
        panic!("prediction entity missing");
    };
    assert_eq!(prediction.input_layers, vec![EntityId::for_layer("NDVI", &area())]);
    assert_eq!(prediction.model_version, "placeholder_v1");
    assert_eq!(prediction.file_path, output);
}

#[tokio::test]
async fn test_prediction_requires_ndvi() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    let stage = Stage::new(Arc::new(prediction_reaction(store.clone(), dir.path())));
    let record = stage.run(Trigger::Manual).await;
    assert_eq!(record.error_kind, Some(ErrorKind::NotFound));
    assert_eq!(store.entity_count(), 0);
}

#[tokio::test]
async fn test_index_then_prediction_chain() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    stage_raw(&store, dir.path(), LayerKind::Rgb, &[100, 50, 10]);
    stage_raw(&store, dir.path(), LayerKind::Nir, &[200]);
    let processed = dir.path().join("processed");

    let index = Stage::new(Arc::new(index_reaction(store.clone(), &processed)));
    assert!(index.run(Trigger::Manual).await.success);
    let prediction = Stage::new(Arc::new(prediction_reaction(store.clone(), &processed)));
    assert!(prediction.run(Trigger::Manual).await.success);

    let Some(Entity::Prediction(p)) = store.entity(&EntityId::for_heat_map(&area())) else {
        panic!("prediction entity missing");
    };
    assert_eq!(
        p.input_layers,
        vec![
            EntityId::for_layer("NDVI", &area()),
            EntityId::for_layer("NDWI", &area())
        ]
    );
    assert!(p.bounding_polygon.is_some());
}

#[tokio::test]
async fn test_ingestion_registers_raw_layers() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("raw");
    write_strip_tiff(&raw.join("rgb").join("ortho.tif"), &StripTiff::filled(W, H, &[1, 2, 3]).geo(lambert())).unwrap();
    write_strip_tiff(&raw.join("nir").join("ortho.tif"), &StripTiff::filled(W, H, &[4]).geo(lambert())).unwrap();

    let store = Arc::new(MemoryEntityStore::new());
    let stage = Stage::new(Arc::new(IngestionReaction::new(
        store.clone(),
        Arc::new(DirectorySource::new(&raw)),
        area(),
        40,
        "uhi",
    )));
    assert!(stage.intent().is_none());
    let record = stage.run(Trigger::Manual).await;
    assert!(record.success, "{:?}", record.error);

    let Some(Entity::Layer(rgb)) = store.entity(&EntityId::for_layer("RGB", &area())) else {
        panic!("RGB entity missing");
    };
    assert_eq!(rgb.file_path, raw.join("rgb").join("ortho.tif"));
    let polygon = rgb.bounding_polygon.unwrap();
    let env = polygon.envelope();
    assert!(env.min_x > 4.0 && env.max_x < 4.5 && env.min_y > 50.7 && env.max_y < 51.0);
    assert!(store.entity(&EntityId::for_layer("NIR", &area())).is_some());
}

fn publication(store: Arc<MemoryEntityStore>, server: Arc<MemoryMapServer>, root: &Path) -> PublicationReaction {
    PublicationReaction::new(
        store,
        server,
        PublicationResolver::new("uhi", PathMap::new([(root.to_path_buf(), "/srv/data")])),
        "http://publication:8000/react",
    )
}

#[tokio::test]
async fn test_publish_flag_controls_store_creation() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    let server = Arc::new(MemoryMapServer::new());
    let path = dir.path().join("raw").join("rgb").join("a.tif");
    let rgb = GeospatialLayer::new(LayerKind::Rgb, &area(), &path, 40, "uhi");
    store.upsert(&Entity::from(rgb.clone().with_publish(false)));

    let stage = Stage::new(Arc::new(publication(store.clone(), server.clone(), dir.path())));
    assert!(stage.run(Trigger::Reconcile).await.success);
    assert_eq!(server.store_count(), 0);

    store.upsert(&Entity::from(rgb.with_publish(true)));
    let record = stage.run(Trigger::Reconcile).await;
    assert_eq!(record.report.unwrap().published, vec!["uhi:rgb".to_string()]);
    assert_eq!(server.store_count(), 1);
    assert_eq!(server.layer_count(), 1);
    assert_eq!(
        server.store_path("uhi", "store_rgb").as_deref(),
        Some("/srv/data/raw/rgb/a.tif")
    );

    assert!(stage.run(Trigger::Reconcile).await.success);
    assert_eq!(server.store_count(), 1);
    assert_eq!(server.layer_count(), 1);
}

#[tokio::test]
async fn test_publication_from_notification_snapshot() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    let server = Arc::new(MemoryMapServer::new());
    let stage = Arc::new(Stage::new(Arc::new(publication(store, server.clone(), dir.path()))));

    let flagged = Entity::from(GeospatialLayer::new(
        LayerKind::Ndvi,
        &area(),
        dir.path().join("ndvi.tif"),
        40,
        "uhi",
    ));
    let hidden = Entity::from(
        GeospatialLayer::new(LayerKind::Nir, &area(), dir.path().join("nir.tif"), 40, "uhi")
            .with_publish(false),
    );
    let event = NotificationEvent::for_entities("sub", [&flagged, &hidden]);
    let ReactOutcome::Accepted(handle) = stage.react(event) else {
        panic!("expected a run");
    };
    let report = handle.await.unwrap().report.unwrap();
    assert_eq!(report.published, vec!["uhi:ndvi".to_string()]);
    assert_eq!(report.skipped, vec![hidden.id().clone()]);
    assert!(server.has_workspace("uhi"));
}

#[tokio::test]
async fn test_unmapped_path_aborts_publication() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    let server = Arc::new(MemoryMapServer::new());
    store.upsert(&Entity::from(GeospatialLayer::new(
        LayerKind::Ndvi,
        &area(),
        "/elsewhere/ndvi.tif",
        40,
        "uhi",
    )));
    let stage = Stage::new(Arc::new(publication(store, server.clone(), dir.path())));
    let record = stage.run(Trigger::Manual).await;
    assert_eq!(record.error_kind, Some(ErrorKind::Configuration));
    assert_eq!(server.store_count(), 0);
}

#[tokio::test]
async fn test_map_server_outage_is_connectivity() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryEntityStore::new());
    let server = Arc::new(MemoryMapServer::new());
    server.set_offline(true);
    let stage = Stage::new(Arc::new(publication(store, server, dir.path())));
    assert_eq!(
        stage.run(Trigger::Manual).await.error_kind,
        Some(ErrorKind::Connectivity)
    );
}
