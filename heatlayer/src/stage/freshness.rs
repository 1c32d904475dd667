//! Change detection for outputs and their entity records.
//!
//! Reactions are re-run by every reconciliation. Outputs already newer
//! than their inputs are not recomputed, and a record whose file has not
//! been written since it was stamped keeps its stamp, so a repeated run
//! over unchanged data leaves the store untouched and notifies nobody.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::PipelineError;
use crate::entity::Entity;
use crate::store::{EntityStore, StoreError, UpsertOutcome};

/// Modification time in whole milliseconds, the resolution of entity stamps.
fn modified_millis(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified).timestamp_millis())
}

fn stamp_millis(stamp: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(stamp).ok().map(|t| t.timestamp_millis())
}

/// True if every output exists and none is older than any input.
pub(crate) fn outputs_current(outputs: &[&Path], inputs: &[&Path]) -> bool {
    let oldest_output = outputs.iter().map(|p| modified_millis(p)).min();
    let newest_input = inputs.iter().map(|p| modified_millis(p)).max();
    match (oldest_output, newest_input) {
        (Some(Some(output)), Some(Some(input))) => output >= input,
        _ => false,
    }
}

/// Keeps the stored stamp when the record describes the same file and
/// that file has not been written since.
pub(crate) fn carry_stamp(entity: &mut Entity, stored: &Entity) {
    if stored.id() != entity.id() || stored.file_path() != entity.file_path() {
        return;
    }
    let (Some(written), Some(stamped)) = (modified_millis(entity.file_path()), stamp_millis(stored.timestamp()))
    else {
        return;
    };
    if written <= stamped {
        entity.set_timestamp(stored.timestamp().to_string());
    }
}

/// `create_or_replace` after carrying the stored stamp forward.
pub(crate) async fn register(store: &dyn EntityStore, mut entity: Entity) -> Result<(Entity, UpsertOutcome), PipelineError> {
    match store.get(entity.id()).await {
        Ok(stored) => carry_stamp(&mut entity, &stored),
        Err(StoreError::NotFound(_)) | Err(StoreError::InvalidPayload(_)) => {}
        Err(e) => return Err(e.into()),
    }
    let outcome = store.create_or_replace(&entity).await?;
    debug!(entity_id = %entity.id(), outcome = ?outcome, "Record written");
    Ok((entity, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Area, GeospatialLayer, LayerKind};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn layer(path: &Path, stamp: &str) -> Entity {
        let mut layer = GeospatialLayer::new(LayerKind::Nir, &Area::new("brussels", "2024"), path, 40, "uhi");
        layer.date_created = stamp.to_string();
        layer.into()
    }

    fn touch(path: &Path, at: SystemTime) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(at).unwrap();
    }

    #[test]
    fn test_outputs_current_compares_mtimes() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.tif");
        let output = dir.path().join("out.tif");
        std::fs::write(&input, b"i").unwrap();
        assert!(!outputs_current(&[&output], &[&input]));

        std::fs::write(&output, b"o").unwrap();
        let now = SystemTime::now();
        touch(&input, now - Duration::from_secs(60));
        touch(&output, now);
        assert!(outputs_current(&[&output], &[&input]));

        touch(&input, now + Duration::from_secs(60));
        assert!(!outputs_current(&[&output], &[&input]));
    }

    #[test]
    fn test_stamp_kept_until_file_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nir.tif");
        std::fs::write(&path, b"nir").unwrap();
        touch(&path, SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000));

        let stored = layer(&path, "2024-01-01T00:00:00.000Z");
        let mut fresh = layer(&path, "2030-01-01T00:00:00.000Z");
        carry_stamp(&mut fresh, &stored);
        assert_eq!(fresh.timestamp(), "2024-01-01T00:00:00.000Z");

        touch(&path, SystemTime::UNIX_EPOCH + Duration::from_secs(1_800_000_000));
        let mut rewritten = layer(&path, "2030-01-01T00:00:00.000Z");
        carry_stamp(&mut rewritten, &stored);
        assert_eq!(rewritten.timestamp(), "2030-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_stamp_not_carried_across_paths() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.tif");
        let b = dir.path().join("b.tif");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();
        let stored = layer(&a, "2999-01-01T00:00:00.000Z");
        let mut moved = layer(&b, "2030-01-01T00:00:00.000Z");
        carry_stamp(&mut moved, &stored);
        assert_eq!(moved.timestamp(), "2030-01-01T00:00:00.000Z");
    }
}
