//! Reactive pipeline stages.
//!
//! A [`Stage`] wraps one [`Reaction`] (ingestion, index, prediction or
//! publication) with the machinery every stage shares:
//!
//! - notifications about entities outside the reaction's watch-list are
//!   ignored without running anything
//! - a single-slot [`RunGuard`] keeps at most one run in flight; a
//!   notification arriving while it is held is dropped, not queued
//! - manual and reconciliation runs wait for the slot instead
//! - every finished run is recorded on the [`StatusBoard`]
//!
//! Reactions are pure functions of current entity state, so redundant
//! triggering is always safe and a reconciliation run converges whatever
//! notifications were lost.

mod error;
mod freshness;
mod guard;
mod index;
mod ingestion;
mod prediction;
mod publication;
mod source;
mod status;

pub use error::{ErrorKind, PipelineError};
pub use guard::{RunGuard, RunPermit};
pub use index::{IndexBands, IndexReaction};
pub use ingestion::IngestionReaction;
pub use prediction::PredictionReaction;
pub use publication::PublicationReaction;
pub use source::{DirectorySource, RawSource};
pub use status::{RunRecord, StageStatus, StatusBoard};

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::entity::{Entity, EntityId, NotificationEvent};
use crate::raster::{self, RasterReader};
use crate::store::EntityStore;
use crate::subscription::SubscriptionIntent;

/// What started a run.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Change notification from the entity store
    Notification(NotificationEvent),
    /// Operator request
    Manual,
    /// Periodic or requested sync-all
    Reconcile,
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::Notification(_) => TriggerKind::Notification,
            Trigger::Manual => TriggerKind::Manual,
            Trigger::Reconcile => TriggerKind::Reconcile,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Notification,
    Manual,
    Reconcile,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Notification => "notification",
            TriggerKind::Manual => "manual",
            TriggerKind::Reconcile => "reconcile",
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    /// Raster files written
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<PathBuf>,
    /// Entities created or replaced, in write order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityId>,
    /// Map layers upserted, as `workspace:layer`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub published: Vec<String>,
    /// Entities looked at but left alone
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<EntityId>,
}

/// The stage-specific part of a run.
pub trait Reaction: Send + Sync {
    /// Stage name used in logs, status and the subscription id.
    fn name(&self) -> &str;

    /// Subscription this reaction is driven by, if any.
    fn intent(&self) -> Option<&SubscriptionIntent>;

    /// Performs one run from current entity state.
    fn execute<'a>(&'a self, trigger: &'a Trigger) -> BoxFuture<'a, Result<RunReport, PipelineError>>;
}

/// Result of handing a notification to a stage.
#[derive(Debug)]
pub enum ReactOutcome {
    /// No entity in the notification is on the watch-list
    Ignored,
    /// A run was already in flight; the notification was dropped
    Skipped,
    /// A run was started in the background
    Accepted(JoinHandle<RunRecord>),
}

/// One reaction plus its guard and status.
pub struct Stage {
    reaction: Arc<dyn Reaction>,
    guard: RunGuard,
    status: StatusBoard,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.reaction.name())
            .field("running", &self.guard.is_held())
            .finish()
    }
}

impl Stage {
    pub fn new(reaction: Arc<dyn Reaction>) -> Self {
        Self {
            reaction,
            guard: RunGuard::new(),
            status: StatusBoard::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.reaction.name()
    }

    pub fn intent(&self) -> Option<&SubscriptionIntent> {
        self.reaction.intent()
    }

    /// True if any entity in `event` is on this stage's watch-list.
    pub fn is_relevant(&self, event: &NotificationEvent) -> bool {
        match self.intent() {
            Some(intent) => event
                .entity_refs()
                .iter()
                .any(|r| intent.admits(&r.entity_type, &r.id)),
            None => false,
        }
    }

    /// Notification entry point: filter, then run unless a run is in flight.
    pub fn react(self: &Arc<Self>, event: NotificationEvent) -> ReactOutcome {
        if !self.is_relevant(&event) {
            self.status.trigger_ignored();
            debug!(stage = self.name(), "Notification outside watch-list ignored");
            return ReactOutcome::Ignored;
        }
        let Some(permit) = self.guard.try_enter() else {
            self.status.trigger_skipped();
            info!(stage = self.name(), "Run in progress; notification dropped");
            return ReactOutcome::Skipped;
        };
        let stage = Arc::clone(self);
        ReactOutcome::Accepted(tokio::spawn(async move {
            stage.execute(permit, Trigger::Notification(event)).await
        }))
    }

    /// Runs now, waiting for an in-flight run to finish first.
    pub async fn run(&self, trigger: Trigger) -> RunRecord {
        let started_at = timestamp();
        match self.guard.enter().await {
            Ok(permit) => self.execute(permit, trigger).await,
            Err(e) => self.failed(trigger.kind(), started_at, e),
        }
    }

    /// Runs unless a run is in flight.
    pub async fn try_run(&self, trigger: Trigger) -> Option<RunRecord> {
        match self.guard.try_enter() {
            Some(permit) => Some(self.execute(permit, trigger).await),
            None => {
                self.status.trigger_skipped();
                debug!(stage = self.name(), trigger = trigger.kind().as_str(), "Run in progress; skipped");
                None
            }
        }
    }

    pub fn status(&self) -> StageStatus {
        self.status.snapshot(self.name())
    }

    async fn execute(&self, _permit: RunPermit, trigger: Trigger) -> RunRecord {
        let kind = trigger.kind();
        let started_at = timestamp();
        self.status.run_started();
        info!(stage = self.name(), trigger = kind.as_str(), "Run started");

        let record = match self.reaction.execute(&trigger).await {
            Ok(report) => {
                info!(
                    stage = self.name(),
                    outputs = report.outputs.len(),
                    entities = report.entities.len(),
                    published = report.published.len(),
                    "Run succeeded"
                );
                RunRecord {
                    trigger: kind,
                    started_at,
                    finished_at: timestamp(),
                    success: true,
                    error_kind: None,
                    error: None,
                    report: Some(report),
                }
            }
            Err(e) => return self.failed(kind, started_at, e),
        };
        self.status.run_finished(record.clone());
        record
    }

    fn failed(&self, trigger: TriggerKind, started_at: String, e: PipelineError) -> RunRecord {
        error!(
            stage = self.name(),
            trigger = trigger.as_str(),
            kind = e.kind().as_str(),
            error = %e,
            "Run failed"
        );
        let record = RunRecord {
            trigger,
            started_at,
            finished_at: timestamp(),
            success: false,
            error_kind: Some(e.kind()),
            error: Some(e.to_string()),
            report: None,
        };
        self.status.run_finished(record.clone());
        record
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Fetches an entity that must be a layer file on disk.
async fn resolve_input(store: &dyn EntityStore, id: &EntityId) -> Result<Entity, PipelineError> {
    let entity = store.get(id).await?;
    let path = entity.file_path();
    if !path.is_file() {
        return Err(PipelineError::NotFound(format!(
            "{} references {} which does not exist",
            id,
            path.display()
        )));
    }
    debug!(entity_id = %id, path = %path.display(), "Input resolved");
    Ok(entity)
}

/// Footprint of a freshly written raster.
fn output_footprint(path: &std::path::Path) -> Result<Option<crate::coord::GeoPolygon>, PipelineError> {
    let reader = RasterReader::open(path)?;
    Ok(raster::footprint(&reader))
}

#[cfg(test)]
mod tests;
