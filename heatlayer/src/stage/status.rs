//! Per-stage run bookkeeping for the status surface.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use super::{ErrorKind, RunReport, TriggerKind};

/// Outcome of one finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub trigger: TriggerKind,
    /// RFC 3339
    pub started_at: String,
    /// RFC 3339
    pub finished_at: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
}

/// Serializable snapshot of a stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageStatus {
    pub stage: String,
    pub running: bool,
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    /// Triggers dropped because a run was in flight
    pub triggers_skipped: u64,
    /// Notifications about entities outside the watch-list
    pub triggers_ignored: u64,
    pub last_run: Option<RunRecord>,
}

/// Thread-safe counters for one stage.
#[derive(Debug, Default)]
pub struct StatusBoard {
    running: AtomicBool,
    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    triggers_skipped: AtomicU64,
    triggers_ignored: AtomicU64,
    last_run: Mutex<Option<RunRecord>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_started(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn run_finished(&self, record: RunRecord) {
        if record.success {
            self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_run.lock() = Some(record);
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn trigger_skipped(&self) {
        self.triggers_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn trigger_ignored(&self) {
        self.triggers_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, stage: &str) -> StageStatus {
        StageStatus {
            stage: stage.to_string(),
            running: self.running.load(Ordering::SeqCst),
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_succeeded: self.runs_succeeded.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            triggers_skipped: self.triggers_skipped.load(Ordering::Relaxed),
            triggers_ignored: self.triggers_ignored.load(Ordering::Relaxed),
            last_run: self.last_run.lock().clone(),
        }
    }
}
