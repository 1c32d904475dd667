//! Periodic reconciliation: re-assert the subscription and re-run the
//! stage so missed notifications are eventually covered.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stage::{Stage, Trigger};
use crate::subscription::SubscriptionManager;

/// Ticker that reconciles one stage every `period`.
pub struct Reconciler {
    stage: Arc<Stage>,
    subscriptions: Arc<SubscriptionManager>,
    subscription_id: String,
    period: Duration,
    shutdown: CancellationToken,
}

impl Reconciler {
    pub fn new(
        stage: Arc<Stage>,
        subscriptions: Arc<SubscriptionManager>,
        subscription_id: impl Into<String>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            stage,
            subscriptions,
            subscription_id: subscription_id.into(),
            period,
            shutdown,
        }
    }

    /// Spawns the loop; it ends when the shutdown token is cancelled.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        info!(
            stage = self.stage.name(),
            period_secs = self.period.as_secs(),
            "Reconciler started"
        );

        // startup already reconciled once
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }

        info!(stage = self.stage.name(), "Reconciler stopped");
    }

    async fn tick(&self) {
        if let Some(intent) = self.stage.intent() {
            if let Err(e) = self.subscriptions.ensure(&self.subscription_id, intent).await {
                warn!(stage = self.stage.name(), error = %e, "Could not re-assert subscription");
            }
        }

        match self.stage.try_run(Trigger::Reconcile).await {
            None => debug!(stage = self.stage.name(), "Run in progress; reconcile skipped"),
            Some(record) if record.success => {
                debug!(stage = self.stage.name(), "Reconcile run succeeded")
            }
            Some(record) => warn!(
                stage = self.stage.name(),
                error = record.error.as_deref().unwrap_or_default(),
                "Reconcile run failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use crate::stage::{PipelineError, Reaction, RunReport};
    use crate::store::{EntityStore, MemoryEntityStore};
    use crate::subscription::{EntitySelector, SubscriptionIntent};
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        runs: AtomicUsize,
        intent: SubscriptionIntent,
    }

    impl Reaction for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn intent(&self) -> Option<&SubscriptionIntent> {
            Some(&self.intent)
        }

        fn execute<'a>(&'a self, _trigger: &'a Trigger) -> BoxFuture<'a, Result<RunReport, PipelineError>> {
            Box::pin(async move {
                self.runs.fetch_add(1, Ordering::SeqCst);
                Ok(RunReport::default())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_cancelled() {
        let reaction = Arc::new(Counting {
            runs: AtomicUsize::new(0),
            intent: SubscriptionIntent::new(
                [EntitySelector::of_type(EntityType::UhiHeatMap)],
                ["filePath"],
                "http://stage/react",
            ),
        });
        let store = Arc::new(MemoryEntityStore::new());
        let manager = Arc::new(SubscriptionManager::new(store.clone() as Arc<dyn EntityStore>));
        let stage = Arc::new(Stage::new(reaction.clone()));
        let token = CancellationToken::new();

        let handle = Reconciler::new(stage.clone(), manager, "sub", Duration::from_secs(10), token.clone())
            .start();

        tokio::time::sleep(Duration::from_secs(35)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(reaction.runs.load(Ordering::SeqCst), 3);
        assert_eq!(store.subscription_count(), 1);
        assert_eq!(stage.status().runs_started, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_outage_does_not_stop_loop() {
        let reaction = Arc::new(Counting {
            runs: AtomicUsize::new(0),
            intent: SubscriptionIntent::new(
                [EntitySelector::of_type(EntityType::GeoSpatialLayer)],
                ["filePath"],
                "http://stage/react",
            ),
        });
        let store = Arc::new(MemoryEntityStore::new());
        store.set_offline(true);
        let manager = Arc::new(SubscriptionManager::new(store.clone() as Arc<dyn EntityStore>));
        let token = CancellationToken::new();
        let handle = Reconciler::new(
            Arc::new(Stage::new(reaction.clone())),
            manager,
            "sub",
            Duration::from_secs(5),
            token.clone(),
        )
        .start();

        tokio::time::sleep(Duration::from_secs(11)).await;
        store.set_offline(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(reaction.runs.load(Ordering::SeqCst), 3);
        assert_eq!(store.subscription_count(), 1);
    }
}
