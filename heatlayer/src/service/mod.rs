//! Service process: one stage behind an HTTP surface.
//!
//! Startup order matters. The map server (publication only) and the
//! entity store must be reachable before the stage subscribes, and one
//! reconciliation runs before the first request is served so a fresh
//! process catches up on anything it missed while down.

mod api;
mod error;
mod reconcile;
mod retry;
mod roles;

pub use api::{router, AppState};
pub use error::{ApiError, ServiceError};
pub use reconcile::Reconciler;
pub use retry::{backoff_delay, with_backoff};
pub use roles::{build_reaction, build_stage, heat_model, Role};

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ConfigFile;
use crate::publish::{GeoServerClient, MapServer};
use crate::stage::{ErrorKind, PipelineError, RunRecord, Stage, Trigger};
use crate::store::{EntityStore, OrionClient, StoreError};
use crate::subscription::{subscription_id, SubscriptionManager};

/// Map-server readiness poll period.
const READY_POLL: Duration = Duration::from_secs(5);

/// Builds the map-server client and waits for it to come up.
async fn connect_map_server(config: &ConfigFile) -> Result<Arc<dyn MapServer>, ServiceError> {
    let settings = &config.map_server;
    let client = GeoServerClient::new(
        &settings.url,
        settings.user.clone(),
        settings.password.clone(),
        Duration::from_secs(settings.timeout_secs),
    )?;
    client
        .wait_until_ready(Duration::from_secs(settings.ready_timeout_secs), READY_POLL)
        .await?;
    client.ensure_workspace(&settings.workspace).await?;
    Ok(Arc::new(client))
}

/// Turns a finished run into a result so startup can retry connectivity failures.
fn record_result(record: RunRecord) -> Result<RunRecord, PipelineError> {
    match (record.success, record.error_kind) {
        (false, Some(ErrorKind::Connectivity)) => Err(PipelineError::Connectivity(
            record.error.unwrap_or_default(),
        )),
        _ => Ok(record),
    }
}

/// Registers the stage's subscription and runs the initial reconciliation,
/// retrying connectivity failures with backoff.
pub async fn prepare_stage(
    stage: &Stage,
    subscriptions: &SubscriptionManager,
    config: &ConfigFile,
) -> Result<(), ServiceError> {
    let retries = config.entity_store.startup_retries;
    let base_delay = config.entity_store.retry_base_delay();

    if let Some(intent) = stage.intent() {
        let id = subscription_id(stage.name());
        let outcome = with_backoff(
            "ensure subscription",
            retries,
            base_delay,
            StoreError::is_transient,
            || subscriptions.ensure(&id, intent),
        )
        .await?;
        info!(stage = stage.name(), subscription = %id, outcome = ?outcome, "Subscription in place");
    }

    let record = with_backoff(
        "initial reconciliation",
        retries,
        base_delay,
        PipelineError::is_transient,
        move || async move { record_result(stage.run(Trigger::Reconcile).await) },
    )
    .await?;
    if record.success {
        info!(stage = stage.name(), "Initial reconciliation complete");
    } else {
        // not fatal: the inputs may simply not exist yet
        warn!(
            stage = stage.name(),
            error = record.error.as_deref().unwrap_or_default(),
            "Initial reconciliation failed"
        );
    }
    Ok(())
}

/// Runs `role` until `shutdown` is cancelled.
pub async fn run_service(
    role: Role,
    config: ConfigFile,
    shutdown: CancellationToken,
) -> Result<(), ServiceError> {
    info!(stage = %role, store = %config.entity_store.url, "Starting service");

    let store: Arc<dyn EntityStore> = Arc::new(OrionClient::new(
        &config.entity_store.url,
        config.entity_store.timeout(),
    )?);
    let server = if role.needs_map_server() {
        Some(connect_map_server(&config).await?)
    } else {
        None
    };

    let stage = build_stage(role, &config, store.clone(), server)?;
    let subscriptions = Arc::new(SubscriptionManager::new(store));
    prepare_stage(&stage, &subscriptions, &config).await?;

    let ticker = config.service.reconcile_interval().map(|period| {
        Reconciler::new(
            stage.clone(),
            subscriptions.clone(),
            subscription_id(role.as_str()),
            period,
            shutdown.clone(),
        )
        .start()
    });

    let listener = TcpListener::bind(&config.service.bind)
        .await
        .map_err(|source| ServiceError::Bind {
            addr: config.service.bind.clone(),
            source,
        })?;
    info!(stage = %role, addr = %config.service.bind, "Listening");

    axum::serve(listener, router(stage))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .map_err(ServiceError::Serve)?;

    shutdown.cancel();
    if let Some(handle) = ticker {
        if let Err(e) = handle.await {
            warn!(error = %e, "Reconciler task ended abnormally");
        }
    }
    info!(stage = %role, "Service stopped");
    Ok(())
}

/// Runs `role` once against the configured services and returns the record.
pub async fn run_once(role: Role, config: &ConfigFile) -> Result<RunRecord, ServiceError> {
    let store: Arc<dyn EntityStore> = Arc::new(OrionClient::new(
        &config.entity_store.url,
        config.entity_store.timeout(),
    )?);
    let server = if role.needs_map_server() {
        Some(connect_map_server(config).await?)
    } else {
        None
    };
    let stage = build_stage(role, config, store, server)?;
    Ok(stage.run(Trigger::Manual).await)
}
