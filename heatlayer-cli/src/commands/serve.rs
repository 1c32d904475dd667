//! `serve <role>` and `run <role>`.

use heatlayer::service::{run_once, run_service, Role};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Serves `role` until SIGINT or SIGTERM.
pub fn run_serve(runner: CliRunner, role: Role) -> Result<(), CliError> {
    runner.log_startup(&format!("serve {}", role));
    let config = runner.config().clone();

    let rt = CliRunner::runtime()?;
    rt.block_on(async move {
        let shutdown = CancellationToken::new();
        tokio::spawn(cancel_on_signal(shutdown.clone()));
        run_service(role, config, shutdown).await
    })?;
    Ok(())
}

/// Runs `role` once and prints the run record as JSON.
pub fn run_once_command(runner: CliRunner, role: Role) -> Result<(), CliError> {
    runner.log_startup(&format!("run {}", role));

    let rt = CliRunner::runtime()?;
    let record = rt.block_on(run_once(role, runner.config()))?;

    match serde_json::to_string_pretty(&record) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!(error = %e, "Could not render run record"),
    }
    if record.success {
        Ok(())
    } else {
        Err(CliError::RunFailed {
            stage: role.to_string(),
            message: record.error.unwrap_or_default(),
        })
    }
}

async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
    token.cancel();
}
