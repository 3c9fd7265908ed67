//! harbor-sync - push queued offline writes to the remote service.
//!
//! Opens the local store named by the configuration, replays every queued
//! operation and exits non-zero when any collection could not be fully
//! pushed.

use harbor_client::{CancelToken, Client, Config};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "harbor_client=debug,harbor_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    if !config.store_path.exists() {
        tracing::info!(path = %config.store_path.display(), "No local store, nothing to push");
        return Ok(ExitCode::SUCCESS);
    }

    let client = Client::builder(config).existing_store().build()?;
    let pending = client.pending().count(None)?;
    tracing::info!(pending, "Pushing queued operations");

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping push");
            on_interrupt.cancel();
        }
    });

    let reports = client.sync().push_all(&cancel).await?;

    let mut halted = 0;
    for report in &reports {
        for failure in &report.failures {
            tracing::warn!(
                collection = %report.collection,
                request_id = %failure.operation.request_id,
                error = %failure.error,
                "Operation rejected"
            );
        }
        if let Some(error) = &report.halted {
            halted += 1;
            tracing::error!(
                collection = %report.collection,
                remaining = report.remaining,
                error = %error,
                "Push halted"
            );
        }
    }

    tracing::info!(collections = reports.len(), halted, "Push complete");
    Ok(if halted == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
