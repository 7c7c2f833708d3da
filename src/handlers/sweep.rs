use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, Json};
use chrono::Utc;

use crate::engine::sweep::{MissSweep, SweepSummary};
use crate::error::AppResult;
use crate::AppState;

pub async fn trigger_sweep(State(state): State<AppState>) -> AppResult<Json<SweepSummary>> {
    let summary = state.sweep.run(Utc::now().naive_utc()).await?;
    Ok(Json(summary))
}

/// Runs the miss sweep on a fixed interval and prunes expired markers.
pub fn spawn_sweep_worker(sweep: Arc<MissSweep>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;

            match sweep.run(Utc::now().naive_utc()).await {
                Ok(summary) if summary.penalized > 0 || summary.failed > 0 => {
                    tracing::info!(
                        penalized = summary.penalized,
                        failed = summary.failed,
                        deferred = summary.deferred,
                        "Sweep worker: run complete"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Sweep worker: run failed");
                }
            }

            match sweep.prune(Utc::now()).await {
                Ok(n) if n > 0 => {
                    tracing::info!(count = n, "Sweep worker: pruned miss markers");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Sweep worker: prune failed");
                }
            }
        }
    });
}
