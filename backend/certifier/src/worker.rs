//! Long-running background task that finishes ledger recordings.
//!
//! An approval whose ledger commit failed leaves the project `approved`
//! without a recording. Every sweep first appends trail entries that earlier
//! calls could not write, then lists such projects and calls
//! [`WorkflowEngine::commit`] on each one. After a ledger failure the next
//! sweep is delayed by an exponential backoff instead of the regular
//! interval.

use std::sync::Arc;
use std::time::Duration;

use co2_engine::WorkflowEngine;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const INITIAL_BACKOFF_SECS: u64 = 2;
pub const MAX_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub repaired: usize,
    pub recorded: usize,
    pub deferred: usize,
}

/// Run the retry loop until `shutdown` is cancelled.
pub async fn run(engine: Arc<WorkflowEngine>, interval: Duration, shutdown: CancellationToken) {
    info!("Recording worker starting — interval: {}s", interval.as_secs());
    let mut backoff_secs = INITIAL_BACKOFF_SECS;

    loop {
        let delay = match sweep_once(&engine).await {
            Ok(report) if report.deferred == 0 => {
                if report.recorded > 0 {
                    info!("Recorded {} pending approval(s)", report.recorded);
                }
                backoff_secs = INITIAL_BACKOFF_SECS;
                interval
            }
            Ok(report) => {
                warn!(
                    "Ledger unavailable; {} recorded, retrying in {backoff_secs}s",
                    report.recorded
                );
                let delay = Duration::from_secs(backoff_secs);
                backoff_secs = next_backoff(backoff_secs);
                delay
            }
            Err(e) => {
                error!("Recording sweep failed: {e}");
                interval
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    info!("Recording worker stopped");
}

/// Commit every project still awaiting its recording.
///
/// Stops at the first ledger failure; the remaining projects wait for the
/// next sweep.
pub async fn sweep_once(engine: &WorkflowEngine) -> co2_engine::Result<SweepReport> {
    let mut report = SweepReport {
        repaired: engine.flush_unlogged_activities().await?,
        ..SweepReport::default()
    };
    if report.repaired > 0 {
        info!("Appended {} unlogged activities", report.repaired);
    }
    for project in engine.projects_awaiting_recording().await? {
        match engine.commit(project.id).await {
            Ok(recording) => {
                report.recorded += 1;
                info!(
                    project_id = project.id,
                    commit_id = %recording.commit_id,
                    "deferred recording committed"
                );
            }
            Err(e) if e.is_retryable() => {
                report.deferred += 1;
                warn!(project_id = project.id, "ledger commit failed: {e}");
                break;
            }
            Err(e) => {
                warn!(project_id = project.id, "skipping project: {e}");
            }
        }
    }
    Ok(report)
}

fn next_backoff(current_secs: u64) -> u64 {
    (current_secs * 2).min(MAX_BACKOFF_SECS)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
