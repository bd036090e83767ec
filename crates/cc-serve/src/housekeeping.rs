use crate::{build_codecrow, AppState};
use cc_core::{CodeCrowError, RequestContext};
use cc_events::types::EventSource;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub jobs_failed: u64,
    pub deltas_archived: u64,
    pub deltas_purged: u64,
    pub locks_purged: u64,
    pub rate_windows_purged: u64,
}

/// Runs [`sweep`] on the configured interval until the task is dropped.
pub async fn run(state: AppState) {
    let period = Duration::from_secs(state.config.housekeeping.interval_secs.max(1));
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match sweep(&state, EventSource::Scheduler).await {
            Ok(report) if report != SweepReport::default() => {
                tracing::info!(?report, "housekeeping sweep");
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "housekeeping sweep failed"),
        }
    }
}

/// One pass: fail jobs left behind by a lost worker, archive idle and stale
/// deltas, purge archived ones, then drop expired lock leases and closed
/// rate-limit windows.
pub async fn sweep(state: &AppState, source: EventSource) -> Result<SweepReport, CodeCrowError> {
    let ctx = RequestContext::new(source, None);
    let now = Utc::now();
    let indexer = state.orchestrator.indexer();

    let jobs_failed = match ChronoDuration::from_std(state.config.job_deadline())
        .ok()
        .and_then(|deadline| now.checked_sub_signed(deadline))
    {
        Some(cutoff) => build_codecrow(state)?.jobs().fail_stale(&ctx, cutoff)?.len() as u64,
        None => 0,
    };

    let deltas_archived = indexer.archive_inactive(&ctx, now)?.len() as u64;
    let deltas_purged = indexer.purge_archived(&ctx, now).await?;

    let codecrow = build_codecrow(state)?;
    let locks_purged = codecrow.locks().purge_expired()?;
    let retention = ChronoDuration::hours(state.config.commands.retention_hours);
    let rate_windows_purged = codecrow.rate_limits().purge(now - retention)?;

    Ok(SweepReport {
        jobs_failed,
        deltas_archived,
        deltas_purged,
        locks_purged,
        rate_windows_purged,
    })
}
