//! The run loop: persists newly-resolved entries, filters out entries with
//! no remaining work, and drives the rest through a bounded worker pool.
//! One worker owns one entry end-to-end; there is no cross-entry ordering.

use crate::stages::{needs_work, process_entry, reset_failed_stages, ProcessOutcome, WorkItem};
use crate::{Context, Error};
use dedup::ResolvedEntry;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Counters reported at the end of a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    /// Entries resolved from the input.
    pub total: usize,
    /// Entries that still had work and were scheduled.
    pub scheduled: usize,
    /// Entries whose stages all completed or terminally failed earlier.
    pub skipped: usize,
    pub processed: usize,
    /// Entries interrupted by cancellation; they resume from pending.
    pub aborted: usize,
    /// Entries that hit an infrastructure error (repository or state file).
    pub errors: usize,
    /// Entries that finished this run with at least one failed stage.
    pub with_failures: usize,
    pub cancelled: bool,
}

/// Run the pipeline over the resolved input until it drains or the
/// cancellation token fires.
pub async fn run_pipeline(
    ctx: Arc<Context>,
    resolved: Vec<ResolvedEntry>,
    cancel: CancellationToken,
) -> Result<RunSummary, Error> {
    let retry_cap = ctx.config.per_stage_retries;
    let mut summary = RunSummary::default();
    let mut work = Vec::new();

    // Creation and `--reprocess` resets are durable before any worker runs.
    for item in resolved {
        let mut entry = item.entry;
        summary.total += 1;

        if item.is_new {
            ctx.store.upsert(&entry.to_map_record())?;
        } else if ctx.options.reprocess && reset_failed_stages(&mut entry) {
            ctx.store.upsert(&entry.to_map_record())?;
        }

        if needs_work(&entry.to_map_record(), &ctx.options, retry_cap) {
            work.push(WorkItem {
                entry,
                seed: item.seed_metadata,
            });
        } else {
            summary.skipped += 1;
        }
    }
    summary.scheduled = work.len();
    tracing::info!(
        total = summary.total,
        scheduled = summary.scheduled,
        skipped = summary.skipped,
        workers = ctx.config.batch_size,
        "starting pipeline"
    );

    let mut outcomes = futures::stream::iter(work.into_iter().map(|item| {
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        async move { process_entry(&ctx, item, &cancel).await }
    }))
    .buffer_unordered(ctx.config.batch_size.max(1));

    while let Some(outcome) = outcomes.next().await {
        summary.processed += 1;
        match outcome {
            Ok(ProcessOutcome::Completed(entry)) => {
                if entry.status.any_failed() {
                    summary.with_failures += 1;
                }
            }
            Ok(ProcessOutcome::Aborted) => {
                summary.aborted += 1;
                summary.cancelled = true;
            }
            Err(err) => {
                // One entry's infrastructure failure never stops the run.
                summary.errors += 1;
                tracing::error!(?err, "entry processing failed");
            }
        }
        if summary.processed % 500 == 0 {
            tracing::info!(
                processed = summary.processed,
                scheduled = summary.scheduled,
                failures = summary.with_failures,
                "pipeline progress"
            );
            ctx.store.compact_if_needed()?;
        }
    }
    drop(outcomes);

    ctx.store.compact_if_needed()?;
    tracing::info!(
        processed = summary.processed,
        aborted = summary.aborted,
        failures = summary.with_failures,
        cancelled = summary.cancelled,
        "pipeline drained"
    );
    Ok(summary)
}
