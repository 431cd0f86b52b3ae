//! Per-entry stage execution. Within one Entry, stages run strictly in
//! order, and a stage's state is durably written before the next stage may
//! begin. Failures land on the Entry's status; they never propagate out of
//! the worker as errors.

use crate::{thumbnail, Context, Error, RunOptions};
use bytes::Bytes;
use clients::{assemble_candidates, Failure, StructuringOptions};
use exponential_backoff::Backoff;
use models::{
    BiblioMetadata, CandidateUrl, Entry, FailureReason, Identifiers, MapRecord, Stage, StageStatus,
};
use repository::EntryPaths;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One scheduled unit of pipeline work.
pub struct WorkItem {
    pub entry: Entry,
    pub seed: Option<BiblioMetadata>,
}

pub enum ProcessOutcome {
    /// The entry ran to the end of its reachable stages.
    Completed(Box<Entry>),
    /// Cancellation interrupted the entry; its in-flight stage was demoted
    /// to pending.
    Aborted,
}

enum StageResult {
    Success,
    Failed,
    Cancelled,
}

/// The per-entry `<id>.json` artifact: the consolidated metadata record
/// plus the derived candidate URLs, so a resumed run can pick up past the
/// metadata stage without re-querying any service.
#[derive(Debug, Serialize, Deserialize)]
struct MetadataDocument {
    id: String,
    identifiers: Identifiers,
    metadata: Option<BiblioMetadata>,
    #[serde(default)]
    candidate_urls: Vec<CandidateUrl>,
}

/// Whether a stage in this state should execute. Failed stages re-run only
/// while their failure is retryable and the attempt budget remains;
/// `--reprocess` resets them to pending beforehand instead.
pub fn stage_should_run(status: &StageStatus, attempts: u32, retry_cap: u32) -> bool {
    match status {
        StageStatus::Pending | StageStatus::InProgress => true,
        StageStatus::Success { .. } => false,
        StageStatus::Failed { reason } => reason.is_retryable() && attempts < retry_cap,
    }
}

/// Whether any reachable stage of this entry still has work.
pub fn needs_work(record: &MapRecord, options: &RunOptions, retry_cap: u32) -> bool {
    let status = &record.status;
    if stage_should_run(&status.metadata, record.attempts.metadata, retry_cap) {
        return true;
    }
    if !status.metadata.is_success() {
        // Metadata failed terminally; nothing downstream can run.
        return false;
    }
    let pdf_runnable = stage_should_run(&status.pdf, record.attempts.pdf, retry_cap);
    if pdf_runnable {
        return true;
    }
    if record.identifiers.pmcid.is_some()
        && stage_should_run(&status.jats, record.attempts.jats, retry_cap)
    {
        return true;
    }
    if options.grobid
        && (record.artifacts.pdf || pdf_runnable)
        && stage_should_run(&status.tei_pdf, record.attempts.tei_pdf, retry_cap)
    {
        return true;
    }
    false
}

/// Reset failed stages (status and attempts) ahead of `--reprocess`.
/// Successful stages are left intact.
pub fn reset_failed_stages(entry: &mut Entry) -> bool {
    let mut changed = false;
    for stage in Stage::ALL {
        if entry.status.get(stage).is_failed() {
            entry.status.set(stage, StageStatus::Pending);
            entry.attempts.reset(stage);
            changed = true;
        }
    }
    changed
}

/// Drive one entry through its reachable stages.
pub async fn process_entry(
    ctx: &Context,
    work: WorkItem,
    cancel: &CancellationToken,
) -> Result<ProcessOutcome, Error> {
    let WorkItem { mut entry, seed } = work;
    let paths = EntryPaths::new(&entry.id);
    let retry_cap = ctx.config.per_stage_retries;

    if cancel.is_cancelled() {
        return Ok(ProcessOutcome::Aborted);
    }

    // ---- metadata ----
    if stage_should_run(&entry.status.metadata, entry.attempts.metadata, retry_cap) {
        match run_metadata(ctx, &mut entry, seed.as_ref(), &paths, cancel).await? {
            StageResult::Success => {}
            // A failed metadata stage terminates the entry: there is
            // nothing to fetch without it.
            StageResult::Failed => return Ok(ProcessOutcome::Completed(Box::new(entry))),
            StageResult::Cancelled => return Ok(ProcessOutcome::Aborted),
        }
    } else if entry.metadata.is_none() {
        restore_metadata(ctx, &mut entry, seed.as_ref(), &paths).await?;
    }

    // ---- pdf ----
    let mut pdf_bytes = None;
    if stage_should_run(&entry.status.pdf, entry.attempts.pdf, retry_cap) {
        match run_pdf(ctx, &mut entry, &paths, cancel).await? {
            (StageResult::Cancelled, _) => return Ok(ProcessOutcome::Aborted),
            (_, bytes) => pdf_bytes = bytes,
        }
    }

    if ctx.options.thumbnail && !entry.artifacts.thumbnails && entry.artifacts.pdf {
        let bytes = match pdf_bytes.clone() {
            Some(bytes) => Some(bytes),
            None => ctx.repository.get(&paths.pdf()).await?,
        };
        if let Some(bytes) = bytes {
            run_thumbnails(ctx, &mut entry, &paths, bytes).await?;
        }
    }

    // ---- jats (best effort) ----
    if stage_should_run(&entry.status.jats, entry.attempts.jats, retry_cap) {
        if let StageResult::Cancelled = run_jats(ctx, &mut entry, &paths, cancel).await? {
            return Ok(ProcessOutcome::Aborted);
        }
    }

    // ---- tei from pdf ----
    if ctx.structuring.is_some()
        && entry.artifacts.pdf
        && stage_should_run(&entry.status.tei_pdf, entry.attempts.tei_pdf, retry_cap)
    {
        if let StageResult::Cancelled =
            run_tei_pdf(ctx, &mut entry, &paths, cancel, pdf_bytes).await?
        {
            return Ok(ProcessOutcome::Aborted);
        }
    }

    Ok(ProcessOutcome::Completed(Box::new(entry)))
}

async fn run_metadata(
    ctx: &Context,
    entry: &mut Entry,
    seed: Option<&BiblioMetadata>,
    paths: &EntryPaths,
    cancel: &CancellationToken,
) -> Result<StageResult, Error> {
    mark_in_progress(ctx, entry, Stage::Metadata)?;

    let identifiers = entry.identifiers.clone();
    let enriched = guarded(cancel, ctx.config.grace(), async {
        ctx.metadata.enrich(&identifiers, seed).await
    })
    .await;

    let Some(result) = enriched else {
        return demote(ctx, entry, Stage::Metadata).map(|()| StageResult::Cancelled);
    };
    entry.attempts.bump(Stage::Metadata);

    match result {
        Ok(enrichment) => {
            let pmc_archive = entry
                .identifiers
                .normalized_pmcid()
                .and_then(|pmcid| ctx.fetcher.pmc_archive_url(&pmcid));
            let mirror = entry
                .identifiers
                .pii
                .as_ref()
                .and_then(|pii| ctx.fetcher.publisher_mirror_path(pii));
            entry.candidate_urls =
                assemble_candidates(&enrichment, pmc_archive, mirror.as_deref());
            entry.has_oa_url = enrichment.metadata.oa_url.is_some();
            entry.metadata = Some(enrichment.metadata);

            write_metadata_document(ctx, entry, paths).await?;
            entry.status.set(Stage::Metadata, StageStatus::success());
            persist(ctx, entry)?;
            Ok(StageResult::Success)
        }
        Err(failure) => fail_stage(ctx, entry, Stage::Metadata, failure),
    }
}

/// A resumed entry has a durable metadata stage but an empty in-memory
/// record; restore it from the `<id>.json` artifact.
async fn restore_metadata(
    ctx: &Context,
    entry: &mut Entry,
    seed: Option<&BiblioMetadata>,
    paths: &EntryPaths,
) -> Result<(), Error> {
    if let Some(bytes) = ctx.repository.get(&paths.metadata_json()).await? {
        match serde_json::from_slice::<MetadataDocument>(&bytes) {
            Ok(document) => {
                entry.metadata = document.metadata;
                entry.candidate_urls = document.candidate_urls;
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(entry = %entry.id, ?err, "unreadable metadata document");
            }
        }
    }

    // The artifact is gone; rebuild it without touching the stage status.
    tracing::warn!(entry = %entry.id, "metadata document missing; re-deriving");
    match ctx.metadata.enrich(&entry.identifiers, seed).await {
        Ok(enrichment) => {
            let pmc_archive = entry
                .identifiers
                .normalized_pmcid()
                .and_then(|pmcid| ctx.fetcher.pmc_archive_url(&pmcid));
            let mirror = entry
                .identifiers
                .pii
                .as_ref()
                .and_then(|pii| ctx.fetcher.publisher_mirror_path(pii));
            entry.candidate_urls =
                assemble_candidates(&enrichment, pmc_archive, mirror.as_deref());
            entry.metadata = Some(enrichment.metadata);
            write_metadata_document(ctx, entry, paths).await?;
        }
        Err(failure) => {
            tracing::warn!(entry = %entry.id, %failure, "re-derivation failed");
        }
    }
    Ok(())
}

async fn run_pdf(
    ctx: &Context,
    entry: &mut Entry,
    paths: &EntryPaths,
    cancel: &CancellationToken,
) -> Result<(StageResult, Option<Bytes>), Error> {
    mark_in_progress(ctx, entry, Stage::Pdf)?;

    let id = entry.id.clone();
    let candidates = entry.candidate_urls.clone();
    let outcome = guarded(
        cancel,
        ctx.config.grace(),
        with_retries(ctx, || ctx.fetcher.fetch_pdf(&id, &candidates)),
    )
    .await;

    let Some((result, attempts)) = outcome else {
        return demote(ctx, entry, Stage::Pdf).map(|()| (StageResult::Cancelled, None));
    };
    entry.attempts.add(Stage::Pdf, attempts);

    match result {
        Ok((bytes, source)) => {
            ctx.repository.put(&paths.pdf(), bytes.clone()).await?;
            entry.artifacts.pdf = true;
            entry.status.set(Stage::Pdf, StageStatus::success());
            persist(ctx, entry)?;
            tracing::info!(entry = %entry.id, %source, bytes = bytes.len(), "pdf stored");
            Ok((StageResult::Success, Some(bytes)))
        }
        Err(failure) => {
            // An empty candidate list means enrichment found no OA URL.
            let failure = if failure.reason == FailureReason::NoUrl {
                Failure::terminal(FailureReason::NoOaUrl, failure.detail)
            } else {
                failure
            };
            fail_stage(ctx, entry, Stage::Pdf, failure).map(|result| (result, None))
        }
    }
}

async fn run_jats(
    ctx: &Context,
    entry: &mut Entry,
    paths: &EntryPaths,
    cancel: &CancellationToken,
) -> Result<StageResult, Error> {
    let Some(pmcid) = entry.identifiers.normalized_pmcid() else {
        // No PMCID, no JATS; terminal but not a pipeline failure.
        entry
            .status
            .set(Stage::Jats, StageStatus::failed(FailureReason::NoUrl));
        persist(ctx, entry)?;
        return Ok(StageResult::Failed);
    };

    mark_in_progress(ctx, entry, Stage::Jats)?;

    let outcome = guarded(
        cancel,
        ctx.config.grace(),
        with_retries(ctx, || ctx.fetcher.fetch_jats(&pmcid)),
    )
    .await;

    let Some((result, attempts)) = outcome else {
        return demote(ctx, entry, Stage::Jats).map(|()| StageResult::Cancelled);
    };
    entry.attempts.add(Stage::Jats, attempts);

    match result {
        Ok(bytes) => {
            ctx.repository.put(&paths.nxml(), bytes.clone()).await?;
            entry.artifacts.jats = true;
            entry.status.set(Stage::Jats, StageStatus::success());
            persist(ctx, entry)?;
            tracing::info!(entry = %entry.id, bytes = bytes.len(), "jats stored");
            Ok(StageResult::Success)
        }
        Err(failure) => fail_stage(ctx, entry, Stage::Jats, failure),
    }
}

async fn run_tei_pdf(
    ctx: &Context,
    entry: &mut Entry,
    paths: &EntryPaths,
    cancel: &CancellationToken,
    pdf_bytes: Option<Bytes>,
) -> Result<StageResult, Error> {
    let client = ctx
        .structuring
        .as_ref()
        .expect("tei_pdf stage runs only with a structuring client");

    // Reuse the bytes fetched moments ago; a resumed entry reads them back.
    let pdf = match pdf_bytes {
        Some(bytes) => bytes,
        None => match ctx.repository.get(&paths.pdf()).await? {
            Some(bytes) => bytes,
            None => {
                tracing::warn!(entry = %entry.id, "pdf artifact missing for structuring");
                return fail_stage(
                    ctx,
                    entry,
                    Stage::TeiPdf,
                    Failure::terminal(FailureReason::StructuringFailed, "pdf artifact missing"),
                );
            }
        },
    };

    mark_in_progress(ctx, entry, Stage::TeiPdf)?;

    let options = StructuringOptions {
        consolidate_citations: ctx.options.annotation,
        coordinates: ctx.options.annotation,
        segment_sentences: true,
    };
    let outcome = guarded(
        cancel,
        ctx.config.grace(),
        with_retries(ctx, || client.pdf_to_tei(pdf.clone(), options)),
    )
    .await;

    let Some((result, attempts)) = outcome else {
        return demote(ctx, entry, Stage::TeiPdf).map(|()| StageResult::Cancelled);
    };
    entry.attempts.add(Stage::TeiPdf, attempts);

    match result {
        Ok(output) => {
            ctx.repository.put(&paths.grobid_tei(), output.tei).await?;
            entry.artifacts.tei_from_pdf = true;
            entry.status.set(
                Stage::TeiPdf,
                StageStatus::Success {
                    has_warnings: output.has_warnings,
                },
            );
            persist(ctx, entry)?;

            if ctx.options.annotation && !entry.artifacts.ref_annotations {
                match client.reference_annotations(pdf).await {
                    Ok(annotations) => {
                        ctx.repository
                            .put(&paths.ref_annotations(), annotations)
                            .await?;
                        entry.artifacts.ref_annotations = true;
                        persist(ctx, entry)?;
                    }
                    Err(failure) => {
                        tracing::warn!(entry = %entry.id, %failure, "reference annotations failed");
                    }
                }
            }
            Ok(StageResult::Success)
        }
        Err(failure) => fail_stage(ctx, entry, Stage::TeiPdf, failure),
    }
}

async fn run_thumbnails(
    ctx: &Context,
    entry: &mut Entry,
    paths: &EntryPaths,
    pdf: Bytes,
) -> Result<(), Error> {
    match thumbnail::generate_thumbnails(&ctx.config.thumbnail_tool, &pdf).await {
        Ok(rendered) => {
            for (size, png) in rendered {
                ctx.repository
                    .put(&paths.thumbnail(size), Bytes::from(png))
                    .await?;
            }
            entry.artifacts.thumbnails = true;
            persist(ctx, entry)?;
        }
        Err(err) => {
            tracing::warn!(entry = %entry.id, %err, "thumbnail generation failed");
        }
    }
    Ok(())
}

async fn write_metadata_document(
    ctx: &Context,
    entry: &Entry,
    paths: &EntryPaths,
) -> Result<(), Error> {
    let document = MetadataDocument {
        id: entry.id.clone(),
        identifiers: entry.identifiers.clone(),
        metadata: entry.metadata.clone(),
        candidate_urls: entry.candidate_urls.clone(),
    };
    let bytes = serde_json::to_vec_pretty(&document).expect("metadata document serializes");
    ctx.repository
        .put(&paths.metadata_json(), Bytes::from(bytes))
        .await?;
    Ok(())
}

/// Execute a retryable operation up to the configured per-stage budget,
/// with exponential backoff between attempts. Returns the outcome and the
/// number of attempts consumed.
async fn with_retries<T, F, Fut>(ctx: &Context, mut op: F) -> (Result<T, Failure>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let backoff = Backoff::new(
        ctx.config.per_stage_retries,
        Duration::from_millis(500),
        Some(ctx.config.max_backoff()),
    );
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return (Ok(value), attempt),
            Err(failure) if failure.is_retryable() => match backoff.next(attempt) {
                Some(delay) => {
                    tracing::debug!(%failure, attempt, ?delay, "stage attempt failed; backing off");
                    tokio::time::sleep(delay).await;
                }
                None => return (Err(failure), attempt),
            },
            Err(failure) => return (Err(failure), attempt),
        }
    }
}

/// Run `fut` under the global cancellation signal. On cancellation the
/// in-flight call gets a short grace window to finish; None means it was
/// abandoned.
async fn guarded<T>(
    cancel: &CancellationToken,
    grace: Duration,
    fut: impl Future<Output = T>,
) -> Option<T> {
    tokio::pin!(fut);
    tokio::select! {
        result = &mut fut => Some(result),
        () = cancel.cancelled() => match tokio::time::timeout(grace, &mut fut).await {
            Ok(result) => Some(result),
            Err(_elapsed) => None,
        },
    }
}

fn mark_in_progress(ctx: &Context, entry: &mut Entry, stage: Stage) -> Result<(), Error> {
    entry.status.set(stage, StageStatus::InProgress);
    persist(ctx, entry)
}

fn demote(ctx: &Context, entry: &mut Entry, stage: Stage) -> Result<(), Error> {
    entry.status.set(stage, StageStatus::Pending);
    persist(ctx, entry)
}

fn fail_stage(
    ctx: &Context,
    entry: &mut Entry,
    stage: Stage,
    failure: Failure,
) -> Result<StageResult, Error> {
    tracing::warn!(entry = %entry.id, %stage, %failure, "stage failed");
    entry.status.set(stage, StageStatus::failed(failure.reason));
    persist(ctx, entry)?;
    Ok(StageResult::Failed)
}

fn persist(ctx: &Context, entry: &Entry) -> Result<(), Error> {
    ctx.store.upsert(&entry.to_map_record())?;
    Ok(())
}
