//! The reverse transform pass: find every entry holding a JATS artifact but
//! no TEI-from-JATS, stage the JATS files into a working directory, and run
//! the batch transformer over them. The transformer is far faster batched
//! than per-document, so work proceeds in checkpointed batches and the
//! state store is updated per entry as outputs come back.

use crate::subprocess::run_with_deadline;
use crate::{Context, Error};
use bytes::Bytes;
use models::{FailureReason, Stage, StageStatus};
use repository::EntryPaths;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Checkpoint granularity: state is durable after each batch of this size.
const BATCH_SIZE: usize = 1000;

/// The transform itself is unbounded in aggregate; each batch gets a
/// generous deadline so a wedged transformer cannot hang the pass forever.
const BATCH_DEADLINE: Duration = Duration::from_secs(3600);

#[derive(Debug, Default, Clone, Copy)]
pub struct ReverseSummary {
    /// Entries with a JATS artifact and no TEI-from-JATS.
    pub candidates: usize,
    pub transformed: usize,
    pub failed: usize,
}

pub async fn run_reverse_pass(
    ctx: &Context,
    cancel: &CancellationToken,
) -> Result<ReverseSummary, Error> {
    let transformer = ctx.config.jats_transformer_path.clone().ok_or_else(|| {
        Error::Setup("jats_transformer_path is not configured".to_string())
    })?;

    let mut pending: Vec<_> = ctx
        .store
        .snapshot()
        .into_iter()
        .filter(|record| record.artifacts.jats && !record.artifacts.tei_from_jats)
        .collect();
    // Deterministic batch composition across resumed passes.
    pending.sort_by(|a, b| a.id.cmp(&b.id));

    let mut summary = ReverseSummary {
        candidates: pending.len(),
        ..Default::default()
    };
    tracing::info!(candidates = summary.candidates, "starting reverse transform pass");

    for batch in pending.chunks_mut(BATCH_SIZE) {
        if cancel.is_cancelled() {
            tracing::info!("reverse pass cancelled between batches");
            break;
        }

        let staging = tempfile::tempdir()?;
        let input_dir = staging.path().join("in");
        let output_dir = staging.path().join("out");
        tokio::fs::create_dir_all(&input_dir).await?;
        tokio::fs::create_dir_all(&output_dir).await?;

        // Stage this batch's JATS files.
        let mut staged = Vec::new();
        for record in batch.iter() {
            let paths = EntryPaths::new(&record.id);
            match ctx.repository.get(&paths.nxml()).await? {
                Some(bytes) => {
                    tokio::fs::write(input_dir.join(format!("{}.nxml", record.id)), &bytes)
                        .await?;
                    staged.push(record.id.clone());
                }
                None => {
                    tracing::warn!(entry = %record.id, "jats artifact flagged but missing");
                }
            }
        }
        if staged.is_empty() {
            continue;
        }

        let mut command = tokio::process::Command::new("java");
        command
            .arg("-jar")
            .arg(&transformer)
            .arg("-in")
            .arg(&input_dir)
            .arg("-out")
            .arg(&output_dir);
        let batch_failed = match run_with_deadline(command, "jats transformer", BATCH_DEADLINE)
            .await
        {
            Ok(_stdout) => false,
            Err(err) => {
                tracing::error!(%err, staged = staged.len(), "batch transform failed");
                true
            }
        };

        // Copy outputs back and record per-entry outcomes.
        for record in batch.iter_mut() {
            if !staged.contains(&record.id) {
                continue;
            }
            let paths = EntryPaths::new(&record.id);
            let produced = output_dir.join(format!("{}.tei.xml", record.id));
            let outcome = if batch_failed {
                Err(())
            } else {
                tokio::fs::read(&produced).await.map_err(|_| ())
            };
            match outcome {
                Ok(tei) => {
                    ctx.repository
                        .put(&paths.pub2tei_tei(), Bytes::from(tei))
                        .await?;
                    record.artifacts.tei_from_jats = true;
                    record.status.set(Stage::TeiJats, StageStatus::success());
                    summary.transformed += 1;
                }
                Err(()) => {
                    record.status.set(
                        Stage::TeiJats,
                        StageStatus::failed(FailureReason::StructuringFailed),
                    );
                    summary.failed += 1;
                }
            }
            ctx.store.upsert(record)?;
        }
        tracing::info!(
            transformed = summary.transformed,
            failed = summary.failed,
            candidates = summary.candidates,
            "reverse pass checkpoint"
        );
    }

    Ok(summary)
}
