use crate::{Context, Error};
use repository::EntryPaths;
use std::path::Path;

/// Write the consolidated metadata of every entry as one JSON array.
/// Entries whose metadata stage never succeeded have no document and are
/// skipped.
pub async fn dump_metadata(ctx: &Context, output: &Path) -> Result<usize, Error> {
    let mut documents = Vec::new();
    for record in ctx.store.snapshot() {
        let paths = EntryPaths::new(&record.id);
        let Some(bytes) = ctx.repository.get(&paths.metadata_json()).await? else {
            continue;
        };
        match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(document) => documents.push(document),
            Err(err) => {
                tracing::warn!(entry = %record.id, ?err, "skipping unreadable metadata document");
            }
        }
    }

    let json =
        serde_json::to_vec_pretty(&documents).expect("metadata documents re-serialize");
    tokio::fs::write(output, json).await?;
    tracing::info!(count = documents.len(), ?output, "wrote consolidated metadata");
    Ok(documents.len())
}
