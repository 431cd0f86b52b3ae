use crate::subprocess::{run_with_deadline, SubprocessError};
use repository::ThumbSize;
use std::time::Duration;

const THUMBNAIL_DEADLINE: Duration = Duration::from_secs(60);

/// Render PNG thumbnails of a PDF's first page at the three standard
/// heights, via the configured raster tool. Failures here never fail the
/// entry; the caller just logs them.
pub async fn generate_thumbnails(
    tool: &str,
    pdf: &[u8],
) -> Result<Vec<(ThumbSize, Vec<u8>)>, SubprocessError> {
    let staging = tempfile::tempdir().map_err(|source| SubprocessError::Spawn {
        tool: tool.to_string(),
        source,
    })?;
    let input = staging.path().join("input.pdf");
    tokio::fs::write(&input, pdf)
        .await
        .map_err(|source| SubprocessError::Spawn {
            tool: tool.to_string(),
            source,
        })?;

    let mut out = Vec::with_capacity(ThumbSize::ALL.len());
    for size in ThumbSize::ALL {
        let target = staging.path().join(format!("thumb-{size}.png"));

        let mut command = tokio::process::Command::new(tool);
        command
            .arg("-thumbnail")
            .arg(format!("x{}", size.height()))
            // First page only.
            .arg(format!("{}[0]", input.display()))
            .arg(&target);
        run_with_deadline(command, tool, THUMBNAIL_DEADLINE).await?;

        let png = tokio::fs::read(&target)
            .await
            .map_err(|source| SubprocessError::Spawn {
                tool: tool.to_string(),
                source,
            })?;
        out.push((size, png));
    }
    Ok(out)
}
