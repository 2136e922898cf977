//! Export: composite the storybook and save it as a JPEG.
//!
//! Decoding, drawing and encoding are CPU-bound and run on the blocking pool.

use crate::config::ComposeConfig;
use crate::error::StorybookError;
use crate::pipeline::compose::{encode_jpeg, render_storybook, CaptionFont, StorybookLayout};
use crate::story::StoryPage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Encoded storybook picture plus the layout it was drawn from.
#[derive(Debug, Clone)]
pub struct ExportedStorybook {
    pub jpeg: Vec<u8>,
    pub layout: StorybookLayout,
}

/// Composite `pages` into one JPEG in memory.
pub async fn composite_to_jpeg(
    pages: &[StoryPage],
    font: Arc<dyn CaptionFont>,
    config: &ComposeConfig,
) -> Result<ExportedStorybook, StorybookError> {
    if pages.is_empty() {
        return Err(StorybookError::EmptyStorybook);
    }

    let start = Instant::now();
    let pages = pages.to_vec();
    let config = config.clone();

    let exported = tokio::task::spawn_blocking(move || {
        let (canvas, layout) = render_storybook(&pages, &config, font.as_ref())?;
        let jpeg = encode_jpeg(canvas, config.jpeg_quality)?;
        Ok::<_, StorybookError>(ExportedStorybook { jpeg, layout })
    })
    .await
    .map_err(|e| StorybookError::Internal(format!("compositing task panicked: {e}")))??;

    info!(
        "Composited {} pages → {}x{} JPEG ({} bytes) in {}ms",
        exported.layout.pages.len(),
        exported.layout.canvas_width,
        exported.layout.canvas_height,
        exported.jpeg.len(),
        start.elapsed().as_millis()
    );
    Ok(exported)
}

/// Composite `pages` and write the JPEG to `output`.
///
/// If `output` is an existing directory the file is named
/// [`ComposeConfig::file_name`] inside it. The write is atomic (temp file +
/// rename), so a failed export never leaves a truncated picture behind.
/// Returns the path written.
pub async fn composite_and_download(
    pages: &[StoryPage],
    font: Arc<dyn CaptionFont>,
    config: &ComposeConfig,
    output: impl AsRef<Path>,
) -> Result<PathBuf, StorybookError> {
    let path = resolve_output_path(output.as_ref(), config).await;
    let exported = composite_to_jpeg(pages, font, config).await?;
    write_atomic(&path, &exported.jpeg).await?;
    info!("Saved storybook to {}", path.display());
    Ok(path)
}

async fn resolve_output_path(output: &Path, config: &ComposeConfig) -> PathBuf {
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.is_dir() => output.join(&config.file_name),
        _ => output.to_path_buf(),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorybookError> {
    let write_err = |e| StorybookError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("jpg.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }
    Ok(())
}
