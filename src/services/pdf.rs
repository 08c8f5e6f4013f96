use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use crate::core::config::Settings;

const LARGE_PDF_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RasterizeOptions {
    pub(crate) max_pages: u32,
    pub(crate) dpi: u32,
}

impl RasterizeOptions {
    /// Large documents are rendered at a lower resolution to keep OCR time bounded.
    pub(crate) fn for_document(pdf_len: usize, max_pages: u32) -> Self {
        let dpi = if pdf_len > LARGE_PDF_BYTES { 100 } else { 150 };
        Self { max_pages, dpi }
    }
}

/// PDF bytes in, one PNG per rendered page out, in page order.
#[async_trait]
pub(crate) trait PdfRasterizer: Send + Sync {
    async fn rasterize(&self, pdf: &[u8], options: RasterizeOptions) -> Result<Vec<Vec<u8>>>;
}

/// Renders pages with poppler's `pdftoppm` inside a scratch directory.
#[derive(Debug, Clone)]
pub(crate) struct PopplerRasterizer {
    binary: String,
    scratch_root: PathBuf,
}

impl PopplerRasterizer {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        Self { binary: settings.pdf().rasterizer_bin.clone(), scratch_root: std::env::temp_dir() }
    }

    async fn render(&self, workdir: &Path, pdf: &[u8], options: RasterizeOptions) -> Result<Vec<Vec<u8>>> {
        let input = workdir.join("input.pdf");
        tokio::fs::write(&input, pdf).await.context("Failed to write PDF to scratch directory")?;

        let output = Command::new(&self.binary)
            .arg("-png")
            .arg("-r")
            .arg(options.dpi.to_string())
            .arg("-f")
            .arg("1")
            .arg("-l")
            .arg(options.max_pages.to_string())
            .arg(&input)
            .arg(workdir.join("page"))
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| {
                format!(
                    "Failed to run '{}'; install poppler-utils or set PDF_RASTERIZER_BIN",
                    self.binary
                )
            })?;

        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "'{}' exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let mut pages: Vec<PathBuf> = Vec::new();
        let mut entries =
            tokio::fs::read_dir(workdir).await.context("Failed to list rendered pages")?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_page = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("page") && name.ends_with(".png"));
            if is_page {
                pages.push(path);
            }
        }
        // pdftoppm pads page numbers to a common width, so name order is page order.
        pages.sort();

        let mut images = Vec::with_capacity(pages.len());
        for page in pages {
            images.push(
                tokio::fs::read(&page)
                    .await
                    .with_context(|| format!("Failed to read rendered page {}", page.display()))?,
            );
        }

        Ok(images)
    }
}

#[async_trait]
impl PdfRasterizer for PopplerRasterizer {
    async fn rasterize(&self, pdf: &[u8], options: RasterizeOptions) -> Result<Vec<Vec<u8>>> {
        let workdir = self.scratch_root.join(format!("exam-grader-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&workdir)
            .await
            .context("Failed to create PDF scratch directory")?;
        // Removed on drop, so a cancelled render cleans up too.
        let scratch = ScratchDir(workdir);

        self.render(&scratch.0, pdf, options).await
    }
}

struct ScratchDir(PathBuf);

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.0) {
            tracing::warn!(error = %err, path = %self.0.display(), "Failed to remove PDF scratch directory");
        }
    }
}
