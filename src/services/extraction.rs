use std::sync::Arc;

use thiserror::Error;

use crate::core::metrics;
use crate::models::DocumentFormat;
use crate::services::ocr::OcrEngine;
use crate::services::pdf::{PdfRasterizer, RasterizeOptions};
use crate::services::structured::preview;

/// Below this many non-whitespace characters a PDF counts as unreadable.
pub(crate) const MIN_PDF_TEXT_CHARS: usize = 10;
const SHORT_TEXT_WARNING_CHARS: usize = 200;
const EARLY_EXIT_CHARS: usize = 1000;

#[derive(Debug, Error)]
pub(crate) enum ExtractionError {
    #[error("unsupported file type '{0}'; allowed: PDF, PNG, JPG, JPEG, TXT")]
    UnsupportedFormat(String),
    #[error("{0}")]
    ExtractionFailed(String),
    #[error("PDF conversion produced 0 pages; the PDF might be corrupted or empty")]
    EmptyConversion,
    #[error(
        "PDF processing extracted very little text ({chars} non-whitespace characters from \
         {pages} page(s)); the PDF might be image-only or corrupted. Preview: {preview}"
    )]
    TooLittleText { chars: usize, pages: usize, preview: String },
}

/// Decodes text files and runs OCR for images and rasterized PDFs.
#[derive(Clone)]
pub(crate) struct TextExtractor {
    ocr: Arc<dyn OcrEngine>,
    rasterizer: Arc<dyn PdfRasterizer>,
    max_pdf_pages: u32,
}

impl TextExtractor {
    pub(crate) fn new(
        ocr: Arc<dyn OcrEngine>,
        rasterizer: Arc<dyn PdfRasterizer>,
        max_pdf_pages: u32,
    ) -> Self {
        Self { ocr, rasterizer, max_pdf_pages }
    }

    pub(crate) async fn extract(&self, bytes: &[u8], tag: &str) -> Result<String, ExtractionError> {
        let format = DocumentFormat::from_tag(tag)
            .ok_or_else(|| ExtractionError::UnsupportedFormat(tag.to_string()))?;

        match format {
            DocumentFormat::Txt => Ok(decode_text(bytes)),
            DocumentFormat::Pdf => self.extract_pdf(bytes).await,
            DocumentFormat::Png | DocumentFormat::Jpg | DocumentFormat::Jpeg => {
                let text = self.extract_image(bytes).await;
                metrics::record_ocr_pages(1);
                text
            }
        }
    }

    async fn extract_image(&self, image: &[u8]) -> Result<String, ExtractionError> {
        let regions = self.ocr.recognize(image).await.map_err(|err| {
            tracing::error!(error = %format!("{err:#}"), "OCR engine failed");
            ExtractionError::ExtractionFailed(format!("OCR extraction failed: {err:#}"))
        })?;

        let confidences: Vec<f64> = regions.iter().filter_map(|region| region.confidence).collect();
        if !confidences.is_empty() {
            let average = confidences.iter().sum::<f64>() / confidences.len() as f64;
            tracing::info!(regions = regions.len(), average_confidence = average, "OCR finished");
        }

        let text = regions
            .iter()
            .map(|region| region.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        let chars = text.chars().count();
        if chars == 0 {
            tracing::warn!(
                languages = %self.ocr.languages().join("+"),
                "No text extracted from image; image quality may be too low, text too small, \
                 or OCR_LANGUAGE may not match the document"
            );
        } else if chars < SHORT_TEXT_WARNING_CHARS {
            tracing::warn!(chars, preview = %text, "Short text extracted from image");
        } else {
            tracing::debug!(chars, preview = %preview(&text, SHORT_TEXT_WARNING_CHARS), "Extracted text from image");
        }

        Ok(text)
    }

    async fn extract_pdf(&self, pdf: &[u8]) -> Result<String, ExtractionError> {
        let options = RasterizeOptions::for_document(pdf.len(), self.max_pdf_pages);
        tracing::info!(bytes = pdf.len(), dpi = options.dpi, max_pages = options.max_pages, "Rasterizing PDF");

        let pages = self.rasterizer.rasterize(pdf, options).await.map_err(|err| {
            tracing::error!(error = %format!("{err:#}"), "PDF rasterization failed");
            ExtractionError::ExtractionFailed(format!(
                "PDF processing failed: {err:#}. Try converting the PDF to PNG/JPG images or \
                 uploading a .txt file instead"
            ))
        })?;

        if pages.is_empty() {
            return Err(ExtractionError::EmptyConversion);
        }

        let mut texts: Vec<String> = Vec::with_capacity(pages.len());
        let mut first_failure: Option<ExtractionError> = None;
        let mut succeeded = 0usize;
        let mut gathered = 0usize;

        for (idx, page) in pages.iter().enumerate() {
            let page_number = idx + 1;
            match self.extract_image(page).await {
                Ok(text) => {
                    tracing::info!(page = page_number, chars = text.chars().count(), "PDF page extracted");
                    gathered += text.chars().count();
                    succeeded += 1;
                    texts.push(text);
                }
                Err(err) => {
                    tracing::error!(page = page_number, error = %err, "PDF page extraction failed");
                    texts.push(format!("[Error extracting text from page {page_number}]"));
                    first_failure.get_or_insert(err);
                }
            }

            if gathered > EARLY_EXIT_CHARS && idx >= 1 {
                tracing::info!(chars = gathered, pages = page_number, "Enough text gathered, stopping early");
                break;
            }
        }
        metrics::record_ocr_pages(texts.len());

        if succeeded == 0 {
            if let Some(err) = first_failure {
                return Err(err);
            }
        }

        let combined = texts.join("\n\n");
        let chars = combined.chars().filter(|c| !c.is_whitespace()).count();
        if chars < MIN_PDF_TEXT_CHARS {
            return Err(ExtractionError::TooLittleText {
                chars,
                pages: texts.len(),
                preview: preview(combined.trim(), 100),
            });
        }

        tracing::info!(chars = combined.chars().count(), pages = texts.len(), "PDF text extracted");
        Ok(combined.trim().to_string())
    }
}

/// UTF-8 first, then a byte-per-char Latin-1 reading that cannot fail.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&byte| char::from(byte)).collect(),
    }
}
