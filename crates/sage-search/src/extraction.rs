//! Paginated text extraction from uploaded files.
//!
//! PDFs go through `pdftotext` (poppler-utils) with layout preserved and are
//! split into pages on form feeds. Text formats are returned as a single
//! page.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, instrument};

use sage_core::defaults::PDF_EXTRACT_TIMEOUT_SECS;
use sage_core::{Error, Result};

/// Turns raw file bytes into page texts.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Whether this extractor handles the given file name.
    fn supports(&self, filename: &str) -> bool;

    /// Page texts in order; a non-paginated format yields one page.
    async fn extract_pages(&self, data: &[u8], filename: &str) -> Result<Vec<String>>;

    fn name(&self) -> &str;
}

fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Run a command with a timeout, returning stdout as a string.
async fn run_cmd_with_timeout(cmd: &mut Command, timeout_secs: u64) -> Result<String> {
    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| Error::Internal(format!("External command timed out after {}s", timeout_secs)))?
        .map_err(|e| Error::Internal(format!("Failed to execute command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Internal(format!(
            "Command failed (exit {}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Split `pdftotext` output into pages.
///
/// The trailing form feed after the last page does not start a new page.
pub fn split_pages(text: &str) -> Vec<String> {
    let mut pages: Vec<String> = text.split('\x0c').map(str::to_string).collect();
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    pages
}

/// PDF extraction via `pdftotext`.
#[derive(Debug, Clone)]
pub struct PdfTextExtractor {
    timeout_secs: u64,
}

impl Default for PdfTextExtractor {
    fn default() -> Self {
        Self {
            timeout_secs: PDF_EXTRACT_TIMEOUT_SECS,
        }
    }
}

impl PdfTextExtractor {
    /// True when the `pdftotext` binary can be executed.
    pub async fn available() -> bool {
        match Command::new("pdftotext").arg("-v").output().await {
            // Exits 0 or 99 depending on the poppler version.
            Ok(output) => output.status.success() || output.status.code() == Some(99),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    fn supports(&self, filename: &str) -> bool {
        extension(filename).as_deref() == Some("pdf")
    }

    #[instrument(skip(self, data), fields(subsystem = "search", component = "extraction", op = "pdf"))]
    async fn extract_pages(&self, data: &[u8], filename: &str) -> Result<Vec<String>> {
        if data.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Cannot extract text from empty PDF '{}'",
                filename
            )));
        }
        if data.len() < 4 || &data[0..4] != b"%PDF" {
            return Err(Error::InvalidInput(format!(
                "File '{}' is not a valid PDF (missing %PDF header)",
                filename
            )));
        }

        let mut tmpfile = NamedTempFile::new()?;
        tmpfile.write_all(data)?;
        let tmp_path = tmpfile.path().to_string_lossy().to_string();

        let text = run_cmd_with_timeout(
            Command::new("pdftotext").arg("-layout").arg(&tmp_path).arg("-"),
            self.timeout_secs,
        )
        .await?;

        let pages = split_pages(&text);
        debug!(pages = pages.len(), "Extracted PDF text");
        Ok(pages)
    }

    fn name(&self) -> &str {
        "pdf_text"
    }
}

/// Text formats read as UTF-8 (lossy).
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "csv", "json", "html", "htm", "xml", "log"];

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    fn supports(&self, filename: &str) -> bool {
        extension(filename).is_some_and(|e| TEXT_EXTENSIONS.contains(&e.as_str()))
    }

    async fn extract_pages(&self, data: &[u8], _filename: &str) -> Result<Vec<String>> {
        Ok(vec![String::from_utf8_lossy(data).into_owned()])
    }

    fn name(&self) -> &str {
        "plain_text"
    }
}

/// Dispatches to the first extractor that supports a file.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn TextExtractor>>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self {
            extractors: vec![
                Box::new(PdfTextExtractor::default()),
                Box::new(PlainTextExtractor),
            ],
        }
    }
}

impl ExtractorRegistry {
    pub async fn extract_pages(&self, data: &[u8], filename: &str) -> Result<Vec<String>> {
        let extractor = self
            .extractors
            .iter()
            .find(|e| e.supports(filename))
            .ok_or_else(|| {
                Error::InvalidInput(format!("Unsupported document type: {}", filename))
            })?;
        extractor.extract_pages(data, filename).await
    }
}
