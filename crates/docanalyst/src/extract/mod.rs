//! Text extraction from staged uploads.
//!
//! [`ExtractorRegistry`] is the production [`TextExtractor`]: it routes by
//! file extension to a format extractor and normalizes the result.

pub mod pdf;
pub mod text;

use std::path::Path;

use crate::error::ExtractionError;
use crate::sanitize;

/// Turns a staged document into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, path: &Path) -> Result<String, ExtractionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Text,
    Pdf,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" | "text" | "md" => Some(DocumentFormat::Text),
            "pdf" => Some(DocumentFormat::Pdf),
            _ => None,
        }
    }
}

/// Extractor for one document format.
pub trait FormatExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String, ExtractionError>;
    fn supports(&self, format: DocumentFormat) -> bool;
}

pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn FormatExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: vec![
                Box::new(text::PlainTextExtractor),
                Box::new(pdf::PdfExtractor),
            ],
        }
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor for ExtractorRegistry {
    fn extract_text(&self, path: &Path) -> Result<String, ExtractionError> {
        let _span = tracing::info_span!("extract", file = %sanitize::redact_path(path)).entered();

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let format = DocumentFormat::from_extension(extension)
            .ok_or_else(|| ExtractionError::UnsupportedFormat(extension.to_string()))?;

        let extractor = self
            .extractors
            .iter()
            .find(|e| e.supports(format))
            .ok_or_else(|| ExtractionError::UnsupportedFormat(extension.to_string()))?;

        let text = normalize_text(&extractor.extract(path)?);
        if text.trim().is_empty() {
            return Err(ExtractionError::NoText(sanitize::redact_path(path)));
        }

        tracing::debug!(chars = text.len(), "Extracted document text");
        Ok(text)
    }
}

/// Collapses runs of blank lines into a single line break and trims
/// trailing whitespace on each line.
pub fn normalize_text(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        output.push_str(line);
        output.push('\n');
    }
    output
}
