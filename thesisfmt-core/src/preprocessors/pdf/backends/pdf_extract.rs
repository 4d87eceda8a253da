//! `pdf-extract` backend
//!
//! Pure Rust text extraction. Pages come back separated by form feeds.

use super::PdfTextBackend;
use anyhow::{anyhow, Result};
use std::panic;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractBackend;

impl PdfExtractBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Split extracted text at form feeds, dropping the empty tail after the last one
pub fn split_pages(text: &str) -> Vec<String> {
    let mut pages: Vec<String> = text.split('\x0c').map(str::to_string).collect();
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    pages
}

impl PdfTextBackend for PdfExtractBackend {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>> {
        // Malformed PDFs can panic inside the parser
        let text = panic::catch_unwind(|| ::pdf_extract::extract_text_from_mem(pdf_bytes))
            .map_err(|_| anyhow!("PDF parser crashed on this document"))?
            .map_err(|e| anyhow!("PDF text extraction failed: {}", e))?;

        let pages = split_pages(&text);
        debug!(pages = pages.len(), chars = text.len(), "PDF text extracted");
        Ok(pages)
    }

    fn name(&self) -> &str {
        "pdf-extract"
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pages() {
        assert_eq!(split_pages("one\x0ctwo\x0c"), vec!["one", "two"]);
        assert_eq!(split_pages("single"), vec!["single"]);
        assert_eq!(split_pages("a\x0c\x0cb"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(PdfExtractBackend::new().extract_pages(b"not a pdf").is_err());
    }
}
