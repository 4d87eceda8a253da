//! Text-layer PDF bridge
//!
//! Extracts the text layer page by page through a pluggable backend and
//! writes it out as a plain DOCX: one paragraph per line, a page break
//! between pages. Layout and images do not survive; the confidence score
//! says how much text did.

pub mod backends;

use crate::docx::{DocxBuilder, ParagraphSpec};
use crate::preprocessors::traits::{BridgeOutput, PdfBridge};
use anyhow::{bail, Result};
use tracing::{debug, warn};

pub use backends::PdfTextBackend;

#[cfg(feature = "pdf-extract-backend")]
pub use backends::PdfExtractBackend;

/// Below this the output is kept but flagged
pub const LOW_CONFIDENCE_THRESHOLD: f32 = 0.55;

/// Characters per page that count as a fully populated page
const DENSE_PAGE_CHARS: f32 = 1000.0;

/// PDF bridge over any text backend
pub struct TextLayerPdfBridge<B: PdfTextBackend> {
    backend: B,
}

impl<B: PdfTextBackend> TextLayerPdfBridge<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Get the backend name for logging
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}

/// `page_ratio × 0.7 + density × 0.3`
pub fn conversion_confidence(pages: &[String]) -> f32 {
    if pages.is_empty() {
        return 0.0;
    }
    let total = pages.len() as f32;
    let with_text = pages.iter().filter(|p| !p.trim().is_empty()).count() as f32;
    let chars: usize = pages.iter().map(|p| p.chars().filter(|c| !c.is_whitespace()).count()).sum();

    let page_ratio = with_text / total;
    let density = (chars as f32 / (total * DENSE_PAGE_CHARS)).min(1.0);
    page_ratio * 0.7 + density * 0.3
}

impl<B: PdfTextBackend> PdfBridge for TextLayerPdfBridge<B> {
    fn convert(&self, pdf_bytes: &[u8]) -> Result<BridgeOutput> {
        let pages = self.backend.extract_pages(pdf_bytes)?;
        if pages.iter().all(|p| p.trim().is_empty()) {
            bail!("PDF has no extractable text layer (scanned document?)");
        }

        let mut builder = DocxBuilder::new();
        for (index, page) in pages.iter().enumerate() {
            if index > 0 {
                builder = builder.page_break();
            }
            let mut lines = page.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();
            if lines.peek().is_none() {
                builder = builder.paragraph(ParagraphSpec::new(&format!("[page {} has no text layer]", index + 1)));
                continue;
            }
            for line in lines {
                builder = builder.text(line);
            }
        }
        let docx = builder.build()?;

        let confidence = conversion_confidence(&pages);
        let mut warnings = Vec::new();
        if confidence < LOW_CONFIDENCE_THRESHOLD {
            warn!(confidence, backend = self.backend.name(), "low PDF conversion confidence");
            warnings.push(format!(
                "PDF conversion confidence is low ({:.2}); check the output layout",
                confidence
            ));
        }
        debug!(pages = pages.len(), confidence, "PDF converted");

        Ok(BridgeOutput {
            docx,
            confidence,
            pages: pages.len(),
            warnings,
        })
    }

    fn name(&self) -> &str {
        "TextLayerPdfBridge"
    }

    fn is_healthy(&self) -> bool {
        self.backend.is_healthy()
    }
}

/// The bridge compiled into this build, if any
pub fn default_bridge() -> Option<Box<dyn PdfBridge>> {
    #[cfg(feature = "pdf-extract-backend")]
    {
        Some(Box::new(TextLayerPdfBridge::new(PdfExtractBackend::new())))
    }
    #[cfg(not(feature = "pdf-extract-backend"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::DocxDocument;

    struct FixedPages(Vec<&'static str>);

    impl PdfTextBackend for FixedPages {
        fn extract_pages(&self, _pdf_bytes: &[u8]) -> Result<Vec<String>> {
            Ok(self.0.iter().map(|p| p.to_string()).collect())
        }

        fn name(&self) -> &str {
            "fixed"
        }

        fn is_healthy(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_lines_become_paragraphs_with_page_breaks() {
        let bridge = TextLayerPdfBridge::new(FixedPages(vec![
            "Thesis Title\nAuthor Name\n",
            "",
            "Chapter 1 Introduction\nBody line",
        ]));
        let output = bridge.convert(b"%PDF-1.7").unwrap();
        let paragraphs = DocxDocument::from_bytes(&output.docx).unwrap().paragraphs();

        let texts: Vec<&str> = paragraphs.iter().map(|p| p.text.as_str()).filter(|t| !t.is_empty()).collect();
        assert_eq!(
            texts,
            vec!["Thesis Title", "Author Name", "[page 2 has no text layer]", "Chapter 1 Introduction", "Body line"]
        );
        let chapter = paragraphs.iter().find(|p| p.text.starts_with("Chapter")).unwrap();
        assert_eq!(chapter.page_index, 2);
        assert_eq!(output.pages, 3);
        // short pages on a third of the document: low confidence
        assert!(output.confidence < LOW_CONFIDENCE_THRESHOLD);
        assert_eq!(output.warnings.len(), 1);
    }

    #[test]
    fn test_empty_text_layer_is_an_error() {
        let bridge = TextLayerPdfBridge::new(FixedPages(vec!["", "  \n"]));
        assert!(bridge.convert(b"%PDF").is_err());
    }

    #[test]
    fn test_confidence_formula() {
        let dense = "x".repeat(1000);
        assert!((conversion_confidence(&[dense.clone(), dense]) - 1.0).abs() < 1e-6);
        let half = conversion_confidence(&["x".repeat(500), String::new()]);
        // 0.5 * 0.7 + 0.25 * 0.3
        assert!((half - 0.425).abs() < 1e-6);
        assert_eq!(conversion_confidence(&[]), 0.0);
    }
}
