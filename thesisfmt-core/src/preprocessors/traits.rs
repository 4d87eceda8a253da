// PDF bridge abstraction
//
// The boundary between a PDF target and the DOCX pipeline. Whatever the
// backend, the result is a DOCX the document reader can open.

use anyhow::Result;
use std::path::Path;

/// Intermediate document produced from a PDF
#[derive(Debug, Clone)]
pub struct BridgeOutput {
    pub docx: Vec<u8>,
    /// 0.0 - 1.0, how much of the PDF survived as text
    pub confidence: f32,
    pub pages: usize,
    pub warnings: Vec<String>,
}

/// Bridge trait - converts PDF bytes to a DOCX artifact
///
/// A failed conversion is fatal for the job that asked for it.
pub trait PdfBridge: Send + Sync {
    fn convert(&self, pdf_bytes: &[u8]) -> Result<BridgeOutput>;

    /// Convenience method: convert from a file path
    fn convert_file(&self, input: &Path) -> Result<BridgeOutput> {
        let pdf_bytes = std::fs::read(input)?;
        self.convert(&pdf_bytes)
    }

    /// Bridge name for logging
    fn name(&self) -> &str;

    /// Check if the bridge is ready to convert
    fn is_healthy(&self) -> bool;
}
