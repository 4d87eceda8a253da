//! PDF text backend trait
//!
//! Defines the interface every text extraction backend implements: the
//! text layer of each page, in page order.

use anyhow::Result;

/// Backend trait for PDF text extraction
pub trait PdfTextBackend: Send + Sync {
    /// Text of each page; pages without a text layer are empty strings
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>>;

    /// Backend identifier for logging/debugging
    fn name(&self) -> &str;

    /// Check if backend is healthy/ready
    fn is_healthy(&self) -> bool;
}

// Re-export backends
#[cfg(feature = "pdf-extract-backend")]
pub mod pdf_extract;

#[cfg(feature = "pdf-extract-backend")]
pub use self::pdf_extract::PdfExtractBackend;
