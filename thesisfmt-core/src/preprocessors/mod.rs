//! PDF bridge
//!
//! Turns a PDF target into an intermediate DOCX the rest of the pipeline
//! can classify and format like any other upload.
//!
//! ## Architecture
//!
//! ```text
//! PDF bytes
//!     ↓
//! [PdfTextBackend]   per-page text layer
//!     ↓
//! [TextLayerPdfBridge]   one paragraph per line, page breaks between pages
//!     ↓
//! BridgeOutput (DOCX bytes + confidence + warnings)
//! ```
//!
//! ## Available Backends
//!
//! - `PdfExtractBackend` - text layer via `pdf-extract` (feature `pdf-extract-backend`)

pub mod pdf;
pub mod traits;

// Re-export main types
pub use pdf::backends::PdfTextBackend;
pub use pdf::{default_bridge, TextLayerPdfBridge};
pub use traits::{BridgeOutput, PdfBridge};

#[cfg(feature = "pdf-extract-backend")]
pub use pdf::backends::PdfExtractBackend;
