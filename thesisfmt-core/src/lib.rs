// Thesisfmt Core Library
//
// Detects formatting rules from a reference DOCX, classifies the paragraphs
// of a target document into semantic groups, and rewrites a copy of the
// target so it conforms. PDF targets go through a bridge to DOCX first.

pub mod applier;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod docx;
pub mod error;
pub mod oracle;
pub mod preprocessors;
pub mod processor;
pub mod reference;
pub mod rules;
pub mod ruleset;
pub mod storage;
pub mod templates;
pub mod types;

// Re-export main types and functions for easy use
pub use applier::{ApplyOutcome, FormatApplier};
pub use classifier::{
    classify_document, AiAssistedClassifier, Classification, DocumentClassification,
    ParagraphClassifier, RuleBasedClassifier,
};
pub use config::FormatterConfig;
pub use detector::{DetectionReport, TemplateDetector};
pub use docx::{DocxBuilder, DocxDocument, ParagraphSpec};
pub use error::{FormatError, FormatResult, ValidationError};
pub use oracle::{GroupOracle, HttpGroupOracle, OracleError};
pub use preprocessors::{BridgeOutput, PdfBridge, TextLayerPdfBridge};
pub use processor::{FormattedDocument, JobOrchestrator};
pub use reference::bundled_reference_docx;
pub use ruleset::{apply_overrides, validate, RuleSetPatch};
pub use storage::{FileStorage, JobStore, MemoryStorage, TemplateStore};
pub use templates::TemplateRegistry;
pub use types::*;

// Re-export backends for direct use
#[cfg(feature = "pdf-extract-backend")]
pub use preprocessors::PdfExtractBackend;
