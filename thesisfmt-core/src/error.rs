use crate::docx::DocxError;
use crate::types::GroupKey;
use std::fmt;
use thiserror::Error;

/// Crate-level error taxonomy.
///
/// `Validation` and `UnsupportedTarget` are raised before any job state
/// exists. `Conversion` and `Document` are whole-pipeline failures that turn
/// a job `failed`. Everything else unexpected lands in `Internal`.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("rule set failed validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("unsupported target file type: {0} (expected .docx or .pdf)")]
    UnsupportedTarget(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("PDF conversion failed: {0}")]
    Conversion(String),

    #[error("cannot open document: {0}")]
    Document(#[from] DocxError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type FormatResult<T> = std::result::Result<T, FormatError>;

/// One failed check on a rule set
#[derive(Debug, Clone, PartialEq)]
pub enum RuleSetIssue {
    MissingGroup { group: GroupKey },
    NotFinite { field: String },
    Negative { field: String, value: f32 },
    NotPositive { field: String, value: f32 },
    EmptyFontName { group: GroupKey },
    UnknownValue { field: String, value: String },
}

impl fmt::Display for RuleSetIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSetIssue::MissingGroup { group } => write!(f, "group '{}' is missing", group),
            RuleSetIssue::NotFinite { field } => write!(f, "{} must be a finite number", field),
            RuleSetIssue::Negative { field, value } => {
                write!(f, "{} must not be negative (got {})", field, value)
            }
            RuleSetIssue::NotPositive { field, value } => {
                write!(f, "{} must be greater than zero (got {})", field, value)
            }
            RuleSetIssue::EmptyFontName { group } => {
                write!(f, "group '{}' has an empty font name", group)
            }
            RuleSetIssue::UnknownValue { field, value } => {
                write!(f, "{} has unrecognized value '{}'", field, value)
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub issues: Vec<RuleSetIssue>,
}

impl ValidationError {
    pub fn single(issue: RuleSetIssue) -> Self {
        Self {
            issues: vec![issue],
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}
