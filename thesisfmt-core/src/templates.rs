use crate::config::FormatterConfig;
use crate::detector::TemplateDetector;
use crate::error::{FormatError, FormatResult};
use crate::reference::{bundled_reference_docx, BUNDLED_REFERENCE_NAME};
use crate::ruleset::validate;
use crate::storage::TemplateStore;
use crate::types::{RuleSet, TargetKind, Template};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Name given to the template produced by reset-to-default
pub const DEFAULT_TEMPLATE_NAME: &str = "Default Thesis Template";

/// Template CRUD over a store, with detection from reference documents
pub struct TemplateRegistry {
    store: Arc<dyn TemplateStore>,
    detector: TemplateDetector,
    default_reference: Option<PathBuf>,
}

impl TemplateRegistry {
    pub fn new(store: Arc<dyn TemplateStore>, config: &FormatterConfig) -> FormatResult<Self> {
        Ok(Self {
            store,
            detector: TemplateDetector::new(&config.classifier)?,
            default_reference: config.default_reference.clone(),
        })
    }

    /// Detect rules from an uploaded reference DOCX and store them as a new template
    pub fn create_from_reference(
        &self,
        name: Option<&str>,
        file_name: &str,
        bytes: &[u8],
    ) -> FormatResult<Template> {
        if TargetKind::from_file_name(file_name) != Some(TargetKind::Docx) {
            return Err(FormatError::InvalidInput(format!(
                "reference document must be a .docx file, got '{}'",
                file_name
            )));
        }
        if bytes.is_empty() {
            return Err(FormatError::InvalidInput("reference document is empty".to_string()));
        }

        let report = self.detector.detect_bytes(bytes)?;
        let id = Uuid::new_v4().to_string();
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => format!("Uploaded Template {}", &id[..8]),
        };

        let template = Template {
            id,
            name,
            is_default: false,
            created_at: Utc::now(),
            source_filename: Some(file_name.to_string()),
            rules: report.rules,
            detection_notes: report.warnings,
        };
        self.save(&template)?;
        info!(template_id = %template.id, notes = template.detection_notes.len(), "template created");
        Ok(template)
    }

    pub fn list(&self) -> FormatResult<Vec<Template>> {
        self.store
            .list_templates()
            .map_err(|e| FormatError::Storage(e.to_string()))
    }

    pub fn get(&self, id: &str) -> FormatResult<Template> {
        self.store
            .get_template(id)
            .map_err(|e| FormatError::Storage(e.to_string()))?
            .ok_or_else(|| FormatError::TemplateNotFound(id.to_string()))
    }

    pub fn get_rules(&self, id: &str) -> FormatResult<RuleSet> {
        Ok(self.get(id)?.rules)
    }

    /// Full replace of a template's rules; invalid rule sets are refused
    pub fn update_rules(&self, id: &str, rules: RuleSet) -> FormatResult<Template> {
        validate(&rules)?;
        let mut template = self.get(id)?;
        template.rules = rules;
        self.save(&template)?;
        info!(template_id = %id, "template rules replaced");
        Ok(template)
    }

    pub fn delete(&self, id: &str) -> FormatResult<()> {
        let deleted = self
            .store
            .delete_template(id)
            .map_err(|e| FormatError::Storage(e.to_string()))?;
        if !deleted {
            return Err(FormatError::TemplateNotFound(id.to_string()));
        }
        info!(template_id = %id, "template deleted");
        Ok(())
    }

    /// The template currently flagged default, if any
    pub fn default_template(&self) -> FormatResult<Option<Template>> {
        Ok(self.list()?.into_iter().find(|t| t.is_default))
    }

    /// Re-detect the default reference and make it the one default template.
    /// An existing default keeps its id so jobs that name it still resolve.
    pub fn reset_default(&self) -> FormatResult<Template> {
        let (file_name, bytes) = self.default_reference_bytes()?;
        let report = self.detector.detect_bytes(&bytes)?;

        let existing = self.list()?;
        let id = existing
            .iter()
            .find(|t| t.is_default)
            .map(|t| t.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        for mut other in existing.into_iter().filter(|t| t.is_default && t.id != id) {
            other.is_default = false;
            self.save(&other)?;
        }

        let template = Template {
            id,
            name: DEFAULT_TEMPLATE_NAME.to_string(),
            is_default: true,
            created_at: Utc::now(),
            source_filename: Some(file_name),
            rules: report.rules,
            detection_notes: report.warnings,
        };
        self.save(&template)?;
        info!(template_id = %template.id, "default template reset");
        Ok(template)
    }

    fn default_reference_bytes(&self) -> FormatResult<(String, Vec<u8>)> {
        match &self.default_reference {
            Some(path) => {
                let bytes = std::fs::read(path).map_err(|e| {
                    FormatError::InvalidInput(format!(
                        "cannot read default reference {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                Ok((file_name, bytes))
            }
            None => Ok((BUNDLED_REFERENCE_NAME.to_string(), bundled_reference_docx()?)),
        }
    }

    fn save(&self, template: &Template) -> FormatResult<()> {
        self.store
            .store_template(template)
            .map_err(|e| FormatError::Storage(e.to_string()))
    }
}
