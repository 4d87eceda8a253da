use crate::types::{Job, Template};
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Persistence for templates, keyed by template id
pub trait TemplateStore: Send + Sync {
    fn get_template(&self, id: &str) -> Result<Option<Template>>;
    fn store_template(&self, template: &Template) -> Result<()>;
    /// True when something was deleted
    fn delete_template(&self, id: &str) -> Result<bool>;
    /// Oldest first
    fn list_templates(&self) -> Result<Vec<Template>>;
}

/// Persistence for jobs, keyed by job id
pub trait JobStore: Send + Sync {
    fn get_job(&self, id: &str) -> Result<Option<Job>>;
    fn store_job(&self, job: &Job) -> Result<()>;
    fn delete_job(&self, id: &str) -> Result<bool>;
    /// Oldest first
    fn list_jobs(&self) -> Result<Vec<Job>>;
}

/// File-based storage: one pretty JSON file per record
pub struct FileStorage {
    templates_dir: PathBuf,
    jobs_dir: PathBuf,
}

impl FileStorage {
    pub fn new(templates_dir: &Path, jobs_dir: &Path) -> Result<Self> {
        // Ensure storage directories exist
        fs::create_dir_all(templates_dir)
            .with_context(|| format!("Failed to create {}", templates_dir.display()))?;
        fs::create_dir_all(jobs_dir)
            .with_context(|| format!("Failed to create {}", jobs_dir.display()))?;

        Ok(Self {
            templates_dir: templates_dir.to_path_buf(),
            jobs_dir: jobs_dir.to_path_buf(),
        })
    }

    fn record_path(dir: &Path, id: &str) -> Result<PathBuf> {
        // Ids are uuids; anything path-like is refused
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(anyhow!("invalid record id '{}'", id));
        }
        Ok(dir.join(format!("{}.json", id)))
    }

    fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let json_str = fs::read_to_string(path)?;
        let record = serde_json::from_str(&json_str)
            .map_err(|e| anyhow!("Failed to deserialize {}: {}", path.display(), e))?;
        Ok(Some(record))
    }

    fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
        let json_str = serde_json::to_string_pretty(record)
            .map_err(|e| anyhow!("Failed to serialize record: {}", e))?;
        // Write then rename so readers never see half a record
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, json_str)?;
        fs::rename(&temp, path)?;
        Ok(())
    }

    fn delete_record(path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    fn list_records<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = Self::read_record(&path)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

impl TemplateStore for FileStorage {
    fn get_template(&self, id: &str) -> Result<Option<Template>> {
        Self::read_record(&Self::record_path(&self.templates_dir, id)?)
    }

    fn store_template(&self, template: &Template) -> Result<()> {
        Self::write_record(&Self::record_path(&self.templates_dir, &template.id)?, template)
    }

    fn delete_template(&self, id: &str) -> Result<bool> {
        Self::delete_record(&Self::record_path(&self.templates_dir, id)?)
    }

    fn list_templates(&self) -> Result<Vec<Template>> {
        let mut templates: Vec<Template> = Self::list_records(&self.templates_dir)?;
        templates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(templates)
    }
}

impl JobStore for FileStorage {
    fn get_job(&self, id: &str) -> Result<Option<Job>> {
        Self::read_record(&Self::record_path(&self.jobs_dir, id)?)
    }

    fn store_job(&self, job: &Job) -> Result<()> {
        Self::write_record(&Self::record_path(&self.jobs_dir, &job.id)?, job)
    }

    fn delete_job(&self, id: &str) -> Result<bool> {
        Self::delete_record(&Self::record_path(&self.jobs_dir, id)?)
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = Self::list_records(&self.jobs_dir)?;
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }
}

/// In-memory storage for tests and one-shot runs
#[derive(Default)]
pub struct MemoryStorage {
    templates: RwLock<HashMap<String, Template>>,
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("storage lock poisoned")
}

impl TemplateStore for MemoryStorage {
    fn get_template(&self, id: &str) -> Result<Option<Template>> {
        Ok(self.templates.read().map_err(poisoned)?.get(id).cloned())
    }

    fn store_template(&self, template: &Template) -> Result<()> {
        self.templates
            .write()
            .map_err(poisoned)?
            .insert(template.id.clone(), template.clone());
        Ok(())
    }

    fn delete_template(&self, id: &str) -> Result<bool> {
        Ok(self.templates.write().map_err(poisoned)?.remove(id).is_some())
    }

    fn list_templates(&self) -> Result<Vec<Template>> {
        let mut templates: Vec<Template> =
            self.templates.read().map_err(poisoned)?.values().cloned().collect();
        templates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(templates)
    }
}

impl JobStore for MemoryStorage {
    fn get_job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.read().map_err(poisoned)?.get(id).cloned())
    }

    fn store_job(&self, job: &Job) -> Result<()> {
        self.jobs.write().map_err(poisoned)?.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn delete_job(&self, id: &str) -> Result<bool> {
        Ok(self.jobs.write().map_err(poisoned)?.remove(id).is_some())
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.read().map_err(poisoned)?.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }
}

/// SHA-256 of the full document content, hex encoded
pub fn calculate_document_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuleSet;
    use chrono::{Duration, Utc};

    fn template(id: &str, age_minutes: i64) -> Template {
        Template {
            id: id.to_string(),
            name: format!("Template {}", id),
            is_default: false,
            created_at: Utc::now() - Duration::minutes(age_minutes),
            source_filename: None,
            rules: RuleSet::default(),
            detection_notes: Vec::new(),
        }
    }

    #[test]
    fn test_document_hash_consistency() {
        let data = b"test docx content with some data";
        assert_eq!(calculate_document_hash(data), calculate_document_hash(data));
        assert_ne!(calculate_document_hash(b"one"), calculate_document_hash(b"two"));
        assert_eq!(calculate_document_hash(b"").len(), 64);
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let temp_dir = std::env::temp_dir().join(format!("thesisfmt_test_{}", uuid::Uuid::new_v4()));
        let storage = FileStorage::new(&temp_dir.join("templates"), &temp_dir.join("jobs")).unwrap();

        storage.store_template(&template("newer", 1)).unwrap();
        storage.store_template(&template("older", 10)).unwrap();

        let loaded = storage.get_template("older").unwrap().unwrap();
        assert_eq!(loaded.name, "Template older");
        let ids: Vec<String> = storage.list_templates().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["older", "newer"]);

        assert!(storage.delete_template("older").unwrap());
        assert!(!storage.delete_template("older").unwrap());
        assert!(storage.get_template("older").unwrap().is_none());

        // Clean up
        std::fs::remove_dir_all(temp_dir).ok();
    }

    #[test]
    fn test_path_like_ids_are_rejected() {
        let temp_dir = std::env::temp_dir().join(format!("thesisfmt_test_{}", uuid::Uuid::new_v4()));
        let storage = FileStorage::new(&temp_dir.join("templates"), &temp_dir.join("jobs")).unwrap();
        assert!(storage.get_template("../etc/passwd").is_err());
        std::fs::remove_dir_all(temp_dir).ok();
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage.store_template(&template("a", 0)).unwrap();
        assert!(storage.get_template("a").unwrap().is_some());
        assert!(storage.get_template("b").unwrap().is_none());
        assert!(storage.delete_template("a").unwrap());
        assert!(storage.list_templates().unwrap().is_empty());
    }
}
