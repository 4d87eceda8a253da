use crate::applier::FormatApplier;
use crate::classifier::{
    classify_document, AiAssistedClassifier, ParagraphClassifier, RuleBasedClassifier,
};
use crate::config::FormatterConfig;
use crate::docx::DocxDocument;
use crate::error::{FormatError, FormatResult};
use crate::oracle::{GroupOracle, HttpGroupOracle};
use crate::preprocessors::{default_bridge, PdfBridge};
use crate::ruleset::{apply_overrides, validate, RuleSetPatch};
use crate::storage::{calculate_document_hash, FileStorage, JobStore, TemplateStore};
use crate::types::*;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Progress milestones reported while a job runs
pub mod milestones {
    pub const STARTED: u8 = 5;
    pub const INPUT_READY: u8 = 10;
    pub const CLASSIFIED: u8 = 60;
    pub const APPLIED: u8 = 90;
    pub const WRITTEN: u8 = 100;
}

/// Simple profiler that collects timings for pipeline steps
pub struct StepProfiler {
    enabled: bool,
    timings: Vec<(String, Duration)>,
}

impl StepProfiler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            timings: Vec::new(),
        }
    }

    pub fn time_step<F, R>(&mut self, step_name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        if !self.enabled {
            return f();
        }

        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();

        debug!(step = step_name, elapsed_ms = elapsed.as_millis() as u64, "pipeline step");
        self.timings.push((step_name.to_string(), elapsed));

        result
    }

    pub fn log_summary(&self) {
        if !self.enabled || self.timings.is_empty() {
            return;
        }

        let total: Duration = self.timings.iter().map(|(_, d)| *d).sum();
        for (step, duration) in &self.timings {
            let percentage = if total.is_zero() {
                0.0
            } else {
                (duration.as_secs_f64() / total.as_secs_f64()) * 100.0
            };
            debug!(
                step = step.as_str(),
                elapsed_ms = duration.as_millis() as u64,
                percentage = format!("{:.1}", percentage),
                "step summary"
            );
        }
        debug!(total_ms = total.as_millis() as u64, "pipeline total");
    }
}

/// Result of running the formatting pipeline over one target
#[derive(Debug, Clone)]
pub struct FormattedDocument {
    pub docx: Vec<u8>,
    /// The DOCX the PDF bridge produced, for PDF targets
    pub intermediate: Option<Vec<u8>>,
    pub warnings: Vec<String>,
    pub conversion_confidence: Option<f32>,
    /// Paragraphs rewritten
    pub formatted: usize,
}

/// Runs formatting jobs in the background and tracks their state.
///
/// Cloning is cheap; clones share stores and collaborators.
#[derive(Clone)]
pub struct JobOrchestrator {
    templates: Arc<dyn TemplateStore>,
    jobs: Arc<dyn JobStore>,
    config: Arc<FormatterConfig>,
    pdf_bridge: Option<Arc<dyn PdfBridge>>,
    oracle: Option<Arc<dyn GroupOracle>>,
}

impl JobOrchestrator {
    /// Create JobOrchestrator with full dependency injection
    pub fn new_with_dependencies(
        templates: Arc<dyn TemplateStore>,
        jobs: Arc<dyn JobStore>,
        config: FormatterConfig,
    ) -> Self {
        Self {
            templates,
            jobs,
            config: Arc::new(config),
            pdf_bridge: default_bridge().map(Arc::from),
            oracle: None,
        }
    }

    /// Convenience constructor: file-backed stores under the configured data dir
    pub fn new_file_backed(config: FormatterConfig) -> FormatResult<Self> {
        let storage = Arc::new(FileStorage::new(
            &config.storage.templates_dir(),
            &config.storage.jobs_dir(),
        )?);
        let templates: Arc<dyn TemplateStore> = storage.clone();
        let jobs: Arc<dyn JobStore> = storage;
        Ok(Self::new_with_dependencies(templates, jobs, config))
    }

    /// Replace the PDF bridge, or remove it with `None`
    pub fn with_pdf_bridge(mut self, bridge: Option<Arc<dyn PdfBridge>>) -> Self {
        self.pdf_bridge = bridge;
        self
    }

    /// Use this oracle for AI-assisted classification regardless of config
    pub fn with_oracle(mut self, oracle: Arc<dyn GroupOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn config(&self) -> &FormatterConfig {
        &self.config
    }

    /// Validate a target and queue a job for it. Nothing is stored when
    /// validation fails.
    pub async fn submit(
        &self,
        template_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
        overrides: &RuleSetPatch,
    ) -> FormatResult<String> {
        let job = self.prepare_job(template_id, file_name, &bytes, overrides)?;
        let job_id = job.id.clone();
        info!(job_id = %job_id, template_id = %template_id, kind = ?job.target_kind, "job queued");

        let orchestrator = self.clone();
        let spawned_id = job_id.clone();
        tokio::spawn(async move {
            let worker = orchestrator.clone();
            let worker_id = spawned_id.clone();
            let joined = tokio::task::spawn_blocking(move || worker.run_job(&worker_id)).await;
            if let Err(e) = joined {
                error!(job_id = %spawned_id, error = %e, "job worker crashed");
                orchestrator.fail(&spawned_id, format!("internal error: job worker crashed: {}", e));
            }
        });

        Ok(job_id)
    }

    fn prepare_job(
        &self,
        template_id: &str,
        file_name: &str,
        bytes: &[u8],
        overrides: &RuleSetPatch,
    ) -> FormatResult<Job> {
        let target_kind = TargetKind::from_file_name(file_name)
            .ok_or_else(|| FormatError::UnsupportedTarget(file_name.to_string()))?;
        if bytes.is_empty() {
            return Err(FormatError::InvalidInput(format!("{} is empty", file_name)));
        }
        let limit = self.config.storage.max_upload_bytes();
        if bytes.len() as u64 > limit {
            return Err(FormatError::InvalidInput(format!(
                "{} exceeds the {} MB upload limit",
                file_name, self.config.storage.max_upload_mb
            )));
        }

        let template = self
            .templates
            .get_template(template_id)
            .map_err(|e| FormatError::Storage(e.to_string()))?
            .ok_or_else(|| FormatError::TemplateNotFound(template_id.to_string()))?;

        // Snapshot: later edits to the template do not reach this job
        let rules = apply_overrides(&template.rules, overrides);
        validate(&rules)?;

        let id = Uuid::new_v4().to_string();
        let uploads = self.config.storage.uploads_dir();
        let input_path = uploads.join(format!("target_{}.{}", id, target_kind.extension()));
        fs::create_dir_all(&uploads).map_err(|e| storage_error(&uploads, e))?;
        fs::write(&input_path, bytes).map_err(|e| storage_error(&input_path, e))?;

        let now = Utc::now();
        let job = Job {
            id,
            template_id: template_id.to_string(),
            target_filename: file_name.to_string(),
            target_kind,
            input_path,
            input_sha256: calculate_document_hash(bytes),
            rules,
            state: JobState::Queued,
            progress: 0,
            warning: None,
            error: None,
            output_path: None,
            conversion_confidence: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs
            .store_job(&job)
            .map_err(|e| FormatError::Storage(e.to_string()))?;
        Ok(job)
    }

    /// Pure read of a job's current state
    pub fn get_status(&self, job_id: &str) -> FormatResult<Job> {
        self.jobs
            .get_job(job_id)
            .map_err(|e| FormatError::Storage(e.to_string()))?
            .ok_or_else(|| FormatError::JobNotFound(job_id.to_string()))
    }

    pub fn list_jobs(&self) -> FormatResult<Vec<Job>> {
        self.jobs
            .list_jobs()
            .map_err(|e| FormatError::Storage(e.to_string()))
    }

    /// Poll until the job is terminal or `timeout` elapses; returns the last
    /// observed state either way
    pub async fn wait_for_terminal(
        &self,
        job_id: &str,
        interval: Duration,
        timeout: Duration,
    ) -> FormatResult<Job> {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.get_status(job_id)?;
            if job.state.is_terminal() || Instant::now() >= deadline {
                return Ok(job);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Run a queued job to a terminal state. Every failure ends as `failed`.
    pub fn run_job(&self, job_id: &str) {
        let job = match self.get_status(job_id) {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "cannot load job");
                return;
            }
        };
        if job.state != JobState::Queued {
            warn!(job_id = %job_id, state = %job.state, "job is not queued, not running it");
            return;
        }

        let start = Instant::now();
        match self.execute(job) {
            Ok(()) => info!(
                job_id = %job_id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "job finished"
            ),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "job failed");
                self.fail(job_id, e.to_string());
            }
        }
    }

    fn execute(&self, job: Job) -> FormatResult<()> {
        let job_id = job.id.clone();
        self.update(&job_id, |j| {
            j.state = JobState::Running;
            j.progress = milestones::STARTED;
        })?;

        let bytes = fs::read(&job.input_path).map_err(|e| storage_error(&job.input_path, e))?;
        if calculate_document_hash(&bytes) != job.input_sha256 {
            return Err(FormatError::InvalidInput(
                "uploaded target changed after submission".to_string(),
            ));
        }

        let mut report = |progress: u8| {
            if let Err(e) = self.update(&job_id, |j| j.progress = progress) {
                warn!(job_id = %job_id, error = %e, "progress not recorded");
            }
        };
        let result = self.format_document(job.target_kind, &bytes, &job.rules, &mut report)?;

        if let Some(intermediate) = &result.intermediate {
            let work = self.config.storage.work_dir();
            let path = work.join(format!("intermediate_{}.docx", job_id));
            fs::create_dir_all(&work).map_err(|e| storage_error(&work, e))?;
            fs::write(&path, intermediate).map_err(|e| storage_error(&path, e))?;
        }

        let outputs = self.config.storage.outputs_dir();
        let output_path = outputs.join(format!("formatted_{}.docx", job_id));
        fs::create_dir_all(&outputs).map_err(|e| storage_error(&outputs, e))?;
        fs::write(&output_path, &result.docx).map_err(|e| storage_error(&output_path, e))?;

        let warning = if result.warnings.is_empty() {
            None
        } else {
            Some(result.warnings.join("\n"))
        };
        self.update(&job_id, move |j| {
            j.state = JobState::Success;
            j.progress = milestones::WRITTEN;
            j.output_path = Some(output_path);
            j.warning = warning;
            j.conversion_confidence = result.conversion_confidence;
        })
    }

    /// The formatting pipeline without any job bookkeeping.
    ///
    /// `progress` receives each milestone up to `APPLIED`; writing the result
    /// is up to the caller.
    pub fn format_document(
        &self,
        kind: TargetKind,
        bytes: &[u8],
        rules: &RuleSet,
        progress: &mut dyn FnMut(u8),
    ) -> FormatResult<FormattedDocument> {
        let mut profiler = StepProfiler::new(tracing::enabled!(tracing::Level::DEBUG));
        let mut warnings = Vec::new();

        let (docx_bytes, conversion_confidence) = match kind {
            TargetKind::Docx => (None, None),
            TargetKind::Pdf => {
                let bridge = self.pdf_bridge.as_ref().ok_or_else(|| {
                    FormatError::Conversion("no PDF bridge is available in this build".to_string())
                })?;
                let output = profiler
                    .time_step("1. PDF → DOCX", || bridge.convert(bytes))
                    .map_err(|e| FormatError::Conversion(format!("{:#}", e)))?;
                info!(
                    bridge = bridge.name(),
                    pages = output.pages,
                    confidence = output.confidence,
                    "PDF converted"
                );
                warnings.extend(output.warnings);
                (Some(output.docx), Some(output.confidence))
            }
        };

        let source = docx_bytes.as_deref().unwrap_or(bytes);
        let document = profiler.time_step("2. Open document", || DocxDocument::from_bytes(source))?;
        progress(milestones::INPUT_READY);

        let (classifier, classifier_warning) = self.build_classifier()?;
        warnings.extend(classifier_warning);
        let paragraphs = document.paragraphs();
        let classification = profiler.time_step("3. Classification", || {
            classify_document(classifier.as_ref(), &paragraphs)
        });
        warnings.extend(classification.warnings.iter().cloned());
        progress(milestones::CLASSIFIED);

        let applier = FormatApplier::new(&self.config.applier);
        let outcome = profiler.time_step("4. Apply rules", || {
            applier.apply(&document, rules, &classification)
        })?;
        warnings.extend(outcome.warnings.iter().cloned());
        progress(milestones::APPLIED);

        let docx = profiler.time_step("5. Serialize", || outcome.document.to_bytes())?;
        profiler.log_summary();

        Ok(FormattedDocument {
            docx,
            intermediate: docx_bytes,
            warnings,
            conversion_confidence,
            formatted: outcome.formatted_total(),
        })
    }

    /// A fresh classifier per job, so one document's AI trip never leaks into another
    fn build_classifier(&self) -> FormatResult<(Box<dyn ParagraphClassifier>, Option<String>)> {
        let rules = RuleBasedClassifier::new(&self.config.classifier)?;
        let batch_size = self.config.ai.batch_size;

        if let Some(oracle) = &self.oracle {
            let classifier = AiAssistedClassifier::new(rules, Arc::clone(oracle), batch_size);
            return Ok((Box::new(classifier), None));
        }
        if !self.config.ai.is_enabled() {
            return Ok((Box::new(rules), None));
        }

        match HttpGroupOracle::from_config(&self.config.ai) {
            Ok(oracle) => {
                let classifier = AiAssistedClassifier::new(rules, Arc::new(oracle), batch_size);
                Ok((Box::new(classifier), None))
            }
            Err(e) => {
                warn!(error = %e, "AI classification unavailable, using rules");
                Ok((
                    Box::new(rules),
                    Some(format!("AI classification unavailable, using rules: {}", e)),
                ))
            }
        }
    }

    fn fail(&self, job_id: &str, message: String) {
        let message = if message.trim().is_empty() {
            "job failed without an error message".to_string()
        } else {
            message
        };
        if let Err(e) = self.update(job_id, |j| {
            j.state = JobState::Failed;
            j.error = Some(message);
            j.output_path = None;
        }) {
            error!(job_id = %job_id, error = %e, "cannot record job failure");
        }
    }

    /// Load, mutate and store a job. Terminal jobs are never changed.
    fn update<F>(&self, job_id: &str, mutate: F) -> FormatResult<()>
    where
        F: FnOnce(&mut Job),
    {
        let mut job = self.get_status(job_id)?;
        if job.state.is_terminal() {
            debug!(job_id = %job_id, state = %job.state, "ignoring update to terminal job");
            return Ok(());
        }
        mutate(&mut job);
        job.updated_at = Utc::now();
        self.jobs
            .store_job(&job)
            .map_err(|e| FormatError::Storage(e.to_string()))
    }
}

fn storage_error(path: &Path, e: std::io::Error) -> FormatError {
    FormatError::Storage(format!("{}: {}", path.display(), e))
}

/// Where a finished job's output lives, if it succeeded
pub fn output_of(job: &Job) -> Option<&PathBuf> {
    match job.state {
        JobState::Success => job.output_path.as_ref(),
        _ => None,
    }
}
