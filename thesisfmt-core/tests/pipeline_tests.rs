//! End-to-end pipeline tests: reference detection, classification,
//! application and background jobs.
//!
//! Every fixture is built in memory with `DocxBuilder`, so nothing binary is
//! checked in. Job tests use uuid-named data directories under the system
//! temp dir and remove them afterwards.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thesisfmt_core::classifier::{classify_document, AiAssistedClassifier, RuleBasedClassifier};
use thesisfmt_core::config::{ClassifierConfig, FormatterConfig};
use thesisfmt_core::docx::DocxPackage;
use thesisfmt_core::oracle::{GroupOracle, OracleError, OracleRequest};
use thesisfmt_core::preprocessors::{BridgeOutput, PdfBridge};
use thesisfmt_core::rules::DEFAULT_CONFIDENCE;
use thesisfmt_core::storage::calculate_document_hash;
use thesisfmt_core::*;

// ============================================================================
// Fixture helpers
// ============================================================================

const BODY: &str = "The body of this chapter runs on for long enough that nobody \
would mistake it for a heading, a caption or an entry in the table of contents.";

/// Chapter heading, section heading, body paragraphs, a figure and a table
fn thesis_fixture() -> Vec<u8> {
    DocxBuilder::new()
        .paragraph(ParagraphSpec::new("Chapter 1 Introduction").style("Heading1").font("Calibri", 20.0))
        .paragraph(ParagraphSpec::new(BODY).font("Calibri", 10.0).align(Alignment::Left))
        .paragraph(ParagraphSpec::new("1.1 Motivation").style("Heading2").font("Calibri", 13.0))
        .paragraph(ParagraphSpec::new(BODY).font("Calibri", 10.0).spacing(1.0, 0.0, 0.0))
        .paragraph(ParagraphSpec::new("").with_drawing())
        .paragraph(ParagraphSpec::new("Figure 1-1 System overview").style("Caption"))
        .paragraph(ParagraphSpec::new("Table 1-1 Results").style("Caption"))
        .table(vec![vec!["a".to_string(), "b".to_string()]])
        .paragraph(ParagraphSpec::new(BODY).font("Calibri", 10.0))
        .build()
        .unwrap()
}

fn custom_rules() -> RuleSet {
    let mut rules = RuleSet::default();
    let body = rules.groups.get_mut(&GroupKey::Body).unwrap();
    body.font_name = "Arial".to_string();
    body.font_size_pt = 11.0;
    body.alignment = Alignment::Justify;
    let chapter = rules.groups.get_mut(&GroupKey::ChapterTitle).unwrap();
    chapter.font_name = "Georgia".to_string();
    chapter.font_size_pt = 18.0;
    chapter.alignment = Alignment::Center;
    let caption = rules.groups.get_mut(&GroupKey::FigureCaption).unwrap();
    caption.alignment = Alignment::Right;
    rules
}

fn rule_classifier() -> RuleBasedClassifier {
    RuleBasedClassifier::new(&ClassifierConfig::default()).unwrap()
}

fn temp_data_dir() -> PathBuf {
    std::env::temp_dir().join(format!("thesisfmt_pipeline_{}", uuid::Uuid::new_v4()))
}

/// Orchestrator over memory stores with the default template registered
fn orchestrator(data_dir: &PathBuf, configure: impl FnOnce(&mut FormatterConfig)) -> (JobOrchestrator, String) {
    let mut config = FormatterConfig::default();
    config.storage.data_dir = data_dir.clone();
    configure(&mut config);

    let storage = Arc::new(MemoryStorage::new());
    let registry = TemplateRegistry::new(storage.clone(), &config).unwrap();
    let template = registry.reset_default().unwrap();
    let orchestrator = JobOrchestrator::new_with_dependencies(storage.clone(), storage, config);
    (orchestrator, template.id)
}

async fn finish(orchestrator: &JobOrchestrator, job_id: &str) -> Job {
    orchestrator
        .wait_for_terminal(job_id, Duration::from_millis(20), Duration::from_secs(30))
        .await
        .unwrap()
}

struct FailingBridge;

impl PdfBridge for FailingBridge {
    fn convert(&self, _pdf_bytes: &[u8]) -> anyhow::Result<BridgeOutput> {
        Err(anyhow::anyhow!("PDF is encrypted"))
    }

    fn name(&self) -> &str {
        "failing"
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Behaves like a provider whose requests exceed the agent timeout
struct TimedOutOracle;

impl GroupOracle for TimedOutOracle {
    fn suggest_batch(
        &self,
        _batch: &[OracleRequest],
    ) -> Result<BTreeMap<usize, String>, OracleError> {
        Err(OracleError::Timeout)
    }

    fn name(&self) -> &str {
        "timed-out"
    }
}

/// Labels everything it is shown as body
struct BodyOracle {
    seen: Mutex<Vec<String>>,
}

impl GroupOracle for BodyOracle {
    fn suggest_batch(
        &self,
        batch: &[OracleRequest],
    ) -> Result<BTreeMap<usize, String>, OracleError> {
        self.seen.lock().unwrap().extend(batch.iter().map(|r| r.text.clone()));
        Ok(batch.iter().map(|r| (r.ordinal, "body".to_string())).collect())
    }

    fn name(&self) -> &str {
        "body"
    }
}

// ============================================================================
// Template Detector
// ============================================================================

mod detection {
    use super::*;

    #[test]
    fn bundled_reference_populates_every_group() {
        let detector = TemplateDetector::new(&ClassifierConfig::default()).unwrap();
        let report = detector.detect_bytes(&bundled_reference_docx().unwrap()).unwrap();

        assert_eq!(report.rules.groups.len(), 9);
        assert!(validate(&report.rules).is_ok());
        for key in GroupKey::ALL {
            assert!(
                report.sample_counts[&key] > 0,
                "group {} had no representative paragraph",
                key
            );
        }
        assert!(!report.warnings.iter().any(|w| w.contains("inferred from default")));
    }

    #[test]
    fn bundled_reference_reproduces_default_typography() {
        let detector = TemplateDetector::new(&ClassifierConfig::default()).unwrap();
        let report = detector.detect_bytes(&bundled_reference_docx().unwrap()).unwrap();
        let defaults = RuleSet::default();

        for key in GroupKey::ALL {
            let detected = &report.rules.groups[&key];
            let expected = &defaults.groups[&key];
            assert_eq!(detected.font_name, expected.font_name, "font of {}", key);
            assert_eq!(detected.font_size_pt, expected.font_size_pt, "size of {}", key);
            assert_eq!(detected.alignment, expected.alignment, "alignment of {}", key);
        }
        assert_eq!(report.rules.page, defaults.page);
    }
}

// ============================================================================
// Paragraph Classifier
// ============================================================================

mod classification {
    use super::*;

    #[test]
    fn rule_based_classification_is_deterministic() {
        let document = DocxDocument::from_bytes(&thesis_fixture()).unwrap();
        let paragraphs = document.paragraphs();
        let classifier = rule_classifier();

        let first = classify_document(&classifier, &paragraphs);
        let second = classify_document(&classifier, &paragraphs);
        assert_eq!(first.classifications, second.classifications);
    }

    #[test]
    fn fixture_groups() {
        let document = DocxDocument::from_bytes(&thesis_fixture()).unwrap();
        let paragraphs = document.paragraphs();
        let result = classify_document(&rule_classifier(), &paragraphs);

        let group_of = |text: &str| {
            let paragraph = paragraphs.iter().find(|p| p.text == text).unwrap();
            result.group_of(paragraph.ordinal)
        };
        assert_eq!(group_of("Chapter 1 Introduction"), Some(GroupKey::ChapterTitle));
        assert_eq!(group_of("1.1 Motivation"), Some(GroupKey::SectionTitle));
        assert_eq!(group_of("Figure 1-1 System overview"), Some(GroupKey::FigureCaption));
        assert_eq!(group_of("Table 1-1 Results"), Some(GroupKey::TableCaption));
        assert_eq!(group_of(BODY), Some(GroupKey::Body));
        // table cells stay unclassified
        assert_eq!(group_of("a"), None);
    }

    #[test]
    fn ai_cannot_reclassify_captions() {
        let document = DocxDocument::from_bytes(&thesis_fixture()).unwrap();
        let paragraphs = document.paragraphs();
        let oracle = Arc::new(BodyOracle { seen: Mutex::new(Vec::new()) });
        let classifier = AiAssistedClassifier::new(rule_classifier(), oracle.clone(), 20);
        let result = classify_document(&classifier, &paragraphs);

        let group_of = |text: &str| {
            let paragraph = paragraphs.iter().find(|p| p.text == text).unwrap();
            result.group_of(paragraph.ordinal)
        };
        assert_eq!(group_of("Figure 1-1 System overview"), Some(GroupKey::FigureCaption));
        assert_eq!(group_of("Table 1-1 Results"), Some(GroupKey::TableCaption));
        assert_eq!(group_of("Chapter 1 Introduction"), Some(GroupKey::Body));

        let seen = oracle.seen.lock().unwrap();
        assert!(seen.iter().all(|text| !text.starts_with("Figure") && !text.starts_with("Table")));
        assert!(seen.iter().any(|text| text == "Chapter 1 Introduction"));
    }

    #[test]
    fn unknown_style_at_median_size_is_default_body() {
        let bytes = DocxBuilder::new()
            .paragraph(ParagraphSpec::new("Chapter 1 Introduction").style("Heading1"))
            .paragraph(ParagraphSpec::new(BODY))
            .paragraph(ParagraphSpec::new("An ordinary remark").style("FancyCustom"))
            .paragraph(ParagraphSpec::new(BODY))
            .build()
            .unwrap();
        let document = DocxDocument::from_bytes(&bytes).unwrap();
        let paragraphs = document.paragraphs();
        let result = classify_document(&rule_classifier(), &paragraphs);

        let remark = paragraphs.iter().find(|p| p.text == "An ordinary remark").unwrap();
        let classification = &result.classifications[&remark.ordinal];
        assert_eq!(classification.group, GroupKey::Body);
        assert_eq!(classification.confidence, DEFAULT_CONFIDENCE);
    }
}

// ============================================================================
// Format Applier
// ============================================================================

mod application {
    use super::*;

    #[test]
    fn input_document_is_never_mutated() {
        let bytes = thesis_fixture();
        let before = calculate_document_hash(&bytes);
        let document = DocxDocument::from_bytes(&bytes).unwrap();
        let serialized_before = calculate_document_hash(&document.to_bytes().unwrap());

        let classification = classify_document(&rule_classifier(), &document.paragraphs());
        let outcome = FormatApplier::new(&Default::default())
            .apply(&document, &custom_rules(), &classification)
            .unwrap();

        assert!(outcome.formatted_total() > 0);
        assert_eq!(calculate_document_hash(&bytes), before);
        assert_eq!(calculate_document_hash(&document.to_bytes().unwrap()), serialized_before);
    }

    #[test]
    fn redetecting_applied_output_reproduces_rules() {
        let rules = custom_rules();
        let document = DocxDocument::from_bytes(&thesis_fixture()).unwrap();
        let classification = classify_document(&rule_classifier(), &document.paragraphs());
        let outcome = FormatApplier::new(&Default::default())
            .apply(&document, &rules, &classification)
            .unwrap();

        let detector = TemplateDetector::new(&ClassifierConfig::default()).unwrap();
        let report = detector.detect(&outcome.document);

        let mut compared = 0;
        for key in GroupKey::ALL {
            if report.sample_counts[&key] == 0 {
                continue;
            }
            let detected = &report.rules.groups[&key];
            let expected = &rules.groups[&key];
            assert_eq!(detected.font_name, expected.font_name, "font of {}", key);
            assert_eq!(detected.font_size_pt, expected.font_size_pt, "size of {}", key);
            assert_eq!(detected.alignment, expected.alignment, "alignment of {}", key);
            compared += 1;
        }
        assert!(compared >= 5);
    }

    #[test]
    fn toc_field_codes_survive() {
        let document = DocxDocument::from_bytes(&bundled_reference_docx().unwrap()).unwrap();
        let classification = classify_document(&rule_classifier(), &document.paragraphs());
        let outcome = FormatApplier::new(&Default::default())
            .apply(&document, &custom_rules(), &classification)
            .unwrap();

        assert!(outcome
            .document
            .paragraphs()
            .iter()
            .any(|p| p.field_code.contains(r#"TOC \o "1-3""#)));
    }
}

// ============================================================================
// Job Orchestrator
// ============================================================================

mod jobs {
    use super::*;

    #[tokio::test]
    async fn unsupported_extension_is_rejected_before_queueing() {
        let data_dir = temp_data_dir();
        let (orchestrator, template_id) = orchestrator(&data_dir, |_| {});

        let err = orchestrator
            .submit(&template_id, "thesis.txt", b"plain text".to_vec(), &RuleSetPatch::default())
            .await
            .unwrap_err();

        assert!(matches!(err, FormatError::UnsupportedTarget(_)));
        assert!(orchestrator.list_jobs().unwrap().is_empty());
        std::fs::remove_dir_all(&data_dir).ok();
    }

    #[tokio::test]
    async fn unknown_template_is_rejected() {
        let data_dir = temp_data_dir();
        let (orchestrator, _) = orchestrator(&data_dir, |_| {});

        let err = orchestrator
            .submit("missing", "thesis.docx", thesis_fixture(), &RuleSetPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FormatError::TemplateNotFound(_)));
        std::fs::remove_dir_all(&data_dir).ok();
    }

    #[tokio::test]
    async fn upper_roman_numbering_and_body_font() {
        let data_dir = temp_data_dir();
        let (orchestrator, template_id) = orchestrator(&data_dir, |_| {});
        let overrides = RuleSetPatch::from_assignments(&[
            "page.page_number_format=upperRoman",
            "groups.body.font_name=Times New Roman",
        ])
        .unwrap();

        let job_id = orchestrator
            .submit(&template_id, "thesis.docx", thesis_fixture(), &overrides)
            .await
            .unwrap();
        let job = finish(&orchestrator, &job_id).await;

        assert_eq!(job.state, JobState::Success, "error: {:?}", job.error);
        assert_eq!(job.progress, 100);
        assert_eq!(job.rules.page.page_number_format, PageNumberFormat::UpperRoman);

        let output = std::fs::read(job.output_path.as_ref().unwrap()).unwrap();
        let document = DocxDocument::from_bytes(&output).unwrap();
        assert_eq!(document.sections()[0].page_number_format.as_deref(), Some("upperRoman"));
        for paragraph in document.paragraphs().iter().filter(|p| p.text == BODY) {
            assert_eq!(paragraph.font_name.as_deref(), Some("Times New Roman"));
        }

        let package = DocxPackage::from_bytes(&output).unwrap();
        let footer_has_page_field = package
            .part_names()
            .filter(|name| name.starts_with("word/footer"))
            .filter_map(|name| package.part(name))
            .any(|xml| String::from_utf8_lossy(xml).contains("PAGE"));
        assert!(footer_has_page_field);

        // the uploaded target is untouched
        let input = std::fs::read(&job.input_path).unwrap();
        assert_eq!(calculate_document_hash(&input), job.input_sha256);
        std::fs::remove_dir_all(&data_dir).ok();
    }

    #[tokio::test]
    async fn failed_pdf_bridge_fails_the_job() {
        let data_dir = temp_data_dir();
        let (orchestrator, template_id) = orchestrator(&data_dir, |_| {});
        let orchestrator = orchestrator.with_pdf_bridge(Some(Arc::new(FailingBridge)));

        let job_id = orchestrator
            .submit(&template_id, "thesis.pdf", b"%PDF-1.7 ...".to_vec(), &RuleSetPatch::default())
            .await
            .unwrap();
        let job = finish(&orchestrator, &job_id).await;

        assert_eq!(job.state, JobState::Failed);
        let error = job.error.unwrap_or_default();
        assert!(!error.is_empty());
        assert!(error.contains("PDF is encrypted"));
        assert!(job.output_path.is_none());
        assert!(!data_dir.join("outputs").join(format!("formatted_{}.docx", job_id)).exists());
        std::fs::remove_dir_all(&data_dir).ok();
    }

    #[tokio::test]
    async fn ai_timeout_falls_back_and_succeeds() {
        let data_dir = temp_data_dir();
        let (orchestrator, template_id) = orchestrator(&data_dir, |config| {
            config.ai.batch_size = 2;
        });
        let orchestrator = orchestrator.with_oracle(Arc::new(TimedOutOracle));

        let job_id = orchestrator
            .submit(&template_id, "thesis.docx", thesis_fixture(), &RuleSetPatch::default())
            .await
            .unwrap();
        let job = finish(&orchestrator, &job_id).await;

        assert_eq!(job.state, JobState::Success, "error: {:?}", job.error);
        let warning = job.warning.unwrap_or_default();
        assert!(warning.contains("fell back to rules"));
        assert!(warning.contains("timed out"));
        std::fs::remove_dir_all(&data_dir).ok();
    }

    #[tokio::test]
    async fn submission_snapshots_template_rules() {
        let data_dir = temp_data_dir();
        let mut config = FormatterConfig::default();
        config.storage.data_dir = data_dir.clone();
        let storage = Arc::new(MemoryStorage::new());
        let registry = TemplateRegistry::new(storage.clone(), &config).unwrap();
        let template = registry.reset_default().unwrap();
        let orchestrator = JobOrchestrator::new_with_dependencies(storage.clone(), storage, config);

        let job_id = orchestrator
            .submit(&template.id, "thesis.docx", thesis_fixture(), &RuleSetPatch::default())
            .await
            .unwrap();
        registry.update_rules(&template.id, custom_rules()).unwrap();
        let job = finish(&orchestrator, &job_id).await;

        assert_eq!(job.rules, template.rules);
        std::fs::remove_dir_all(&data_dir).ok();
    }
}
