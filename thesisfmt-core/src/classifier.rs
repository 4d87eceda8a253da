use crate::config::ClassifierConfig;
use crate::docx::ParagraphInfo;
use crate::oracle::{GroupOracle, OracleError, OracleRequest};
use crate::rules::{DocumentContext, ResolverChain};
use crate::types::GroupKey;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Confidence given to an AI answer that changed the rule-based group
pub const AI_CONFIDENCE: f32 = 0.8;

/// Groups the oracle may not override once a strong signal picked them
const LOCKED_GROUPS: [GroupKey; 3] =
    [GroupKey::Toc, GroupKey::FigureCaption, GroupKey::TableCaption];
const LOCKING_RESOLVERS: [&str; 2] = ["style_name", "pattern"];

/// The group chosen for one paragraph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub ordinal: usize,
    pub group: GroupKey,
    pub confidence: f32,
    /// Resolver name, `default`, or `ai`
    pub source: String,
    /// Non-fatal note raised while classifying this paragraph
    pub warning: Option<String>,
}

/// `classify(paragraph, context) -> (group, confidence)`.
///
/// Implementations never fail: whatever goes wrong, some group comes back.
pub trait ParagraphClassifier: Send + Sync {
    fn analyze(&self, paragraphs: &[ParagraphInfo]) -> DocumentContext;

    fn classify(&self, paragraph: &ParagraphInfo, context: &DocumentContext) -> Classification;

    /// Classify a run of paragraphs in reading order, one result each
    fn classify_all(
        &self,
        paragraphs: &[&ParagraphInfo],
        context: &DocumentContext,
    ) -> Vec<Classification> {
        paragraphs.iter().map(|p| self.classify(p, context)).collect()
    }

    /// Called once before the paragraphs of a new document
    fn begin_document(&self) {}

    fn name(&self) -> &str;
}

/// Deterministic tier over the resolver chain
pub struct RuleBasedClassifier {
    chain: ResolverChain,
}

impl RuleBasedClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        Ok(Self {
            chain: ResolverChain::new(config)?,
        })
    }
}

impl ParagraphClassifier for RuleBasedClassifier {
    fn analyze(&self, paragraphs: &[ParagraphInfo]) -> DocumentContext {
        self.chain.analyze(paragraphs)
    }

    fn classify(&self, paragraph: &ParagraphInfo, context: &DocumentContext) -> Classification {
        let resolution = self.chain.resolve(paragraph, context);
        Classification {
            ordinal: paragraph.ordinal,
            group: resolution.group,
            confidence: resolution.confidence,
            source: resolution.resolver.to_string(),
            warning: None,
        }
    }

    fn name(&self) -> &str {
        "rules"
    }
}

/// Decorator asking an external oracle to confirm or correct the inner
/// classifier, a batch of paragraphs per request. TOC entries and captions
/// found by style or pattern are never sent. The first failure trips it for
/// the rest of the document.
pub struct AiAssistedClassifier<C: ParagraphClassifier> {
    inner: C,
    oracle: Arc<dyn GroupOracle>,
    batch_size: usize,
    tripped: AtomicBool,
}

impl<C: ParagraphClassifier> AiAssistedClassifier<C> {
    pub fn new(inner: C, oracle: Arc<dyn GroupOracle>, batch_size: usize) -> Self {
        Self {
            inner,
            oracle,
            batch_size: batch_size.max(1),
            tripped: AtomicBool::new(false),
        }
    }

    /// Labels for one batch, with a single retry for paragraphs the reply
    /// skipped. A failure comes back with the ordinal it is reported against,
    /// next to whatever was labelled before it.
    fn ask(
        &self,
        batch: &[OracleRequest],
    ) -> (BTreeMap<usize, String>, Option<(usize, OracleError)>) {
        let first = batch.first().map(|r| r.ordinal).unwrap_or_default();
        let mut labels = match self.oracle.suggest_batch(batch) {
            Ok(labels) => labels,
            Err(e) => return (BTreeMap::new(), Some((first, e))),
        };

        let missing: Vec<OracleRequest> = batch
            .iter()
            .filter(|r| !labels.contains_key(&r.ordinal))
            .cloned()
            .collect();
        if let Some(retry_first) = missing.first().map(|r| r.ordinal) {
            debug!(oracle = self.oracle.name(), missing = missing.len(), "retrying unlabelled paragraphs");
            match self.oracle.suggest_batch(&missing) {
                Ok(retried) => labels.extend(retried),
                Err(e) => return (labels, Some((retry_first, e))),
            }
        }
        (labels, None)
    }

    /// Record a failure; only the first one of a document is reported
    fn trip(&self, ordinal: usize, error: &OracleError) -> Option<String> {
        // Disabled is a configuration choice, not a failure worth reporting
        if matches!(error, OracleError::Disabled) {
            self.tripped.store(true, Ordering::SeqCst);
            return None;
        }
        if self.tripped.swap(true, Ordering::SeqCst) {
            return None;
        }
        warn!(oracle = self.oracle.name(), error = %error, "AI classification unavailable, using rules");
        Some(format!(
            "AI classification fell back to rules from paragraph {}: {}",
            ordinal, error
        ))
    }
}

fn is_locked(classification: &Classification) -> bool {
    LOCKED_GROUPS.contains(&classification.group)
        && LOCKING_RESOLVERS.contains(&classification.source.as_str())
}

fn add_warning(classification: &mut Classification, warning: String) {
    classification.warning = Some(match classification.warning.take() {
        Some(existing) => format!("{}; {}", existing, warning),
        None => warning,
    });
}

fn apply_label(classification: &mut Classification, answer: &str) {
    match answer.parse::<GroupKey>() {
        Ok(group) if group == classification.group => {
            classification.confidence = classification.confidence.max(AI_CONFIDENCE);
        }
        Ok(group) => {
            debug!(
                ordinal = classification.ordinal,
                rules = %classification.group,
                ai = %group,
                "oracle changed group"
            );
            classification.group = group;
            classification.confidence = AI_CONFIDENCE;
            classification.source = "ai".to_string();
        }
        Err(_) => {
            let warning = format!(
                "paragraph {}: AI answer '{}' is not a group key, kept {}",
                classification.ordinal, answer, classification.group
            );
            add_warning(classification, warning);
        }
    }
}

impl<C: ParagraphClassifier> ParagraphClassifier for AiAssistedClassifier<C> {
    fn analyze(&self, paragraphs: &[ParagraphInfo]) -> DocumentContext {
        self.inner.analyze(paragraphs)
    }

    fn classify(&self, paragraph: &ParagraphInfo, context: &DocumentContext) -> Classification {
        match self.classify_all(std::slice::from_ref(&paragraph), context).pop() {
            Some(classification) => classification,
            None => self.inner.classify(paragraph, context),
        }
    }

    fn classify_all(
        &self,
        paragraphs: &[&ParagraphInfo],
        context: &DocumentContext,
    ) -> Vec<Classification> {
        let mut classifications = self.inner.classify_all(paragraphs, context);
        if self.tripped.load(Ordering::SeqCst) {
            return classifications;
        }

        let requests: Vec<OracleRequest> = paragraphs
            .iter()
            .enumerate()
            .zip(&classifications)
            .filter(|(_, classification)| !is_locked(classification))
            .map(|((i, paragraph), classification)| {
                let prev = i.checked_sub(1).map(|j| paragraphs[j].text.as_str());
                let next = paragraphs.get(i + 1).map(|p| p.text.as_str());
                OracleRequest::from_paragraph(paragraph, classification.group)
                    .with_neighbours(prev, next)
            })
            .collect();

        let mut labels = BTreeMap::new();
        let mut failure = None;
        let mut unlabelled = Vec::new();
        for batch in requests.chunks(self.batch_size) {
            let (answered, error) = self.ask(batch);
            if let Some((ordinal, error)) = error {
                labels.extend(answered);
                failure = self.trip(ordinal, &error).map(|warning| (ordinal, warning));
                break;
            }
            unlabelled.extend(
                batch
                    .iter()
                    .map(|r| r.ordinal)
                    .filter(|ordinal| !answered.contains_key(ordinal)),
            );
            labels.extend(answered);
        }

        for classification in classifications.iter_mut() {
            if let Some(answer) = labels.get(&classification.ordinal) {
                apply_label(classification, answer);
            }
        }
        if let Some(&first) = unlabelled.first() {
            if let Some(classification) = classifications.iter_mut().find(|c| c.ordinal == first) {
                let warning = format!(
                    "AI returned no group for {} paragraph(s) from paragraph {}, kept rules",
                    unlabelled.len(),
                    first
                );
                add_warning(classification, warning);
            }
        }
        if let Some((ordinal, warning)) = failure {
            if let Some(classification) = classifications.iter_mut().find(|c| c.ordinal == ordinal) {
                add_warning(classification, warning);
            }
        }
        classifications
    }

    fn begin_document(&self) {
        self.inner.begin_document();
        self.tripped.store(false, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "ai-assisted"
    }
}

/// Classifications for one document, keyed by paragraph ordinal
#[derive(Debug, Clone, Default)]
pub struct DocumentClassification {
    pub context: DocumentContext,
    pub classifications: BTreeMap<usize, Classification>,
    pub warnings: Vec<String>,
}

impl DocumentClassification {
    pub fn group_of(&self, ordinal: usize) -> Option<GroupKey> {
        self.classifications.get(&ordinal).map(|c| c.group)
    }

    pub fn count(&self, group: GroupKey) -> usize {
        self.classifications.values().filter(|c| c.group == group).count()
    }
}

/// Classify every classifiable paragraph of a document in order.
/// Blank paragraphs and table cells stay unclassified.
pub fn classify_document(
    classifier: &dyn ParagraphClassifier,
    paragraphs: &[ParagraphInfo],
) -> DocumentClassification {
    classifier.begin_document();
    let context = classifier.analyze(paragraphs);

    let mut result = DocumentClassification {
        context,
        ..DocumentClassification::default()
    };
    let classifiable: Vec<&ParagraphInfo> = paragraphs
        .iter()
        .filter(|p| DocumentContext::is_classifiable(p))
        .collect();
    for classification in classifier.classify_all(&classifiable, &result.context) {
        if let Some(warning) = &classification.warning {
            result.warnings.push(warning.clone());
        }
        result.classifications.insert(classification.ordinal, classification);
    }

    debug!(
        classifier = classifier.name(),
        classified = result.classifications.len(),
        total = paragraphs.len(),
        "document classified"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::engine::tests::paragraph;
    use crate::rules::DEFAULT_CONFIDENCE;
    use std::sync::Mutex;

    /// Answers every paragraph of a batch the same way, optionally leaving
    /// some ordinals out of the first reply or of every reply
    struct ScriptedOracle {
        answer: Result<String, OracleError>,
        skipped: Vec<usize>,
        skip_first_reply_only: bool,
        batches: Mutex<Vec<Vec<OracleRequest>>>,
    }

    impl ScriptedOracle {
        fn answering(answer: Result<&str, OracleError>) -> Arc<Self> {
            Self::skipping(answer, &[], false)
        }

        fn skipping(answer: Result<&str, OracleError>, skipped: &[usize], once: bool) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.map(str::to_string),
                skipped: skipped.to_vec(),
                skip_first_reply_only: once,
                batches: Mutex::new(Vec::new()),
            })
        }

        fn batches(&self) -> Vec<Vec<OracleRequest>> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl GroupOracle for ScriptedOracle {
        fn suggest_batch(
            &self,
            batch: &[OracleRequest],
        ) -> Result<BTreeMap<usize, String>, OracleError> {
            let mut batches = self.batches.lock().unwrap();
            let first_reply = batches.is_empty();
            batches.push(batch.to_vec());

            let answer = self.answer.clone()?;
            let skip = |ordinal: &usize| {
                self.skipped.contains(ordinal) && (first_reply || !self.skip_first_reply_only)
            };
            Ok(batch
                .iter()
                .filter(|r| !skip(&r.ordinal))
                .map(|r| (r.ordinal, answer.clone()))
                .collect())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn sample_document() -> Vec<ParagraphInfo> {
        let mut chapter = paragraph(0, "Chapter 1 Introduction");
        chapter.font_size_pt = 16.0;
        vec![
            chapter,
            paragraph(1, &"Body text of the first chapter. ".repeat(5)),
            paragraph(2, ""),
            paragraph(3, &"More body text. ".repeat(5)),
        ]
    }

    fn rules() -> RuleBasedClassifier {
        RuleBasedClassifier::new(&ClassifierConfig::default()).unwrap()
    }

    #[test]
    fn test_rule_based_is_deterministic() {
        let classifier = rules();
        let paragraphs = sample_document();
        let first = classify_document(&classifier, &paragraphs);
        let second = classify_document(&classifier, &paragraphs);

        assert_eq!(first.classifications, second.classifications);
        assert_eq!(first.group_of(0), Some(GroupKey::ChapterTitle));
        assert_eq!(first.group_of(1), Some(GroupKey::Body));
        assert_eq!(first.group_of(2), None);
        assert_eq!(first.count(GroupKey::Body), 2);
    }

    #[test]
    fn test_unknown_style_median_size_is_default_body() {
        let classifier = rules();
        let paragraphs = sample_document();
        let context = classifier.analyze(&paragraphs);
        let mut p = paragraph(3, "Short unremarkable line");
        p.style_name = Some("Fancy Custom".to_string());

        let classification = classifier.classify(&p, &context);

        assert_eq!(classification.group, GroupKey::Body);
        assert_eq!(classification.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(classification.source, "default");
    }

    #[test]
    fn test_ai_answer_replaces_rule_answer() {
        let oracle = ScriptedOracle::answering(Ok("front_matter"));
        let classifier = AiAssistedClassifier::new(rules(), oracle, 20);
        let result = classify_document(&classifier, &sample_document());

        assert_eq!(result.group_of(1), Some(GroupKey::FrontMatter));
        assert_eq!(result.classifications[&1].source, "ai");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_captions_and_toc_are_not_sent_to_oracle() {
        let mut caption = paragraph(0, "Figure 1-1 System overview");
        caption.style_name = Some("Caption".to_string());
        let paragraphs = vec![
            caption,
            paragraph(1, "Table 2 Measured results"),
            paragraph(2, "1.1 Background ........ 3"),
            paragraph(3, &"Body text of the chapter. ".repeat(5)),
        ];
        let oracle = ScriptedOracle::answering(Ok("body"));
        let classifier = AiAssistedClassifier::new(rules(), oracle.clone(), 20);
        let result = classify_document(&classifier, &paragraphs);

        assert_eq!(result.group_of(0), Some(GroupKey::FigureCaption));
        assert_eq!(result.group_of(1), Some(GroupKey::TableCaption));
        assert_eq!(result.group_of(2), Some(GroupKey::Toc));
        assert_ne!(result.classifications[&0].source, "ai");

        let sent: Vec<usize> = oracle.batches().concat().iter().map(|r| r.ordinal).collect();
        assert_eq!(sent, vec![3]);
    }

    #[test]
    fn test_paragraphs_are_sent_in_batches_with_neighbours() {
        let oracle = ScriptedOracle::answering(Ok("body"));
        let classifier = AiAssistedClassifier::new(rules(), oracle.clone(), 2);
        classify_document(&classifier, &sample_document());

        let batches = oracle.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].iter().map(|r| r.ordinal).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(batches[1][0].ordinal, 3);
        // The blank paragraph is skipped, so body text neighbours body text
        assert!(batches[1][0].prev_text.starts_with("Body text of the first chapter."));
        assert_eq!(batches[0][0].candidate, GroupKey::ChapterTitle);
        assert!(batches[0][0].prev_text.is_empty());
    }

    #[test]
    fn test_skipped_labels_are_retried_once() {
        let oracle = ScriptedOracle::skipping(Ok("front_matter"), &[3], true);
        let classifier = AiAssistedClassifier::new(rules(), oracle.clone(), 20);
        let result = classify_document(&classifier, &sample_document());

        let batches = oracle.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].iter().map(|r| r.ordinal).collect::<Vec<_>>(), vec![3]);
        assert_eq!(result.group_of(3), Some(GroupKey::FrontMatter));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_labels_missing_after_retry_keep_rules() {
        let oracle = ScriptedOracle::skipping(Ok("front_matter"), &[3], false);
        let classifier = AiAssistedClassifier::new(rules(), oracle, 20);
        let result = classify_document(&classifier, &sample_document());

        assert_eq!(result.group_of(1), Some(GroupKey::FrontMatter));
        assert_eq!(result.group_of(3), Some(GroupKey::Body));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("no group for 1 paragraph(s) from paragraph 3"));
    }

    #[test]
    fn test_invalid_ai_answer_keeps_rules_with_warning() {
        let oracle = ScriptedOracle::answering(Ok("appendix"));
        let classifier = AiAssistedClassifier::new(rules(), oracle, 20);
        let result = classify_document(&classifier, &sample_document());

        assert_eq!(result.group_of(0), Some(GroupKey::ChapterTitle));
        assert_eq!(result.warnings.len(), 3);
        assert!(result.warnings[0].contains("appendix"));
    }

    #[test]
    fn test_timeout_trips_once_per_document() {
        let oracle = ScriptedOracle::answering(Err(OracleError::Timeout));
        let classifier = AiAssistedClassifier::new(rules(), oracle.clone(), 2);
        let result = classify_document(&classifier, &sample_document());

        assert_eq!(result.group_of(0), Some(GroupKey::ChapterTitle));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("timed out"));
        assert_eq!(oracle.batches().len(), 1);

        // A new document gets a fresh chance
        classify_document(&classifier, &sample_document());
        assert_eq!(oracle.batches().len(), 2);
    }

    #[test]
    fn test_disabled_oracle_is_silent() {
        let oracle = ScriptedOracle::answering(Err(OracleError::Disabled));
        let classifier = AiAssistedClassifier::new(rules(), oracle, 20);
        let result = classify_document(&classifier, &sample_document());

        assert!(result.warnings.is_empty());
        assert_eq!(result.group_of(3), Some(GroupKey::Body));
    }
}
