use crate::classifier::{classify_document, RuleBasedClassifier};
use crate::config::ClassifierConfig;
use crate::docx::{DocxDocument, ParagraphInfo, SectionInfo};
use crate::error::FormatResult;
use crate::ruleset::default_group_rule;
use crate::types::{Alignment, GroupKey, GroupRule, PageNumberFormat, PageRule, RuleSet};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Result of inferring rules from a reference document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionReport {
    /// Always complete and valid
    pub rules: RuleSet,
    pub warnings: Vec<String>,
    /// Paragraphs that informed each group; zero means defaulted
    pub sample_counts: BTreeMap<GroupKey, usize>,
}

/// Infers a RuleSet from the structure of a reference document
pub struct TemplateDetector {
    classifier: RuleBasedClassifier,
}

impl TemplateDetector {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        Ok(Self {
            classifier: RuleBasedClassifier::new(config)?,
        })
    }

    /// Fails only when the bytes are not a readable document
    pub fn detect_bytes(&self, bytes: &[u8]) -> FormatResult<DetectionReport> {
        let document = DocxDocument::from_bytes(bytes)?;
        Ok(self.detect(&document))
    }

    pub fn detect(&self, document: &DocxDocument) -> DetectionReport {
        let mut warnings = Vec::new();
        let page = detect_page(document.sections().first(), &mut warnings);

        let paragraphs = document.paragraphs();
        let classification = classify_document(&self.classifier, &paragraphs);

        let mut samples: BTreeMap<GroupKey, Vec<&ParagraphInfo>> = BTreeMap::new();
        for paragraph in &paragraphs {
            if paragraph.is_blank() {
                continue;
            }
            if let Some(group) = classification.group_of(paragraph.ordinal) {
                samples.entry(group).or_default().push(paragraph);
            }
        }

        let mut groups = BTreeMap::new();
        let mut sample_counts = BTreeMap::new();
        for key in GroupKey::ALL {
            let group_samples = samples.get(&key).map(Vec::as_slice).unwrap_or(&[]);
            sample_counts.insert(key, group_samples.len());
            let rule = match aggregate(key, group_samples) {
                Some(rule) => rule,
                None => {
                    warnings.push(format!("group {} inferred from default, no match found", key));
                    default_group_rule(key)
                }
            };
            groups.insert(key, rule);
        }

        info!(
            paragraphs = paragraphs.len(),
            defaulted = sample_counts.values().filter(|c| **c == 0).count(),
            warnings = warnings.len(),
            "template detected"
        );
        DetectionReport {
            rules: RuleSet { page, groups },
            warnings,
            sample_counts,
        }
    }
}

fn detect_page(section: Option<&SectionInfo>, warnings: &mut Vec<String>) -> PageRule {
    let defaults = PageRule::default();
    let Some(section) = section else {
        warnings.push("no section properties found, using default page geometry".to_string());
        return defaults;
    };

    let mut take = |value: Option<f32>, fallback: f32, label: &str| match value {
        Some(v) if v.is_finite() && v >= 0.0 => round_to(v, 0.1),
        _ => {
            warnings.push(format!("{} missing, using default {}pt", label, fallback));
            fallback
        }
    };

    let mut page = PageRule {
        page_width_pt: take(section.page_width_pt, defaults.page_width_pt, "page width"),
        page_height_pt: take(section.page_height_pt, defaults.page_height_pt, "page height"),
        margin_top_pt: take(section.margin_top_pt, defaults.margin_top_pt, "top margin"),
        margin_bottom_pt: take(section.margin_bottom_pt, defaults.margin_bottom_pt, "bottom margin"),
        margin_left_pt: take(section.margin_left_pt, defaults.margin_left_pt, "left margin"),
        margin_right_pt: take(section.margin_right_pt, defaults.margin_right_pt, "right margin"),
        header_distance_pt: take(section.header_distance_pt, defaults.header_distance_pt, "header distance"),
        footer_distance_pt: take(section.footer_distance_pt, defaults.footer_distance_pt, "footer distance"),
        gutter_pt: take(section.gutter_pt, defaults.gutter_pt, "gutter"),
        page_number_start: section.page_number_start.unwrap_or(defaults.page_number_start),
        page_number_format: defaults.page_number_format,
    };
    // Zero-sized pages are not pages
    if page.page_width_pt <= 0.0 || page.page_height_pt <= 0.0 {
        warnings.push("page size is zero, using default page size".to_string());
        page.page_width_pt = defaults.page_width_pt;
        page.page_height_pt = defaults.page_height_pt;
    }

    if let Some(raw) = section.page_number_format.as_deref() {
        match raw.parse::<PageNumberFormat>() {
            Ok(format) => page.page_number_format = format,
            Err(_) => warnings.push(format!(
                "page number format '{}' is not supported, using decimal",
                raw
            )),
        }
    }
    page
}

/// Representative profile of a group: medians for measurements, the most
/// common font and alignment, flags carried by at least half the samples
fn aggregate(key: GroupKey, samples: &[&ParagraphInfo]) -> Option<GroupRule> {
    if samples.is_empty() {
        return None;
    }
    let fallback = default_group_rule(key);

    let font_name = mode(samples.iter().filter_map(|p| p.font_name.clone()))
        .unwrap_or(fallback.font_name);
    let alignment = mode(samples.iter().map(|p| p.alignment)).unwrap_or(Alignment::Left);
    let half = |count: usize| count * 2 >= samples.len();

    let rule = GroupRule {
        font_name,
        font_size_pt: round_to(
            median(samples.iter().map(|p| p.font_size_pt)).clamp(8.0, 36.0),
            0.5,
        ),
        alignment,
        line_spacing: round_to(
            median(samples.iter().map(|p| p.line_spacing)).clamp(1.0, 3.0),
            0.1,
        ),
        space_before_pt: round_to(
            median(samples.iter().map(|p| p.space_before_pt)).clamp(0.0, 120.0),
            0.1,
        ),
        space_after_pt: round_to(
            median(samples.iter().map(|p| p.space_after_pt)).clamp(0.0, 120.0),
            0.1,
        ),
        first_line_indent_pt: round_to(
            median(samples.iter().map(|p| p.first_line_indent_pt)).clamp(-36.0, 72.0),
            0.1,
        ),
        bold: half(samples.iter().filter(|p| p.bold).count()),
        italic: half(samples.iter().filter(|p| p.italic).count()),
    };
    debug!(group = %key, samples = samples.len(), font = %rule.font_name, size = rule.font_size_pt, "group aggregated");
    Some(rule)
}

/// Lower median, so the result is always an observed value
fn median<I: Iterator<Item = f32>>(values: I) -> f32 {
    let mut values: Vec<f32> = values.filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    values[(values.len() - 1) / 2]
}

/// Most frequent value; ties go to the value seen first
fn mode<T: PartialEq, I: Iterator<Item = T>>(values: I) -> Option<T> {
    let mut counts: Vec<(T, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }
    let best = counts.iter().map(|(_, c)| *c).max()?;
    counts.into_iter().find(|(_, c)| *c == best).map(|(v, _)| v)
}

fn round_to(value: f32, step: f32) -> f32 {
    let rounded = (value / step).round() * step;
    // Trim float noise such as 1.5000001
    (rounded * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::{DocxBuilder, ParagraphSpec};
    use crate::ruleset::validate;

    fn detector() -> TemplateDetector {
        TemplateDetector::new(&ClassifierConfig::default()).unwrap()
    }

    #[test]
    fn test_helpers() {
        assert_eq!(median([3.0, 1.0, 2.0, 4.0].into_iter()), 2.0);
        assert_eq!(mode(["a", "b", "b", "a", "c"].into_iter()), Some("a"));
        assert_eq!(round_to(12.26, 0.5), 12.5);
        assert_eq!(round_to(1.449, 0.1), 1.4);
    }

    #[test]
    fn test_missing_geometry_warns_and_defaults() {
        let bytes = DocxBuilder::new()
            .without_page_geometry()
            .text("Just one paragraph")
            .build()
            .unwrap();
        let report = detector().detect_bytes(&bytes).unwrap();

        assert_eq!(report.rules.page, PageRule::default());
        assert!(report.warnings.iter().any(|w| w.contains("page width missing")));
        assert!(validate(&report.rules).is_ok());
    }

    #[test]
    fn test_unmatched_groups_are_defaulted_with_warning() {
        let bytes = DocxBuilder::new()
            .paragraph(ParagraphSpec::new("Chapter 1 Introduction").font("Arial", 18.0).bold())
            .paragraph(
                ParagraphSpec::new(&"Body sentence in Georgia. ".repeat(8))
                    .font("Georgia", 11.0)
                    .spacing(2.0, 0.0, 6.0),
            )
            .build()
            .unwrap();
        let report = detector().detect_bytes(&bytes).unwrap();

        let chapter = report.rules.group(GroupKey::ChapterTitle).unwrap();
        assert_eq!(chapter.font_name, "Arial");
        assert_eq!(chapter.font_size_pt, 18.0);
        assert!(chapter.bold);

        let body = report.rules.group(GroupKey::Body).unwrap();
        assert_eq!(body.font_name, "Georgia");
        assert_eq!(body.font_size_pt, 11.0);
        assert_eq!(body.line_spacing, 2.0);
        assert_eq!(body.space_after_pt, 6.0);

        assert_eq!(report.sample_counts[&GroupKey::Toc], 0);
        assert_eq!(report.rules.group(GroupKey::Toc), Some(&default_group_rule(GroupKey::Toc)));
        assert!(report
            .warnings
            .contains(&"group toc inferred from default, no match found".to_string()));
    }

    #[test]
    fn test_unsupported_page_number_format() {
        let mut warnings = Vec::new();
        let section = SectionInfo {
            page_number_format: Some("chineseCounting".to_string()),
            ..SectionInfo::default()
        };
        let page = detect_page(Some(&section), &mut warnings);
        assert_eq!(page.page_number_format, PageNumberFormat::Decimal);
        assert!(warnings.iter().any(|w| w.contains("chineseCounting")));
    }

    #[test]
    fn test_garbage_is_fatal() {
        assert!(detector().detect_bytes(b"not a document").is_err());
    }
}
