use crate::config::ClassifierConfig;
use crate::docx::ParagraphInfo;
use crate::types::GroupKey;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use tracing::debug;

use super::pattern_detection::PatternResolver;
use super::position::PositionResolver;
use super::style_name::StyleNameResolver;
use super::typography::TypographyResolver;

/// Confidence of the implicit last resort, unclassified text as body
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// A group decision made by one resolver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub group: GroupKey,
    pub confidence: f32,
    /// Name of the resolver that matched, `default` for the fallback
    pub resolver: &'static str,
}

/// One predicate-to-group step of the heuristic chain.
///
/// Resolvers are pure: the same paragraph and context always give the same
/// answer, and a resolver never sees another resolver's result.
pub trait GroupResolver: Send + Sync {
    fn resolve(&self, paragraph: &ParagraphInfo, context: &DocumentContext) -> Option<Resolution>;

    fn name(&self) -> &'static str;

    /// True when the answer depends on text and styles only, never on
    /// position or size. Such resolvers anchor the document context.
    fn is_formatting_independent(&self) -> bool {
        false
    }
}

/// Document-wide facts computed once before classification
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentContext {
    /// Median font size over classifiable paragraphs, weighted by length
    pub body_font_size: f32,
    /// Distinct sizes of short lines larger than the body, descending
    pub heading_sizes: Vec<f32>,
    /// Ordinal of the first paragraph that reads as a chapter heading
    pub first_chapter_ordinal: Option<usize>,
    pub page_count: u32,
    pub paragraph_count: usize,
    pub max_heading_chars: usize,
    pub size_tolerance_pt: f32,
}

impl Default for DocumentContext {
    fn default() -> Self {
        Self {
            body_font_size: 12.0,
            heading_sizes: Vec::new(),
            first_chapter_ordinal: None,
            page_count: 1,
            paragraph_count: 0,
            max_heading_chars: 80,
            size_tolerance_pt: 0.5,
        }
    }
}

impl DocumentContext {
    /// Paragraphs that take part in classification at all
    pub fn is_classifiable(paragraph: &ParagraphInfo) -> bool {
        !paragraph.in_table && (!paragraph.is_blank() || paragraph.has_field())
    }

    pub fn is_short(&self, paragraph: &ParagraphInfo) -> bool {
        paragraph.char_count() <= self.max_heading_chars
    }

    /// Build the context. `is_chapter` decides chapter headings without
    /// looking at formatting, so the context survives reformatting.
    pub fn analyze<F>(paragraphs: &[ParagraphInfo], config: &ClassifierConfig, is_chapter: F) -> Self
    where
        F: Fn(&ParagraphInfo) -> bool,
    {
        let classifiable: Vec<&ParagraphInfo> = paragraphs
            .iter()
            .filter(|p| DocumentContext::is_classifiable(p) && !p.is_blank())
            .collect();

        let body_font_size = weighted_median_size(&classifiable).unwrap_or(12.0);
        let threshold = body_font_size + config.size_tolerance_pt;

        let mut heading_sizes: Vec<f32> = Vec::new();
        for paragraph in &classifiable {
            if paragraph.char_count() > config.max_heading_chars {
                continue;
            }
            let size = round_half(paragraph.font_size_pt);
            if size > threshold && !heading_sizes.iter().any(|s| (s - size).abs() < 0.01) {
                heading_sizes.push(size);
            }
        }
        heading_sizes.sort_by(|a, b| b.total_cmp(a));

        let first_chapter_ordinal = classifiable
            .iter()
            .find(|p| is_chapter(p))
            .map(|p| p.ordinal);

        let page_count = paragraphs.iter().map(|p| p.page_index).max().unwrap_or(0) + 1;

        let context = Self {
            body_font_size,
            heading_sizes,
            first_chapter_ordinal,
            page_count,
            paragraph_count: paragraphs.len(),
            max_heading_chars: config.max_heading_chars,
            size_tolerance_pt: config.size_tolerance_pt,
        };
        debug!(
            body_font_size = context.body_font_size,
            heading_sizes = ?context.heading_sizes,
            first_chapter = ?context.first_chapter_ordinal,
            pages = context.page_count,
            "document context analyzed"
        );
        context
    }
}

/// Round to the nearest half point
pub fn round_half(value: f32) -> f32 {
    (value * 2.0).round() / 2.0
}

/// Median of font sizes where each paragraph counts once per character,
/// so long body paragraphs outweigh short headings
fn weighted_median_size(paragraphs: &[&ParagraphInfo]) -> Option<f32> {
    let mut weights: HashMap<i64, usize> = HashMap::new();
    for paragraph in paragraphs {
        let key = (round_half(paragraph.font_size_pt) * 2.0) as i64;
        *weights.entry(key).or_insert(0) += paragraph.char_count().max(1);
    }
    if weights.is_empty() {
        return None;
    }

    let mut sizes: Vec<(i64, usize)> = weights.into_iter().collect();
    sizes.sort_by_key(|(key, _)| *key);
    let total: usize = sizes.iter().map(|(_, w)| w).sum();
    let midpoint = total.div_ceil(2);

    let mut running = 0;
    for (key, weight) in &sizes {
        running += weight;
        if running >= midpoint {
            return Some(*key as f32 / 2.0);
        }
    }
    sizes.last().map(|(key, _)| *key as f32 / 2.0)
}

/// Ordered resolvers; the first match wins, body is the last resort
pub struct ResolverChain {
    resolvers: Vec<Box<dyn GroupResolver>>,
    config: ClassifierConfig,
}

impl ResolverChain {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let mut resolvers: Vec<Box<dyn GroupResolver>> = Vec::new();
        for resolver_config in config.pipeline.resolvers.iter().filter(|r| r.enabled) {
            resolvers.push(Self::resolver_by_name(&resolver_config.name, config)?);
        }
        debug!(
            resolvers = ?resolvers.iter().map(|r| r.name()).collect::<Vec<_>>(),
            "resolver chain built"
        );
        Ok(Self {
            resolvers,
            config: config.clone(),
        })
    }

    fn resolver_by_name(name: &str, config: &ClassifierConfig) -> Result<Box<dyn GroupResolver>> {
        match name {
            "style_name" => Ok(Box::new(StyleNameResolver::new(config))),
            "pattern" => Ok(Box::new(PatternResolver::new(config)?)),
            "position" => Ok(Box::new(PositionResolver::new())),
            "typography" => Ok(Box::new(TypographyResolver::new())),
            other => Err(anyhow!("unknown resolver '{}' in classifier pipeline", other)),
        }
    }

    pub fn resolver_names(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    pub fn analyze(&self, paragraphs: &[ParagraphInfo]) -> DocumentContext {
        let placeholder = DocumentContext {
            max_heading_chars: self.config.max_heading_chars,
            size_tolerance_pt: self.config.size_tolerance_pt,
            ..DocumentContext::default()
        };
        DocumentContext::analyze(paragraphs, &self.config, |paragraph| {
            self.resolvers
                .iter()
                .filter(|r| r.is_formatting_independent())
                .find_map(|r| r.resolve(paragraph, &placeholder))
                .is_some_and(|resolution| resolution.group == GroupKey::ChapterTitle)
        })
    }

    pub fn resolve(&self, paragraph: &ParagraphInfo, context: &DocumentContext) -> Resolution {
        self.resolvers
            .iter()
            .find_map(|resolver| resolver.resolve(paragraph, context))
            .unwrap_or(Resolution {
                group: GroupKey::Body,
                confidence: DEFAULT_CONFIDENCE,
                resolver: "default",
            })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{PipelineConfig, ResolverConfig};
    use crate::types::Alignment;

    /// Plain body paragraph for resolver tests
    pub(crate) fn paragraph(ordinal: usize, text: &str) -> ParagraphInfo {
        ParagraphInfo {
            ordinal,
            text: text.to_string(),
            style_id: Some("Normal".to_string()),
            style_name: Some("Normal".to_string()),
            font_name: Some("Times New Roman".to_string()),
            font_size_pt: 12.0,
            bold: false,
            italic: false,
            alignment: Alignment::Justify,
            line_spacing: 1.5,
            space_before_pt: 0.0,
            space_after_pt: 0.0,
            first_line_indent_pt: 24.0,
            outline_level: None,
            page_index: 0,
            is_numbered: false,
            in_table: false,
            has_drawing: false,
            field_code: String::new(),
            adjacent_table: false,
            adjacent_drawing: false,
        }
    }

    #[test]
    fn test_weighted_median_prefers_long_body() {
        let mut heading = paragraph(0, "Heading");
        heading.font_size_pt = 16.0;
        let body = paragraph(1, &"word ".repeat(40));
        let config = ClassifierConfig::default();

        let context = DocumentContext::analyze(&[heading, body], &config, |_| false);

        assert_eq!(context.body_font_size, 12.0);
        assert_eq!(context.heading_sizes, vec![16.0]);
        assert_eq!(context.page_count, 1);
    }

    #[test]
    fn test_unknown_resolver_name_is_an_error() {
        let config = ClassifierConfig {
            pipeline: PipelineConfig {
                resolvers: vec![ResolverConfig {
                    name: "astrology".to_string(),
                    enabled: true,
                }],
            },
            ..ClassifierConfig::default()
        };
        assert!(ResolverChain::new(&config).is_err());
    }

    #[test]
    fn test_disabled_resolvers_are_skipped() {
        let mut config = ClassifierConfig::default();
        for resolver in config.pipeline.resolvers.iter_mut() {
            resolver.enabled = resolver.name == "pattern";
        }
        let chain = ResolverChain::new(&config).unwrap();
        assert_eq!(chain.resolver_names(), vec!["pattern"]);
    }

    #[test]
    fn test_unmatched_paragraph_falls_back_to_body() {
        let chain = ResolverChain::new(&ClassifierConfig::default()).unwrap();
        let mut p = paragraph(3, "An ordinary sentence in the middle of the thesis.");
        p.style_name = Some("My Custom Style".to_string());
        p.style_id = Some("MyCustomStyle".to_string());
        let context = DocumentContext {
            first_chapter_ordinal: Some(0),
            ..DocumentContext::default()
        };

        let resolution = chain.resolve(&p, &context);

        assert_eq!(resolution.group, GroupKey::Body);
        assert_eq!(resolution.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(resolution.resolver, "default");
    }
}
