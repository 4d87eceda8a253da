use crate::config::ClassifierConfig;
use crate::docx::ParagraphInfo;
use crate::types::GroupKey;
use anyhow::{Context, Result};
use regex::Regex;

use super::engine::{DocumentContext, GroupResolver, Resolution};

const PATTERN_CONFIDENCE: f32 = 0.9;

struct CompiledPattern {
    group: GroupKey,
    regex: Regex,
    short_only: bool,
}

// PatternResolver - strong text signals: TOC fields and titles, caption
// prefixes, chapter/section numbering, abstract and keyword headings
pub struct PatternResolver {
    patterns: Vec<CompiledPattern>,
}

impl PatternResolver {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        // Compile patterns from config
        let mut patterns = Vec::new();
        for rule in &config.patterns {
            for pattern in &rule.patterns {
                let regex = Regex::new(pattern)
                    .with_context(|| format!("invalid pattern for {}: {}", rule.group, pattern))?;
                patterns.push(CompiledPattern {
                    group: rule.group,
                    regex,
                    short_only: rule.short_only,
                });
            }
        }
        Ok(Self { patterns })
    }
}

/// TOC field itself, or entries generated by one (`PAGEREF _Toc...`)
fn is_toc_field(field_code: &str) -> bool {
    let code = field_code.trim_start().to_ascii_uppercase();
    code.starts_with("TOC") || code.contains("PAGEREF _TOC") || code.contains("\\L \"_TOC")
}

impl GroupResolver for PatternResolver {
    fn resolve(&self, paragraph: &ParagraphInfo, context: &DocumentContext) -> Option<Resolution> {
        if is_toc_field(&paragraph.field_code) {
            return Some(Resolution {
                group: GroupKey::Toc,
                confidence: PATTERN_CONFIDENCE,
                resolver: self.name(),
            });
        }

        let text = paragraph.text.trim();
        if text.is_empty() {
            return None;
        }
        let short = context.is_short(paragraph);

        self.patterns
            .iter()
            .filter(|p| short || !p.short_only)
            .find(|p| p.regex.is_match(text))
            .map(|p| Resolution {
                group: p.group,
                confidence: PATTERN_CONFIDENCE,
                resolver: self.name(),
            })
    }

    fn name(&self) -> &'static str {
        "pattern"
    }

    fn is_formatting_independent(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatternRule;
    use crate::rules::engine::tests::paragraph;

    fn resolve(text: &str) -> Option<GroupKey> {
        PatternResolver::new(&ClassifierConfig::default())
            .unwrap()
            .resolve(&paragraph(10, text), &DocumentContext::default())
            .map(|r| r.group)
    }

    #[test]
    fn test_default_patterns() {
        assert_eq!(resolve("Table of Contents"), Some(GroupKey::Toc));
        assert_eq!(resolve("目錄"), Some(GroupKey::Toc));
        assert_eq!(resolve("Chapter 2 Related Work........12"), Some(GroupKey::Toc));
        assert_eq!(resolve("Figure 3-1 System overview"), Some(GroupKey::FigureCaption));
        assert_eq!(resolve("圖 2 研究架構"), Some(GroupKey::FigureCaption));
        assert_eq!(resolve("Table 1 Sample statistics"), Some(GroupKey::TableCaption));
        assert_eq!(resolve("Chapter 1 Introduction"), Some(GroupKey::ChapterTitle));
        assert_eq!(resolve("第一章 緒論"), Some(GroupKey::ChapterTitle));
        assert_eq!(resolve("第二節 文獻探討"), Some(GroupKey::SectionTitle));
        assert_eq!(resolve("2.1 Background"), Some(GroupKey::SectionTitle));
        assert_eq!(resolve("2.1.3 Data sources"), Some(GroupKey::SubsectionTitle));
        assert_eq!(resolve("Abstract"), Some(GroupKey::FrontMatter));
        assert_eq!(resolve("Keywords: thesis, formatting"), Some(GroupKey::FrontMatter));
        assert_eq!(resolve("The results were consistent."), None);
    }

    #[test]
    fn test_long_paragraphs_skip_heading_patterns() {
        let long = format!("Chapter 1 {}", "word ".repeat(40));
        assert_eq!(resolve(&long), None);
    }

    #[test]
    fn test_toc_field_codes() {
        let mut p = paragraph(4, "");
        p.field_code = r#"TOC \o "1-3" \h \z \u"#.to_string();
        let resolver = PatternResolver::new(&ClassifierConfig::default()).unwrap();
        let resolution = resolver.resolve(&p, &DocumentContext::default()).unwrap();
        assert_eq!(resolution.group, GroupKey::Toc);

        p.field_code = r#"HYPERLINK \l "_Toc1234" PAGEREF _Toc1234 \h"#.to_string();
        assert!(resolver.resolve(&p, &DocumentContext::default()).is_some());
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let config = ClassifierConfig {
            patterns: vec![PatternRule {
                group: GroupKey::Body,
                patterns: vec!["(unclosed".to_string()],
                short_only: false,
            }],
            ..ClassifierConfig::default()
        };
        assert!(PatternResolver::new(&config).is_err());
    }
}
