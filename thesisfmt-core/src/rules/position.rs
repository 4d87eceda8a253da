use crate::docx::ParagraphInfo;
use crate::types::GroupKey;

use super::engine::{DocumentContext, GroupResolver, Resolution};

const POSITION_CONFIDENCE: f32 = 0.7;

/// Structural position: everything ahead of the first chapter heading is
/// cover (first page) or front matter (later pages). Documents without a
/// recognizable chapter give no positional signal.
pub struct PositionResolver;

impl PositionResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PositionResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupResolver for PositionResolver {
    fn resolve(&self, paragraph: &ParagraphInfo, context: &DocumentContext) -> Option<Resolution> {
        let first_chapter = context.first_chapter_ordinal?;
        if paragraph.ordinal >= first_chapter {
            return None;
        }

        let group = if paragraph.page_index == 0 {
            GroupKey::Cover
        } else {
            GroupKey::FrontMatter
        };
        Some(Resolution {
            group,
            confidence: POSITION_CONFIDENCE,
            resolver: self.name(),
        })
    }

    fn name(&self) -> &'static str {
        "position"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::engine::tests::paragraph;

    fn context(first_chapter: Option<usize>) -> DocumentContext {
        DocumentContext {
            first_chapter_ordinal: first_chapter,
            page_count: 5,
            ..DocumentContext::default()
        }
    }

    #[test]
    fn test_first_page_before_chapter_is_cover() {
        let resolver = PositionResolver::new();
        let p = paragraph(0, "A Study of Something");
        let resolution = resolver.resolve(&p, &context(Some(8))).unwrap();
        assert_eq!(resolution.group, GroupKey::Cover);
        assert_eq!(resolution.resolver, "position");
    }

    #[test]
    fn test_later_pages_before_chapter_are_front_matter() {
        let resolver = PositionResolver::new();
        let mut p = paragraph(4, "This thesis examines...");
        p.page_index = 2;
        assert_eq!(
            resolver.resolve(&p, &context(Some(8))).map(|r| r.group),
            Some(GroupKey::FrontMatter)
        );
    }

    #[test]
    fn test_no_signal_after_chapter_or_without_one() {
        let resolver = PositionResolver::new();
        let p = paragraph(9, "Body text");
        assert!(resolver.resolve(&p, &context(Some(8))).is_none());
        assert!(resolver.resolve(&paragraph(0, "Lonely"), &context(None)).is_none());
    }
}
