use crate::docx::ParagraphInfo;
use crate::types::GroupKey;

use super::engine::{round_half, DocumentContext, GroupResolver, Resolution};

const SIZE_CONFIDENCE: f32 = 0.6;
const EMPHASIS_CONFIDENCE: f32 = 0.55;

// TypographyResolver - short lines set larger than the body are headings,
// ranked by size: largest chapter, next section, anything smaller subsection.
// Bold or all-caps short lines at body size are weak section headings.
pub struct TypographyResolver;

impl TypographyResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TypographyResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn is_all_caps(text: &str) -> bool {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 2
        && letters.iter().any(|c| c.is_uppercase())
        && letters.iter().all(|c| !c.is_lowercase())
}

impl GroupResolver for TypographyResolver {
    fn resolve(&self, paragraph: &ParagraphInfo, context: &DocumentContext) -> Option<Resolution> {
        let text = paragraph.text.trim();
        if text.is_empty() || !context.is_short(paragraph) {
            return None;
        }

        let size = round_half(paragraph.font_size_pt);
        if size > context.body_font_size + context.size_tolerance_pt {
            let rank = context
                .heading_sizes
                .iter()
                .position(|s| (s - size).abs() < 0.01)
                .unwrap_or(context.heading_sizes.len());
            let group = match rank {
                0 => GroupKey::ChapterTitle,
                1 => GroupKey::SectionTitle,
                _ => GroupKey::SubsectionTitle,
            };
            return Some(Resolution {
                group,
                confidence: SIZE_CONFIDENCE,
                resolver: self.name(),
            });
        }

        // Sentences end in punctuation, headings rarely do
        let sentence_like = text.ends_with(['.', '。', ',', '，', ';', '；']);
        if !sentence_like && (paragraph.bold || is_all_caps(text)) {
            return Some(Resolution {
                group: GroupKey::SectionTitle,
                confidence: EMPHASIS_CONFIDENCE,
                resolver: self.name(),
            });
        }
        None
    }

    fn name(&self) -> &'static str {
        "typography"
    }
}
