use crate::config::ClassifierConfig;
use crate::docx::ParagraphInfo;
use crate::types::GroupKey;
use std::collections::HashMap;

use super::engine::{DocumentContext, GroupResolver, Resolution};

const STYLE_CONFIDENCE: f32 = 0.95;
const OUTLINE_CONFIDENCE: f32 = 0.85;

// StyleNameResolver - explicit style names from a known vocabulary, then
// the outline level a style (or the paragraph) declares
pub struct StyleNameResolver {
    vocabulary: HashMap<String, GroupKey>,
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl StyleNameResolver {
    pub fn new(config: &ClassifierConfig) -> Self {
        let mut vocabulary = HashMap::new();
        for rule in &config.style_names {
            for name in &rule.names {
                vocabulary.entry(normalize(name)).or_insert(rule.group);
            }
        }
        Self { vocabulary }
    }

    fn lookup(&self, paragraph: &ParagraphInfo) -> Option<GroupKey> {
        let candidates = [paragraph.style_name.as_deref(), paragraph.style_id.as_deref()];
        for candidate in candidates.into_iter().flatten() {
            let name = normalize(candidate);
            if let Some(group) = self.vocabulary.get(&name) {
                return Some(*group);
            }
            // "toc 1" .. "toc 9", "TOC1" .. "TOC9"
            let compact: String = name.chars().filter(|c| !c.is_whitespace()).collect();
            if compact.len() == 4
                && compact.starts_with("toc")
                && compact[3..].chars().all(|c| c.is_ascii_digit())
            {
                return Some(GroupKey::Toc);
            }
        }
        None
    }
}

/// Caption styles are shared by figures and tables; the text prefix or a
/// neighbouring table decides which
fn refine_caption(paragraph: &ParagraphInfo) -> GroupKey {
    let text = paragraph.text.trim_start().to_lowercase();
    let table_prefix = text.starts_with("table") || text.starts_with('表');
    let figure_prefix =
        text.starts_with("fig") || text.starts_with('圖') || text.starts_with('图');
    if table_prefix || (!figure_prefix && paragraph.adjacent_table && !paragraph.adjacent_drawing) {
        GroupKey::TableCaption
    } else {
        GroupKey::FigureCaption
    }
}

impl GroupResolver for StyleNameResolver {
    fn resolve(&self, paragraph: &ParagraphInfo, _context: &DocumentContext) -> Option<Resolution> {
        if let Some(group) = self.lookup(paragraph) {
            let group = match group {
                GroupKey::FigureCaption | GroupKey::TableCaption => refine_caption(paragraph),
                other => other,
            };
            return Some(Resolution {
                group,
                confidence: STYLE_CONFIDENCE,
                resolver: self.name(),
            });
        }

        let group = match paragraph.outline_level? {
            0 => GroupKey::ChapterTitle,
            1 => GroupKey::SectionTitle,
            2..=8 => GroupKey::SubsectionTitle,
            // level 9 is "body text"
            _ => return None,
        };
        Some(Resolution {
            group,
            confidence: OUTLINE_CONFIDENCE,
            resolver: self.name(),
        })
    }

    fn name(&self) -> &'static str {
        "style_name"
    }

    fn is_formatting_independent(&self) -> bool {
        true
    }
}
