//! The bundled default reference document.
//!
//! Generated from the built-in rule set so that detecting it reproduces
//! those rules. Every group has at least one representative paragraph.

use crate::docx::{DocxBuilder, DocxError, ParagraphSpec};
use crate::types::{GroupKey, RuleSet};

/// File name reported for templates detected from the bundled reference
pub const BUNDLED_REFERENCE_NAME: &str = "default-reference.docx";

const BODY_TEXT: &str = "This paragraph stands in for the body of the thesis. \
It is long enough to read as running text, so the body size and spacing \
of the reference come from paragraphs like this one rather than from the \
headings around it.";

fn styled(text: &str, style: &str, rules: &RuleSet, group: GroupKey) -> ParagraphSpec {
    let mut spec = ParagraphSpec::new(text).style(style);
    if let Some(rule) = rules.group(group) {
        spec = spec
            .font(&rule.font_name, rule.font_size_pt)
            .align(rule.alignment)
            .spacing(rule.line_spacing, rule.space_before_pt, rule.space_after_pt)
            .indent(rule.first_line_indent_pt);
        if rule.bold {
            spec = spec.bold();
        }
        if rule.italic {
            spec = spec.italic();
        }
    }
    spec
}

/// Build a reference DOCX whose paragraphs carry `rules`
pub fn reference_docx(rules: &RuleSet) -> Result<Vec<u8>, DocxError> {
    let body = |text: &str| styled(text, "Normal", rules, GroupKey::Body);

    DocxBuilder::new()
        .page(rules.page.clone())
        // cover
        .paragraph(styled("A Study of Thesis Formatting", "Title", rules, GroupKey::Cover))
        .paragraph(styled("Master's Thesis", "Subtitle", rules, GroupKey::Cover))
        .paragraph(styled("Author Name", "Subtitle", rules, GroupKey::Cover))
        .page_break()
        // front matter
        .paragraph(styled("Abstract", "Normal", rules, GroupKey::FrontMatter))
        .paragraph(styled(BODY_TEXT, "Normal", rules, GroupKey::FrontMatter))
        .paragraph(styled(
            "Keywords: formatting, templates, thesis",
            "Normal",
            rules,
            GroupKey::FrontMatter,
        ))
        .page_break()
        // table of contents
        .paragraph(styled("Table of Contents", "TOCHeading", rules, GroupKey::Toc))
        .paragraph(
            styled("Chapter 1 Introduction\t1", "TOC1", rules, GroupKey::Toc)
                .field(r#"TOC \o "1-3" \h \z \u"#),
        )
        .paragraph(styled("1.1 Background\t1", "TOC2", rules, GroupKey::Toc))
        .page_break()
        // chapters
        .paragraph(styled("Chapter 1 Introduction", "Heading1", rules, GroupKey::ChapterTitle))
        .paragraph(body(BODY_TEXT))
        .paragraph(styled("1.1 Background", "Heading2", rules, GroupKey::SectionTitle))
        .paragraph(body(BODY_TEXT))
        .paragraph(styled("1.1.1 Scope", "Heading3", rules, GroupKey::SubsectionTitle))
        .paragraph(body(BODY_TEXT))
        .paragraph(ParagraphSpec::new("").with_drawing())
        .paragraph(styled(
            "Figure 1-1 Research framework",
            "Caption",
            rules,
            GroupKey::FigureCaption,
        ))
        .paragraph(body(BODY_TEXT))
        .paragraph(styled(
            "Table 1-1 Sample statistics",
            "Caption",
            rules,
            GroupKey::TableCaption,
        ))
        .table(vec![
            vec!["Cohort".to_string(), "Size".to_string()],
            vec!["A".to_string(), "120".to_string()],
        ])
        .paragraph(body(BODY_TEXT))
        .build()
}

/// The reference document for the built-in defaults
pub fn bundled_reference_docx() -> Result<Vec<u8>, DocxError> {
    reference_docx(&RuleSet::default())
}
