use super::xml::{XmlDocument, XmlElement};
use super::{half_points_to_pt, twips_to_pt};
use crate::types::Alignment;
use std::collections::HashMap;

/// Line spacing as written in `w:spacing`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineSpacing {
    /// Multiple of single spacing (`lineRule="auto"`)
    Multiple(f32),
    /// Fixed or minimum line height in points
    Points(f32),
}

/// Formatting attributes that can be inherited; `None` means "not set here"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatProps {
    pub font_name: Option<String>,
    pub font_size_pt: Option<f32>,
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub alignment: Option<Alignment>,
    pub line_spacing: Option<LineSpacing>,
    pub space_before_pt: Option<f32>,
    pub space_after_pt: Option<f32>,
    pub first_line_indent_pt: Option<f32>,
    pub outline_level: Option<u8>,
    pub numbered: Option<bool>,
}

impl FormatProps {
    /// Values set in `other` win
    pub fn overlay(&mut self, other: &FormatProps) {
        fn take<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
        take(&mut self.font_name, &other.font_name);
        take(&mut self.font_size_pt, &other.font_size_pt);
        take(&mut self.bold, &other.bold);
        take(&mut self.italic, &other.italic);
        take(&mut self.alignment, &other.alignment);
        take(&mut self.line_spacing, &other.line_spacing);
        take(&mut self.space_before_pt, &other.space_before_pt);
        take(&mut self.space_after_pt, &other.space_after_pt);
        take(&mut self.first_line_indent_pt, &other.first_line_indent_pt);
        take(&mut self.outline_level, &other.outline_level);
        take(&mut self.numbered, &other.numbered);
    }

    /// Read paragraph-level attributes from a `w:pPr`
    pub fn read_paragraph_props(&mut self, ppr: &XmlElement) {
        if let Some(jc) = ppr.child_attr("w:jc", "w:val") {
            self.alignment = Some(Alignment::from_ooxml(&jc));
        }
        if let Some(spacing) = ppr.child("w:spacing") {
            if let Some(before) = spacing.attr("w:before").and_then(|v| v.parse::<f32>().ok()) {
                self.space_before_pt = Some(twips_to_pt(before));
            }
            if let Some(after) = spacing.attr("w:after").and_then(|v| v.parse::<f32>().ok()) {
                self.space_after_pt = Some(twips_to_pt(after));
            }
            if let Some(line) = spacing.attr("w:line").and_then(|v| v.parse::<f32>().ok()) {
                let rule = spacing.attr("w:lineRule");
                self.line_spacing = Some(match rule.as_deref() {
                    Some("exact") | Some("atLeast") => LineSpacing::Points(twips_to_pt(line)),
                    _ => LineSpacing::Multiple(line / 240.0),
                });
            }
        }
        if let Some(ind) = ppr.child("w:ind") {
            if let Some(first) = ind.attr("w:firstLine").and_then(|v| v.parse::<f32>().ok()) {
                self.first_line_indent_pt = Some(twips_to_pt(first));
            }
            if let Some(hanging) = ind.attr("w:hanging").and_then(|v| v.parse::<f32>().ok()) {
                self.first_line_indent_pt = Some(-twips_to_pt(hanging));
            }
        }
        if let Some(level) = ppr
            .child_attr("w:outlineLvl", "w:val")
            .and_then(|v| v.parse::<u8>().ok())
        {
            self.outline_level = Some(level);
        }
        if ppr.child("w:numPr").is_some() {
            self.numbered = Some(true);
        }
    }

    /// Read run-level attributes from a `w:rPr`
    pub fn read_run_props(&mut self, rpr: &XmlElement) {
        if let Some(fonts) = rpr.child("w:rFonts") {
            let name = ["w:ascii", "w:hAnsi", "w:eastAsia", "w:cs"]
                .iter()
                .find_map(|key| fonts.attr(key));
            if let Some(name) = name {
                self.font_name = Some(name.into_owned());
            }
        }
        if let Some(size) = rpr
            .child_attr("w:sz", "w:val")
            .and_then(|v| v.parse::<f32>().ok())
        {
            self.font_size_pt = Some(half_points_to_pt(size));
        }
        if let Some(b) = rpr.child("w:b") {
            self.bold = Some(toggle_value(b));
        }
        if let Some(i) = rpr.child("w:i") {
            self.italic = Some(toggle_value(i));
        }
    }
}

/// `w:b`, `w:i` and friends: present without a value means on
pub fn toggle_value(element: &XmlElement) -> bool {
    !matches!(
        element.attr("w:val").as_deref(),
        Some("0") | Some("false") | Some("off")
    )
}

#[derive(Debug, Clone)]
struct StyleDef {
    name: Option<String>,
    based_on: Option<String>,
    props: FormatProps,
}

/// Paragraph and character styles of `word/styles.xml`
#[derive(Debug, Clone, Default)]
pub struct StyleSheet {
    styles: HashMap<String, StyleDef>,
    default_paragraph_style: Option<String>,
    defaults: FormatProps,
}

impl StyleSheet {
    pub fn parse(document: &XmlDocument) -> Self {
        let mut sheet = StyleSheet::default();
        let root = &document.root;

        if let Some(doc_defaults) = root.child("w:docDefaults") {
            if let Some(rpr) = doc_defaults
                .child("w:rPrDefault")
                .and_then(|d| d.child("w:rPr"))
            {
                sheet.defaults.read_run_props(rpr);
            }
            if let Some(ppr) = doc_defaults
                .child("w:pPrDefault")
                .and_then(|d| d.child("w:pPr"))
            {
                sheet.defaults.read_paragraph_props(ppr);
            }
        }

        for style in root.children_named("w:style") {
            let Some(id) = style.attr("w:styleId").map(|s| s.into_owned()) else {
                continue;
            };
            let mut props = FormatProps::default();
            if let Some(ppr) = style.child("w:pPr") {
                props.read_paragraph_props(ppr);
            }
            if let Some(rpr) = style.child("w:rPr") {
                props.read_run_props(rpr);
            }
            let is_paragraph = style.attr("w:type").as_deref() == Some("paragraph");
            if is_paragraph && style.attr("w:default").is_some_and(|d| d == "1" || d == "true") {
                sheet.default_paragraph_style = Some(id.clone());
            }
            sheet.styles.insert(
                id,
                StyleDef {
                    name: style.child_attr("w:name", "w:val").map(|n| n.into_owned()),
                    based_on: style.child_attr("w:basedOn", "w:val").map(|b| b.into_owned()),
                    props,
                },
            );
        }

        sheet
    }

    /// Paragraph style id in effect, falling back to the default style
    pub fn effective_style_id<'a>(&'a self, explicit: Option<&'a str>) -> Option<&'a str> {
        explicit.or(self.default_paragraph_style.as_deref())
    }

    pub fn style_name(&self, style_id: &str) -> Option<&str> {
        self.styles.get(style_id).and_then(|s| s.name.as_deref())
    }

    /// Document defaults overlaid with the style's `basedOn` chain, base first
    pub fn resolve(&self, style_id: Option<&str>) -> FormatProps {
        let mut chain = Vec::new();
        let mut current = style_id.map(str::to_string);
        while let Some(id) = current {
            // guard against basedOn cycles
            if chain.len() > 16 || chain.iter().any(|(seen, _)| *seen == id) {
                break;
            }
            match self.styles.get(&id) {
                Some(style) => {
                    current = style.based_on.clone();
                    chain.push((id, &style.props));
                }
                None => break,
            }
        }

        let mut props = self.defaults.clone();
        for (_, style_props) in chain.iter().rev() {
            props.overlay(style_props);
        }
        props
    }
}
