use super::styles::{toggle_value, FormatProps, LineSpacing, StyleSheet};
use super::xml::XmlElement;
use super::{twips_to_pt, OPAQUE_CONTAINERS};
use crate::types::Alignment;
use serde::Serialize;

/// Font size assumed when neither runs, styles nor defaults set one
pub const FALLBACK_FONT_SIZE_PT: f32 = 12.0;

const DRAWING_ELEMENTS: [&str; 3] = ["w:drawing", "w:pict", "w:object"];

/// Read-only snapshot of one paragraph with its effective formatting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParagraphInfo {
    /// Position in reading order, the same numbering the applier uses
    pub ordinal: usize,
    pub text: String,
    pub style_id: Option<String>,
    pub style_name: Option<String>,
    pub font_name: Option<String>,
    pub font_size_pt: f32,
    pub bold: bool,
    pub italic: bool,
    pub alignment: Alignment,
    pub line_spacing: f32,
    pub space_before_pt: f32,
    pub space_after_pt: f32,
    pub first_line_indent_pt: f32,
    pub outline_level: Option<u8>,
    /// Zero-based page counted from explicit page and section breaks
    pub page_index: u32,
    pub is_numbered: bool,
    pub in_table: bool,
    pub has_drawing: bool,
    /// Concatenated field instructions (`w:instrText`, `w:fldSimple/@w:instr`)
    pub field_code: String,
    pub adjacent_table: bool,
    pub adjacent_drawing: bool,
}

impl ParagraphInfo {
    pub fn char_count(&self) -> usize {
        self.text.trim().chars().count()
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn has_field(&self) -> bool {
        !self.field_code.trim().is_empty()
    }
}

/// Page geometry of one `w:sectPr`; absent attributes stay `None`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SectionInfo {
    pub page_width_pt: Option<f32>,
    pub page_height_pt: Option<f32>,
    pub margin_top_pt: Option<f32>,
    pub margin_bottom_pt: Option<f32>,
    pub margin_left_pt: Option<f32>,
    pub margin_right_pt: Option<f32>,
    pub header_distance_pt: Option<f32>,
    pub footer_distance_pt: Option<f32>,
    pub gutter_pt: Option<f32>,
    /// Raw `w:pgNumType/@w:fmt`
    pub page_number_format: Option<String>,
    pub page_number_start: Option<u32>,
}

struct ParagraphWalker<'a> {
    styles: &'a StyleSheet,
    page: u32,
    out: Vec<ParagraphInfo>,
}

pub fn read_paragraphs(root: &XmlElement, styles: &StyleSheet) -> Vec<ParagraphInfo> {
    let mut walker = ParagraphWalker {
        styles,
        page: 0,
        out: Vec::new(),
    };
    if let Some(body) = root.child("w:body") {
        walker.walk(body, false);
    }
    walker.out
}

impl<'a> ParagraphWalker<'a> {
    fn walk(&mut self, container: &XmlElement, in_table: bool) {
        let blocks: Vec<&XmlElement> = container.elements().collect();

        for (index, element) in blocks.iter().enumerate() {
            if element.is("w:p") {
                let previous = index.checked_sub(1).and_then(|i| blocks.get(i)).copied();
                let next = blocks.get(index + 1).copied();
                let neighbours = [previous, next];
                let adjacent_table = neighbours.iter().flatten().any(|n| n.is("w:tbl"));
                let adjacent_drawing = neighbours
                    .iter()
                    .flatten()
                    .any(|n| n.is("w:p") && n.contains_any(&DRAWING_ELEMENTS));
                self.read_paragraph(element, in_table, adjacent_table, adjacent_drawing);
            } else if !OPAQUE_CONTAINERS.contains(&element.name.as_str()) {
                let in_table = in_table || element.is("w:tbl");
                self.walk(element, in_table);
            }
        }
    }

    fn read_paragraph(
        &mut self,
        paragraph: &XmlElement,
        in_table: bool,
        adjacent_table: bool,
        adjacent_drawing: bool,
    ) {
        let ppr = paragraph.child("w:pPr");
        let explicit_style = ppr.and_then(|p| p.child_attr("w:pStyle", "w:val"));
        let style_id = self
            .styles
            .effective_style_id(explicit_style.as_deref())
            .map(str::to_string);

        let mut props = self.styles.resolve(style_id.as_deref());
        if let Some(ppr) = ppr {
            let mut direct = FormatProps::default();
            direct.read_paragraph_props(ppr);
            props.overlay(&direct);

            let page_break_before = ppr.child("w:pageBreakBefore").is_some_and(toggle_value);
            if page_break_before && !self.out.is_empty() {
                self.page += 1;
            }
        }

        let mut runs = Vec::new();
        collect_runs(paragraph, &mut runs);

        // The first run carrying text speaks for the paragraph's typography
        let lead_run = runs
            .iter()
            .find(|r| !r.collect_text("w:t").trim().is_empty())
            .or_else(|| runs.first());
        if let Some(rpr) = lead_run.and_then(|r| r.child("w:rPr")) {
            let mut direct = FormatProps::default();
            direct.read_run_props(rpr);
            props.overlay(&direct);
        }

        // Explicit page breaks: before any text moves this paragraph, after
        // text moves the next one
        let mut text_seen = false;
        let mut breaks_after = 0;
        for run in &runs {
            for child in run.elements() {
                match child.name.as_str() {
                    "w:t" if !run.collect_text("w:t").is_empty() => text_seen = true,
                    "w:br" if child.attr("w:type").as_deref() == Some("page") => {
                        if text_seen {
                            breaks_after += 1;
                        } else if !self.out.is_empty() {
                            self.page += 1;
                        }
                    }
                    _ => {}
                }
            }
        }

        let font_size_pt = props.font_size_pt.unwrap_or(FALLBACK_FONT_SIZE_PT);
        let line_spacing = match props.line_spacing {
            Some(LineSpacing::Multiple(multiple)) => multiple,
            Some(LineSpacing::Points(points)) if font_size_pt > 0.0 => {
                points / (font_size_pt * 1.2)
            }
            _ => 1.0,
        };

        let style_name = style_id
            .as_deref()
            .and_then(|id| self.styles.style_name(id))
            .map(str::to_string);

        self.out.push(ParagraphInfo {
            ordinal: self.out.len(),
            text: paragraph.collect_text("w:t"),
            style_id,
            style_name,
            font_name: props.font_name,
            font_size_pt,
            bold: props.bold.unwrap_or(false),
            italic: props.italic.unwrap_or(false),
            alignment: props.alignment.unwrap_or(Alignment::Left),
            line_spacing,
            space_before_pt: props.space_before_pt.unwrap_or(0.0),
            space_after_pt: props.space_after_pt.unwrap_or(0.0),
            first_line_indent_pt: props.first_line_indent_pt.unwrap_or(0.0),
            outline_level: props.outline_level,
            page_index: self.page,
            is_numbered: props.numbered.unwrap_or(false),
            in_table,
            has_drawing: paragraph.contains_any(&DRAWING_ELEMENTS),
            field_code: field_code(paragraph),
            adjacent_table,
            adjacent_drawing,
        });

        self.page += breaks_after;
        let section_break = ppr
            .and_then(|p| p.child("w:sectPr"))
            .is_some_and(|sect| sect.child_attr("w:type", "w:val").as_deref() != Some("continuous"));
        if section_break {
            self.page += 1;
        }
    }
}

/// Runs of a paragraph in order, including those nested in hyperlinks,
/// simple fields, smart tags and tracked insertions
pub(crate) fn collect_runs<'a>(element: &'a XmlElement, out: &mut Vec<&'a XmlElement>) {
    for child in element.elements() {
        match child.name.as_str() {
            "w:r" => out.push(child),
            "w:pPr" => {}
            name if OPAQUE_CONTAINERS.contains(&name) => {}
            _ => collect_runs(child, out),
        }
    }
}

fn field_code(paragraph: &XmlElement) -> String {
    let mut code = paragraph.collect_text("w:instrText");
    let mut simple = Vec::new();
    paragraph.find_all("w:fldSimple", &mut simple);
    for field in simple {
        if let Some(instr) = field.attr("w:instr") {
            if !code.is_empty() {
                code.push(' ');
            }
            code.push_str(instr.trim());
        }
    }
    code.trim().to_string()
}

pub fn read_sections(root: &XmlElement) -> Vec<SectionInfo> {
    let mut sections = Vec::new();
    if let Some(body) = root.child("w:body") {
        collect_sections(body, &mut sections);
    }
    sections
}

fn collect_sections(element: &XmlElement, out: &mut Vec<SectionInfo>) {
    for child in element.elements() {
        if child.is("w:sectPr") {
            out.push(read_section(child));
        } else if child.is("w:p") {
            if let Some(sect) = child.child("w:pPr").and_then(|p| p.child("w:sectPr")) {
                out.push(read_section(sect));
            }
        } else if !OPAQUE_CONTAINERS.contains(&child.name.as_str()) {
            collect_sections(child, out);
        }
    }
}

fn read_section(sect: &XmlElement) -> SectionInfo {
    let twips = |element: Option<&XmlElement>, key: &str| -> Option<f32> {
        element
            .and_then(|e| e.attr(key))
            .and_then(|v| v.parse::<f32>().ok())
            .map(twips_to_pt)
    };
    let size = sect.child("w:pgSz");
    let margins = sect.child("w:pgMar");
    let numbering = sect.child("w:pgNumType");

    SectionInfo {
        page_width_pt: twips(size, "w:w"),
        page_height_pt: twips(size, "w:h"),
        margin_top_pt: twips(margins, "w:top").map(f32::abs),
        margin_bottom_pt: twips(margins, "w:bottom").map(f32::abs),
        margin_left_pt: twips(margins, "w:left"),
        margin_right_pt: twips(margins, "w:right"),
        header_distance_pt: twips(margins, "w:header"),
        footer_distance_pt: twips(margins, "w:footer"),
        gutter_pt: twips(margins, "w:gutter"),
        page_number_format: numbering
            .and_then(|n| n.attr("w:fmt"))
            .map(|f| f.into_owned()),
        page_number_start: numbering
            .and_then(|n| n.attr("w:start"))
            .and_then(|s| s.parse::<u32>().ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::XmlDocument;

    fn paragraphs_of(body: &str) -> Vec<ParagraphInfo> {
        let xml = format!(r#"<w:document xmlns:w="urn:w"><w:body>{}</w:body></w:document>"#, body);
        let doc = XmlDocument::parse(&xml).unwrap();
        read_paragraphs(&doc.root, &StyleSheet::default())
    }

    #[test]
    fn test_direct_formatting_is_read() {
        let paragraphs = paragraphs_of(
            r#"<w:p><w:pPr><w:jc w:val="both"/><w:spacing w:before="240" w:line="360" w:lineRule="auto"/><w:ind w:firstLine="480"/></w:pPr>
<w:r><w:rPr><w:rFonts w:ascii="Arial" w:eastAsia="PMingLiU"/><w:b/><w:sz w:val="28"/></w:rPr><w:t>Hello</w:t></w:r></w:p>"#,
        );
        let p = &paragraphs[0];
        assert_eq!(p.text, "Hello");
        assert_eq!(p.font_name.as_deref(), Some("Arial"));
        assert_eq!(p.font_size_pt, 14.0);
        assert!(p.bold);
        assert_eq!(p.alignment, Alignment::Justify);
        assert_eq!(p.line_spacing, 1.5);
        assert_eq!(p.space_before_pt, 12.0);
        assert_eq!(p.first_line_indent_pt, 24.0);
    }

    #[test]
    fn test_page_index_follows_breaks() {
        let paragraphs = paragraphs_of(
            r#"<w:p><w:r><w:t>cover</w:t></w:r><w:r><w:br w:type="page"/></w:r></w:p>
<w:p><w:r><w:t>abstract</w:t></w:r></w:p>
<w:p><w:pPr><w:pageBreakBefore/></w:pPr><w:r><w:t>chapter</w:t></w:r></w:p>
<w:p><w:r><w:br w:type="page"/><w:t>next</w:t></w:r></w:p>"#,
        );
        let pages: Vec<u32> = paragraphs.iter().map(|p| p.page_index).collect();
        assert_eq!(pages, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_table_and_field_flags() {
        let paragraphs = paragraphs_of(
            r#"<w:p><w:r><w:t>Table 1 Results</w:t></w:r></w:p>
<w:tbl><w:tr><w:tc><w:p><w:r><w:t>x</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
<w:p><w:r><w:fldChar w:fldCharType="begin"/></w:r><w:r><w:instrText> TOC \o "1-3" </w:instrText></w:r><w:r><w:fldChar w:fldCharType="end"/></w:r></w:p>"#,
        );
        assert!(paragraphs[0].adjacent_table);
        assert!(paragraphs[1].in_table);
        assert!(paragraphs[2].adjacent_table);
        assert!(paragraphs[2].field_code.starts_with("TOC"));
        assert!(paragraphs[2].is_blank());
    }

    #[test]
    fn test_section_geometry() {
        let xml = r#"<w:document xmlns:w="urn:w"><w:body><w:p/><w:sectPr>
<w:pgSz w:w="11906" w:h="16838"/><w:pgMar w:top="1440" w:right="1800" w:bottom="1440" w:left="1800" w:header="851" w:footer="992" w:gutter="0"/>
<w:pgNumType w:fmt="lowerRoman" w:start="3"/></w:sectPr></w:body></w:document>"#;
        let doc = XmlDocument::parse(xml).unwrap();
        let sections = read_sections(&doc.root);
        assert_eq!(sections.len(), 1);
        let s = &sections[0];
        assert_eq!(s.page_width_pt, Some(595.3));
        assert_eq!(s.margin_left_pt, Some(90.0));
        assert_eq!(s.page_number_format.as_deref(), Some("lowerRoman"));
        assert_eq!(s.page_number_start, Some(3));
    }
}
