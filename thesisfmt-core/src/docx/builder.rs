use super::package::{DocxPackage, REL_TYPE_OFFICE_DOCUMENT, REL_TYPE_STYLES, RELS_NS};
use super::xml::{XmlDocument, XmlElement, XmlNode};
use super::{pt_to_half_points, pt_to_twips, DocxError, R_NS, W_NS};
use crate::types::{Alignment, PageRule};

const XML_DECLARATION: &str = r#"xml version="1.0" encoding="UTF-8" standalone="yes""#;

/// Typography and structure of one generated paragraph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParagraphSpec {
    pub text: String,
    pub style_id: Option<String>,
    pub font_name: Option<String>,
    pub font_size_pt: Option<f32>,
    pub bold: bool,
    pub italic: bool,
    pub alignment: Option<Alignment>,
    pub line_spacing: Option<f32>,
    pub space_before_pt: Option<f32>,
    pub space_after_pt: Option<f32>,
    pub first_line_indent_pt: Option<f32>,
    pub page_break_before: bool,
    /// Field instruction wrapped around the text, e.g. `TOC \o "1-3"`
    pub field: Option<String>,
    pub with_drawing: bool,
}

impl ParagraphSpec {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }

    pub fn style(mut self, style_id: &str) -> Self {
        self.style_id = Some(style_id.to_string());
        self
    }

    pub fn font(mut self, name: &str, size_pt: f32) -> Self {
        self.font_name = Some(name.to_string());
        self.font_size_pt = Some(size_pt);
        self
    }

    pub fn size(mut self, size_pt: f32) -> Self {
        self.font_size_pt = Some(size_pt);
        self
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn italic(mut self) -> Self {
        self.italic = true;
        self
    }

    pub fn align(mut self, alignment: Alignment) -> Self {
        self.alignment = Some(alignment);
        self
    }

    pub fn spacing(mut self, line: f32, before_pt: f32, after_pt: f32) -> Self {
        self.line_spacing = Some(line);
        self.space_before_pt = Some(before_pt);
        self.space_after_pt = Some(after_pt);
        self
    }

    pub fn indent(mut self, first_line_pt: f32) -> Self {
        self.first_line_indent_pt = Some(first_line_pt);
        self
    }

    pub fn page_break_before(mut self) -> Self {
        self.page_break_before = true;
        self
    }

    pub fn field(mut self, instruction: &str) -> Self {
        self.field = Some(instruction.to_string());
        self
    }

    pub fn with_drawing(mut self) -> Self {
        self.with_drawing = true;
        self
    }

    fn to_element(&self) -> XmlElement {
        let mut ppr = XmlElement::new("w:pPr");
        if let Some(style) = &self.style_id {
            ppr = ppr.with_child(XmlElement::new("w:pStyle").with_attr("w:val", style));
        }
        if self.page_break_before {
            ppr = ppr.with_child(XmlElement::new("w:pageBreakBefore"));
        }
        if self.line_spacing.is_some()
            || self.space_before_pt.is_some()
            || self.space_after_pt.is_some()
        {
            let mut spacing = XmlElement::new("w:spacing");
            if let Some(before) = self.space_before_pt {
                spacing.set_attr("w:before", &pt_to_twips(before).to_string());
            }
            if let Some(after) = self.space_after_pt {
                spacing.set_attr("w:after", &pt_to_twips(after).to_string());
            }
            if let Some(line) = self.line_spacing {
                spacing.set_attr("w:line", &((line * 240.0).round() as i64).to_string());
                spacing.set_attr("w:lineRule", "auto");
            }
            ppr = ppr.with_child(spacing);
        }
        if let Some(indent) = self.first_line_indent_pt {
            let ind = if indent < 0.0 {
                XmlElement::new("w:ind").with_attr("w:hanging", &pt_to_twips(-indent).to_string())
            } else {
                XmlElement::new("w:ind").with_attr("w:firstLine", &pt_to_twips(indent).to_string())
            };
            ppr = ppr.with_child(ind);
        }
        if let Some(alignment) = self.alignment {
            ppr = ppr.with_child(XmlElement::new("w:jc").with_attr("w:val", alignment.to_ooxml()));
        }

        let mut paragraph = XmlElement::new("w:p");
        if !ppr.children.is_empty() {
            paragraph = paragraph.with_child(ppr);
        }
        if self.with_drawing {
            paragraph = paragraph.with_child(
                XmlElement::new("w:r").with_child(
                    XmlElement::new("w:drawing")
                        .with_child(XmlElement::new("wp:inline").with_attr("distT", "0")),
                ),
            );
        }

        match &self.field {
            Some(instruction) => {
                let field_char = |kind: &str| {
                    self.run().with_child(
                        XmlElement::new("w:fldChar").with_attr("w:fldCharType", kind),
                    )
                };
                paragraph = paragraph
                    .with_child(field_char("begin"))
                    .with_child(
                        self.run().with_child(
                            XmlElement::new("w:instrText")
                                .with_attr("xml:space", "preserve")
                                .with_text(&format!(" {} ", instruction)),
                        ),
                    )
                    .with_child(field_char("separate"));
                if !self.text.is_empty() {
                    paragraph = paragraph.with_child(self.text_run());
                }
                paragraph = paragraph.with_child(field_char("end"));
            }
            None if !self.text.is_empty() => paragraph = paragraph.with_child(self.text_run()),
            None => {}
        }
        paragraph
    }

    fn run(&self) -> XmlElement {
        let mut rpr = XmlElement::new("w:rPr");
        if let Some(font) = &self.font_name {
            let mut fonts = XmlElement::new("w:rFonts");
            for key in ["w:ascii", "w:hAnsi", "w:eastAsia", "w:cs"] {
                fonts.set_attr(key, font);
            }
            rpr = rpr.with_child(fonts);
        }
        if self.bold {
            rpr = rpr.with_child(XmlElement::new("w:b"));
        }
        if self.italic {
            rpr = rpr.with_child(XmlElement::new("w:i"));
        }
        if let Some(size) = self.font_size_pt {
            let half_points = pt_to_half_points(size).to_string();
            rpr = rpr
                .with_child(XmlElement::new("w:sz").with_attr("w:val", &half_points))
                .with_child(XmlElement::new("w:szCs").with_attr("w:val", &half_points));
        }

        let run = XmlElement::new("w:r");
        if rpr.children.is_empty() {
            run
        } else {
            run.with_child(rpr)
        }
    }

    fn text_run(&self) -> XmlElement {
        self.run().with_child(
            XmlElement::new("w:t")
                .with_attr("xml:space", "preserve")
                .with_text(&self.text),
        )
    }
}

#[derive(Debug, Clone)]
enum Block {
    Paragraph(ParagraphSpec),
    Table(Vec<Vec<String>>),
    PageBreak,
}

/// Writes a minimal, valid DOCX: content types, package and document
/// relationships, styles with the built-in heading/title/caption/TOC
/// styles, and one section.
#[derive(Debug, Clone)]
pub struct DocxBuilder {
    blocks: Vec<Block>,
    page: Option<PageRule>,
    default_font: (String, f32),
}

impl Default for DocxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocxBuilder {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            page: Some(PageRule::default()),
            default_font: ("Times New Roman".to_string(), 12.0),
        }
    }

    pub fn paragraph(mut self, spec: ParagraphSpec) -> Self {
        self.blocks.push(Block::Paragraph(spec));
        self
    }

    pub fn text(self, text: &str) -> Self {
        self.paragraph(ParagraphSpec::new(text))
    }

    pub fn table(mut self, rows: Vec<Vec<String>>) -> Self {
        self.blocks.push(Block::Table(rows));
        self
    }

    pub fn page_break(mut self) -> Self {
        self.blocks.push(Block::PageBreak);
        self
    }

    pub fn page(mut self, page: PageRule) -> Self {
        self.page = Some(page);
        self
    }

    /// Leave `w:pgSz`/`w:pgMar` out of the section entirely
    pub fn without_page_geometry(mut self) -> Self {
        self.page = None;
        self
    }

    pub fn default_font(mut self, name: &str, size_pt: f32) -> Self {
        self.default_font = (name.to_string(), size_pt);
        self
    }

    pub fn build(&self) -> Result<Vec<u8>, DocxError> {
        let mut package = DocxPackage::new();
        package.set_part("[Content_Types].xml", content_types().into_bytes());
        package.set_part(
            "_rels/.rels",
            relationships(&[("rId1", REL_TYPE_OFFICE_DOCUMENT, "word/document.xml")]).into_bytes(),
        );
        package.set_part(
            "word/_rels/document.xml.rels",
            relationships(&[("rId1", REL_TYPE_STYLES, "styles.xml")]).into_bytes(),
        );
        package.set_part_xml("word/document.xml", &self.document());
        package.set_part("word/styles.xml", self.styles().into_bytes());
        package.to_bytes()
    }

    fn document(&self) -> XmlDocument {
        let mut body = XmlElement::new("w:body");
        for block in &self.blocks {
            let element = match block {
                Block::Paragraph(spec) => spec.to_element(),
                Block::PageBreak => XmlElement::new("w:p").with_child(
                    XmlElement::new("w:r")
                        .with_child(XmlElement::new("w:br").with_attr("w:type", "page")),
                ),
                Block::Table(rows) => table_element(rows),
            };
            body = body.with_child(element);
        }
        body = body.with_child(self.section());

        XmlDocument {
            prolog: vec![XmlNode::Declaration(XML_DECLARATION.to_string())],
            root: XmlElement::new("w:document")
                .with_attr("xmlns:w", W_NS)
                .with_attr("xmlns:r", R_NS)
                .with_attr(
                    "xmlns:wp",
                    "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing",
                )
                .with_child(body),
            epilog: Vec::new(),
        }
    }

    fn section(&self) -> XmlElement {
        let mut sect = XmlElement::new("w:sectPr");
        if let Some(page) = &self.page {
            let twips = |pt: f32| pt_to_twips(pt).to_string();
            sect = sect
                .with_child(
                    XmlElement::new("w:pgSz")
                        .with_attr("w:w", &twips(page.page_width_pt))
                        .with_attr("w:h", &twips(page.page_height_pt)),
                )
                .with_child(
                    XmlElement::new("w:pgMar")
                        .with_attr("w:top", &twips(page.margin_top_pt))
                        .with_attr("w:right", &twips(page.margin_right_pt))
                        .with_attr("w:bottom", &twips(page.margin_bottom_pt))
                        .with_attr("w:left", &twips(page.margin_left_pt))
                        .with_attr("w:header", &twips(page.header_distance_pt))
                        .with_attr("w:footer", &twips(page.footer_distance_pt))
                        .with_attr("w:gutter", &twips(page.gutter_pt)),
                );
            let mut numbering = XmlElement::new("w:pgNumType")
                .with_attr("w:start", &page.page_number_start.to_string());
            if let Some(fmt) = page.page_number_format.to_ooxml() {
                numbering.set_attr("w:fmt", fmt);
            }
            sect = sect.with_child(numbering);
        }
        sect
    }

    fn styles(&self) -> String {
        let (font, size) = &self.default_font;
        let half_points = pt_to_half_points(*size);
        let paragraph_style = |id: &str, name: &str, extra: &str| {
            format!(
                r#"<w:style w:type="paragraph" w:styleId="{id}"><w:name w:val="{name}"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/>{extra}</w:style>"#
            )
        };
        let mut styles = format!(
            r#"<?{XML_DECLARATION}?><w:styles xmlns:w="{W_NS}"><w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:ascii="{font}" w:hAnsi="{font}" w:eastAsia="{font}" w:cs="{font}"/><w:sz w:val="{half_points}"/><w:szCs w:val="{half_points}"/></w:rPr></w:rPrDefault><w:pPrDefault><w:pPr><w:spacing w:after="0" w:line="240" w:lineRule="auto"/></w:pPr></w:pPrDefault></w:docDefaults><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:qFormat/></w:style>"#
        );
        for (id, name, extra) in [
            ("Title", "Title", ""),
            ("Subtitle", "Subtitle", ""),
            ("Heading1", "heading 1", r#"<w:pPr><w:keepNext/><w:outlineLvl w:val="0"/></w:pPr>"#),
            ("Heading2", "heading 2", r#"<w:pPr><w:keepNext/><w:outlineLvl w:val="1"/></w:pPr>"#),
            ("Heading3", "heading 3", r#"<w:pPr><w:keepNext/><w:outlineLvl w:val="2"/></w:pPr>"#),
            ("Caption", "caption", ""),
            ("TOCHeading", "TOC Heading", ""),
            ("TOC1", "toc 1", ""),
            ("TOC2", "toc 2", ""),
        ] {
            styles.push_str(&paragraph_style(id, name, extra));
        }
        styles.push_str("</w:styles>");
        styles
    }
}

fn table_element(rows: &[Vec<String>]) -> XmlElement {
    let mut table = XmlElement::new("w:tbl").with_child(
        XmlElement::new("w:tblPr")
            .with_child(XmlElement::new("w:tblW").with_attr("w:w", "0").with_attr("w:type", "auto")),
    );
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut grid = XmlElement::new("w:tblGrid");
    for _ in 0..columns {
        grid = grid.with_child(XmlElement::new("w:gridCol").with_attr("w:w", "2000"));
    }
    table = table.with_child(grid);

    for row in rows {
        let mut tr = XmlElement::new("w:tr");
        for cell in row {
            let paragraph = ParagraphSpec::new(cell).to_element();
            tr = tr.with_child(XmlElement::new("w:tc").with_child(paragraph));
        }
        table = table.with_child(tr);
    }
    table
}

fn content_types() -> String {
    format!(
        r#"<?{XML_DECLARATION}?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/></Types>"#
    )
}

fn relationships(entries: &[(&str, &str, &str)]) -> String {
    let mut xml = format!(r#"<?{XML_DECLARATION}?><Relationships xmlns="{RELS_NS}">"#);
    for (id, rel_type, target) in entries {
        xml.push_str(&format!(
            r#"<Relationship Id="{id}" Type="{rel_type}" Target="{target}"/>"#
        ));
    }
    xml.push_str("</Relationships>");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::DocxDocument;
    use crate::types::PageNumberFormat;

    #[test]
    fn test_built_document_reads_back() {
        let bytes = DocxBuilder::new()
            .paragraph(
                ParagraphSpec::new("Chapter 1 Introduction")
                    .style("Heading1")
                    .font("Arial", 16.0)
                    .bold()
                    .align(Alignment::Center),
            )
            .page_break()
            .paragraph(ParagraphSpec::new("Body & text").indent(24.0).spacing(1.5, 0.0, 6.0))
            .build()
            .unwrap();

        let document = DocxDocument::from_bytes(&bytes).unwrap();
        let paragraphs = document.paragraphs();
        assert_eq!(paragraphs.len(), 3);

        let heading = &paragraphs[0];
        assert_eq!(heading.style_name.as_deref(), Some("heading 1"));
        assert_eq!(heading.font_name.as_deref(), Some("Arial"));
        assert_eq!(heading.alignment, Alignment::Center);
        assert_eq!(heading.outline_level, Some(0));

        let body = &paragraphs[2];
        assert_eq!(body.text, "Body & text");
        assert_eq!(body.font_name.as_deref(), Some("Times New Roman"));
        assert_eq!(body.font_size_pt, 12.0);
        assert_eq!(body.line_spacing, 1.5);
        assert_eq!(body.space_after_pt, 6.0);
        assert_eq!(body.page_index, 1);
    }

    #[test]
    fn test_section_reflects_page_rule() {
        let page = PageRule {
            page_number_format: PageNumberFormat::LowerRoman,
            margin_left_pt: 90.0,
            ..PageRule::default()
        };
        let bytes = DocxBuilder::new().text("x").page(page).build().unwrap();
        let sections = DocxDocument::from_bytes(&bytes).unwrap().sections();
        assert_eq!(sections[0].margin_left_pt, Some(90.0));
        assert_eq!(sections[0].page_number_format.as_deref(), Some("lowerRoman"));

        let bare = DocxBuilder::new().text("x").without_page_geometry().build().unwrap();
        let sections = DocxDocument::from_bytes(&bare).unwrap().sections();
        assert_eq!(sections[0].page_width_pt, None);
    }
}
