use crate::classifier::DocumentClassification;
use crate::config::ApplierConfig;
use crate::docx::package::REL_TYPE_FOOTER;
use crate::docx::{
    for_each_paragraph_mut, for_each_section_mut, pt_to_half_points, pt_to_twips, DocxDocument,
    XmlDocument, XmlElement, XmlNode, OPAQUE_CONTAINERS, R_NS, W_NS,
};
use crate::error::FormatResult;
use crate::types::{GroupKey, GroupRule, PageNumberFormat, PageRule, RuleSet};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const FOOTER_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.footer+xml";

const SECT_PR_ORDER: &[&str] = &[
    "w:headerReference",
    "w:footerReference",
    "w:footnotePr",
    "w:endnotePr",
    "w:type",
    "w:pgSz",
    "w:pgMar",
    "w:paperSrc",
    "w:pgBorders",
    "w:lnNumType",
    "w:pgNumType",
    "w:cols",
    "w:formProt",
    "w:vAlign",
    "w:noEndnote",
    "w:titlePg",
    "w:textDirection",
    "w:bidi",
    "w:rtlGutter",
    "w:docGrid",
    "w:printerSettings",
    "w:sectPrChange",
];

const P_PR_ORDER: &[&str] = &[
    "w:pStyle",
    "w:keepNext",
    "w:keepLines",
    "w:pageBreakBefore",
    "w:framePr",
    "w:widowControl",
    "w:numPr",
    "w:suppressLineNumbers",
    "w:pBdr",
    "w:shd",
    "w:tabs",
    "w:suppressAutoHyphens",
    "w:kinsoku",
    "w:wordWrap",
    "w:overflowPunct",
    "w:topLinePunct",
    "w:autoSpaceDE",
    "w:autoSpaceDN",
    "w:bidi",
    "w:adjustRightInd",
    "w:snapToGrid",
    "w:spacing",
    "w:ind",
    "w:contextualSpacing",
    "w:mirrorIndents",
    "w:suppressOverlap",
    "w:jc",
    "w:textDirection",
    "w:textAlignment",
    "w:textboxTightWrap",
    "w:outlineLvl",
    "w:divId",
    "w:cnfStyle",
    "w:rPr",
    "w:sectPr",
    "w:pPrChange",
];

const R_PR_ORDER: &[&str] = &[
    "w:rStyle",
    "w:rFonts",
    "w:b",
    "w:bCs",
    "w:i",
    "w:iCs",
    "w:caps",
    "w:smallCaps",
    "w:strike",
    "w:dstrike",
    "w:outline",
    "w:shadow",
    "w:emboss",
    "w:imprint",
    "w:noProof",
    "w:snapToGrid",
    "w:vanish",
    "w:webHidden",
    "w:color",
    "w:spacing",
    "w:w",
    "w:kern",
    "w:position",
    "w:sz",
    "w:szCs",
    "w:highlight",
    "w:u",
    "w:effect",
    "w:bdr",
    "w:shd",
    "w:fitText",
    "w:vertAlign",
    "w:rtl",
    "w:cs",
    "w:em",
    "w:lang",
    "w:eastAsianLayout",
    "w:specVanish",
    "w:oMath",
];

/// Run content that is an embedded object rather than text
const EMBEDDED_OBJECTS: &[&str] = &["w:drawing", "w:pict", "w:object", "mc:AlternateContent"];

/// A formatted working copy and what happened on the way
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub document: DocxDocument,
    pub warnings: Vec<String>,
    /// Paragraphs rewritten per group
    pub formatted: BTreeMap<GroupKey, usize>,
    /// Paragraphs left untouched after a per-paragraph failure
    pub skipped: usize,
}

impl ApplyOutcome {
    pub fn formatted_total(&self) -> usize {
        self.formatted.values().sum()
    }
}

/// Rewrites a copy of a document so it conforms to a RuleSet
pub struct FormatApplier {
    forced_font: Option<String>,
}

impl FormatApplier {
    pub fn new(config: &ApplierConfig) -> Self {
        Self {
            forced_font: config
                .forced_font
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string),
        }
    }

    /// The source document is never touched; all edits go to a clone
    pub fn apply(
        &self,
        source: &DocxDocument,
        rules: &RuleSet,
        classification: &DocumentClassification,
    ) -> FormatResult<ApplyOutcome> {
        let mut document = source.clone();
        let mut warnings = Vec::new();

        apply_page_rules(document.root_mut(), &rules.page);
        apply_page_numbering(&mut document, rules.page.page_number_format, &mut warnings)?;

        let mut formatted: BTreeMap<GroupKey, usize> = BTreeMap::new();
        let mut skipped = 0;
        let forced_font = self.forced_font.as_deref();
        for_each_paragraph_mut(document.root_mut(), |ordinal, paragraph| {
            let Some(group) = classification.group_of(ordinal) else {
                return;
            };
            let Some(rule) = rules.group(group) else {
                return;
            };

            let mut working = paragraph.clone();
            match format_paragraph(&mut working, rule, forced_font) {
                Ok(()) => {
                    *paragraph = working;
                    *formatted.entry(group).or_insert(0) += 1;
                }
                Err(reason) => {
                    warn!(ordinal, group = %group, reason = %reason, "paragraph left unformatted");
                    warnings.push(format!("paragraph {}: {}, left unchanged", ordinal, reason));
                    skipped += 1;
                }
            }
        });

        debug!(
            formatted = formatted.values().sum::<usize>(),
            skipped,
            forced_font = ?forced_font,
            "rules applied"
        );
        Ok(ApplyOutcome {
            document,
            warnings,
            formatted,
            skipped,
        })
    }
}

fn apply_page_rules(root: &mut XmlElement, page: &PageRule) {
    let mut sections = 0;
    for_each_section_mut(root, |index, sect| {
        write_section(sect, page, index == 0);
        sections += 1;
    });

    // A body without section properties gets one
    if sections == 0 {
        if let Some(body) = root.child_mut("w:body") {
            let mut sect = XmlElement::new("w:sectPr");
            write_section(&mut sect, page, true);
            body.children.push(XmlNode::Element(sect));
        }
    }
}

fn write_section(sect: &mut XmlElement, page: &PageRule, first: bool) {
    let twips = |pt: f32| pt_to_twips(pt).to_string();

    let size = sect.ensure_child_ordered("w:pgSz", SECT_PR_ORDER);
    size.set_attr("w:w", &twips(page.page_width_pt));
    size.set_attr("w:h", &twips(page.page_height_pt));

    let margins = sect.ensure_child_ordered("w:pgMar", SECT_PR_ORDER);
    margins.set_attr("w:top", &twips(page.margin_top_pt));
    margins.set_attr("w:right", &twips(page.margin_right_pt));
    margins.set_attr("w:bottom", &twips(page.margin_bottom_pt));
    margins.set_attr("w:left", &twips(page.margin_left_pt));
    margins.set_attr("w:header", &twips(page.header_distance_pt));
    margins.set_attr("w:footer", &twips(page.footer_distance_pt));
    margins.set_attr("w:gutter", &twips(page.gutter_pt));

    let numbering = sect.ensure_child_ordered("w:pgNumType", SECT_PR_ORDER);
    match page.page_number_format.to_ooxml() {
        Some(fmt) => numbering.set_attr("w:fmt", fmt),
        None => numbering.remove_attr("w:fmt"),
    }
    if first {
        numbering.set_attr("w:start", &page.page_number_start.to_string());
    }
}

/// Header and footer references of each section, as `(element, type, r:id)`
fn section_references(document: &mut DocxDocument) -> Vec<Vec<(String, String, String)>> {
    let mut references = Vec::new();
    for_each_section_mut(document.root_mut(), |_, sect| {
        let refs = sect
            .elements()
            .filter(|e| e.is("w:headerReference") || e.is("w:footerReference"))
            .filter_map(|e| {
                let id = e.attr("r:id")?.into_owned();
                let kind = e.attr("w:type").map(|t| t.into_owned()).unwrap_or_else(|| "default".to_string());
                Some((e.name.clone(), kind, id))
            })
            .collect();
        references.push(refs);
    });
    references
}

fn apply_page_numbering(
    document: &mut DocxDocument,
    format: PageNumberFormat,
    warnings: &mut Vec<String>,
) -> FormatResult<()> {
    let references = section_references(document);
    let mut rels = document.package().relationships(document.document_part())?;

    if format == PageNumberFormat::None {
        let mut parts: Vec<String> = references
            .iter()
            .flatten()
            .filter_map(|(_, _, id)| rels.target_of(id))
            .collect();
        parts.sort();
        parts.dedup();
        for part in parts {
            let Some(mut xml) = document.package().part_xml(&part)? else {
                warnings.push(format!("header/footer part {} is missing", part));
                continue;
            };
            if remove_page_fields(&mut xml.root) {
                document.package_mut().set_part_xml(&part, &xml);
                debug!(part = %part, "page number fields removed");
            }
        }
        return Ok(());
    }

    // Sections after the first inherit the previous footer unless they name one
    let mut new_footer_for_first = None;
    for (index, refs) in references.iter().enumerate() {
        let default_footer = refs
            .iter()
            .find(|(name, kind, _)| name == "w:footerReference" && kind == "default")
            .map(|(_, _, id)| id.clone());

        match default_footer {
            Some(id) => {
                let Some(part) = rels.target_of(&id) else {
                    warnings.push(format!("footer relationship {} has no target", id));
                    continue;
                };
                match document.package().part_xml(&part)? {
                    Some(mut xml) => {
                        if !has_page_field(&xml.root) {
                            xml.root.children.push(XmlNode::Element(page_number_paragraph()));
                            document.package_mut().set_part_xml(&part, &xml);
                        }
                    }
                    None => warnings.push(format!("footer part {} is missing", part)),
                }
            }
            None if index == 0 => {
                let part = next_footer_part(document);
                document.package_mut().set_part_xml(&part, &footer_document());
                register_content_type(document, &part)?;
                let target = part.strip_prefix("word/").unwrap_or(&part).to_string();
                new_footer_for_first = Some(rels.add(REL_TYPE_FOOTER, &target));
                debug!(part = %part, "footer with page number created");
            }
            None => {}
        }
    }

    if let Some(id) = new_footer_for_first {
        rels.write_to(document.package_mut());
        let root = document.root_mut();
        if root.attr("xmlns:r").is_none() {
            root.set_attr("xmlns:r", R_NS);
        }
        let mut attached = false;
        for_each_section_mut(root, |index, sect| {
            if index == 0 {
                attach_footer_reference(sect, &id);
                attached = true;
            }
        });
        if !attached {
            warnings.push("no section to attach the page number footer to".to_string());
        }
    }
    Ok(())
}

fn attach_footer_reference(sect: &mut XmlElement, id: &str) {
    let reference = XmlElement::new("w:footerReference")
        .with_attr("w:type", "default")
        .with_attr("r:id", id);
    // After any header references, ahead of everything else
    let position = sect
        .children
        .iter()
        .position(|node| {
            matches!(node, XmlNode::Element(e) if !e.is("w:headerReference") && !e.is("w:footerReference"))
        })
        .unwrap_or(sect.children.len());
    sect.children.insert(position, XmlNode::Element(reference));
}

fn next_footer_part(document: &DocxDocument) -> String {
    let mut n = 1;
    loop {
        let candidate = format!("word/footer{}.xml", n);
        if !document.package().has_part(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn register_content_type(document: &mut DocxDocument, part: &str) -> FormatResult<()> {
    let part_name = format!("/{}", part);
    let Some(mut types) = document.package().part_xml(CONTENT_TYPES_PART)? else {
        return Ok(());
    };
    let exists = types
        .root
        .children_named("Override")
        .any(|o| o.attr("PartName").as_deref() == Some(part_name.as_str()));
    if !exists {
        types.root.children.push(XmlNode::Element(
            XmlElement::new("Override")
                .with_attr("PartName", &part_name)
                .with_attr("ContentType", FOOTER_CONTENT_TYPE),
        ));
        document.package_mut().set_part_xml(CONTENT_TYPES_PART, &types);
    }
    Ok(())
}

fn footer_document() -> XmlDocument {
    XmlDocument {
        prolog: vec![XmlNode::Declaration(
            r#"xml version="1.0" encoding="UTF-8" standalone="yes""#.to_string(),
        )],
        root: XmlElement::new("w:ftr")
            .with_attr("xmlns:w", W_NS)
            .with_attr("xmlns:r", R_NS)
            .with_child(page_number_paragraph()),
        epilog: Vec::new(),
    }
}

/// Centered paragraph holding a complex PAGE field; the section's
/// `pgNumType` decides how the number renders
fn page_number_paragraph() -> XmlElement {
    let field_char = |kind: &str| {
        XmlElement::new("w:r").with_child(XmlElement::new("w:fldChar").with_attr("w:fldCharType", kind))
    };
    XmlElement::new("w:p")
        .with_child(XmlElement::new("w:pPr").with_child(XmlElement::new("w:jc").with_attr("w:val", "center")))
        .with_child(field_char("begin"))
        .with_child(
            XmlElement::new("w:r").with_child(
                XmlElement::new("w:instrText")
                    .with_attr("xml:space", "preserve")
                    .with_text(" PAGE "),
            ),
        )
        .with_child(field_char("separate"))
        .with_child(XmlElement::new("w:r").with_child(XmlElement::new("w:t").with_text("1")))
        .with_child(field_char("end"))
}

fn is_page_instruction(instruction: &str) -> bool {
    instruction
        .split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case("PAGE"))
}

fn has_page_field(root: &XmlElement) -> bool {
    let mut paragraphs = Vec::new();
    root.find_all("w:p", &mut paragraphs);
    paragraphs.iter().any(|paragraph| {
        let mut simple = Vec::new();
        paragraph.find_all("w:fldSimple", &mut simple);
        simple
            .iter()
            .any(|f| f.attr("w:instr").is_some_and(|i| is_page_instruction(&i)))
            || page_field_runs(paragraph).contains(&true)
    })
}

/// Flags the direct children of a paragraph that belong to a complex
/// PAGE field: begin .. instrText .. separate .. result .. end
fn page_field_runs(paragraph: &XmlElement) -> Vec<bool> {
    let mut flags = vec![false; paragraph.children.len()];
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut instruction = String::new();
    for (index, node) in paragraph.children.iter().enumerate() {
        let XmlNode::Element(run) = node else { continue };
        if !run.is("w:r") {
            continue;
        }
        let kind = run
            .child("w:fldChar")
            .and_then(|f| f.attr("w:fldCharType"))
            .map(|k| k.into_owned());
        match kind.as_deref() {
            Some("begin") => {
                if depth == 0 {
                    start = index;
                    instruction.clear();
                }
                depth += 1;
            }
            Some("end") if depth > 0 => {
                depth -= 1;
                if depth == 0 && is_page_instruction(&instruction) {
                    for flag in &mut flags[start..=index] {
                        *flag = true;
                    }
                }
            }
            _ if depth == 1 => instruction.push_str(&run.collect_text("w:instrText")),
            _ => {}
        }
    }
    flags
}

/// Strip PAGE fields from every paragraph under `element`; true if any went
fn remove_page_fields(element: &mut XmlElement) -> bool {
    let mut changed = false;
    if element.is("w:p") {
        changed |= strip_paragraph_page_fields(element);
    }
    for child in element.elements_mut() {
        changed |= remove_page_fields(child);
    }
    changed
}

fn strip_paragraph_page_fields(paragraph: &mut XmlElement) -> bool {
    let before = paragraph.children.len();
    paragraph.children.retain(|node| {
        !matches!(node, XmlNode::Element(e)
            if e.is("w:fldSimple") && e.attr("w:instr").is_some_and(|i| is_page_instruction(&i)))
    });
    let mut changed = paragraph.children.len() != before;

    let flags = page_field_runs(paragraph);
    if flags.contains(&true) {
        let mut flags = flags.into_iter();
        paragraph.children.retain(|_| !flags.next().unwrap_or(false));
        changed = true;
    }
    changed
}

/// Rewrite one paragraph in place. Runs holding embedded objects keep
/// their formatting; field structure is never altered.
fn format_paragraph(paragraph: &mut XmlElement, rule: &GroupRule, forced_font: Option<&str>) -> Result<(), String> {
    check_structure(paragraph)?;

    if paragraph.child("w:pPr").is_none() {
        paragraph.children.insert(0, XmlNode::Element(XmlElement::new("w:pPr")));
    }
    let properties = paragraph
        .child_mut("w:pPr")
        .ok_or_else(|| "paragraph properties unavailable".to_string())?;
    write_paragraph_props(properties, rule);
    if let Some(mark) = properties.child_mut("w:rPr") {
        write_run_props(mark, rule, forced_font);
    }

    let mut runs = Vec::new();
    collect_runs_mut(paragraph, &mut runs);
    for run in runs {
        if run.contains_any(EMBEDDED_OBJECTS) {
            continue;
        }
        if run.child("w:rPr").is_none() {
            run.children.insert(0, XmlNode::Element(XmlElement::new("w:rPr")));
        }
        if let Some(props) = run.child_mut("w:rPr") {
            write_run_props(props, rule, forced_font);
        }
    }
    Ok(())
}

fn check_structure(paragraph: &XmlElement) -> Result<(), String> {
    if paragraph.children_named("w:pPr").count() > 1 {
        return Err("paragraph has more than one property block".to_string());
    }
    let mut runs = Vec::new();
    crate::docx::reader::collect_runs(paragraph, &mut runs);
    if runs.iter().any(|r| r.children_named("w:rPr").count() > 1) {
        return Err("run has more than one property block".to_string());
    }
    Ok(())
}

fn collect_runs_mut<'a>(element: &'a mut XmlElement, out: &mut Vec<&'a mut XmlElement>) {
    for child in element.elements_mut() {
        if child.is("w:r") {
            out.push(child);
        } else if !child.is("w:pPr") && !OPAQUE_CONTAINERS.contains(&child.name.as_str()) {
            collect_runs_mut(child, out);
        }
    }
}

fn write_paragraph_props(properties: &mut XmlElement, rule: &GroupRule) {
    let spacing = properties.ensure_child_ordered("w:spacing", P_PR_ORDER);
    spacing.set_attr("w:before", &pt_to_twips(rule.space_before_pt).to_string());
    spacing.set_attr("w:after", &pt_to_twips(rule.space_after_pt).to_string());
    spacing.set_attr("w:line", &((rule.line_spacing * 240.0).round() as i64).to_string());
    spacing.set_attr("w:lineRule", "auto");
    for overriding in ["w:beforeLines", "w:afterLines", "w:beforeAutospacing", "w:afterAutospacing"] {
        spacing.remove_attr(overriding);
    }

    let indent = properties.ensure_child_ordered("w:ind", P_PR_ORDER);
    for overriding in ["w:firstLine", "w:hanging", "w:firstLineChars", "w:hangingChars"] {
        indent.remove_attr(overriding);
    }
    if rule.first_line_indent_pt < 0.0 {
        indent.set_attr("w:hanging", &pt_to_twips(-rule.first_line_indent_pt).to_string());
    } else {
        indent.set_attr("w:firstLine", &pt_to_twips(rule.first_line_indent_pt).to_string());
    }

    properties
        .ensure_child_ordered("w:jc", P_PR_ORDER)
        .set_attr("w:val", rule.alignment.to_ooxml());
}

fn write_run_props(props: &mut XmlElement, rule: &GroupRule, forced_font: Option<&str>) {
    set_fonts(props, &rule.font_name);

    let half_points = pt_to_half_points(rule.font_size_pt).to_string();
    props.ensure_child_ordered("w:sz", R_PR_ORDER).set_attr("w:val", &half_points);
    props.ensure_child_ordered("w:szCs", R_PR_ORDER).set_attr("w:val", &half_points);

    set_toggle(props, "w:b", rule.bold);
    set_toggle(props, "w:bCs", rule.bold);
    set_toggle(props, "w:i", rule.italic);
    set_toggle(props, "w:iCs", rule.italic);

    // Last, so it beats the group's own font
    if let Some(font) = forced_font {
        set_fonts(props, font);
    }
}

fn set_fonts(props: &mut XmlElement, font: &str) {
    let fonts = props.ensure_child_ordered("w:rFonts", R_PR_ORDER);
    for slot in ["w:ascii", "w:hAnsi", "w:eastAsia", "w:cs"] {
        fonts.set_attr(slot, font);
    }
    // Theme fonts take precedence over explicit names
    for theme in ["w:asciiTheme", "w:hAnsiTheme", "w:eastAsiaTheme", "w:cstheme"] {
        fonts.remove_attr(theme);
    }
}

fn set_toggle(props: &mut XmlElement, name: &str, on: bool) {
    let toggle = props.ensure_child_ordered(name, R_PR_ORDER);
    if on {
        toggle.remove_attr("w:val");
    } else {
        toggle.set_attr("w:val", "0");
    }
}
