// DOCX document reader/writer
//
// package  - zip container and part relationships
// xml      - lossless element tree used for every part we rewrite
// styles   - style sheet and inherited formatting resolution
// reader   - paragraph and section snapshots for detection/classification
// builder  - minimal DOCX writer for intermediates, references and fixtures

pub mod builder;
pub mod package;
pub mod reader;
pub mod styles;
pub mod xml;

pub use builder::{DocxBuilder, ParagraphSpec};
pub use package::{DocxPackage, Relationships};
pub use reader::{ParagraphInfo, SectionInfo};
pub use styles::StyleSheet;
pub use xml::{XmlDocument, XmlElement, XmlNode};

use package::REL_TYPE_STYLES;
use thiserror::Error;

pub const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
pub const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

#[derive(Error, Debug)]
pub enum DocxError {
    #[error("not a readable zip package: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing package part: {0}")]
    MissingPart(String),

    #[error("malformed document: {0}")]
    Malformed(String),
}

pub fn twips_to_pt(twips: f32) -> f32 {
    twips / 20.0
}

pub fn pt_to_twips(pt: f32) -> i64 {
    (pt * 20.0).round() as i64
}

pub fn half_points_to_pt(half_points: f32) -> f32 {
    half_points / 2.0
}

pub fn pt_to_half_points(pt: f32) -> i64 {
    (pt * 2.0).round() as i64
}

/// Elements whose content is floating or embedded objects; paragraph
/// traversal never descends into them.
pub(crate) const OPAQUE_CONTAINERS: [&str; 6] = [
    "w:drawing",
    "w:pict",
    "w:object",
    "mc:AlternateContent",
    "w:txbxContent",
    "w:p",
];

/// An opened DOCX: the package plus parsed main document and styles
#[derive(Debug, Clone)]
pub struct DocxDocument {
    package: DocxPackage,
    document_part: String,
    document: XmlDocument,
    styles: StyleSheet,
}

impl DocxDocument {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocxError> {
        Self::from_package(DocxPackage::from_bytes(bytes)?)
    }

    pub fn from_package(package: DocxPackage) -> Result<Self, DocxError> {
        let document_part = package.main_document_part()?;
        let document = package
            .part_xml(&document_part)?
            .ok_or_else(|| DocxError::MissingPart(document_part.clone()))?;
        if !document.root.is("w:document") || document.root.child("w:body").is_none() {
            return Err(DocxError::Malformed(format!(
                "{} has no w:document/w:body",
                document_part
            )));
        }

        let styles_part = package
            .relationships(&document_part)?
            .first_of_type(REL_TYPE_STYLES)
            .unwrap_or_else(|| "word/styles.xml".to_string());
        let styles = match package.part_xml(&styles_part)? {
            Some(xml) => StyleSheet::parse(&xml),
            None => StyleSheet::default(),
        };

        Ok(Self {
            package,
            document_part,
            document,
            styles,
        })
    }

    pub fn paragraphs(&self) -> Vec<ParagraphInfo> {
        reader::read_paragraphs(&self.document.root, &self.styles)
    }

    pub fn sections(&self) -> Vec<SectionInfo> {
        reader::read_sections(&self.document.root)
    }

    pub fn styles(&self) -> &StyleSheet {
        &self.styles
    }

    pub fn document_part(&self) -> &str {
        &self.document_part
    }

    pub(crate) fn root_mut(&mut self) -> &mut XmlElement {
        &mut self.document.root
    }

    pub(crate) fn package(&self) -> &DocxPackage {
        &self.package
    }

    pub(crate) fn package_mut(&mut self) -> &mut DocxPackage {
        &mut self.package
    }

    /// Serialize the main document part back into the package and zip it
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocxError> {
        let mut package = self.package.clone();
        package.set_part_xml(&self.document_part, &self.document);
        package.to_bytes()
    }
}

/// Visit every paragraph in reading order, the same order `paragraphs()`
/// reports. The callback receives the ordinal and the paragraph element.
pub(crate) fn for_each_paragraph_mut<F>(root: &mut XmlElement, mut visit: F)
where
    F: FnMut(usize, &mut XmlElement),
{
    let mut ordinal = 0;
    if let Some(body) = root.child_mut("w:body") {
        walk_mut(body, &mut ordinal, &mut visit);
    }
}

fn walk_mut<F>(element: &mut XmlElement, ordinal: &mut usize, visit: &mut F)
where
    F: FnMut(usize, &mut XmlElement),
{
    for child in element.elements_mut() {
        if child.is("w:p") {
            visit(*ordinal, child);
            *ordinal += 1;
        } else if !OPAQUE_CONTAINERS.contains(&child.name.as_str()) {
            walk_mut(child, ordinal, visit);
        }
    }
}

/// Every `w:sectPr` in document order: paragraph-level breaks first, the
/// body's final section last.
pub(crate) fn for_each_section_mut<F>(root: &mut XmlElement, mut visit: F)
where
    F: FnMut(usize, &mut XmlElement),
{
    let mut index = 0;
    if let Some(body) = root.child_mut("w:body") {
        collect_sections_mut(body, &mut index, &mut visit);
    }
}

fn collect_sections_mut<F>(element: &mut XmlElement, index: &mut usize, visit: &mut F)
where
    F: FnMut(usize, &mut XmlElement),
{
    for child in element.elements_mut() {
        if child.is("w:sectPr") {
            visit(*index, child);
            *index += 1;
        } else if child.is("w:p") {
            if let Some(sect) = child.child_mut("w:pPr").and_then(|p| p.child_mut("w:sectPr")) {
                visit(*index, sect);
                *index += 1;
            }
        } else if !OPAQUE_CONTAINERS.contains(&child.name.as_str()) {
            collect_sections_mut(child, index, visit);
        }
    }
}
