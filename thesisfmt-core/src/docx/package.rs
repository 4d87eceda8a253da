use super::xml::{XmlDocument, XmlElement, XmlNode};
use super::DocxError;
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
pub const REL_TYPE_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
pub const REL_TYPE_STYLES: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";
pub const REL_TYPE_FOOTER: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/footer";

#[derive(Debug, Clone, PartialEq)]
struct PackageEntry {
    name: String,
    compression: CompressionMethod,
    is_dir: bool,
    data: Vec<u8>,
}

/// The zip container of a DOCX. Entries keep their original order and
/// content; only parts replaced through `set_part` change.
#[derive(Debug, Clone, PartialEq)]
pub struct DocxPackage {
    entries: Vec<PackageEntry>,
}

impl DocxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocxError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(archive.len());

        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            entries.push(PackageEntry {
                name: file.name().to_string(),
                compression: file.compression(),
                is_dir: file.is_dir(),
                data,
            });
        }

        Ok(Self { entries })
    }

    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.as_slice())
    }

    pub fn part_xml(&self, name: &str) -> Result<Option<XmlDocument>, DocxError> {
        match self.part(name) {
            Some(data) => {
                let text = std::str::from_utf8(data)
                    .map_err(|e| DocxError::Malformed(format!("{} is not UTF-8: {}", name, e)))?;
                Ok(Some(XmlDocument::parse(text)?))
            }
            None => Ok(None),
        }
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Replace a part's content, or append it when new
    pub fn set_part(&mut self, name: &str, data: Vec<u8>) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.data = data,
            None => self.entries.push(PackageEntry {
                name: name.to_string(),
                compression: CompressionMethod::Deflated,
                is_dir: false,
                data,
            }),
        }
    }

    pub fn set_part_xml(&mut self, name: &str, document: &XmlDocument) {
        self.set_part(name, document.to_xml_string().into_bytes());
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DocxError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        for entry in &self.entries {
            let options = FileOptions::default().compression_method(entry.compression);
            if entry.is_dir {
                writer.add_directory(entry.name.as_str(), options)?;
            } else {
                writer.start_file(entry.name.as_str(), options)?;
                writer.write_all(&entry.data)?;
            }
        }

        Ok(writer.finish()?.into_inner())
    }

    /// Relationships of a part, e.g. `word/document.xml`
    pub fn relationships(&self, part_name: &str) -> Result<Relationships, DocxError> {
        let rels_name = rels_part_name(part_name);
        let document = self.part_xml(&rels_name)?;
        Ok(Relationships::new(part_name, rels_name, document))
    }

    /// Main document part named by the package relationships
    pub fn main_document_part(&self) -> Result<String, DocxError> {
        let rels = self.relationships("")?;
        Ok(rels
            .first_of_type(REL_TYPE_OFFICE_DOCUMENT)
            .unwrap_or_else(|| "word/document.xml".to_string()))
    }
}

impl Default for DocxPackage {
    fn default() -> Self {
        Self::new()
    }
}

fn rels_part_name(part_name: &str) -> String {
    match part_name.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None if part_name.is_empty() => "_rels/.rels".to_string(),
        None => format!("_rels/{}.rels", part_name),
    }
}

/// Resolve a relationship target against the directory of its source part
fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = match source_part.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    for segment in target.split('/') {
        match segment {
            ".." => {
                segments.pop();
            }
            "." | "" => {}
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Relationship list of one part, editable and writable back
#[derive(Debug, Clone)]
pub struct Relationships {
    source_part: String,
    rels_part: String,
    document: XmlDocument,
}

impl Relationships {
    fn new(source_part: &str, rels_part: String, document: Option<XmlDocument>) -> Self {
        let document = document.unwrap_or_else(|| XmlDocument {
            prolog: vec![XmlNode::Declaration(
                r#"xml version="1.0" encoding="UTF-8" standalone="yes""#.to_string(),
            )],
            root: XmlElement::new("Relationships").with_attr("xmlns", RELS_NS),
            epilog: Vec::new(),
        });
        Self {
            source_part: source_part.to_string(),
            rels_part,
            document,
        }
    }

    /// Package part a relationship id points to
    pub fn target_of(&self, id: &str) -> Option<String> {
        self.document
            .root
            .children_named("Relationship")
            .find(|r| r.attr("Id").as_deref() == Some(id))
            .and_then(|r| r.attr("Target").map(|t| resolve_target(&self.source_part, &t)))
    }

    pub fn first_of_type(&self, rel_type: &str) -> Option<String> {
        self.document
            .root
            .children_named("Relationship")
            .find(|r| r.attr("Type").as_deref() == Some(rel_type))
            .and_then(|r| r.attr("Target").map(|t| resolve_target(&self.source_part, &t)))
    }

    /// Add a relationship with a fresh id; returns the id
    pub fn add(&mut self, rel_type: &str, target: &str) -> String {
        let existing: Vec<String> = self
            .document
            .root
            .children_named("Relationship")
            .filter_map(|r| r.attr("Id").map(|id| id.into_owned()))
            .collect();
        let mut counter = existing.len() + 1;
        let id = loop {
            let candidate = format!("rId{}", counter);
            if !existing.contains(&candidate) {
                break candidate;
            }
            counter += 1;
        };

        self.document.root.children.push(XmlNode::Element(
            XmlElement::new("Relationship")
                .with_attr("Id", &id)
                .with_attr("Type", rel_type)
                .with_attr("Target", target),
        ));
        id
    }

    pub fn write_to(&self, package: &mut DocxPackage) {
        package.set_part_xml(&self.rels_part, &self.document);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rels_part_names() {
        assert_eq!(rels_part_name("word/document.xml"), "word/_rels/document.xml.rels");
        assert_eq!(rels_part_name(""), "_rels/.rels");
    }

    #[test]
    fn test_resolve_relative_targets() {
        assert_eq!(resolve_target("word/document.xml", "footer1.xml"), "word/footer1.xml");
        assert_eq!(resolve_target("word/document.xml", "../customXml/item1.xml"), "customXml/item1.xml");
        assert_eq!(resolve_target("", "word/document.xml"), "word/document.xml");
        assert_eq!(resolve_target("word/document.xml", "/word/styles.xml"), "word/styles.xml");
    }

    #[test]
    fn test_package_roundtrip_keeps_parts() {
        let mut package = DocxPackage::new();
        package.set_part("a.xml", b"<a/>".to_vec());
        package.set_part("media/image1.png", vec![0, 1, 2, 3]);

        let bytes = package.to_bytes().unwrap();
        let reopened = DocxPackage::from_bytes(&bytes).unwrap();

        assert_eq!(reopened.part("a.xml"), Some(&b"<a/>"[..]));
        assert_eq!(reopened.part("media/image1.png"), Some(&[0u8, 1, 2, 3][..]));
        assert_eq!(reopened.part_names().count(), 2);
    }

    #[test]
    fn test_relationship_ids_are_unique() {
        let package = DocxPackage::new();
        let mut rels = package.relationships("word/document.xml").unwrap();
        let first = rels.add(REL_TYPE_FOOTER, "footer1.xml");
        let second = rels.add(REL_TYPE_FOOTER, "footer2.xml");
        assert_ne!(first, second);
        assert_eq!(rels.target_of(&second).as_deref(), Some("word/footer2.xml"));
    }
}
