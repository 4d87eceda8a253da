// Lossless XML element tree over quick-xml events.
//
// Text and attribute values are kept in their raw (escaped) form so parts we
// never touch serialize back exactly as they were read.

use super::DocxError;
use quick_xml::escape::{escape, partial_escape, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    /// Raw, still-escaped character data
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
    Declaration(String),
    DocType(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    pub name: String,
    /// Attribute name and raw (escaped) value, in source order
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    pub prolog: Vec<XmlNode>,
    pub root: XmlElement,
    pub epilog: Vec<XmlNode>,
}

impl XmlDocument {
    pub fn parse(xml: &str) -> Result<Self, DocxError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let event = reader.read_event()?;
            let node = match event {
                Event::Start(start) => {
                    stack.push(element_from_start(&start)?);
                    continue;
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| {
                        DocxError::Malformed("closing tag without an open element".to_string())
                    })?;
                    XmlNode::Element(element)
                }
                Event::Empty(start) => XmlNode::Element(element_from_start(&start)?),
                Event::Text(text) => XmlNode::Text(raw(&text)),
                Event::CData(data) => XmlNode::CData(raw(&data)),
                Event::Comment(comment) => XmlNode::Comment(raw(&comment)),
                Event::PI(pi) => XmlNode::ProcessingInstruction(raw(&pi)),
                Event::Decl(decl) => XmlNode::Declaration(raw(&decl)),
                Event::DocType(doctype) => XmlNode::DocType(raw(&doctype)),
                Event::Eof => break,
            };

            if let Some(parent) = stack.last_mut() {
                parent.children.push(node);
            } else {
                match node {
                    XmlNode::Element(element) if root.is_none() => root = Some(element),
                    XmlNode::Element(_) => {
                        return Err(DocxError::Malformed(
                            "more than one root element".to_string(),
                        ))
                    }
                    other if root.is_none() => prolog.push(other),
                    other => epilog.push(other),
                }
            }
        }

        if !stack.is_empty() {
            return Err(DocxError::Malformed(format!(
                "unclosed element <{}>",
                stack[stack.len() - 1].name
            )));
        }

        let root = root.ok_or_else(|| DocxError::Malformed("document has no root".to_string()))?;
        Ok(Self {
            prolog,
            root,
            epilog,
        })
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        for node in &self.prolog {
            write_node(&mut out, node);
        }
        write_element(&mut out, &self.root);
        for node in &self.epilog {
            write_node(&mut out, node);
        }
        out
    }
}

fn raw(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn element_from_start(start: &BytesStart) -> Result<XmlElement, DocxError> {
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        attributes.push((raw(attribute.key.as_ref()), raw(&attribute.value)));
    }
    Ok(XmlElement {
        name: raw(start.name().as_ref()),
        attributes,
        children: Vec::new(),
    })
}

fn write_node(out: &mut String, node: &XmlNode) {
    match node {
        XmlNode::Element(element) => write_element(out, element),
        XmlNode::Text(text) => out.push_str(text),
        XmlNode::CData(data) => {
            out.push_str("<![CDATA[");
            out.push_str(data);
            out.push_str("]]>");
        }
        XmlNode::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
        XmlNode::ProcessingInstruction(content) | XmlNode::Declaration(content) => {
            out.push_str("<?");
            out.push_str(content);
            out.push_str("?>");
        }
        XmlNode::DocType(content) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(content);
            out.push('>');
        }
    }
}

fn write_element(out: &mut String, element: &XmlElement) {
    out.push('<');
    out.push_str(&element.name);
    for (key, value) in &element.attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        // Values read from single-quoted attributes may hold a bare quote
        out.push_str(&value.replace('"', "&quot;"));
        out.push('"');
    }
    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &element.children {
        write_node(out, child);
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

impl XmlElement {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.children
            .push(XmlNode::Text(partial_escape(text).into_owned()));
        self
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    /// Unescaped attribute value
    pub fn attr(&self, key: &str) -> Option<Cow<'_, str>> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| unescape(v).unwrap_or(Cow::Borrowed(v.as_str())))
    }

    pub fn set_attr(&mut self, key: &str, value: &str) {
        let escaped = escape(value).into_owned();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = escaped,
            None => self.attributes.push((key.to_string(), escaped)),
        }
    }

    pub fn remove_attr(&mut self, key: &str) {
        self.attributes.retain(|(k, _)| k != key);
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut XmlElement> {
        self.children.iter_mut().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut XmlElement> {
        self.elements_mut().find(|e| e.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.elements().filter(move |e| e.name == name)
    }

    /// `w:val` style attribute of a named child
    pub fn child_attr(&self, child: &str, key: &str) -> Option<Cow<'_, str>> {
        self.child(child).and_then(|c| c.attr(key))
    }

    pub fn remove_children(&mut self, name: &str) {
        self.children
            .retain(|node| !matches!(node, XmlNode::Element(e) if e.name == name));
    }

    /// Get a child, creating it at its schema position when absent.
    ///
    /// `order` lists sibling names in the order the schema requires; unknown
    /// siblings keep their place and the new child goes before the first
    /// sibling that must follow it.
    pub fn ensure_child_ordered(&mut self, name: &str, order: &[&str]) -> &mut XmlElement {
        let existing = self
            .children
            .iter()
            .position(|node| matches!(node, XmlNode::Element(e) if e.name == name));

        let index = match existing {
            Some(index) => index,
            None => {
                let rank = order.iter().position(|n| *n == name);
                let insert_at = rank
                    .and_then(|rank| {
                        self.children.iter().position(|node| match node {
                            XmlNode::Element(e) => order
                                .iter()
                                .position(|n| *n == e.name)
                                .is_some_and(|other| other > rank),
                            _ => false,
                        })
                    })
                    .unwrap_or(self.children.len());
                self.children
                    .insert(insert_at, XmlNode::Element(XmlElement::new(name)));
                insert_at
            }
        };

        match &mut self.children[index] {
            XmlNode::Element(element) => element,
            _ => unreachable!("index points at an element node"),
        }
    }

    /// Concatenated unescaped content of all descendant elements named `name`
    pub fn collect_text(&self, name: &str) -> String {
        let mut out = String::new();
        self.collect_text_into(name, &mut out);
        out
    }

    fn collect_text_into(&self, name: &str, out: &mut String) {
        for node in &self.children {
            if let XmlNode::Element(element) = node {
                if element.name == name {
                    for child in &element.children {
                        match child {
                            XmlNode::Text(text) => {
                                out.push_str(&unescape(text).unwrap_or(Cow::Borrowed(text.as_str())))
                            }
                            XmlNode::CData(data) => out.push_str(data),
                            _ => {}
                        }
                    }
                } else {
                    element.collect_text_into(name, out);
                }
            }
        }
    }

    /// True when any descendant element has one of the given names
    pub fn contains_any(&self, names: &[&str]) -> bool {
        self.elements()
            .any(|e| names.contains(&e.name.as_str()) || e.contains_any(names))
    }

    pub fn find_all<'a>(&'a self, name: &str, out: &mut Vec<&'a XmlElement>) {
        for element in self.elements() {
            if element.name == name {
                out.push(element);
            } else {
                element.find_all(name, out);
            }
        }
    }
}
