//! A small owned XML tree, enough to edit WordprocessingML parts without
//! losing order, attributes, namespaces or whitespace.

use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{FillError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    CData(String),
    /// Comments, processing instructions and doctype, written back verbatim.
    Raw(String),
}

impl XmlNode {
    pub fn as_element(&self) -> Option<&XmlElement> {
        match self {
            XmlNode::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut XmlElement> {
        match self {
            XmlNode::Element(el) => Some(el),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
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
        self.children.push(XmlNode::Text(text.to_string()));
        self
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: &str) {
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attrs.push((key.to_string(), value.to_string())),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(XmlNode::as_element)
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut XmlElement> {
        self.children.iter_mut().filter_map(XmlNode::as_element_mut)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|el| el.is(name))
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut XmlElement> {
        self.elements_mut().find(|el| el.is(name))
    }

    /// Concatenated text of every descendant text node.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }
}

fn collect_text(el: &XmlElement, out: &mut String) {
    for child in &el.children {
        match child {
            XmlNode::Text(text) | XmlNode::CData(text) => out.push_str(text),
            XmlNode::Element(inner) => collect_text(inner, out),
            XmlNode::Raw(_) => {}
        }
    }
}

/// A parsed part: the declaration and anything before the root, then the
/// root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub declaration: Option<String>,
    pub prolog: Vec<XmlNode>,
    pub root: XmlElement,
}

impl XmlDocument {
    pub fn parse(part: &str, source: &str) -> Result<Self> {
        let mut reader = Reader::from_str(source);
        reader.trim_text(false);

        let mut declaration = None;
        let mut prolog = Vec::new();
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|err| FillError::markup(part, err))?;
            match event {
                Event::Decl(decl) => {
                    declaration = Some(String::from_utf8_lossy(&decl).into_owned());
                }
                Event::Start(start) => {
                    stack.push(element_from(part, &start)?);
                }
                Event::Empty(start) => {
                    let el = element_from(part, &start)?;
                    attach(part, &mut stack, &mut root, XmlNode::Element(el))?;
                }
                Event::End(_) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| FillError::markup(part, "unbalanced end tag"))?;
                    attach(part, &mut stack, &mut root, XmlNode::Element(el))?;
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|err| FillError::markup(part, err))?
                        .into_owned();
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Text(text)),
                        None if text.trim().is_empty() => {}
                        None => return Err(FillError::markup(part, "text outside root element")),
                    }
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::CData(text));
                    }
                }
                Event::Comment(text) => {
                    let raw = format!("<!--{}-->", String::from_utf8_lossy(&text));
                    push_raw(&mut stack, &mut prolog, root.is_some(), raw);
                }
                Event::PI(text) => {
                    let raw = format!("<?{}?>", String::from_utf8_lossy(&text));
                    push_raw(&mut stack, &mut prolog, root.is_some(), raw);
                }
                Event::DocType(text) => {
                    let raw = format!("<!DOCTYPE {}>", String::from_utf8_lossy(&text));
                    push_raw(&mut stack, &mut prolog, root.is_some(), raw);
                }
                Event::Eof => break,
            }
        }

        if !stack.is_empty() {
            return Err(FillError::markup(part, "unclosed element at end of input"));
        }
        let root = root.ok_or_else(|| FillError::markup(part, "no root element"))?;
        Ok(Self {
            declaration,
            prolog,
            root,
        })
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        if let Some(decl) = &self.declaration {
            let buf = writer.get_mut();
            buf.extend_from_slice(b"<?");
            buf.extend_from_slice(decl.as_bytes());
            buf.extend_from_slice(b"?>");
            // Word writes a line break after the declaration.
            buf.extend_from_slice(b"\r\n");
        }
        for node in &self.prolog {
            write_node(&mut writer, node)?;
        }
        write_element(&mut writer, &self.root)?;
        String::from_utf8(writer.into_inner())
            .map_err(|err| FillError::Render(format!("serialized markup is not utf-8: {err}")))
    }
}

fn element_from(part: &str, start: &BytesStart<'_>) -> Result<XmlElement> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| FillError::markup(part, err))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| FillError::markup(part, err))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(XmlElement {
        name,
        attrs,
        children: Vec::new(),
    })
}

fn attach(
    part: &str,
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    node: XmlNode,
) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        return Ok(());
    }
    match (node, root.is_some()) {
        (XmlNode::Element(el), false) => {
            *root = Some(el);
            Ok(())
        }
        _ => Err(FillError::markup(part, "more than one root element")),
    }
}

fn push_raw(stack: &mut [XmlElement], prolog: &mut Vec<XmlNode>, after_root: bool, raw: String) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Raw(raw)),
        // Trailing misc after the root carries no content for us.
        None if after_root => {}
        None => prolog.push(XmlNode::Raw(raw)),
    }
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &XmlNode) -> Result<()> {
    match node {
        XmlNode::Element(el) => write_element(writer, el),
        XmlNode::Text(text) => write_event(writer, Event::Text(BytesText::new(text))),
        XmlNode::CData(text) => write_event(writer, Event::CData(BytesCData::new(text.as_str()))),
        XmlNode::Raw(raw) => {
            writer.get_mut().extend_from_slice(raw.as_bytes());
            Ok(())
        }
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, el: &XmlElement) -> Result<()> {
    let mut start = BytesStart::new(el.name.as_str());
    for (key, value) in &el.attrs {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if el.children.is_empty() {
        return write_event(writer, Event::Empty(start));
    }
    write_event(writer, Event::Start(start))?;
    for child in &el.children {
        write_node(writer, child)?;
    }
    write_event(writer, Event::End(BytesEnd::new(el.name.as_str())))
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|err| FillError::Render(format!("failed to write markup: {err}")))
}
