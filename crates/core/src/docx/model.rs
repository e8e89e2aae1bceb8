use tracing::debug;

use super::xml::{XmlDocument, XmlElement, XmlNode};
use super::{TemplatePackage, DOCUMENT_PART};
use crate::error::Result;

/// Elements whose `w:r` children still belong to the enclosing paragraph.
const RUN_CONTAINERS: &[&str] = &[
    "w:hyperlink",
    "w:ins",
    "w:smartTag",
    "w:sdt",
    "w:sdtContent",
    "w:customXml",
    "w:fldSimple",
    "w:moveTo",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Body,
    Header,
    Footer,
}

impl Region {
    fn of_part(name: &str) -> Option<Region> {
        let file = name.strip_prefix("word/")?;
        if name == DOCUMENT_PART {
            Some(Region::Body)
        } else if file.starts_with("header") && file.ends_with(".xml") && !file.contains('/') {
            Some(Region::Header)
        } else if file.starts_with("footer") && file.ends_with(".xml") && !file.contains('/') {
            Some(Region::Footer)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPart {
    pub name: String,
    pub region: Region,
    pub doc: XmlDocument,
}

/// Editable copy of the text-bearing parts of one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentModel {
    body: LoadedPart,
    decorations: Vec<LoadedPart>,
}

impl DocumentModel {
    pub fn load(package: &TemplatePackage) -> Result<Self> {
        let body = LoadedPart {
            name: DOCUMENT_PART.to_string(),
            region: Region::Body,
            doc: XmlDocument::parse(DOCUMENT_PART, package.part_str(DOCUMENT_PART)?)?,
        };
        let mut decorations = Vec::new();
        for name in package.part_names() {
            let Some(region) = Region::of_part(name) else {
                continue;
            };
            if region == Region::Body {
                continue;
            }
            decorations.push(LoadedPart {
                name: name.to_string(),
                region,
                doc: XmlDocument::parse(name, package.part_str(name)?)?,
            });
        }
        debug!(
            headers_and_footers = decorations.len(),
            "loaded document model"
        );
        Ok(Self { body, decorations })
    }

    /// Serialize every loaded part back into the package.
    pub fn store(&self, package: &mut TemplatePackage) -> Result<()> {
        for part in self.parts() {
            package.replace_part(&part.name, part.doc.to_xml()?.into_bytes());
        }
        Ok(())
    }

    pub fn parts(&self) -> impl Iterator<Item = &LoadedPart> {
        std::iter::once(&self.body).chain(self.decorations.iter())
    }

    pub fn parts_mut(&mut self) -> impl Iterator<Item = &mut LoadedPart> {
        std::iter::once(&mut self.body).chain(self.decorations.iter_mut())
    }

    /// Root element of the main document part.
    pub fn body(&self) -> &XmlElement {
        &self.body.doc.root
    }

    pub fn body_mut(&mut self) -> &mut XmlElement {
        &mut self.body.doc.root
    }

    /// Call `f` for every paragraph in every region, nested ones included.
    pub fn for_each_paragraph_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(Region, &mut XmlElement),
    {
        for part in self.parts_mut() {
            let region = part.region;
            visit_paragraphs_mut(&mut part.doc.root, &mut |p: &mut XmlElement| f(region, p));
        }
    }

    /// Paragraph texts of a region joined with newlines.
    pub fn region_text(&self, region: Region) -> String {
        let mut lines = Vec::new();
        for part in self.parts().filter(|p| p.region == region) {
            visit_paragraphs(&part.doc.root, &mut |p: &XmlElement| lines.push(text_of(p)));
        }
        lines.join("\n")
    }

    /// Body, header and footer text in that order.
    pub fn all_text(&self) -> String {
        [Region::Body, Region::Header, Region::Footer]
            .into_iter()
            .map(|region| self.region_text(region))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn visit_paragraphs<F>(el: &XmlElement, f: &mut F)
where
    F: FnMut(&XmlElement),
{
    for child in el.elements() {
        if child.is("w:p") {
            f(child);
        }
        visit_paragraphs(child, f);
    }
}

pub fn visit_paragraphs_mut<F>(el: &mut XmlElement, f: &mut F)
where
    F: FnMut(&mut XmlElement),
{
    for child in el.elements_mut() {
        if child.is("w:p") {
            f(child);
        }
        visit_paragraphs_mut(child, f);
    }
}

/// Concatenated run text of one paragraph.
pub fn text_of(paragraph: &XmlElement) -> String {
    let mut out = String::new();
    collect_run_text(paragraph, &mut out);
    out
}

fn collect_run_text(el: &XmlElement, out: &mut String) {
    for child in el.elements() {
        if child.is("w:r") {
            out.push_str(&run_text(child));
        } else if RUN_CONTAINERS.contains(&child.name.as_str()) {
            collect_run_text(child, out);
        }
    }
}

/// Paragraph texts of a table cell joined with newlines.
pub fn cell_text(cell: &XmlElement) -> String {
    cell.elements()
        .filter(|el| el.is("w:p"))
        .map(text_of)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Mutable handles to the runs of one paragraph, in document order.
pub fn runs_mut(paragraph: &mut XmlElement) -> Vec<RunText<'_>> {
    let mut out = Vec::new();
    collect_runs(paragraph, &mut out);
    out
}

fn collect_runs<'a>(el: &'a mut XmlElement, out: &mut Vec<RunText<'a>>) {
    for child in el.elements_mut() {
        if child.is("w:r") {
            out.push(RunText { run: child });
        } else if RUN_CONTAINERS.contains(&child.name.as_str()) {
            collect_runs(child, out);
        }
    }
}

fn is_text_node(el: &XmlElement) -> bool {
    match el.name.as_str() {
        "w:t" | "w:tab" | "w:cr" => true,
        "w:br" => el.attr("w:type").map_or(true, |kind| kind == "textWrapping"),
        _ => false,
    }
}

fn run_text(run: &XmlElement) -> String {
    let mut out = String::new();
    for child in run.elements().filter(|el| is_text_node(el)) {
        match child.name.as_str() {
            "w:t" => out.push_str(&child.text_content()),
            "w:tab" => out.push('\t'),
            _ => out.push('\n'),
        }
    }
    out
}

/// Text nodes for `text`, tabs and newlines becoming their own elements.
fn text_nodes(text: &str) -> Vec<XmlNode> {
    let mut nodes = Vec::new();
    let mut segment = String::new();
    let flush = |segment: &mut String, nodes: &mut Vec<XmlNode>| {
        if !segment.is_empty() {
            let t = XmlElement::new("w:t")
                .with_attr("xml:space", "preserve")
                .with_text(segment);
            nodes.push(XmlNode::Element(t));
            segment.clear();
        }
    };
    for ch in text.chars() {
        match ch {
            '\t' => {
                flush(&mut segment, &mut nodes);
                nodes.push(XmlNode::Element(XmlElement::new("w:tab")));
            }
            '\n' => {
                flush(&mut segment, &mut nodes);
                nodes.push(XmlNode::Element(XmlElement::new("w:br")));
            }
            _ => segment.push(ch),
        }
    }
    flush(&mut segment, &mut nodes);
    nodes
}

/// One `w:r` seen as a string. Writing keeps run properties, field
/// characters and page breaks.
#[derive(Debug)]
pub struct RunText<'a> {
    run: &'a mut XmlElement,
}

impl RunText<'_> {
    pub fn get(&self) -> String {
        run_text(self.run)
    }

    pub fn set(&mut self, text: &str) {
        if run_text(self.run) == text {
            return;
        }
        let children = &mut self.run.children;
        let text_node = |node: &XmlNode| node.as_element().map_or(false, is_text_node);
        let insert_at = children
            .iter()
            .position(|node| text_node(node))
            .unwrap_or(children.len());
        children.retain(|node| !text_node(node));
        children.splice(insert_at..insert_at, text_nodes(text));
    }
}
