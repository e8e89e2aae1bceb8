//! Variable-length content rendered at anchor markers.
//!
//! Structure only ever changes here: an existing table is resized, or a new
//! table is inserted in front of the paragraph carrying the anchor.

use tracing::{debug, info};

use crate::config::RenderConfig;
use crate::docx::{
    cell_text, runs_mut, text_of, visit_paragraphs, DocumentModel, XmlElement, XmlNode,
};
use crate::placeholders::PlaceholderMap;
use crate::record::CanonicalRecord;
use crate::substitute::replace_all;

pub const FACTORY_TABLE_BLOCK: &str = "FACTORY_TABLE_BLOCK";
pub const INPUT_TEST_BLOCK: &str = "TABLE_B2_5_INPUT_TEST";
pub const ABNORMAL_FAULT_BLOCK: &str = "TABLE_B3_B4_ABNORMAL_FAULT";
pub const TEMPERATURE_BLOCK: &str = "TEMPERATURE_REQUIREMENTS_TABLE";
pub const MAX_OUTPUT_BLOCK: &str = "MAX_OUTPUT_POWER_BLOCK";
pub const ATTACHMENT_BLOCK: &str = "ATTACHMENT_LIST_BLOCK";

pub const ALL_BLOCKS: &[&str] = &[
    FACTORY_TABLE_BLOCK,
    INPUT_TEST_BLOCK,
    ABNORMAL_FAULT_BLOCK,
    TEMPERATURE_BLOCK,
    MAX_OUTPUT_BLOCK,
    ATTACHMENT_BLOCK,
];

const INPUT_TEST_HEADER: [&str; 6] = ["Voltage", "Frequency", "Current", "Power", "Condition", "Remarks"];
const FACTORY_HEADER: [&str; 2] = ["Factory name", "Address"];

/// Where a block goes: its `{{#BLOCK:NAME}}` marker and, for templates that
/// predate markers, a caption identifying the target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub name: String,
    pub caption: Option<String>,
}

impl Anchor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: &str) -> Self {
        if !caption.is_empty() {
            self.caption = Some(caption.to_string());
        }
        self
    }

    /// Marker spellings, the canonical one first.
    pub fn literals(&self) -> [String; 2] {
        [
            format!("{{{{#BLOCK:{}}}}}", self.name),
            format!("{{{{{}}}}}", self.name),
        ]
    }

    fn in_text(&self, text: &str) -> bool {
        self.literals().iter().any(|lit| text.contains(lit.as_str()))
    }
}

fn table_text(table: &XmlElement) -> String {
    let mut lines = Vec::new();
    visit_paragraphs(table, &mut |p: &XmlElement| lines.push(text_of(p)));
    lines.join("\n")
}

/// Child-index path to the innermost `name` element satisfying `pred`.
fn find_path<P>(el: &XmlElement, name: &str, pred: &P) -> Option<Vec<usize>>
where
    P: Fn(&XmlElement) -> bool,
{
    for (idx, child) in el.children.iter().enumerate() {
        let XmlNode::Element(child) = child else {
            continue;
        };
        if let Some(mut path) = find_path(child, name, pred) {
            path.insert(0, idx);
            return Some(path);
        }
        if child.is(name) && pred(child) {
            return Some(vec![idx]);
        }
    }
    None
}

fn node_at_mut<'a>(el: &'a mut XmlElement, path: &[usize]) -> Option<&'a mut XmlElement> {
    let mut current = el;
    for &idx in path {
        current = current.children.get_mut(idx)?.as_element_mut()?;
    }
    Some(current)
}

/// Write `text` into a cell, keeping its first paragraph and first run.
fn set_cell_text(cell: &mut XmlElement, text: &str) {
    let mut seen_paragraph = false;
    cell.children.retain(|node| match node {
        XmlNode::Element(el) if el.is("w:p") => !std::mem::replace(&mut seen_paragraph, true),
        XmlNode::Element(el) => !el.is("w:tbl"),
        _ => true,
    });
    if !seen_paragraph {
        cell.children.push(XmlNode::Element(XmlElement::new("w:p")));
    }
    let Some(paragraph) = cell.child_mut("w:p") else {
        return;
    };
    let mut runs = runs_mut(paragraph);
    if let Some((first, rest)) = runs.split_first_mut() {
        first.set(text);
        for run in rest {
            run.set("");
        }
        return;
    }
    paragraph
        .children
        .push(XmlNode::Element(XmlElement::new("w:r")));
    if let Some(run) = runs_mut(paragraph).first_mut() {
        run.set(text);
    }
}

fn is_row(node: &XmlNode) -> bool {
    node.as_element().map_or(false, |el| el.is("w:tr"))
}

/// Clone the last row or drop trailing rows until the table has `wanted`.
fn resize_rows(table: &mut XmlElement, wanted: usize) {
    let rows: Vec<usize> = table
        .children
        .iter()
        .enumerate()
        .filter(|(_, node)| is_row(node))
        .map(|(idx, _)| idx)
        .collect();
    let Some(&last) = rows.last() else {
        return;
    };
    if rows.len() < wanted {
        let template = table.children[last].clone();
        for offset in 1..=(wanted - rows.len()) {
            table.children.insert(last + offset, template.clone());
        }
    } else {
        for &idx in rows[wanted..].iter().rev() {
            table.children.remove(idx);
        }
    }
}

fn fill_table(table: &mut XmlElement, header: &[String], rows: &[Vec<String>]) {
    resize_rows(table, rows.len() + 1);
    let values = std::iter::once(header).chain(rows.iter().map(Vec::as_slice));
    for (row, values) in table.elements_mut().filter(|el| el.is("w:tr")).zip(values) {
        for (idx, cell) in row.elements_mut().filter(|el| el.is("w:tc")).enumerate() {
            set_cell_text(cell, values.get(idx).map_or("", String::as_str));
        }
    }
}

fn new_cell(text: &str, bold: bool) -> XmlElement {
    let mut run = XmlElement::new("w:r");
    if bold {
        run = run.with_child(XmlElement::new("w:rPr").with_child(XmlElement::new("w:b")));
    }
    let run = run.with_child(
        XmlElement::new("w:t")
            .with_attr("xml:space", "preserve")
            .with_text(text),
    );
    XmlElement::new("w:tc")
        .with_child(
            XmlElement::new("w:tcPr").with_child(
                XmlElement::new("w:tcW")
                    .with_attr("w:w", "0")
                    .with_attr("w:type", "auto"),
            ),
        )
        .with_child(XmlElement::new("w:p").with_child(run))
}

fn border(side: &str) -> XmlElement {
    XmlElement::new(side)
        .with_attr("w:val", "single")
        .with_attr("w:sz", "4")
        .with_attr("w:space", "0")
        .with_attr("w:color", "auto")
}

/// A plain single-line bordered table.
fn new_table(header: &[String], rows: &[Vec<String>]) -> XmlElement {
    let columns = rows
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or(0)
        .max(1);

    let mut borders = XmlElement::new("w:tblBorders");
    for side in ["w:top", "w:left", "w:bottom", "w:right", "w:insideH", "w:insideV"] {
        borders = borders.with_child(border(side));
    }
    let props = XmlElement::new("w:tblPr")
        .with_child(
            XmlElement::new("w:tblW")
                .with_attr("w:w", "0")
                .with_attr("w:type", "auto"),
        )
        .with_child(borders);
    let mut grid = XmlElement::new("w:tblGrid");
    for _ in 0..columns {
        grid = grid.with_child(XmlElement::new("w:gridCol"));
    }

    let mut table = XmlElement::new("w:tbl").with_child(props).with_child(grid);
    let mut header_row = XmlElement::new("w:tr")
        .with_child(XmlElement::new("w:trPr").with_child(XmlElement::new("w:tblHeader")));
    for idx in 0..columns {
        header_row = header_row.with_child(new_cell(header.get(idx).map_or("", String::as_str), true));
    }
    table = table.with_child(header_row);
    for values in rows {
        let mut row = XmlElement::new("w:tr");
        for idx in 0..columns {
            row = row.with_child(new_cell(values.get(idx).map_or("", String::as_str), false));
        }
        table = table.with_child(row);
    }
    table
}

/// Replace `literal` with `replacement` in every paragraph of every region.
pub fn replace_everywhere(doc: &mut DocumentModel, literal: &str, replacement: &str) -> usize {
    let mut count = 0;
    doc.for_each_paragraph_mut(|_, paragraph| {
        if text_of(paragraph).contains(literal) {
            count += replace_all(&mut runs_mut(paragraph), literal, replacement);
        }
    });
    count
}

fn clear_anchor(doc: &mut DocumentModel, anchor: &Anchor) -> usize {
    anchor
        .literals()
        .iter()
        .map(|literal| replace_everywhere(doc, literal, ""))
        .sum()
}

/// Render a table block. Returns whether a table was filled or inserted.
pub fn render_block(
    doc: &mut DocumentModel,
    anchor: &Anchor,
    header: &[String],
    rows: &[Vec<String>],
) -> bool {
    if rows.is_empty() {
        clear_anchor(doc, anchor);
        debug!(block = %anchor.name, "no rows for block");
        return false;
    }

    let matches_table = |table: &XmlElement| {
        let text = table_text(table);
        anchor.in_text(&text)
            || anchor
                .caption
                .as_deref()
                .map_or(false, |caption| text.contains(caption))
    };
    let matches_paragraph = |p: &XmlElement| anchor.in_text(&text_of(p));

    // A captioned or anchored table anywhere wins over a bare anchor paragraph.
    let mut action = None;
    for part in doc.parts_mut() {
        let root = &mut part.doc.root;
        if let Some(path) = find_path(&*root, "w:tbl", &matches_table) {
            if let Some(table) = node_at_mut(root, &path) {
                fill_table(table, header, rows);
                action = Some("filled existing table");
                break;
            }
        }
    }
    if action.is_none() {
        for part in doc.parts_mut() {
            if insert_at_anchor(&mut part.doc.root, &matches_paragraph, header, rows) {
                action = Some("inserted table at anchor");
                break;
            }
        }
    }

    let Some(action) = action else {
        debug!(block = %anchor.name, "no anchor or target table in template");
        return false;
    };
    clear_anchor(doc, anchor);
    info!(block = %anchor.name, rows = rows.len(), "{action}");
    true
}

fn insert_at_anchor<P>(
    root: &mut XmlElement,
    matches: &P,
    header: &[String],
    rows: &[Vec<String>],
) -> bool
where
    P: Fn(&XmlElement) -> bool,
{
    let Some(path) = find_path(&*root, "w:p", matches) else {
        return false;
    };
    let Some((&index, parent_path)) = path.split_last() else {
        return false;
    };
    let Some(parent) = node_at_mut(root, parent_path) else {
        return false;
    };
    parent
        .children
        .insert(index, XmlNode::Element(new_table(header, rows)));
    true
}

/// Replace a block anchor with prose; empty text just clears the anchor.
pub fn render_text_block(doc: &mut DocumentModel, anchor: &Anchor, text: &str) -> bool {
    let mut rendered = 0;
    for literal in anchor.literals() {
        rendered += replace_everywhere(doc, &literal, text);
    }
    if rendered == 0 {
        debug!(block = %anchor.name, "text block anchor not found");
    }
    rendered > 0 && !text.is_empty()
}

/// Write `value` into the cell to the right of every cell containing `label`.
pub fn fill_labelled_cell(doc: &mut DocumentModel, label: &str, value: &str) -> usize {
    if label.is_empty() || value.is_empty() {
        return 0;
    }
    let mut filled = 0;
    fill_labelled_in(doc.body_mut(), label, value, &mut filled);
    filled
}

fn fill_labelled_in(el: &mut XmlElement, label: &str, value: &str, filled: &mut usize) {
    for child in el.elements_mut() {
        if child.is("w:tr") {
            let mut cells: Vec<&mut XmlElement> =
                child.elements_mut().filter(|c| c.is("w:tc")).collect();
            for idx in 0..cells.len().saturating_sub(1) {
                if cell_text(&*cells[idx]).contains(label) {
                    set_cell_text(&mut *cells[idx + 1], value);
                    *filled += 1;
                }
            }
            for cell in cells {
                fill_labelled_in(cell, label, value, filled);
            }
        } else {
            fill_labelled_in(child, label, value, filled);
        }
    }
}

fn max_output_text(map: &PlaceholderMap, record: &CanonicalRecord) -> String {
    let watts = map.value("max_output_w").trim().trim_end_matches(['W', 'w']).trim();
    let volts = record.basic.max_output_v.trim();
    let amps = record.basic.max_output_a.trim();
    let mut parts = Vec::new();
    if !watts.is_empty() {
        parts.push(format!("{watts}W"));
    }
    match (volts.is_empty(), amps.is_empty()) {
        (false, false) => parts.push(format!("{volts}V, {amps}A")),
        (false, true) => parts.push(format!("{volts}V")),
        (true, false) => parts.push(format!("{amps}A")),
        (true, true) => {}
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("最大連續輸出功率為 {}", parts.join(" / "))
    }
}

fn temperature_text(record: &CanonicalRecord) -> String {
    let explicit = record.basic.temperature_requirements_text.trim();
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    let parts: Vec<String> = record
        .key_tables
        .temperature_rise
        .iter()
        .take(5)
        .map(|row| {
            let mut seg = Vec::new();
            if !row.location.is_empty() {
                seg.push(row.location.clone());
            }
            if !row.measured_temp.is_empty() {
                seg.push(format!("{}C", row.measured_temp));
            }
            if !row.temp_rise.is_empty() {
                seg.push(format!("rise {}K", row.temp_rise));
            }
            seg.join(" / ")
        })
        .filter(|seg| !seg.is_empty())
        .collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!("Temperature rise summary: {}", parts.join("; "))
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Render every block the record provides content for, then clear any
/// anchors left behind.
pub fn render_record_blocks(
    doc: &mut DocumentModel,
    record: &CanonicalRecord,
    map: &PlaceholderMap,
    config: &RenderConfig,
) -> usize {
    let mut rendered = 0;

    fill_labelled_cell(doc, &config.factory_label, map.value("factory_list"));

    let factories: Vec<Vec<String>> = record
        .factories
        .iter()
        .map(|f| vec![f.name.clone(), f.address.clone()])
        .collect();
    rendered += render_block(
        doc,
        &Anchor::new(FACTORY_TABLE_BLOCK),
        &strings(&FACTORY_HEADER),
        &factories,
    ) as usize;

    let input_anchor = Anchor::new(INPUT_TEST_BLOCK).with_caption(&config.input_test_caption);
    let (header, rows) = match &record.key_tables.input_test_raw {
        Some(raw) => raw.split_header(),
        None => (
            strings(&INPUT_TEST_HEADER),
            record
                .key_tables
                .input_tests
                .iter()
                .map(|row| {
                    vec![
                        row.voltage.clone(),
                        row.frequency.clone(),
                        row.current.clone(),
                        row.power.clone(),
                        row.test_condition.clone(),
                        row.remarks.clone(),
                    ]
                })
                .collect(),
        ),
    };
    rendered += render_block(doc, &input_anchor, &header, &rows) as usize;

    let fault_anchor =
        Anchor::new(ABNORMAL_FAULT_BLOCK).with_caption(&config.abnormal_fault_caption);
    let (header, rows) = record
        .key_tables
        .abnormal_fault_raw
        .as_ref()
        .map(|raw| raw.split_header())
        .unwrap_or_default();
    rendered += render_block(doc, &fault_anchor, &header, &rows) as usize;

    rendered += render_text_block(doc, &Anchor::new(TEMPERATURE_BLOCK), &temperature_text(record))
        as usize;
    rendered += render_text_block(
        doc,
        &Anchor::new(MAX_OUTPUT_BLOCK),
        &max_output_text(map, record),
    ) as usize;
    let attachments = record
        .attachments
        .iter()
        .map(|item| format!("• {item}"))
        .collect::<Vec<_>>()
        .join("\n");
    rendered += render_text_block(doc, &Anchor::new(ATTACHMENT_BLOCK), &attachments) as usize;

    for name in ALL_BLOCKS {
        clear_anchor(doc, &Anchor::new(name));
    }
    rendered
}
