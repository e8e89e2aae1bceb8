//! Legacy form checkboxes (`w:checkBox` inside a `FORMCHECKBOX` field) have
//! no text to substitute; their state lives in a `w:checked` marker. This
//! pass edits the serialized main part directly, after the structured stage.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::record::CanonicalRecord;

static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(/?)(w:[A-Za-z]+)(?:\s[^>]*?)?(/?)>").unwrap());
static CHECKED_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<w:checked(?:\s[^>]*?)?/>|<w:checked(?:\s[^>]*?)?>\s*</w:checked>").unwrap());
static CHECKED_OFF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"w:val\s*=\s*"(?:0|false|off)""#).unwrap());

/// Labels whose box must be ticked, and labels whose box must be cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormLabels {
    pub check: BTreeSet<String>,
    pub uncheck: BTreeSet<String>,
}

impl FormLabels {
    fn set(&mut self, label: &str, on: bool) {
        if on {
            self.uncheck.remove(label);
            self.check.insert(label.to_string());
        } else {
            self.check.remove(label);
            self.uncheck.insert(label.to_string());
        }
    }

    pub fn from_record(record: &CanonicalRecord) -> Self {
        let mut labels = Self::default();
        let flags = &record.flags;
        let tip = &record.particulars;

        labels.set("普通", flags.is_ordinary);
        labels.set("技術人員", flags.is_skilled);
        labels.set("受指導人員", flags.is_instructed);

        labels.set("直插式設備", flags.is_direct_plugin);
        labels.set("放置式設備", flags.is_stationary);
        labels.set("崁入式設備", flags.is_building_in);
        labels.set("壁面/天花板安裝式", flags.is_wall_ceiling);
        labels.set("SRME/機架安裝", flags.is_rack_mounted);
        for label in ["移動式設備", "手持式設備", "可攜式設備"] {
            labels.set(label, flags.is_portable);
        }

        labels.set("Class I", flags.is_class_i);
        labels.set("Class II", flags.is_class_ii);
        labels.set("Class III", flags.is_class_iii);
        labels.set("Pluggable Type A", flags.is_pluggable_a);
        labels.set("Pluggable Type B", flags.is_pluggable_b);
        labels.set("Permanently Connected", flags.is_permanently_connected);

        let group = tip.product_group.to_uppercase();
        if group.contains("AV") || group.contains("ICT") || group.contains("終端") {
            labels.set("終端產品", true);
            labels.set("內建元件", false);
        } else if group.contains("COMPONENT") || group.contains("元件") {
            labels.set("內建元件", true);
            labels.set("終端產品", false);
        }

        let mains = tip.mains_supply.to_uppercase();
        labels.set("AC mains", mains.contains("AC"));
        labels.set("DC mains", mains.contains("DC"));
        labels.set(
            "Not mains connected:",
            mains.contains("NOT") || mains.contains("BATTERY"),
        );

        let pd = ["1", "2", "3"]
            .into_iter()
            .find(|level| tip.pollution_degree.contains(level));
        if let Some(level) = pd {
            for other in ["1", "2", "3"] {
                labels.set(&format!("PD {other}"), other == level);
            }
        }

        labels.set("TN", true);
        labels.set("TT", false);
        labels.set("IT -", false);
        labels
    }
}

#[derive(Debug, Clone, Copy)]
struct Tag<'a> {
    start: usize,
    end: usize,
    name: &'a str,
    closing: bool,
    self_closing: bool,
}

fn scan_tags(markup: &str) -> Vec<Tag<'_>> {
    TAG.captures_iter(markup)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(Tag {
                start: whole.start(),
                end: whole.end(),
                name: caps.get(2)?.as_str(),
                closing: caps.get(1).map_or(false, |m| !m.as_str().is_empty()),
                self_closing: caps.get(3).map_or(false, |m| !m.as_str().is_empty()),
            })
        })
        .collect()
}

/// `(start, end)` of every element called `name`, nesting respected.
fn element_spans(tags: &[Tag<'_>], name: &str) -> Vec<(usize, usize)> {
    let mut open = Vec::new();
    let mut spans = Vec::new();
    for tag in tags.iter().filter(|t| t.name == name) {
        if tag.self_closing {
            spans.push((tag.start, tag.end));
        } else if tag.closing {
            if let Some(start) = open.pop() {
                spans.push((start, tag.end));
            }
        } else {
            open.push(tag.start);
        }
    }
    spans
}

/// End of the innermost span enclosing `pos`.
fn innermost_end(spans: &[(usize, usize)], pos: usize) -> Option<usize> {
    spans
        .iter()
        .filter(|(start, end)| *start < pos && pos < *end)
        .max_by_key(|(start, _)| *start)
        .map(|(_, end)| *end)
}

struct CheckBox {
    start: usize,
    end: usize,
    inner: Option<(usize, usize)>,
}

fn checkboxes(tags: &[Tag<'_>]) -> Vec<CheckBox> {
    let mut found = Vec::new();
    for (idx, tag) in tags.iter().enumerate() {
        if tag.name != "w:checkBox" || tag.closing {
            continue;
        }
        if tag.self_closing {
            found.push(CheckBox {
                start: tag.start,
                end: tag.end,
                inner: None,
            });
            continue;
        }
        let close = tags[idx + 1..]
            .iter()
            .find(|t| t.name == "w:checkBox" && t.closing);
        if let Some(close) = close {
            found.push(CheckBox {
                start: tag.start,
                end: close.end,
                inner: Some((tag.end, close.start)),
            });
        }
    }
    found
}

/// Visible labels: trimmed, non-blank `w:t` contents with their offsets.
fn labels(markup: &str, tags: &[Tag<'_>]) -> Vec<(usize, String)> {
    let mut found = Vec::new();
    for (idx, tag) in tags.iter().enumerate() {
        if tag.name != "w:t" || tag.closing || tag.self_closing {
            continue;
        }
        let Some(close) = tags[idx + 1..].iter().find(|t| t.name == "w:t" && t.closing) else {
            continue;
        };
        let raw = &markup[tag.end..close.start];
        let text = quick_xml::escape::unescape(raw)
            .map(|t| t.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        let text = text.trim();
        if !text.is_empty() {
            found.push((tag.start, text.to_string()));
        }
    }
    found
}

fn is_checked(inner: &str) -> bool {
    CHECKED_MARKER
        .find_iter(inner)
        .any(|marker| !CHECKED_OFF.is_match(marker.as_str()))
}

fn checked_element(inner: &str) -> String {
    let cleared = CHECKED_MARKER.replace_all(inner, "");
    format!("<w:checkBox>{cleared}<w:checked/></w:checkBox>")
}

fn unchecked_element(inner: &str) -> String {
    let cleared = CHECKED_MARKER.replace_all(inner, "");
    if cleared.trim().is_empty() {
        "<w:checkBox/>".to_string()
    } else {
        format!("<w:checkBox>{cleared}</w:checkBox>")
    }
}

/// Tick or clear form checkboxes according to the label that follows each.
///
/// Returns the patched markup and whether anything changed.
pub fn patch(markup: &str, labels_wanted: &FormLabels) -> (String, bool) {
    let tags = scan_tags(markup);
    let cells = element_spans(&tags, "w:tc");
    let paragraphs = element_spans(&tags, "w:p");
    let visible = labels(markup, &tags);

    let mut edits: Vec<(usize, usize, String)> = Vec::new();
    for cb in checkboxes(&tags) {
        let Some(scope_end) =
            innermost_end(&cells, cb.start).or_else(|| innermost_end(&paragraphs, cb.start))
        else {
            continue;
        };
        let Some((_, label)) = visible
            .iter()
            .find(|(pos, _)| *pos > cb.end && *pos < scope_end)
        else {
            continue;
        };
        let inner = cb.inner.map_or("", |(from, to)| &markup[from..to]);
        let checked = is_checked(inner);
        if labels_wanted.check.contains(label) && !checked {
            debug!(label = %label, "checking form checkbox");
            edits.push((cb.start, cb.end, checked_element(inner)));
        } else if labels_wanted.uncheck.contains(label) && CHECKED_MARKER.is_match(inner) {
            debug!(label = %label, "clearing form checkbox");
            edits.push((cb.start, cb.end, unchecked_element(inner)));
        }
    }

    if edits.is_empty() {
        return (markup.to_string(), false);
    }
    info!(changed = edits.len(), "patched form checkboxes");
    let mut out = String::with_capacity(markup.len() + edits.len() * 16);
    let mut last = 0;
    for (start, end, replacement) in edits {
        out.push_str(&markup[last..start]);
        out.push_str(&replacement);
        last = end;
    }
    out.push_str(&markup[last..]);
    (out, true)
}
