//! Literal replacement across formatting runs.
//!
//! Word splits visible text into runs at arbitrary points, so `{{model}}` can
//! arrive as `["{{mo", "del", "}}"]`. Replacement works on the concatenated
//! paragraph text and writes the result back run by run, leaving runs that do
//! not overlap the match exactly as they were.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::docx::RunText;
use crate::placeholders::PlaceholderMap;

pub const UNCHECKED: &str = "□";
pub const CHECKED: &str = "■";

pub(crate) static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{([^{}]*?)\}\}").unwrap());

/// A run of text with its own formatting.
pub trait TextRun {
    fn text(&self) -> String;
    fn set_text(&mut self, text: &str);
}

impl TextRun for RunText<'_> {
    fn text(&self) -> String {
        self.get()
    }

    fn set_text(&mut self, text: &str) {
        self.set(text)
    }
}

impl TextRun for String {
    fn text(&self) -> String {
        self.clone()
    }

    fn set_text(&mut self, text: &str) {
        if self != text {
            *self = text.to_string();
        }
    }
}

/// Replace the first occurrence of `literal` in the runs' concatenated text.
pub fn substitute<R: TextRun>(runs: &mut [R], literal: &str, replacement: &str) -> bool {
    substitute_from(runs, literal, replacement, 0).is_some()
}

/// Replace the first occurrence of `literal` at or after byte offset `from`.
///
/// Returns the offset just past the inserted text, so callers can resume
/// scanning without revisiting the replacement.
pub fn substitute_from<R: TextRun>(
    runs: &mut [R],
    literal: &str,
    replacement: &str,
    from: usize,
) -> Option<usize> {
    if runs.is_empty() || literal.is_empty() {
        return None;
    }
    let texts: Vec<String> = runs.iter().map(TextRun::text).collect();
    let full: String = texts.concat();
    let start = from + full.get(from..)?.find(literal)?;
    let end = start + literal.len();
    let new_full = format!("{}{}{}", &full[..start], replacement, &full[end..]);
    let shift = replacement.len() as isize - literal.len() as isize;

    let mut run_start = 0;
    for idx in 0..runs.len() {
        let run_end = run_start + texts[idx].len();
        if run_end <= start {
            // before the match
        } else if run_start >= end {
            let from = (run_start as isize + shift) as usize;
            let to = (run_end as isize + shift) as usize;
            runs[idx].set_text(&new_full[from..to]);
        } else if run_start <= start && run_end >= end {
            let text = &texts[idx];
            let local = start - run_start;
            let updated = format!(
                "{}{}{}",
                &text[..local],
                replacement,
                &text[local + literal.len()..]
            );
            runs[idx].set_text(&updated);
        } else if run_start <= start {
            // The match starts here and spills over: this run takes the rest
            // of the paragraph and every later run is emptied.
            runs[idx].set_text(&new_full[run_start..]);
            for later in runs[idx + 1..].iter_mut() {
                later.set_text("");
            }
            break;
        } else {
            runs[idx].set_text("");
        }
        run_start = run_end;
    }
    Some(start + replacement.len())
}

/// Replace every occurrence of `literal`, left to right.
pub fn replace_all<R: TextRun>(runs: &mut [R], literal: &str, replacement: &str) -> usize {
    let mut cursor = 0;
    let mut count = 0;
    while let Some(next) = substitute_from(runs, literal, replacement, cursor) {
        cursor = next;
        count += 1;
    }
    count
}

fn concat<R: TextRun>(runs: &[R]) -> String {
    runs.iter().map(TextRun::text).collect()
}

/// Fill every known `{{name}}` token of one paragraph.
///
/// Unknown names are left in place. Inserted values are never re-scanned.
pub fn fill_placeholders<R: TextRun>(runs: &mut [R], map: &PlaceholderMap) -> usize {
    let mut cursor = 0;
    let mut count = 0;
    loop {
        let full = concat(runs);
        let Some(caps) = full.get(cursor..).and_then(|rest| PLACEHOLDER.captures(rest)) else {
            break;
        };
        let Some(whole) = caps.get(0) else {
            break;
        };
        let name = caps.get(1).map_or("", |m| m.as_str().trim());
        let token_start = cursor + whole.start();
        match map.get(name) {
            Some(value) => {
                debug!(placeholder = name, "filled placeholder");
                match substitute_from(runs, whole.as_str(), value, token_start) {
                    Some(next) => {
                        cursor = next;
                        count += 1;
                    }
                    None => break,
                }
            }
            None => cursor = token_start + whole.len(),
        }
    }
    count
}

fn is_word_char(ch: Option<char>) -> bool {
    ch.map_or(false, |c| c.is_alphanumeric() || c == '_')
}

/// Byte offsets of glyph boxes that belong to `label`.
///
/// A box in front of the label wins; a box after it is only considered when
/// the paragraph has none in front, since in `□ A □ B` the second box
/// belongs to `B`.
fn glyph_positions(text: &str, label: &str) -> BTreeSet<usize> {
    let mut found = BTreeSet::new();
    for sep in ["", " ", "  "] {
        let needle = format!("{UNCHECKED}{sep}{label}");
        for (pos, _) in text.match_indices(&needle) {
            if !is_word_char(text[pos + needle.len()..].chars().next()) {
                found.insert(pos);
            }
        }
    }
    if !found.is_empty() {
        return found;
    }
    for needle in [format!("{label} {UNCHECKED}"), format!("[{label}] {UNCHECKED}")] {
        for (pos, _) in text.match_indices(&needle) {
            if !is_word_char(text[..pos].chars().next_back()) {
                found.insert(pos + needle.len() - UNCHECKED.len());
            }
        }
    }
    found
}

/// Turn `□` into `■` next to every label whose value is true.
pub fn tick_glyph_checkboxes<R: TextRun>(runs: &mut [R], labels: &IndexMap<String, bool>) -> usize {
    let full = concat(runs);
    if !full.contains(UNCHECKED) {
        return 0;
    }
    let mut positions = BTreeSet::new();
    for (label, _) in labels.iter().filter(|(_, on)| **on) {
        let hits = glyph_positions(&full, label);
        if !hits.is_empty() {
            debug!(label = %label, "ticking glyph checkbox");
        }
        positions.extend(hits);
    }
    // Both glyphs encode to the same number of bytes, so offsets stay valid.
    positions
        .into_iter()
        .filter(|pos| substitute_from(runs, UNCHECKED, CHECKED, *pos).is_some())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runs(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn replaces_placeholder_split_across_runs() {
        let mut r = runs(&["{{mo", "del", "}}"]);
        assert!(substitute(&mut r, "{{model}}", "PA-120W"));
        assert_eq!(r.concat(), "PA-120W");
        assert_eq!(r, runs(&["PA-120W", "", ""]));
    }

    #[test]
    fn containing_run_is_sliced_in_place() {
        let mut r = runs(&["Model: ", "a {{x}} b", " tail"]);
        assert!(substitute(&mut r, "{{x}}", "VALUE"));
        assert_eq!(r, runs(&["Model: ", "a VALUE b", " tail"]));
    }

    #[test]
    fn start_overlap_absorbs_the_remainder() {
        let mut r = runs(&["pre {{na", "me}} post", " end"]);
        assert!(substitute(&mut r, "{{name}}", "N"));
        assert_eq!(r, runs(&["pre N post end", "", ""]));
    }

    #[test]
    fn missing_literal_changes_nothing() {
        let mut r = runs(&["abc"]);
        assert!(!substitute(&mut r, "{{x}}", "y"));
        assert!(!substitute(&mut Vec::<String>::new(), "{{x}}", "y"));
        assert_eq!(r, runs(&["abc"]));
    }

    #[test]
    fn fill_replaces_every_occurrence_once() {
        let mut map = PlaceholderMap::default();
        map.insert("a", "{{a}}{{b}}");
        map.insert("b", "B");
        let mut r = runs(&["{{a}} and {", "{b}} and {{unknown}} and {{ a }}"]);
        let filled = fill_placeholders(&mut r, &map);
        assert_eq!(filled, 3);
        assert_eq!(
            r.concat(),
            "{{a}}{{b}} and B and {{unknown}} and {{a}}{{b}}"
        );
    }

    #[test]
    fn fill_handles_multibyte_text() {
        let mut map = PlaceholderMap::default();
        map.insert("applicant_zh", "台灣公司");
        let mut r = runs(&["申請者：{{appl", "icant_zh}}。"]);
        assert_eq!(fill_placeholders(&mut r, &map), 1);
        assert_eq!(r.concat(), "申請者：台灣公司。");
    }

    #[test]
    fn glyph_label_needs_word_boundary() {
        let mut labels = IndexMap::new();
        labels.insert("Class I".to_string(), true);
        labels.insert("Class II".to_string(), false);
        let mut r = runs(&["□ Class I ", "□ Class II ", "□ Class III"]);
        assert_eq!(tick_glyph_checkboxes(&mut r, &labels), 1);
        assert_eq!(r.concat(), "■ Class I □ Class II □ Class III");
    }

    #[test]
    fn glyph_after_label_is_ticked() {
        let mut labels = IndexMap::new();
        labels.insert("Portable".to_string(), true);
        let mut r = runs(&["Portable ", "□   Fixed □"]);
        assert_eq!(tick_glyph_checkboxes(&mut r, &labels), 1);
        assert_eq!(r.concat(), "Portable ■   Fixed □");
    }

    #[test]
    fn replace_all_rewrites_each_literal() {
        let mut r = runs(&["MC-601 and MC-", "601"]);
        assert_eq!(replace_all(&mut r, "MC-601", "PA-120W"), 2);
        assert_eq!(r.concat(), "PA-120W and PA-120W");
    }
}
