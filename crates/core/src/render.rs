//! Record plus template in, validated report bytes out.
//!
//! Three stages hand owned buffers to each other: the structured stage edits
//! the document model, the markup stage patches form controls in the
//! serialized main part, and the validation stage reads the result back.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::blocks::{self, ALL_BLOCKS};
use crate::config::{FillConfig, LegacyRewrite};
use crate::docx::{
    runs_mut, text_of, visit_paragraphs, DocumentModel, TemplatePackage, XmlElement,
    DOCUMENT_PART,
};
use crate::error::{FillError, Result};
use crate::formcheck::{self, FormLabels};
use crate::placeholders::{self, checkbox_labels, Overrides, PlaceholderMap};
use crate::record::CanonicalRecord;
use crate::substitute::{fill_placeholders, tick_glyph_checkboxes, PLACEHOLDER, UNCHECKED};
use crate::validate::{validate, ValidationExpectations};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    pub placeholders_filled: usize,
    pub glyph_checkboxes_ticked: usize,
    pub blocks_rendered: usize,
    pub legacy_rewrites: usize,
    pub form_controls_patched: bool,
}

#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub bytes: Vec<u8>,
    pub stats: RenderStats,
}

/// Render `record` into a copy of the template.
///
/// The artifact is only returned when post-render validation passes.
pub fn render(
    record: &CanonicalRecord,
    template: &[u8],
    overrides: &Overrides,
    config: &FillConfig,
) -> Result<RenderedReport> {
    let map = placeholders::build(record, config, overrides);
    info!(placeholders = map.len(), "built placeholder map");

    let (bytes, mut stats) = structured_stage(template.to_vec(), record, &map, config)?;
    let (bytes, patched) = markup_stage(bytes, &FormLabels::from_record(record))?;
    stats.form_controls_patched = patched;

    let expectations = ValidationExpectations::from_record(record, &map);
    let bytes = validation_stage(bytes, &expectations, config)?;

    info!(
        filled = stats.placeholders_filled,
        blocks = stats.blocks_rendered,
        bytes = bytes.len(),
        "rendered report"
    );
    Ok(RenderedReport { bytes, stats })
}

fn structured_stage(
    template: Vec<u8>,
    record: &CanonicalRecord,
    map: &PlaceholderMap,
    config: &FillConfig,
) -> Result<(Vec<u8>, RenderStats)> {
    let mut package = TemplatePackage::open(&template)?;
    let mut doc = DocumentModel::load(&package)?;
    let mut stats = RenderStats {
        legacy_rewrites: rewrite_legacy_literals(&mut doc, map, &config.render.legacy_rewrites),
        ..RenderStats::default()
    };

    let labels = checkbox_labels(record);
    doc.for_each_paragraph_mut(|_, paragraph| {
        let text = text_of(paragraph);
        if !text.contains("{{") && !text.contains(UNCHECKED) {
            return;
        }
        let mut runs = runs_mut(paragraph);
        stats.placeholders_filled += fill_placeholders(&mut runs, map);
        stats.glyph_checkboxes_ticked += tick_glyph_checkboxes(&mut runs, &labels);
    });

    stats.blocks_rendered = blocks::render_record_blocks(&mut doc, record, map, &config.render);

    doc.store(&mut package)?;
    info!(
        placeholders = stats.placeholders_filled,
        glyphs = stats.glyph_checkboxes_ticked,
        "structured stage done"
    );
    Ok((package.to_bytes()?, stats))
}

/// Rewrite literals baked into the template. Runs before the placeholder
/// fill so record values are never touched. A rewrite whose target value is
/// empty leaves the literal in place for the validator to report.
fn rewrite_legacy_literals(
    doc: &mut DocumentModel,
    map: &PlaceholderMap,
    rewrites: &[LegacyRewrite],
) -> usize {
    let mut total = 0;
    for rewrite in rewrites.iter().filter(|r| !r.literal.is_empty()) {
        let replacement = match rewrite.placeholder.as_deref() {
            Some(name) => match map.value(name) {
                "" => {
                    debug!(literal = %rewrite.literal, placeholder = name, "no value for legacy rewrite");
                    continue;
                }
                value => value,
            },
            None => "",
        };
        let count = blocks::replace_everywhere(doc, &rewrite.literal, replacement);
        if count > 0 {
            debug!(literal = %rewrite.literal, count, "rewrote legacy literal");
        }
        total += count;
    }
    total
}

fn markup_stage(bytes: Vec<u8>, labels: &FormLabels) -> Result<(Vec<u8>, bool)> {
    let mut package = TemplatePackage::open(&bytes)?;
    let (patched, changed) = formcheck::patch(package.part_str(DOCUMENT_PART)?, labels);
    if !changed {
        return Ok((bytes, false));
    }
    package.replace_part(DOCUMENT_PART, patched.into_bytes());
    Ok((package.to_bytes()?, true))
}

fn validation_stage(
    bytes: Vec<u8>,
    expectations: &ValidationExpectations,
    config: &FillConfig,
) -> Result<Vec<u8>> {
    let doc = DocumentModel::load(&TemplatePackage::open(&bytes)?)?;
    validate(&doc, expectations, &config.validation)?;
    Ok(bytes)
}

fn is_block_anchor(name: &str) -> bool {
    name.starts_with("#BLOCK:") || ALL_BLOCKS.contains(&name)
}

/// Sorted distinct placeholder names in body, tables, headers and footers.
/// Block anchors are not placeholders and are left out.
pub fn list_placeholders(template: &[u8]) -> Result<Vec<String>> {
    let doc = DocumentModel::load(&TemplatePackage::open(template)?)?;
    let mut names = BTreeSet::new();
    for part in doc.parts() {
        visit_paragraphs(&part.doc.root, &mut |p: &XmlElement| {
            let text = text_of(p);
            for caps in PLACEHOLDER.captures_iter(&text) {
                let name = caps.get(1).map_or("", |m| m.as_str().trim());
                if !name.is_empty() && !is_block_anchor(name) {
                    names.insert(name.to_string());
                }
            }
        });
    }
    Ok(names.into_iter().collect())
}

/// How a template's placeholders line up with a placeholder map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateCheck {
    /// In the template and in the map.
    pub matched: Vec<String>,
    /// In the template, unknown to the map.
    pub unmatched: Vec<String>,
    /// In the map, absent from the template.
    pub unused: Vec<String>,
}

pub fn check_template(template: &[u8], map: &PlaceholderMap) -> Result<TemplateCheck> {
    let names = list_placeholders(template)?;
    let (matched, unmatched): (Vec<String>, Vec<String>) =
        names.iter().cloned().partition(|name| map.contains(name));
    let unused = map
        .names()
        .filter(|name| !names.iter().any(|n| n.as_str() == *name))
        .map(str::to_string)
        .collect();
    Ok(TemplateCheck {
        matched,
        unmatched,
        unused,
    })
}

/// Template lookup in a directory.
pub struct TemplateStore;

impl TemplateStore {
    /// The first `*.placeholder.*.docx` in name order, else the first `.docx`.
    pub fn resolve(dir: &Path) -> Result<PathBuf> {
        let not_found = || FillError::TemplateNotFound(dir.to_path_buf());
        let entries = fs::read_dir(dir).map_err(|_| not_found())?;
        let mut candidates: Vec<(String, PathBuf)> = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // Word keeps `~$name.docx` lock files next to open documents.
            if !path.is_file() || name.starts_with("~$") || !name.to_lowercase().ends_with(".docx") {
                continue;
            }
            candidates.push((name.to_string(), path));
        }
        candidates.sort();
        let chosen = candidates
            .iter()
            .find(|(name, _)| name.contains(".placeholder."))
            .or_else(|| candidates.first())
            .map(|(_, path)| path.clone())
            .ok_or_else(not_found)?;
        debug!(template = %chosen.display(), "resolved template");
        Ok(chosen)
    }

    /// Read the resolved template, or `path` itself when it is a file.
    pub fn load(path: &Path) -> Result<(PathBuf, Vec<u8>)> {
        let file = if path.is_dir() {
            Self::resolve(path)?
        } else if path.is_file() {
            path.to_path_buf()
        } else {
            return Err(FillError::TemplateNotFound(path.to_path_buf()));
        };
        let bytes = fs::read(&file)?;
        Ok((file, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn store_prefers_placeholder_templates() {
        let dir = tempdir().unwrap();
        for name in ["a.docx", "b.placeholder.v2.docx", "c.placeholder.v1.docx", "notes.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let chosen = TemplateStore::resolve(dir.path()).unwrap();
        assert_eq!(chosen.file_name().unwrap(), "b.placeholder.v2.docx");
    }

    #[test]
    fn store_falls_back_to_first_docx() {
        let dir = tempdir().unwrap();
        for name in ["~$lock.docx", "z.docx", "m.DOCX"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let chosen = TemplateStore::resolve(dir.path()).unwrap();
        assert_eq!(chosen.file_name().unwrap(), "m.DOCX");
    }

    #[test]
    fn store_without_templates_is_not_found() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            TemplateStore::resolve(dir.path()),
            Err(FillError::TemplateNotFound(_))
        ));
        assert!(matches!(
            TemplateStore::resolve(&dir.path().join("missing")),
            Err(FillError::TemplateNotFound(_))
        ));
        assert!(matches!(
            TemplateStore::load(&dir.path().join("missing.docx")),
            Err(FillError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn block_anchors_are_not_placeholders() {
        assert!(is_block_anchor("#BLOCK:FACTORY_TABLE_BLOCK"));
        assert!(is_block_anchor("MAX_OUTPUT_POWER_BLOCK"));
        assert!(!is_block_anchor("model_main"));
    }
}
