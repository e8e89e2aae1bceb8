use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

pub const DEFAULT_PAGES_PER_CHUNK: usize = 5;

/// Output of the PDF extraction collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawExtraction {
    pub elements_by_page: BTreeMap<String, PageElements>,
    pub raw_text: String,
    pub tables: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageElements {
    pub texts: Vec<TextElement>,
    pub tables: Vec<TextElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextElement {
    #[serde(rename = "Text", default)]
    pub text: Option<String>,
}

impl TextElement {
    fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkTable {
    pub page: String,
    pub content: String,
}

/// A group of consecutive pages sent to the model in one call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkInput {
    pub position: usize,
    pub pages: Vec<String>,
    pub content: String,
    pub tables: Vec<ChunkTable>,
}

/// Numeric pages in numeric order, anything else after them by name.
fn page_key(page: &str) -> (u64, String) {
    (page.trim().parse::<u64>().unwrap_or(u64::MAX), page.to_string())
}

fn table_text(value: &Value) -> String {
    match value.get("Text").and_then(Value::as_str) {
        Some(text) => text.to_string(),
        None => match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        },
    }
}

/// Group the extraction into chunks of `pages_per_chunk` pages. Without page
/// grouping the raw text becomes a single chunk.
pub fn prepare_chunks(raw: &RawExtraction, pages_per_chunk: usize) -> Vec<ChunkInput> {
    if raw.elements_by_page.is_empty() {
        return vec![ChunkInput {
            position: 0,
            pages: vec!["0".to_string()],
            content: raw.raw_text.clone(),
            tables: raw
                .tables
                .iter()
                .map(|table| ChunkTable {
                    page: "0".to_string(),
                    content: table_text(table),
                })
                .collect(),
        }];
    }

    let mut pages: Vec<&String> = raw.elements_by_page.keys().collect();
    pages.sort_by_key(|page| page_key(page));

    let chunks: Vec<ChunkInput> = pages
        .chunks(pages_per_chunk.max(1))
        .enumerate()
        .map(|(position, group)| {
            let mut texts = Vec::new();
            let mut tables = Vec::new();
            for page in group {
                let Some(elements) = raw.elements_by_page.get(*page) else {
                    continue;
                };
                for element in &elements.texts {
                    if !element.text().is_empty() {
                        texts.push(format!("[Page {page}] {}", element.text()));
                    }
                }
                for element in &elements.tables {
                    tables.push(ChunkTable {
                        page: page.to_string(),
                        content: element.text().to_string(),
                    });
                }
            }
            ChunkInput {
                position,
                pages: group.iter().map(|page| page.to_string()).collect(),
                content: texts.join("\n"),
                tables,
            }
        })
        .collect();

    info!(pages = pages.len(), chunks = chunks.len(), "prepared chunks");
    chunks
}
