//! Office Open XML package access and the editable document model.

mod model;
pub mod xml;

use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{FillError, Result};

pub use model::{
    cell_text, runs_mut, text_of, visit_paragraphs, visit_paragraphs_mut, DocumentModel,
    LoadedPart, Region, RunText,
};
pub use xml::{XmlDocument, XmlElement, XmlNode};

pub const DOCUMENT_PART: &str = "word/document.xml";

#[derive(Debug, Clone, PartialEq, Eq)]
struct PackageEntry {
    name: String,
    data: Vec<u8>,
    compression: CompressionMethod,
    is_dir: bool,
}

/// The zip container of a `.docx`, entries kept in their original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePackage {
    entries: Vec<PackageEntry>,
}

impl TemplatePackage {
    pub fn open(bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(archive.len());
        for idx in 0..archive.len() {
            let mut file = archive.by_index(idx)?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            entries.push(PackageEntry {
                name: file.name().to_string(),
                compression: file.compression(),
                is_dir: file.is_dir(),
                data,
            });
        }
        if !entries.iter().any(|e| e.name == DOCUMENT_PART) {
            return Err(FillError::MissingPart(DOCUMENT_PART.to_string()));
        }
        Ok(Self { entries })
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| !e.is_dir)
            .map(|e| e.name.as_str())
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.as_slice())
    }

    /// A part decoded as UTF-8 markup.
    pub fn part_str(&self, name: &str) -> Result<&str> {
        let data = self
            .part(name)
            .ok_or_else(|| FillError::MissingPart(name.to_string()))?;
        std::str::from_utf8(data).map_err(|err| FillError::markup(name, err))
    }

    pub fn replace_part(&mut self, name: &str, data: Vec<u8>) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.data = data,
            None => self.entries.push(PackageEntry {
                name: name.to_string(),
                data,
                compression: CompressionMethod::Deflated,
                is_dir: false,
            }),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for entry in &self.entries {
            let method = match entry.compression {
                CompressionMethod::Stored => CompressionMethod::Stored,
                _ => CompressionMethod::Deflated,
            };
            let options = SimpleFileOptions::default().compression_method(method);
            if entry.is_dir {
                zip.add_directory(entry.name.as_str(), options)?;
                continue;
            }
            zip.start_file(entry.name.as_str(), options)?;
            zip.write_all(&entry.data)?;
        }
        Ok(zip.finish()?.into_inner())
    }
}
