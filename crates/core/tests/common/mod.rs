use std::io::{Cursor, Write};

use certfill_core::docx::{DocumentModel, Region, TemplatePackage};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// A paragraph with one bold run per entry of `runs`.
pub fn paragraph(runs: &[&str]) -> String {
    let body: String = runs
        .iter()
        .map(|text| {
            format!(
                r#"<w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">{}</w:t></w:r>"#,
                escape(text)
            )
        })
        .collect();
    format!("<w:p>{body}</w:p>")
}

/// A table with one row per entry, one single-run cell per column.
#[allow(dead_code)]
pub fn table(rows: &[&[&str]]) -> String {
    let rows: String = rows
        .iter()
        .map(|cells| {
            let cells: String = cells
                .iter()
                .map(|text| format!("<w:tc>{}</w:tc>", paragraph(&[text])))
                .collect();
            format!("<w:tr>{cells}</w:tr>")
        })
        .collect();
    format!("<w:tbl>{rows}</w:tbl>")
}

/// An in-memory `.docx` with the given body and optional header and footer.
pub fn docx(body: &str, header: Option<&str>, footer: Option<&str>) -> Vec<u8> {
    let mut parts = vec![
        (
            "[Content_Types].xml".to_string(),
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/></Types>"#.to_string(),
        ),
        (
            "word/document.xml".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="{W_NS}"><w:body>{body}</w:body></w:document>"#
            ),
        ),
    ];
    if let Some(header) = header {
        parts.push((
            "word/header1.xml".to_string(),
            format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:hdr xmlns:w="{W_NS}">{header}</w:hdr>"#),
        ));
    }
    if let Some(footer) = footer {
        parts.push((
            "word/footer1.xml".to_string(),
            format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:ftr xmlns:w="{W_NS}">{footer}</w:ftr>"#),
        ));
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in parts {
        zip.start_file(name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn load(bytes: &[u8]) -> DocumentModel {
    DocumentModel::load(&TemplatePackage::open(bytes).unwrap()).unwrap()
}

#[allow(dead_code)]
pub fn region_text(bytes: &[u8], region: Region) -> String {
    load(bytes).region_text(region)
}

/// Raw markup of the main document part.
#[allow(dead_code)]
pub fn document_xml(bytes: &[u8]) -> String {
    TemplatePackage::open(bytes)
        .unwrap()
        .part_str("word/document.xml")
        .unwrap()
        .to_string()
}
