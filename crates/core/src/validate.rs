//! Post-render checks over the whole rendered text.
//!
//! Every check runs; the caller gets all failures at once or nothing.

use std::collections::BTreeSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::config::{AllowSource, IdentifierRule, ValidationConfig};
use crate::docx::{DocumentModel, Region};
use crate::error::{FillError, Result, ValidationReport};
use crate::placeholders::PlaceholderMap;
use crate::record::CanonicalRecord;
use crate::substitute::PLACEHOLDER;

static WATTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([0-9]+(?:\.[0-9]+)?)\s*W").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    LeftoverPlaceholder(Vec<String>),
    LegacyLiteral(String),
    HeaderMissingIdentifier(String),
    FooterMissingIdentifier(String),
    UnexpectedIdentifier { rule: String, token: String },
    MaxValueMismatch { found: f64, expected: f64 },
    DateRangeIncomplete { start: String, end: String },
    MissingEntity(String),
    DanglingFragment(String),
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LeftoverPlaceholder(tokens) => {
                write!(f, "unreplaced placeholders: {}", tokens.join(", "))
            }
            Self::LegacyLiteral(text) => write!(f, "legacy identifier left in output: {text}"),
            Self::HeaderMissingIdentifier(id) => write!(f, "header does not carry {id}"),
            Self::FooterMissingIdentifier(id) => write!(f, "footer does not carry {id}"),
            Self::UnexpectedIdentifier { rule, token } => {
                write!(f, "unexpected {rule} identifier: {token}")
            }
            Self::MaxValueMismatch { found, expected } => {
                write!(f, "unexpected max power value: {found}W (expected {expected}W)")
            }
            Self::DateRangeIncomplete { start, end } => {
                write!(f, "test date range starts at {start} but {end} is missing")
            }
            Self::MissingEntity(name) => write!(f, "factory missing in output: {name}"),
            Self::DanglingFragment(text) => write!(f, "dangling sentence fragment: {text}"),
        }
    }
}

/// What a correct artifact for one record must and must not contain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationExpectations {
    /// Identifier that headers and footers must carry.
    pub primary_identifier: String,
    pub report_numbers: BTreeSet<String>,
    pub models: BTreeSet<String>,
    pub max_output_w: Option<f64>,
    pub test_date_range: Option<(String, String)>,
    pub factories: Vec<String>,
}

fn parse_watts(value: &str) -> Option<f64> {
    value
        .trim()
        .trim_end_matches(['W', 'w'])
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|w| *w > 0.0)
}

impl ValidationExpectations {
    pub fn from_record(record: &CanonicalRecord, map: &PlaceholderMap) -> Self {
        let basic = &record.basic;
        let primary_identifier = map.value("header_report_no").to_string();
        let report_numbers = [
            primary_identifier.as_str(),
            map.value("report_no"),
            map.value("cb_report_no"),
            map.value("cns_report_no"),
            basic.ast_report_no.as_str(),
            basic.cb_report_no.as_str(),
            basic.cns_report_no.as_str(),
        ]
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

        let test_date_range = match (basic.test_date_from.trim(), basic.test_date_to.trim()) {
            ("", _) | (_, "") => None,
            (start, end) => Some((start.to_string(), end.to_string())),
        };

        Self {
            primary_identifier,
            report_numbers,
            models: record.model_names().into_iter().collect(),
            max_output_w: parse_watts(&basic.max_output_w)
                .or_else(|| parse_watts(map.value("max_output_w"))),
            test_date_range,
            factories: record
                .factories
                .iter()
                .map(|f| f.name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }
}

/// `text[start..end]` widened by up to `chars` characters on each side.
fn window(text: &str, start: usize, end: usize, chars: usize) -> &str {
    let from = if chars == 0 {
        start
    } else {
        text[..start]
            .char_indices()
            .rev()
            .nth(chars - 1)
            .map_or(0, |(idx, _)| idx)
    };
    let to = text[end..]
        .char_indices()
        .nth(chars)
        .map_or(text.len(), |(idx, _)| end + idx);
    &text[from..to]
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|err| FillError::Config(format!("pattern {pattern:?}: {err}")))
}

fn push_unique(failures: &mut Vec<ValidationFailure>, failure: ValidationFailure) {
    if !failures.contains(&failure) {
        failures.push(failure);
    }
}

fn check_identifiers(
    text: &str,
    rule: &IdentifierRule,
    expectations: &ValidationExpectations,
    context_window: usize,
    failures: &mut Vec<ValidationFailure>,
) -> Result<()> {
    let allowed = match rule.allow {
        AllowSource::ReportNumbers => &expectations.report_numbers,
        AllowSource::Models => &expectations.models,
    };
    // Without anything to compare against every token would look foreign.
    if allowed.is_empty() {
        return Ok(());
    }
    let pattern = compile(&rule.pattern)?;
    let mut unexpected = BTreeSet::new();
    for found in pattern.find_iter(text) {
        let token = found.as_str();
        if token.chars().count() < rule.min_len || allowed.contains(token) {
            continue;
        }
        if !rule.context_keywords.is_empty() {
            let around = window(text, found.start(), found.end(), context_window);
            if !rule.context_keywords.iter().any(|k| around.contains(k.as_str())) {
                continue;
            }
        }
        unexpected.insert(token.to_string());
    }
    failures.extend(unexpected.into_iter().map(|token| ValidationFailure::UnexpectedIdentifier {
        rule: rule.name.clone(),
        token,
    }));
    Ok(())
}

/// Every failure of one rendered document, in check order.
pub fn check(
    doc: &DocumentModel,
    expectations: &ValidationExpectations,
    config: &ValidationConfig,
) -> Result<Vec<ValidationFailure>> {
    let text = doc.all_text();
    let mut failures = Vec::new();

    let leftovers: BTreeSet<String> = PLACEHOLDER
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .collect();
    if !leftovers.is_empty() {
        failures.push(ValidationFailure::LeftoverPlaceholder(
            leftovers.into_iter().collect(),
        ));
    }

    for literal in config.legacy_literals.iter().filter(|l| !l.is_empty()) {
        if text.contains(literal.as_str()) {
            push_unique(&mut failures, ValidationFailure::LegacyLiteral(literal.clone()));
        }
    }
    for pattern in &config.legacy_patterns {
        for found in compile(pattern)?.find_iter(&text) {
            push_unique(
                &mut failures,
                ValidationFailure::LegacyLiteral(found.as_str().to_string()),
            );
        }
    }

    let primary = expectations.primary_identifier.trim();
    if !primary.is_empty() {
        if !doc.region_text(Region::Header).contains(primary) {
            failures.push(ValidationFailure::HeaderMissingIdentifier(primary.to_string()));
        }
        let footer = doc.region_text(Region::Footer);
        if !footer.trim().is_empty() && !footer.contains(primary) {
            failures.push(ValidationFailure::FooterMissingIdentifier(primary.to_string()));
        }
    }

    for rule in &config.identifier_rules {
        check_identifiers(&text, rule, expectations, config.context_window, &mut failures)?;
    }

    if let Some(expected) = expectations.max_output_w {
        for caps in WATTS.captures_iter(&text) {
            let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Ok(found) = number.as_str().parse::<f64>() else {
                continue;
            };
            let around = window(&text, whole.start(), whole.end(), config.context_window);
            let near_max = config.max_keywords.iter().any(|k| around.contains(k.as_str()));
            if near_max && (found - expected).abs() > config.max_tolerance {
                push_unique(&mut failures, ValidationFailure::MaxValueMismatch { found, expected });
            }
        }
    }

    if let Some((start, end)) = &expectations.test_date_range {
        if text.contains(start.as_str()) && !text.contains(end.as_str()) {
            failures.push(ValidationFailure::DateRangeIncomplete {
                start: start.clone(),
                end: end.clone(),
            });
        }
    }

    for name in &expectations.factories {
        if !text.contains(name.as_str()) {
            push_unique(&mut failures, ValidationFailure::MissingEntity(name.clone()));
        }
    }

    for literal in config.dangling_literals.iter().filter(|l| !l.is_empty()) {
        if text.contains(literal.as_str()) {
            push_unique(&mut failures, ValidationFailure::DanglingFragment(literal.clone()));
        }
    }
    for pattern in &config.dangling_patterns {
        if let Some(found) = compile(pattern)?.find(&text) {
            push_unique(
                &mut failures,
                ValidationFailure::DanglingFragment(found.as_str().to_string()),
            );
        }
    }

    Ok(failures)
}

/// Accept or reject a rendered document.
pub fn validate(
    doc: &DocumentModel,
    expectations: &ValidationExpectations,
    config: &ValidationConfig,
) -> Result<()> {
    if !config.enabled {
        info!("post-render validation disabled");
        return Ok(());
    }
    let failures = check(doc, expectations, config)?;
    if failures.is_empty() {
        info!("post-render validation passed");
        return Ok(());
    }
    let report = ValidationReport { failures };
    warn!(failures = report.failures.len(), %report, "post-render validation failed");
    Err(FillError::Validation(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::TemplatePackage;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    const NS: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    fn paragraphs(lines: &[&str]) -> String {
        lines
            .iter()
            .map(|l| format!("<w:p><w:r><w:t xml:space=\"preserve\">{l}</w:t></w:r></w:p>"))
            .collect()
    }

    fn doc(body: &[&str], header: &[&str], footer: &[&str]) -> DocumentModel {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let mut part = |name: &str, root: &str, lines: &[&str]| {
            let xml = match root {
                "w:document" => format!("<w:document {NS}><w:body>{}</w:body></w:document>", paragraphs(lines)),
                other => format!("<{other} {NS}>{}</{other}>", paragraphs(lines)),
            };
            zip.start_file(name, SimpleFileOptions::default()).unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
        };
        part("word/document.xml", "w:document", body);
        part("word/header1.xml", "w:hdr", header);
        if !footer.is_empty() {
            part("word/footer1.xml", "w:ftr", footer);
        }
        let bytes = zip.finish().unwrap().into_inner();
        DocumentModel::load(&TemplatePackage::open(&bytes).unwrap()).unwrap()
    }

    fn expectations() -> ValidationExpectations {
        ValidationExpectations {
            primary_identifier: "AST-B-1".into(),
            report_numbers: ["AST-B-1".to_string()].into_iter().collect(),
            models: ["PA-120W".to_string()].into_iter().collect(),
            max_output_w: Some(60.0),
            test_date_range: Some(("2025/01/02".into(), "2025/01/09".into())),
            factories: vec!["Acme Factory".into()],
        }
    }

    fn clean_body() -> Vec<&'static str> {
        vec![
            "最大連續輸出功率為 60W",
            "2025/01/02 - 2025/01/09",
            "型號 PA-120W",
            "Acme Factory",
        ]
    }

    #[test]
    fn clean_document_passes() {
        let d = doc(&clean_body(), &["AST-B-1"], &["AST-B-1 page"]);
        let config = ValidationConfig::default();
        assert_eq!(check(&d, &expectations(), &config).unwrap(), vec![]);
        assert!(validate(&d, &expectations(), &config).is_ok());
    }

    #[test]
    fn leaked_legacy_identifier_is_the_only_failure() {
        let mut body = clean_body();
        body.push("See DK-174052-UL");
        let d = doc(&body, &["AST-B-1"], &[]);
        let err = validate(&d, &expectations(), &ValidationConfig::default()).unwrap_err();
        assert_eq!(
            err.validation_failures(),
            &[ValidationFailure::LegacyLiteral("DK-174052".into())]
        );
    }

    #[test]
    fn collects_every_failure() {
        let d = doc(
            &[
                "{{left}} 型號 MC-601X",
                "最大 65W",
                "2025/01/02",
                "電源為，",
                "AST-B-999",
            ],
            &["nothing"],
            &["footer text"],
        );
        let failures = check(&d, &expectations(), &ValidationConfig::default()).unwrap();
        assert!(failures.contains(&ValidationFailure::LeftoverPlaceholder(vec!["{{left}}".into()])));
        assert!(failures.contains(&ValidationFailure::HeaderMissingIdentifier("AST-B-1".into())));
        assert!(failures.contains(&ValidationFailure::FooterMissingIdentifier("AST-B-1".into())));
        assert!(failures.contains(&ValidationFailure::UnexpectedIdentifier {
            rule: "model".into(),
            token: "MC-601X".into()
        }));
        assert!(failures.contains(&ValidationFailure::UnexpectedIdentifier {
            rule: "lab report number".into(),
            token: "AST-B-999".into()
        }));
        assert!(failures.contains(&ValidationFailure::MaxValueMismatch {
            found: 65.0,
            expected: 60.0
        }));
        assert!(failures.contains(&ValidationFailure::DateRangeIncomplete {
            start: "2025/01/02".into(),
            end: "2025/01/09".into()
        }));
        assert!(failures.contains(&ValidationFailure::MissingEntity("Acme Factory".into())));
        assert!(failures.contains(&ValidationFailure::DanglingFragment("為，".into())));
    }

    #[test]
    fn footer_without_text_is_not_checked() {
        let d = doc(&clean_body(), &["AST-B-1"], &["  "]);
        assert!(check(&d, &expectations(), &ValidationConfig::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn disabled_validation_accepts_anything() {
        let d = doc(&["{{x}}"], &[], &[]);
        let config = ValidationConfig {
            enabled: false,
            ..ValidationConfig::default()
        };
        assert!(validate(&d, &expectations(), &config).is_ok());
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let d = doc(&["x"], &[], &[]);
        let config = ValidationConfig {
            legacy_patterns: vec!["(".into()],
            ..ValidationConfig::default()
        };
        assert!(matches!(
            check(&d, &expectations(), &config),
            Err(FillError::Config(_))
        ));
    }

    #[test]
    fn window_respects_char_boundaries() {
        let text = "型號型號 ABC-1 最大";
        let start = text.find("ABC").unwrap();
        let end = start + "ABC-1".len();
        assert_eq!(window(text, start, end, 2), "號 ABC-1 最");
        assert_eq!(window(text, start, end, 100), text);
        assert_eq!(window(text, start, end, 0), "ABC-1");
    }

    #[test]
    fn expectations_follow_record_and_map() {
        let mut record = CanonicalRecord::default();
        record.basic.model_main = "M1".into();
        record.basic.cb_report_no = "CB-1".into();
        record.basic.max_output_w = "65W".into();
        record.basic.test_date_from = "d1".into();
        let mut map = PlaceholderMap::default();
        map.insert("header_report_no", "CB-1");
        map.insert("cns_report_no", "CNS-9");
        let exp = ValidationExpectations::from_record(&record, &map);
        assert_eq!(exp.primary_identifier, "CB-1");
        assert_eq!(
            exp.report_numbers.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["CB-1", "CNS-9"]
        );
        assert_eq!(exp.max_output_w, Some(65.0));
        assert_eq!(exp.test_date_range, None);
        assert!(exp.models.contains("M1"));
    }
}
