use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FillError, Result};

pub const DEFAULT_CONFIG: &str = "certfill.toml";

/// Everything a render needs besides the record and the template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillConfig {
    pub lab: LabConfig,
    pub render: RenderConfig,
    pub validation: ValidationConfig,
}

impl FillConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| FillError::Config(err.to_string()))
    }

    /// Overlay `CERTFILL_LAB_*` variables from the process environment.
    pub fn with_env(self) -> Self {
        self.with_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lab = &mut self.lab;
        let slots: [(&str, &mut String); 7] = [
            ("CERTFILL_LAB_NAME", &mut lab.name),
            ("CERTFILL_LAB_ADDRESS", &mut lab.address),
            ("CERTFILL_LAB_ACCREDITATION_NO", &mut lab.accreditation_no),
            ("CERTFILL_LAB_ALTITUDE", &mut lab.altitude),
            ("CERTFILL_LAB_DEFAULT_TEST_TYPE", &mut lab.default_test_type),
            ("CERTFILL_LAB_DEFAULT_CNS_STANDARD", &mut lab.default_cns_standard),
            (
                "CERTFILL_LAB_DEFAULT_CNS_STANDARD_VERSION",
                &mut lab.default_cns_standard_version,
            ),
        ];
        for (key, slot) in slots {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        }
        self
    }
}

/// Constants of the issuing laboratory and report defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub name: String,
    pub address: String,
    pub accreditation_no: String,
    pub altitude: String,
    pub default_test_type: String,
    pub default_cns_standard: String,
    pub default_cns_standard_version: String,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: String::new(),
            accreditation_no: String::new(),
            altitude: String::new(),
            default_test_type: "型式試驗".to_string(),
            default_cns_standard: "CNS 15598-1".to_string(),
            default_cns_standard_version: "109年版".to_string(),
        }
    }
}

/// A stale literal baked into a template, rewritten to a placeholder value
/// or cleared when `placeholder` is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyRewrite {
    pub literal: String,
    #[serde(default)]
    pub placeholder: Option<String>,
}

impl LegacyRewrite {
    fn to(literal: &str, placeholder: &str) -> Self {
        Self {
            literal: literal.to_string(),
            placeholder: Some(placeholder.to_string()),
        }
    }

    fn clear(literal: &str) -> Self {
        Self {
            literal: literal.to_string(),
            placeholder: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub max_series_models: usize,
    pub max_revisions: usize,
    pub legacy_rewrites: Vec<LegacyRewrite>,
    pub factory_label: String,
    pub input_test_caption: String,
    pub abnormal_fault_caption: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_series_models: 60,
            max_revisions: 5,
            legacy_rewrites: vec![
                LegacyRewrite::to("AST-B-25120522-000", "header_report_no"),
                LegacyRewrite::to("MC-601", "main_model"),
                LegacyRewrite::clear("2025112058855971-00"),
                LegacyRewrite::clear("DK-174052-UL"),
            ],
            factory_label: "生產廠場".to_string(),
            input_test_caption: "表格: 輸入試驗".to_string(),
            abnormal_fault_caption: "異常操作和故障條件試驗".to_string(),
        }
    }
}

/// Which set of known values an identifier token must belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowSource {
    ReportNumbers,
    Models,
}

/// Tokens matching `pattern` must be known values from `allow`. With
/// `context_keywords`, only tokens with a keyword nearby are checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierRule {
    pub name: String,
    pub pattern: String,
    pub allow: AllowSource,
    #[serde(default)]
    pub context_keywords: Vec<String>,
    #[serde(default)]
    pub min_len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub enabled: bool,
    pub legacy_literals: Vec<String>,
    pub legacy_patterns: Vec<String>,
    pub identifier_rules: Vec<IdentifierRule>,
    pub max_keywords: Vec<String>,
    pub max_tolerance: f64,
    /// Characters inspected on each side of a token for context keywords.
    pub context_window: usize,
    pub dangling_literals: Vec<String>,
    pub dangling_patterns: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            legacy_literals: Vec::new(),
            legacy_patterns: vec![
                r"DK-\d+".to_string(),
                r"2025112058855971-00".to_string(),
                r"25120522-000".to_string(),
            ],
            identifier_rules: vec![
                IdentifierRule {
                    name: "model".to_string(),
                    pattern: r"\b[A-Z0-9][A-Z0-9-]{2,}\b".to_string(),
                    allow: AllowSource::Models,
                    context_keywords: ["型號", "Model", "系列", "model", "MODEL"]
                        .map(String::from)
                        .to_vec(),
                    min_len: 4,
                },
                IdentifierRule {
                    name: "lab report number".to_string(),
                    pattern: r"AST-B-[0-9A-Za-z_-]+".to_string(),
                    allow: AllowSource::ReportNumbers,
                    context_keywords: Vec::new(),
                    min_len: 0,
                },
                IdentifierRule {
                    name: "report number".to_string(),
                    pattern: r"\b[0-9]{8,}-[0-9]{2}\b".to_string(),
                    allow: AllowSource::ReportNumbers,
                    context_keywords: Vec::new(),
                    min_len: 0,
                },
            ],
            max_keywords: ["max", "MAX", "最大", "連續"].map(String::from).to_vec(),
            max_tolerance: 0.01,
            context_window: 10,
            dangling_literals: vec!["為，".to_string(), "為 , ".to_string()],
            dangling_patterns: vec![r"(?i)僅.*命名.*不同".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FillConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, FillConfig::default());
        assert_eq!(config.render.max_series_models, 60);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG);
        std::fs::write(
            &path,
            r#"
[lab]
name = "Example Lab"

[render]
max_series_models = 10
legacy_rewrites = [{ literal = "OLD-1" }]

[validation]
max_tolerance = 0.5
"#,
        )
        .unwrap();
        let config = FillConfig::load(&path).unwrap();
        assert_eq!(config.lab.name, "Example Lab");
        assert_eq!(config.lab.default_cns_standard, "CNS 15598-1");
        assert_eq!(config.render.max_series_models, 10);
        assert_eq!(config.render.max_revisions, 5);
        assert_eq!(config.render.legacy_rewrites[0].placeholder, None);
        assert_eq!(config.validation.max_tolerance, 0.5);
        assert_eq!(config.validation.identifier_rules.len(), 3);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = FillConfig::from_toml("[render]\nmax_series_models = \"many\"").unwrap_err();
        assert!(matches!(err, FillError::Config(_)));
    }

    #[test]
    fn environment_overrides_lab_fields() {
        let env: HashMap<&str, &str> = [
            ("CERTFILL_LAB_NAME", "Env Lab"),
            ("CERTFILL_LAB_ALTITUDE", "  "),
        ]
        .into_iter()
        .collect();
        let config = FillConfig::default()
            .with_lookup(|key| env.get(key).map(|value| value.to_string()));
        assert_eq!(config.lab.name, "Env Lab");
        assert_eq!(config.lab.altitude, "");
    }
}
