use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::validate::ValidationFailure;

#[derive(Error, Debug)]
pub enum FillError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("template not found: {0:?}")]
    TemplateNotFound(PathBuf),
    #[error("unreadable template container: {0}")]
    Container(#[from] zip::result::ZipError),
    #[error("template part missing: {0}")]
    MissingPart(String),
    #[error("malformed markup in {part}: {message}")]
    Markup { part: String, message: String },
    #[error("invalid partial record: {0}")]
    InvalidPartial(String),
    #[error("all {total} chunks failed to produce a partial record")]
    AllChunksFailed { total: usize },
    #[error("post-render validation failed: {0}")]
    Validation(ValidationReport),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("render error: {0}")]
    Render(String),
}

pub type Result<T> = std::result::Result<T, FillError>;

impl FillError {
    pub(crate) fn markup(part: &str, message: impl fmt::Display) -> Self {
        Self::Markup {
            part: part.to_string(),
            message: message.to_string(),
        }
    }

    /// Failures carried by a validation error, empty for every other kind.
    pub fn validation_failures(&self) -> &[ValidationFailure] {
        match self {
            FillError::Validation(report) => &report.failures,
            _ => &[],
        }
    }
}

/// Every invariant violated by one rendered artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub failures: Vec<ValidationFailure>,
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, failure) in self.failures.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}
