use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};
use certfill_llm::{LlmClient, LlmProvider};
use serde::{Deserialize, Serialize};

use crate::chunks::DEFAULT_PAGES_PER_CHUNK;

pub const DEFAULT_MAX_CONCURRENCY: usize = 5;
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 180;

/// How extraction talks to the model and how hard it pushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub provider: String,
    /// Model name, or the deployment name for Azure. Empty uses the
    /// provider's environment default.
    pub model: String,
    pub pages_per_chunk: usize,
    pub max_concurrency: usize,
    pub call_timeout_secs: u64,
    pub translate: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::AzureOpenAi.as_str().to_string(),
            model: String::new(),
            pages_per_chunk: DEFAULT_PAGES_PER_CHUNK,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            translate: true,
        }
    }
}

/// Per-call limits for one extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub max_concurrency: usize,
    pub call_timeout: Duration,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        }
    }
}

impl ExtractConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by `CERTFILL_*` values; unparsable numbers are
    /// ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(provider) = get("CERTFILL_PROVIDER") {
            config.provider = provider;
        }
        if let Some(model) = get("CERTFILL_MODEL") {
            config.model = model;
        }
        if let Some(pages) = get("CERTFILL_PAGES_PER_CHUNK").and_then(|v| v.parse().ok()) {
            config.pages_per_chunk = pages;
        }
        if let Some(max) = get("CERTFILL_MAX_CONCURRENCY").and_then(|v| v.parse().ok()) {
            config.max_concurrency = max;
        }
        if let Some(secs) = get("CERTFILL_CALL_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.call_timeout_secs = secs;
        }
        config
    }

    pub fn options(&self) -> ExtractOptions {
        ExtractOptions {
            max_concurrency: self.max_concurrency.max(1),
            call_timeout: Duration::from_secs(self.call_timeout_secs.max(1)),
        }
    }

    pub fn provider(&self) -> Result<LlmProvider> {
        LlmProvider::from_str(&self.provider)
            .ok_or_else(|| anyhow!("unknown provider {:?}", self.provider))
    }

    pub fn client(&self) -> Result<LlmClient> {
        LlmClient::new(self.provider()?, self.model.clone())
    }
}

/// The `[extract]` table of `certfill.toml`. Set fields win over the
/// environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractSection {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub pages_per_chunk: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub call_timeout_secs: Option<u64>,
    pub translate: Option<bool>,
}

impl ExtractSection {
    pub fn apply(&self, mut config: ExtractConfig) -> ExtractConfig {
        if let Some(provider) = &self.provider {
            config.provider = provider.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(pages) = self.pages_per_chunk {
            config.pages_per_chunk = pages;
        }
        if let Some(max) = self.max_concurrency {
            config.max_concurrency = max;
        }
        if let Some(secs) = self.call_timeout_secs {
            config.call_timeout_secs = secs;
        }
        if let Some(translate) = self.translate {
            config.translate = translate;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = ExtractConfig::from_lookup(lookup(&[
            ("CERTFILL_PROVIDER", "local"),
            ("CERTFILL_PAGES_PER_CHUNK", "3"),
            ("CERTFILL_MAX_CONCURRENCY", "not a number"),
            ("CERTFILL_CALL_TIMEOUT_SECS", "30"),
        ]));
        assert_eq!(config.provider, "local");
        assert_eq!(config.pages_per_chunk, 3);
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.options().call_timeout, Duration::from_secs(30));
        assert_eq!(config.provider().unwrap(), LlmProvider::Local);
    }

    #[test]
    fn toml_section_wins_over_environment() {
        let env = ExtractConfig::from_lookup(lookup(&[
            ("CERTFILL_PROVIDER", "openai"),
            ("CERTFILL_MODEL", "gpt-4o"),
        ]));
        let section = ExtractSection {
            provider: Some("local".into()),
            max_concurrency: Some(2),
            ..ExtractSection::default()
        };
        let config = section.apply(env);
        assert_eq!(config.provider, "local");
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.max_concurrency, 2);
    }

    #[test]
    fn zero_limits_are_clamped() {
        let config = ExtractConfig {
            max_concurrency: 0,
            call_timeout_secs: 0,
            ..ExtractConfig::default()
        };
        let options = config.options();
        assert_eq!(options.max_concurrency, 1);
        assert_eq!(options.call_timeout, Duration::from_secs(1));
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let config = ExtractConfig {
            provider: "gemini".into(),
            ..ExtractConfig::default()
        };
        assert!(config.provider().is_err());
    }
}
