use anyhow::{anyhow, Context, Result};
use reqwest::{header::HeaderValue, Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

const DEFAULT_MAX_RETRIES: usize = 3;
const DEFAULT_MAX_TOKENS: u32 = 16384;
const DEFAULT_AZURE_API_VERSION: &str = "2024-12-01-preview";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    AzureOpenAi,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::AzureOpenAi => "azure",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "azure" | "azure-openai" | "azure_openai" => Some(LlmProvider::AzureOpenAi),
            "local" | "offline" => Some(LlmProvider::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
    pub temperature: Option<f32>,
    /// Ask the provider to constrain the reply to a JSON object.
    pub json_mode: bool,
}

impl LlmRequest {
    pub fn json(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            user: user.into(),
            temperature: None,
            json_mode: true,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    config: ProviderConfig,
    max_retries: usize,
    max_tokens: u32,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi(OpenAiConfig),
    Azure(AzureConfig),
    Local,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

#[derive(Clone)]
struct AzureConfig {
    api_key: String,
    endpoint: String,
    api_version: String,
}

impl LlmClient {
    /// Build a client from the provider's environment variables. For Azure the
    /// model is the deployment name.
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Result<Self> {
        let mut model = model.into();
        let config = match provider {
            LlmProvider::OpenAi => ProviderConfig::OpenAi(OpenAiConfig {
                api_key: read_api_key("OPENAI_API_KEY")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            }),
            LlmProvider::AzureOpenAi => {
                if model.is_empty() {
                    model = env::var("AZURE_OPENAI_DEPLOYMENT")
                        .context("AZURE_OPENAI_DEPLOYMENT is not set")?;
                }
                ProviderConfig::Azure(AzureConfig {
                    api_key: read_api_key("AZURE_OPENAI_API_KEY")?,
                    endpoint: env::var("AZURE_OPENAI_ENDPOINT")
                        .context("AZURE_OPENAI_ENDPOINT is not set")?,
                    api_version: env::var("AZURE_OPENAI_API_VERSION")
                        .unwrap_or_else(|_| DEFAULT_AZURE_API_VERSION.to_string()),
                })
            }
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http: Client::new(),
            provider,
            model,
            config,
            max_retries: DEFAULT_MAX_RETRIES,
            max_tokens: env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_TOKENS),
        })
    }

    /// An offline client that never touches the network.
    pub fn local() -> Self {
        Self {
            http: Client::new(),
            provider: LlmProvider::Local,
            model: "local".to_string(),
            config: ProviderConfig::Local,
            max_retries: 0,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        match &self.config {
            ProviderConfig::OpenAi(cfg) => {
                let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
                let payload = self.chat_payload(req, true);
                self.send_chat(|| {
                    self.http
                        .post(&url)
                        .bearer_auth(&cfg.api_key)
                        .json(&payload)
                })
                .await
            }
            ProviderConfig::Azure(cfg) => {
                let url = azure_url(cfg, &self.model);
                let payload = self.chat_payload(req, false);
                self.send_chat(|| {
                    self.http
                        .post(&url)
                        .header("api-key", &cfg.api_key)
                        .json(&payload)
                })
                .await
            }
            ProviderConfig::Local => Ok(self.chat_local(req)),
        }
    }

    fn chat_payload(&self, req: &LlmRequest, with_model: bool) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": req.user }));
        let mut payload = json!({
            "messages": messages,
            "max_completion_tokens": self.max_tokens,
        });
        if with_model {
            payload["model"] = json!(self.model);
        }
        if let Some(temperature) = req.temperature {
            payload["temperature"] = json!(temperature);
        }
        if req.json_mode {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        payload
    }

    /// Send a chat request, retrying transport errors, 429 and 5xx.
    async fn send_chat<F>(&self, build: F) -> Result<LlmResponse>
    where
        F: Fn() -> RequestBuilder,
    {
        let provider = self.provider.as_str();
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match build().send().await {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt > self.max_retries {
                        return Err(err).with_context(|| format!("{provider} request failed"));
                    }
                    warn!(provider, attempt, error = %err, "transport error, retrying");
                    sleep(backoff_delay(attempt, None)).await;
                    continue;
                }
            };
            let status = response.status();
            if is_retryable(status) {
                if attempt > self.max_retries {
                    return Err(anyhow!(
                        "{provider} returned {status} after {} retries",
                        self.max_retries
                    ));
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                warn!(provider, attempt, %status, wait_ms = wait.as_millis() as u64, "retrying");
                sleep(wait).await;
                continue;
            }
            let value = decode_body(provider, response).await?;
            let content = extract_chat_text(&value)
                .ok_or_else(|| anyhow!("missing text in {provider} response"))?;
            let usage: ChatUsage = value
                .get("usage")
                .and_then(|value| serde_json::from_value(value.clone()).ok())
                .unwrap_or_default();
            debug!(
                provider,
                chars = content.len(),
                prompt_tokens = usage.prompt_tokens.unwrap_or(0),
                "chat completed"
            );
            return Ok(LlmResponse {
                content,
                prompt_tokens: usage.prompt_tokens.unwrap_or(0),
                completion_tokens: usage.completion_tokens.unwrap_or(0),
            });
        }
    }

    fn chat_local(&self, req: &LlmRequest) -> LlmResponse {
        let content = if req.json_mode {
            "{}".to_string()
        } else {
            summarize_text(&req.user, 40)
        };
        LlmResponse {
            content,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }
}

fn azure_url(cfg: &AzureConfig, deployment: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        cfg.endpoint.trim_end_matches('/'),
        deployment,
        cfg.api_version
    )
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// `Retry-After` when the server sends one, else 2s doubling up to 10s.
fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.trim().parse::<u64>() {
                return Duration::from_secs(secs.max(1));
            }
        }
    }
    let capped = attempt.clamp(1, 4) as u32;
    Duration::from_secs((1u64 << capped).min(10))
}

async fn decode_body(provider: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!("{provider} returned error (status {status}): {body}"));
    }
    serde_json::from_str(&body).with_context(|| format!("failed to decode {provider} response"))
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

fn read_api_key(var: &str) -> Result<String> {
    let value = env::var(var).map_err(|_| anyhow!("{var} is not set"))?;
    validate_api_key(var, &value)?;
    Ok(value)
}

fn validate_api_key(var: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{var} is empty"));
    }
    if var.starts_with("OPENAI") && !value.starts_with("sk-") {
        return Err(anyhow!(
            "{var} must start with 'sk-' (see https://platform.openai.com/)"
        ));
    }
    Ok(())
}

fn extract_chat_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(str::to_string)
}

#[derive(Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_round_trip() {
        for provider in [LlmProvider::OpenAi, LlmProvider::AzureOpenAi, LlmProvider::Local] {
            assert_eq!(LlmProvider::from_str(provider.as_str()), Some(provider));
        }
        assert_eq!(LlmProvider::from_str(" Azure-OpenAI "), Some(LlmProvider::AzureOpenAi));
        assert_eq!(LlmProvider::from_str("gemini"), None);
    }

    #[test]
    fn backoff_honours_retry_after_and_caps() {
        let header = HeaderValue::from_static("7");
        assert_eq!(backoff_delay(1, Some(&header)), Duration::from_secs(7));
        assert_eq!(backoff_delay(1, None), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, None), Duration::from_secs(4));
        assert_eq!(backoff_delay(9, None), Duration::from_secs(10));
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::OK));
    }

    #[test]
    fn json_mode_payload() {
        let client = LlmClient::local();
        let req = LlmRequest::json("sys", "user").with_temperature(0.3);
        let payload = client.chat_payload(&req, true);
        assert_eq!(payload["response_format"]["type"], "json_object");
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["content"], "user");
        assert_eq!(payload["model"], "local");
        let azure = client.chat_payload(&req, false);
        assert!(azure.get("model").is_none());
    }

    #[test]
    fn azure_url_uses_deployment_and_version() {
        let cfg = AzureConfig {
            api_key: "k".into(),
            endpoint: "https://lab.openai.azure.com/".into(),
            api_version: DEFAULT_AZURE_API_VERSION.into(),
        };
        assert_eq!(
            azure_url(&cfg, "gpt-4o"),
            "https://lab.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-12-01-preview"
        );
    }

    #[test]
    fn chat_text_from_string_or_parts() {
        let plain = json!({ "choices": [{ "message": { "content": "{\"a\":1}" } }] });
        assert_eq!(extract_chat_text(&plain).as_deref(), Some("{\"a\":1}"));
        let parts = json!({ "choices": [{ "message": { "content": [{ "text": "x" }] } }] });
        assert_eq!(extract_chat_text(&parts).as_deref(), Some("x"));
        assert_eq!(extract_chat_text(&json!({ "choices": [] })), None);
    }

    #[tokio::test]
    async fn local_provider_answers_offline() {
        let client = LlmClient::local();
        let reply = client.chat(&LlmRequest::json("s", "u")).await.unwrap();
        assert_eq!(reply.content, "{}");
        assert_eq!(reply.total_tokens(), 0);
    }
}
