use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use certfill_extract::{Completion, RawExtraction};
use certfill_llm::{LlmRequest, LlmResponse};
use serde_json::json;

#[allow(dead_code)]
pub enum Reply {
    Text(String),
    Fail(&'static str),
    Hang,
}

type Responder = Box<dyn Fn(&LlmRequest) -> (Duration, Reply) + Send + Sync>;

/// Scripted model that records how many calls overlap.
pub struct FakeModel {
    respond: Responder,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeModel {
    pub fn new(respond: impl Fn(&LlmRequest) -> (Duration, Reply) + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Completion for FakeModel {
    async fn complete(&self, req: &LlmRequest) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let (delay, reply) = (self.respond)(req);
        let wait = match reply {
            Reply::Hang => Duration::from_secs(30),
            _ => delay,
        };
        tokio::time::sleep(wait).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match reply {
            Reply::Text(content) => Ok(LlmResponse {
                content,
                prompt_tokens: 100,
                completion_tokens: 20,
            }),
            Reply::Fail(message) => Err(anyhow!(message)),
            Reply::Hang => Err(anyhow!("hung call finished")),
        }
    }
}

/// First page number named in a chunk request.
#[allow(dead_code)]
pub fn first_page(req: &LlmRequest) -> u32 {
    req.user
        .strip_prefix("Pages ")
        .and_then(|rest| rest.split([',', ' ']).next())
        .and_then(|page| page.parse().ok())
        .unwrap_or(0)
}

/// Extraction with one text line on each of `pages`.
#[allow(dead_code)]
pub fn raw_pages(pages: u32) -> RawExtraction {
    let mut by_page = serde_json::Map::new();
    for page in 1..=pages {
        by_page.insert(
            page.to_string(),
            json!({ "texts": [{ "Text": format!("Model M{page}") }], "tables": [] }),
        );
    }
    serde_json::from_value(json!({ "elements_by_page": by_page })).unwrap()
}

/// Reply naming the main model and one series model after `page`.
#[allow(dead_code)]
pub fn model_reply(page: u32) -> Reply {
    Reply::Text(
        json!({
            "basic_info": { "model_main": format!("M{page}") },
            "series_models": [{ "model": format!("M{page}") }],
        })
        .to_string(),
    )
}
