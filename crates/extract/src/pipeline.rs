use anyhow::{Context, Result};
use async_trait::async_trait;
use certfill_core::{decode_partial, merge, Chunk, ChunkOutcome, MergeOutcome, TokenUsage};
use certfill_llm::{LlmClient, LlmRequest, LlmResponse};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::chunks::{prepare_chunks, ChunkInput, RawExtraction};
use crate::config::{ExtractConfig, ExtractOptions};
use crate::decode::decode_reply;
use crate::prompt::chunk_request;
use crate::translate::translate_record;

/// A language model that answers one request at a time.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, req: &LlmRequest) -> Result<LlmResponse>;
}

#[async_trait]
impl Completion for LlmClient {
    async fn complete(&self, req: &LlmRequest) -> Result<LlmResponse> {
        self.chat(req).await
    }
}

pub fn usage_of(reply: &LlmResponse) -> TokenUsage {
    TokenUsage {
        prompt_tokens: u64::from(reply.prompt_tokens),
        completion_tokens: u64::from(reply.completion_tokens),
        calls: 1,
    }
}

async fn extract_one<C>(input: &ChunkInput, model: &C, options: &ExtractOptions) -> Chunk
where
    C: Completion + ?Sized,
{
    let request = chunk_request(input);
    let outcome = match tokio::time::timeout(options.call_timeout, model.complete(&request)).await {
        Err(_) => ChunkOutcome::Failed {
            reason: format!("timed out after {}s", options.call_timeout.as_secs()),
        },
        Ok(Err(err)) => ChunkOutcome::Failed {
            reason: format!("{err:#}"),
        },
        Ok(Ok(reply)) => {
            let usage = usage_of(&reply);
            match decode_reply(&reply.content)
                .and_then(|value| decode_partial(value).context("partial record"))
            {
                Ok(partial) => ChunkOutcome::Extracted { partial, usage },
                Err(err) => ChunkOutcome::Failed {
                    reason: format!("{err:#}"),
                },
            }
        }
    };
    if let ChunkOutcome::Failed { reason } = &outcome {
        warn!(position = input.position, pages = ?input.pages, %reason, "chunk extraction failed");
    } else {
        debug!(position = input.position, "chunk extracted");
    }
    Chunk {
        position: input.position,
        content: input.content.clone(),
        outcome,
    }
}

/// Extract every chunk, at most `max_concurrency` calls in flight.
///
/// Calls run in waves: a wave is awaited as a whole before the next one
/// starts. The result keeps input order whatever order calls finish in.
pub async fn extract_chunks<C>(inputs: Vec<ChunkInput>, model: &C, options: &ExtractOptions) -> Vec<Chunk>
where
    C: Completion + ?Sized,
{
    let wave_size = options.max_concurrency.max(1);
    let mut slots: Vec<Option<Chunk>> = vec![None; inputs.len()];
    for (wave, group) in inputs.chunks(wave_size).enumerate() {
        debug!(wave, calls = group.len(), "starting wave");
        let done = join_all(group.iter().map(|input| extract_one(input, model, options))).await;
        for (offset, chunk) in done.into_iter().enumerate() {
            slots[wave * wave_size + offset] = Some(chunk);
        }
    }
    slots.into_iter().flatten().collect()
}

/// Chunk, extract, merge and translate one raw extraction.
pub async fn extract_record<C>(
    raw: &RawExtraction,
    model: &C,
    config: &ExtractConfig,
    source_filename: Option<&str>,
) -> Result<MergeOutcome>
where
    C: Completion + ?Sized,
{
    let inputs = prepare_chunks(raw, config.pages_per_chunk);
    let chunks = extract_chunks(inputs, model, &config.options()).await;
    let mut outcome = merge(chunks).context("merge partial records")?;

    if config.translate {
        let usage = translate_record(&mut outcome.record, model).await;
        outcome.stats.usage.add(usage);
    }

    let meta = &mut outcome.record.meta;
    meta.extraction_timestamp = chrono::Utc::now().to_rfc3339();
    if let Some(name) = source_filename {
        meta.source_filename = name.to_string();
    }
    info!(
        chunks = outcome.stats.total_chunks,
        failed = outcome.stats.failed_chunks,
        calls = outcome.stats.usage.calls,
        tokens = outcome.stats.usage.total(),
        "extraction finished"
    );
    Ok(outcome)
}
