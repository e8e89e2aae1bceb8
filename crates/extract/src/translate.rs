use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use certfill_core::{CanonicalRecord, TokenUsage, Translations};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::decode::decode_reply;
use crate::prompt::{clause_translation_request, translation_request};
use crate::{usage_of, Completion};

const CLAUSE_BATCH: usize = 10;

/// Fill empty translation fields from the English identity fields, then
/// translate clause remarks that have no Chinese counterpart yet.
///
/// Failures are logged and leave the record as it was.
pub async fn translate_record<C>(record: &mut CanonicalRecord, model: &C) -> TokenUsage
where
    C: Completion + ?Sized,
{
    let mut usage = TokenUsage::default();
    if let Err(err) = translate_identity(record, model, &mut usage).await {
        warn!(error = %format!("{err:#}"), "identity translation failed");
    }
    translate_clause_comments(record, model, &mut usage).await;
    usage
}

async fn translate_identity<C>(
    record: &mut CanonicalRecord,
    model: &C,
    usage: &mut TokenUsage,
) -> Result<()>
where
    C: Completion + ?Sized,
{
    if !record.translations.has_gaps() {
        debug!("translations already complete");
        return Ok(());
    }
    let basic = &record.basic;
    let source: BTreeMap<&str, &str> = [
        ("applicant_en", basic.applicant_en.as_str()),
        ("applicant_address_en", basic.applicant_address_en.as_str()),
        ("manufacturer_en", basic.manufacturer_en.as_str()),
        ("manufacturer_address_en", basic.manufacturer_address_en.as_str()),
        ("product_name_en", basic.product_name_en.as_str()),
        ("factory_name_en", basic.factory_name_en.as_str()),
        ("factory_address_en", basic.factory_address_en.as_str()),
    ]
    .into_iter()
    .filter(|(_, value)| !value.trim().is_empty())
    .collect();
    if source.is_empty() {
        debug!("nothing to translate");
        return Ok(());
    }

    let reply = model
        .complete(&translation_request(&source))
        .await
        .context("translation call")?;
    usage.add(usage_of(&reply));
    let translated: Translations =
        serde_json::from_value(decode_reply(&reply.content)?).context("translation reply")?;

    // Values already present win over the model's.
    let mut filled = translated;
    filled.absorb(std::mem::take(&mut record.translations));
    record.translations = filled;
    info!(fields = source.len(), "translated identity fields");
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClauseReply {
    translations: Vec<ClauseTranslation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClauseTranslation {
    clause: String,
    comment_zh: String,
}

async fn translate_clause_comments<C>(record: &mut CanonicalRecord, model: &C, usage: &mut TokenUsage)
where
    C: Completion + ?Sized,
{
    let pending: Vec<usize> = record
        .clause_verdicts
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.comment_en.trim().is_empty() && v.comment_zh.trim().is_empty())
        .map(|(idx, _)| idx)
        .collect();
    if pending.is_empty() {
        return;
    }
    info!(remarks = pending.len(), "translating clause remarks");

    for batch in pending.chunks(CLAUSE_BATCH) {
        let lines: Vec<(String, String)> = batch
            .iter()
            .map(|&idx| {
                let verdict = &record.clause_verdicts[idx];
                (verdict.clause.clone(), verdict.comment_en.clone())
            })
            .collect();
        let reply = match model.complete(&clause_translation_request(&lines)).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "clause remark translation failed");
                continue;
            }
        };
        usage.add(usage_of(&reply));
        let parsed = decode_reply(&reply.content)
            .and_then(|value| Ok(serde_json::from_value::<ClauseReply>(value)?));
        let Ok(parsed) = parsed else {
            warn!("clause remark translation reply unreadable, batch skipped");
            continue;
        };
        let by_clause: HashMap<String, String> = parsed
            .translations
            .into_iter()
            .filter(|t| !t.comment_zh.trim().is_empty())
            .map(|t| (t.clause.trim().to_string(), t.comment_zh))
            .collect();
        for &idx in batch {
            let verdict = &mut record.clause_verdicts[idx];
            if let Some(zh) = by_clause.get(verdict.clause.trim()) {
                verdict.comment_zh = zh.clone();
            }
        }
    }
}
