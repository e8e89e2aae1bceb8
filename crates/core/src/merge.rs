//! Deterministic reconciliation of per-chunk partial records.
//!
//! Chunks are folded in source order regardless of the order in which their
//! extractions completed, so the same set of chunks always yields the same
//! record.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FillError, Result};
use crate::record::{CanonicalRecord, ClauseVerdict, Factory, SeriesModel};

/// Tokens spent producing one or more partial records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub calls: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.calls += other.calls;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Extracted {
        partial: CanonicalRecord,
        usage: TokenUsage,
    },
    Failed {
        reason: String,
    },
}

/// One slice of the source document and what its extraction produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub position: usize,
    pub content: String,
    pub outcome: ChunkOutcome,
}

impl Chunk {
    pub fn extracted(position: usize, partial: CanonicalRecord) -> Self {
        Self {
            position,
            content: String::new(),
            outcome: ChunkOutcome::Extracted {
                partial,
                usage: TokenUsage::default(),
            },
        }
    }

    pub fn failed(position: usize, reason: impl Into<String>) -> Self {
        Self {
            position,
            content: String::new(),
            outcome: ChunkOutcome::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, ChunkOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub total_chunks: usize,
    pub failed_chunks: usize,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub record: CanonicalRecord,
    pub stats: MergeStats,
}

/// Keyed collections while folding; materialized into vectors at the end.
#[derive(Default)]
struct Accumulator {
    record: CanonicalRecord,
    series: IndexMap<String, SeriesModel>,
    clauses: IndexMap<String, ClauseVerdict>,
    factories: IndexMap<(String, String), Factory>,
}

impl Accumulator {
    fn absorb(&mut self, partial: CanonicalRecord) {
        let CanonicalRecord {
            basic,
            particulars,
            series_models,
            revision_records,
            clause_verdicts,
            factories,
            key_tables,
            translations,
            flags,
            attachments,
            meta,
        } = partial;

        let target = &mut self.record;
        target.basic.absorb(basic);
        target.particulars.absorb(particulars);
        target.meta.absorb(meta);
        target.translations.absorb(translations);
        target.flags.absorb(flags);
        target.key_tables.absorb(key_tables);
        target.revision_records.extend(revision_records);
        crate::record::union_case_insensitive(&mut target.attachments, attachments);

        for model in series_models {
            let key = model.key().to_string();
            if !key.is_empty() {
                self.series.entry(key).or_insert(model);
            }
        }
        for verdict in clause_verdicts {
            let key = verdict.key().to_string();
            if !key.is_empty() {
                self.clauses.entry(key).or_insert(verdict);
            }
        }
        for factory in factories {
            let (name, address) = factory.key();
            if name.is_empty() && address.is_empty() {
                continue;
            }
            let key = (name.to_string(), address.to_string());
            self.factories.entry(key).or_insert(factory);
        }
    }

    fn finish(self) -> CanonicalRecord {
        let mut record = self.record;
        record.series_models = self.series.into_values().collect();
        record.clause_verdicts = self.clauses.into_values().collect();
        record.factories = self.factories.into_values().collect();
        let particulars = record.particulars.clone();
        record.flags.infer_from(&particulars);
        record
    }
}

/// Fold chunk outcomes into one canonical record.
///
/// Returns [`FillError::AllChunksFailed`] when no chunk produced a partial
/// record.
pub fn merge(mut chunks: Vec<Chunk>) -> Result<MergeOutcome> {
    chunks.sort_by_key(|chunk| chunk.position);

    let mut stats = MergeStats {
        total_chunks: chunks.len(),
        ..MergeStats::default()
    };
    let mut acc = Accumulator::default();

    for chunk in chunks {
        match chunk.outcome {
            ChunkOutcome::Extracted { partial, usage } => {
                stats.usage.add(usage);
                acc.absorb(partial);
            }
            ChunkOutcome::Failed { reason } => {
                warn!(position = chunk.position, %reason, "chunk extraction failed");
                stats.failed_chunks += 1;
            }
        }
    }

    if stats.failed_chunks == stats.total_chunks {
        return Err(FillError::AllChunksFailed {
            total: stats.total_chunks,
        });
    }

    let record = acc.finish();
    info!(
        chunks = stats.total_chunks,
        failed = stats.failed_chunks,
        series_models = record.series_models.len(),
        clause_verdicts = record.clause_verdicts.len(),
        factories = record.factories.len(),
        tokens = stats.usage.total(),
        "merged partial records"
    );
    Ok(MergeOutcome { record, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{BasicInfo, RawTable, RevisionRecord};

    fn with_basic(basic: BasicInfo) -> CanonicalRecord {
        CanonicalRecord {
            basic,
            ..Default::default()
        }
    }

    #[test]
    fn later_non_empty_scalar_wins() {
        let chunks = vec![
            Chunk::extracted(0, with_basic(BasicInfo { model_main: "X".into(), ..Default::default() })),
            Chunk::extracted(1, CanonicalRecord::default()),
            Chunk::extracted(2, with_basic(BasicInfo { model_main: "Y".into(), ..Default::default() })),
        ];
        let outcome = merge(chunks).unwrap();
        assert_eq!(outcome.record.basic.model_main, "Y");
    }

    #[test]
    fn folds_by_position_not_arrival() {
        let chunks = vec![
            Chunk::extracted(2, with_basic(BasicInfo { model_main: "Y".into(), ..Default::default() })),
            Chunk::extracted(0, with_basic(BasicInfo { model_main: "X".into(), ..Default::default() })),
        ];
        assert_eq!(merge(chunks).unwrap().record.basic.model_main, "Y");
    }

    #[test]
    fn duplicate_series_model_keeps_first() {
        let first = CanonicalRecord {
            series_models: vec![SeriesModel { model: "M1".into(), vout: "12V".into(), ..Default::default() }],
            ..Default::default()
        };
        let second = CanonicalRecord {
            series_models: vec![
                SeriesModel { model: "M1".into(), vout: "24V".into(), ..Default::default() },
                SeriesModel { model: "M2".into(), ..Default::default() },
                SeriesModel { model: "  ".into(), vout: "5V".into(), ..Default::default() },
            ],
            ..Default::default()
        };
        let record = merge(vec![Chunk::extracted(0, first), Chunk::extracted(1, second)])
            .unwrap()
            .record;
        assert_eq!(record.series_models.len(), 2);
        assert_eq!(record.series_models[0].vout, "12V");
        assert_eq!(record.series_models[1].model, "M2");
    }

    #[test]
    fn clause_and_factory_keys_deduplicate() {
        let part = |verdict: &str| CanonicalRecord {
            clause_verdicts: vec![ClauseVerdict { clause: "4.1.1".into(), verdict: verdict.into(), ..Default::default() }],
            factories: vec![Factory { name: "F".into(), address: "A".into() }],
            ..Default::default()
        };
        let record = merge(vec![Chunk::extracted(0, part("P")), Chunk::extracted(1, part("N/A"))])
            .unwrap()
            .record;
        assert_eq!(record.clause_verdicts.len(), 1);
        assert_eq!(record.clause_verdicts[0].verdict, "P");
        assert_eq!(record.factories.len(), 1);
    }

    #[test]
    fn raw_table_last_wins_and_rows_append() {
        let table = |cell: &str| RawTable { rows: vec![vec![cell.to_string()]] };
        let mut first = CanonicalRecord::default();
        first.key_tables.input_test_raw = Some(table("a"));
        first.revision_records.push(RevisionRecord { item: "01".into(), ..Default::default() });
        let mut second = CanonicalRecord::default();
        second.key_tables.input_test_raw = Some(table("b"));
        second.revision_records.push(RevisionRecord { item: "01".into(), ..Default::default() });
        let third = CanonicalRecord::default();

        let record = merge(vec![
            Chunk::extracted(0, first),
            Chunk::extracted(1, second),
            Chunk::extracted(2, third),
        ])
        .unwrap()
        .record;
        assert_eq!(record.key_tables.input_test_raw, Some(table("b")));
        assert_eq!(record.revision_records.len(), 2);
    }

    #[test]
    fn failed_chunks_are_counted_and_skipped() {
        let outcome = merge(vec![
            Chunk::failed(0, "timeout"),
            Chunk::extracted(1, with_basic(BasicInfo { brand: "B".into(), ..Default::default() })),
        ])
        .unwrap();
        assert_eq!(outcome.stats.total_chunks, 2);
        assert_eq!(outcome.stats.failed_chunks, 1);
        assert_eq!(outcome.record.basic.brand, "B");
    }

    #[test]
    fn all_failed_or_empty_is_an_error() {
        let err = merge(vec![Chunk::failed(0, "x"), Chunk::failed(1, "y")]).unwrap_err();
        assert!(matches!(err, FillError::AllChunksFailed { total: 2 }));
        let err = merge(Vec::new()).unwrap_err();
        assert!(matches!(err, FillError::AllChunksFailed { total: 0 }));
    }

    #[test]
    fn usage_is_summed() {
        let usage = TokenUsage { prompt_tokens: 10, completion_tokens: 5, calls: 1 };
        let chunk = |position| Chunk {
            position,
            content: String::new(),
            outcome: ChunkOutcome::Extracted { partial: CanonicalRecord::default(), usage },
        };
        let stats = merge(vec![chunk(0), chunk(1)]).unwrap().stats;
        assert_eq!(stats.usage.total(), 30);
        assert_eq!(stats.usage.calls, 2);
    }

    #[test]
    fn flags_inferred_after_fold() {
        let mut part = CanonicalRecord::default();
        part.particulars.classification_of_use = vec!["Ordinary".into()];
        part.particulars.product_group = "AV/ICT".into();
        let record = merge(vec![Chunk::extracted(0, part)]).unwrap().record;
        assert!(record.flags.is_ordinary);
        assert!(record.flags.is_av_ict);
        assert!(!record.flags.is_av);
    }
}
