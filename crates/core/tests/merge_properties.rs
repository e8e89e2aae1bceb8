use std::collections::BTreeSet;

use certfill_core::{merge, CanonicalRecord, Chunk, SeriesModel};
use proptest::prelude::*;

fn partial() -> impl Strategy<Value = CanonicalRecord> {
    (
        prop::sample::select(vec!["", "", "M1", "M2", "PA-120W"]),
        prop::collection::vec(
            (prop::sample::select(vec!["M1", "M2", "m1", "M3", ""]), "[0-9]{1,2}V"),
            0..4,
        ),
        prop::collection::vec(prop::sample::select(vec!["Photos", "photos", "Schematics"]), 0..3),
        any::<(bool, bool, bool)>(),
    )
        .prop_map(|(main, series, attachments, (av, class_ii, portable))| {
            let mut record = CanonicalRecord::default();
            record.basic.model_main = main.to_string();
            record.series_models = series
                .into_iter()
                .map(|(model, vout)| SeriesModel {
                    model: model.to_string(),
                    vout,
                    ..SeriesModel::default()
                })
                .collect();
            record.attachments = attachments.into_iter().map(String::from).collect();
            record.flags.is_av = av;
            record.flags.is_class_ii = class_ii;
            record.flags.is_portable = portable;
            record
        })
}

fn chunks(partials: &[CanonicalRecord]) -> Vec<Chunk> {
    partials
        .iter()
        .enumerate()
        .map(|(position, partial)| Chunk::extracted(position, partial.clone()))
        .collect()
}

fn shuffled_chunks() -> impl Strategy<Value = (Vec<Chunk>, Vec<Chunk>)> {
    prop::collection::vec(partial(), 1..6).prop_flat_map(|partials| {
        let ordered = chunks(&partials);
        (Just(ordered.clone()), Just(ordered).prop_shuffle())
    })
}

proptest! {
    #[test]
    fn completion_order_does_not_matter((ordered, shuffled) in shuffled_chunks()) {
        let a = merge(ordered).unwrap();
        let b = merge(shuffled).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn trailing_empty_partial_changes_nothing(partials in prop::collection::vec(partial(), 1..6)) {
        let base = merge(chunks(&partials)).unwrap().record;
        let mut padded = partials.clone();
        padded.push(CanonicalRecord::default());
        let with_empty = merge(chunks(&padded)).unwrap().record;
        prop_assert_eq!(base, with_empty);
    }

    #[test]
    fn flags_never_turn_off(partials in prop::collection::vec(partial(), 1..6)) {
        let merged = merge(chunks(&partials)).unwrap().record;
        for partial in &partials {
            for ((name, on), (_, merged_on)) in partial.flags.iter().zip(merged.flags.iter()) {
                prop_assert!(!on || merged_on, "flag {} was lost", name);
            }
        }
    }

    #[test]
    fn keyed_collections_stay_unique(partials in prop::collection::vec(partial(), 1..6)) {
        let merged = merge(chunks(&partials)).unwrap().record;
        let keys: Vec<&str> = merged.series_models.iter().map(|m| m.key()).collect();
        let distinct: BTreeSet<&str> = keys.iter().copied().collect();
        prop_assert_eq!(keys.len(), distinct.len());
        prop_assert!(!distinct.contains(""));

        let folded: BTreeSet<String> =
            merged.attachments.iter().map(|a| a.to_lowercase()).collect();
        prop_assert_eq!(folded.len(), merged.attachments.len());
    }

    #[test]
    fn first_occurrence_of_a_model_wins(partials in prop::collection::vec(partial(), 1..6)) {
        let merged = merge(chunks(&partials)).unwrap().record;
        for model in &merged.series_models {
            let first = partials
                .iter()
                .flat_map(|p| p.series_models.iter())
                .find(|m| m.key() == model.key());
            prop_assert_eq!(Some(model), first);
        }
    }
}

#[test]
fn later_non_empty_scalar_wins_over_empty() {
    let values = ["X", "", "Y"];
    let partials: Vec<CanonicalRecord> = values
        .iter()
        .map(|value| {
            let mut record = CanonicalRecord::default();
            record.basic.model_main = value.to_string();
            record
        })
        .collect();
    assert_eq!(merge(chunks(&partials)).unwrap().record.basic.model_main, "Y");
}

#[test]
fn duplicate_model_keeps_first_vout() {
    let series = |vout: &str| {
        let mut record = CanonicalRecord::default();
        record.series_models = vec![SeriesModel {
            model: "M1".into(),
            vout: vout.into(),
            ..SeriesModel::default()
        }];
        record
    };
    let merged = merge(chunks(&[series("5V"), series("12V")])).unwrap().record;
    assert_eq!(merged.series_models.len(), 1);
    assert_eq!(merged.series_models[0].vout, "5V");
}
