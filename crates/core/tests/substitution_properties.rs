use certfill_core::{fill_placeholders, substitute, PlaceholderMap};
use proptest::prelude::*;

/// Cut `text` into runs at the given byte offsets (ASCII input only).
fn split(text: &str, cuts: &[usize]) -> Vec<String> {
    let mut cuts: Vec<usize> = cuts.iter().map(|c| c % (text.len() + 1)).collect();
    cuts.sort_unstable();
    cuts.dedup();
    let mut runs = Vec::new();
    let mut start = 0;
    for cut in cuts {
        runs.push(text[start..cut].to_string());
        start = cut;
    }
    runs.push(text[start..].to_string());
    runs
}

proptest! {
    #[test]
    fn split_placeholder_is_replaced(
        prefix in "[a-z :]{0,12}",
        suffix in "[a-z .]{0,12}",
        value in "[A-Z0-9-]{0,10}",
        cuts in prop::collection::vec(0usize..64, 0..6),
    ) {
        let text = format!("{prefix}{{{{model}}}}{suffix}");
        let mut runs = split(&text, &cuts);
        let original = runs.clone();
        let start = prefix.len();

        prop_assert!(substitute(&mut runs, "{{model}}", &value));
        prop_assert_eq!(runs.concat(), format!("{prefix}{value}{suffix}"));
        prop_assert_eq!(runs.len(), original.len());

        // Runs that end before the token are untouched.
        let mut offset = 0;
        for (before, after) in original.iter().zip(&runs) {
            if offset + before.len() > start {
                break;
            }
            prop_assert_eq!(before, after);
            offset += before.len();
        }
    }

    #[test]
    fn no_placeholder_survives_a_complete_map(
        names in prop::collection::vec("[a-z_]{1,8}", 1..5),
        filler in "[a-z ]{0,6}",
        cuts in prop::collection::vec(0usize..96, 0..8),
    ) {
        let text: String = names
            .iter()
            .map(|name| format!("{filler}{{{{{name}}}}}"))
            .collect();
        let map: PlaceholderMap = names
            .iter()
            .map(|name| (name.clone(), format!("<{}>", name.to_uppercase())))
            .collect();
        let mut runs = split(&text, &cuts);

        let filled = fill_placeholders(&mut runs, &map);
        let joined = runs.concat();
        prop_assert_eq!(filled, names.len());
        prop_assert!(!joined.contains("{{"), "leftover in {}", joined);
    }
}

#[test]
fn three_run_placeholder() {
    let mut runs = vec!["{{mo".to_string(), "del".to_string(), "}}".to_string()];
    assert!(substitute(&mut runs, "{{model}}", "PA-120W"));
    assert_eq!(runs.concat(), "PA-120W");
}
