//! Requests sent to the language model.

use std::collections::BTreeMap;

use certfill_llm::LlmRequest;

use crate::chunks::ChunkInput;

const EXTRACTION_TEMPERATURE: f32 = 0.1;
const TRANSLATION_TEMPERATURE: f32 = 0.3;

pub const SYSTEM_PROMPT: &str = r#"You are a product safety test engineer reading an IEC 62368-1 CB test report.
Extract what the given pages contain and answer with a single JSON object using these keys:

basic_info: cb_report_no, standard, applicant_en, applicant_address_en, manufacturer_en,
  manufacturer_address_en, factory_name_en, factory_address_en, product_name_en, model_main,
  brand, trademark, ratings_input, ratings_output, rated_output_lines (array), max_output_w,
  max_output_v, max_output_a, issue_date, receive_date, test_date_from, test_date_to,
  cb_test_lab, cb_certificate_no, equipment_mass, protection_rating, overall_result,
  national_differences, model_differences
test_item_particulars: product_group (AV / ICT / Telecom), classification_of_use (array),
  supply_connection (array), ovc, pollution_degree, ip_code, tma, altitude_limit_m, mobility,
  mains_supply, rated_voltage, rated_frequency, rated_current, protection_class
series_models: array of {model, vout, iout, pout, vin, iin, case_type, connector_type, differences}
clause_verdicts: array of {clause, clause_title, verdict (P / N/A / F), comment_en}
factories: array of {name, address}
revision_records: array of {item, date, report_no, description}
key_tables: input_tests (array of {test_condition, voltage, current, power, frequency}),
  temperature_rise (array of {location, measured_temp, ambient_temp, temp_rise, limit}),
  input_test_raw and abnormal_fault_raw (arrays of rows, each row an array of cell strings)
checkbox_flags: is_av, is_ict, is_telecom, is_ordinary, is_skilled, is_instructed,
  is_class_i, is_class_ii, is_class_iii, is_portable, is_stationary, is_fixed
attachments: array of attachment descriptions

Rules: output JSON only. Use an empty string or empty array for anything not on these pages.
Keep English text exactly as written. Dates as YYYY-MM-DD. altitude_limit_m is a number in metres."#;

const TRANSLATION_SYSTEM: &str = "You translate electronics safety test reports into Traditional Chinese. Output JSON only.";

const CLAUSE_TRANSLATION_SYSTEM: &str = r#"Translate each CB report clause remark into concise Traditional Chinese using CNS terminology. Every input line is "[clause] remark". Keep numbers and units. Answer as {"translations": [{"clause": "...", "comment_zh": "..."}]}."#;

/// Extraction request for one chunk.
pub fn chunk_request(chunk: &ChunkInput) -> LlmRequest {
    let tables = serde_json::to_string_pretty(&chunk.tables).unwrap_or_default();
    let user = format!(
        "Pages {pages} of a CB test report.\n\n=== TEXT ===\n{content}\n\n=== TABLES ===\n{tables}\n\nExtract every field you can find and answer with JSON.",
        pages = chunk.pages.join(", "),
        content = chunk.content,
    );
    LlmRequest::json(SYSTEM_PROMPT, user).with_temperature(EXTRACTION_TEMPERATURE)
}

/// Translation request for the English identity fields in `source`.
pub fn translation_request(source: &BTreeMap<&str, &str>) -> LlmRequest {
    let content = serde_json::to_string_pretty(source).unwrap_or_default();
    let user = format!(
        "Translate these fields:\n{content}\n\n\
         Company names: use the official Chinese name when well known, else keep the English name.\n\
         Product names: use common industry terms (Power Adapter -> 電源供應器).\n\
         Addresses: keep the format, translate country names only.\n\
         Answer with the keys applicant_zh, applicant_address_zh, manufacturer_zh, \
         manufacturer_address_zh, product_name_zh, factory_name_zh, factory_address_zh \
         for the fields given."
    );
    LlmRequest::json(TRANSLATION_SYSTEM, user).with_temperature(TRANSLATION_TEMPERATURE)
}

/// Batch translation request for clause remarks, one `[clause] remark` per line.
pub fn clause_translation_request(lines: &[(String, String)]) -> LlmRequest {
    let user = lines
        .iter()
        .map(|(clause, remark)| format!("[{clause}] {remark}"))
        .collect::<Vec<_>>()
        .join("\n");
    LlmRequest::json(CLAUSE_TRANSLATION_SYSTEM, user).with_temperature(TRANSLATION_TEMPERATURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::ChunkTable;

    #[test]
    fn chunk_request_carries_pages_text_and_tables() {
        let chunk = ChunkInput {
            position: 0,
            pages: vec!["1".into(), "2".into()],
            content: "[Page 1] Model: PA-120W".into(),
            tables: vec![ChunkTable {
                page: "2".into(),
                content: "Clause | Verdict".into(),
            }],
        };
        let req = chunk_request(&chunk);
        assert!(req.json_mode);
        assert_eq!(req.system.as_deref(), Some(SYSTEM_PROMPT));
        assert!(req.user.starts_with("Pages 1, 2 of"));
        assert!(req.user.contains("[Page 1] Model: PA-120W"));
        assert!(req.user.contains("Clause | Verdict"));
    }

    #[test]
    fn clause_lines_are_bracketed() {
        let req = clause_translation_request(&[
            ("4.1.1".into(), "Classified".into()),
            ("5.4".into(), "Within limits".into()),
        ]);
        assert_eq!(req.user, "[4.1.1] Classified\n[5.4] Within limits");
    }
}
