use std::collections::BTreeMap;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::FillConfig;
use crate::record::{CanonicalRecord, RevisionRecord, SeriesModel};

/// Operator-supplied values that take precedence over the record.
pub type Overrides = BTreeMap<String, String>;

/// Override keys an operator may set, with the names each one fans out to.
const OVERRIDE_FANOUT: &[(&str, &[&str])] = &[
    ("applicant_name", &["applicant_name", "applicant_zh", "applicant_en"]),
    (
        "applicant_address",
        &["applicant_address", "applicant_address_zh", "applicant_address_en"],
    ),
    ("cns_report_no", &["cns_report_no", "report_no"]),
    ("report_author", &["report_author"]),
    ("report_signer", &["report_signer"]),
    ("series_model", &["series_model"]),
];

const SERIES_SUFFIXES: &[&str] = &[
    "", "_vout", "_iout", "_pout", "_vin", "_iin", "_case_type", "_connector", "_diff", "_remarks",
];

static WATTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([0-9]+(?:\.[0-9]+)?)\s*W").unwrap());

/// Flat `name -> value` table used to fill `{{name}}` tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaceholderMap {
    values: BTreeMap<String, String>,
}

impl PlaceholderMap {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Value for `name`, empty when unknown.
    pub fn value(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    fn set(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.trim().to_string());
    }
}

impl FromIterator<(String, String)> for PlaceholderMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Project a record onto the placeholder catalogue.
///
/// Every catalogue name is present; unknown values are the empty string.
pub fn build(record: &CanonicalRecord, config: &FillConfig, overrides: &Overrides) -> PlaceholderMap {
    let mut map = PlaceholderMap::default();
    let basic = &record.basic;

    map.set("report_no", &basic.cb_report_no);
    map.set("cb_report_no", &basic.cb_report_no);
    map.set("ast_report_no", record.header_report_no());
    map.set("header_report_no", record.header_report_no());
    map.set("cns_report_no", &basic.cns_report_no);
    map.set("bsmi_designated_report_no", &basic.bsmi_designated_report_no);
    map.set("standard", &basic.standard);
    map.set("standard_version", &basic.standard_version);
    map.set("cns_standard", &basic.cns_standard);
    map.set("cns_standard_version", &basic.cns_standard_version);
    map.set("national_differences", &basic.national_differences);
    map.set("test_lab", &basic.test_lab);
    map.set("test_lab_country", &basic.test_lab_country);
    map.set("cb_scheme_member", &basic.cb_scheme_member);

    map.set("applicant_en", &basic.applicant_en);
    map.set("applicant_address_en", &basic.applicant_address_en);
    map.set("manufacturer_en", &basic.manufacturer_en);
    map.set("manufacturer_address_en", &basic.manufacturer_address_en);
    map.set("factory_name_en", &basic.factory_name_en);
    map.set("factory_address_en", &basic.factory_address_en);

    map.set("product_name_en", &basic.product_name_en);
    map.set("model_main", &basic.model_main);
    map.set("main_model", &basic.model_main);
    map.set("brand", &basic.brand);
    map.set("trademark", &basic.trademark);

    map.set("ratings_input", &basic.ratings_input);
    map.set("rated_input", &basic.ratings_input);
    map.set("ratings_output", &basic.ratings_output);
    map.set("rated_output", &basic.ratings_output);
    if basic.rated_output_lines.is_empty() {
        map.set("rated_output_block", &basic.ratings_output);
    } else {
        map.set("rated_output_block", &basic.rated_output_lines.join("\n"));
    }
    map.set("ratings_power", &basic.ratings_power);
    map.set("max_output_v", &basic.max_output_v);
    map.set("max_output_a", &basic.max_output_a);
    if basic.max_output_w.trim().is_empty() {
        let derived = max_watts(&basic.rated_output_lines)
            .map(|w| w.to_string())
            .unwrap_or_default();
        map.set("max_output_w", &derived);
    } else {
        map.set("max_output_w", &basic.max_output_w);
    }

    map.set("issue_date", &basic.issue_date);
    map.set("issue_date_short", &basic.issue_date_short);
    map.set("receive_date", &basic.receive_date);
    map.set("sample_received_date", &basic.receive_date);
    map.set("test_date_from", &basic.test_date_from);
    map.set("test_date", &basic.test_date_from);
    map.set("test_date_to", &basic.test_date_to);

    map.set("cb_test_lab", &basic.cb_test_lab);
    map.set("cb_certificate_no", &basic.cb_certificate_no);
    map.set("cb_standard", &basic.cb_standard);

    map.set("equipment_mass", &basic.equipment_mass);
    map.set("eut_mass_kg", &basic.equipment_mass);
    map.set("protection_rating", &basic.protection_rating);
    map.set("protective_device_rated_current", &basic.protection_rating);
    map.set("national_differences_summary", &basic.national_differences_summary);
    map.set("model_differences_block", &basic.model_differences);
    map.set("cb_report_note", &basic.cb_report_note);
    map.set("temperature_requirements_text", &basic.temperature_requirements_text);

    map.set("test_type", &basic.test_type);
    map.set("overall_result", &basic.overall_result);
    map.set("sample_conforms", &basic.sample_conforms);
    map.set("sample_not_conforms", &basic.sample_not_conforms);
    map.set("not_applicable_items", &basic.not_applicable_items);
    map.set("special_installation", &basic.special_installation);

    let tr = &record.translations;
    map.set("applicant_zh", &tr.applicant_zh);
    map.set("applicant_name", &tr.applicant_zh);
    map.set("applicant_address_zh", &tr.applicant_address_zh);
    map.set("applicant_address", &tr.applicant_address_zh);
    map.set("manufacturer_zh", &tr.manufacturer_zh);
    map.set("manufacturer_address_zh", &tr.manufacturer_address_zh);
    map.set("product_name_zh", &tr.product_name_zh);
    map.set("factory_name_zh", &tr.factory_name_zh);
    map.set("factory_address_zh", &tr.factory_address_zh);
    map.set("factory_name_1", &tr.factory_name_1);
    map.set("factory_address_1", &tr.factory_address_1);
    map.set("factory_name_2", &tr.factory_name_2);
    map.set("factory_address_2", &tr.factory_address_2);
    let factory_list = record
        .factories
        .iter()
        .map(|f| f.summary())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    map.set("factory_list", &factory_list);

    let tip = &record.particulars;
    map.set("product_group", &tip.product_group);
    map.set("ovc", &tip.ovc);
    map.set("pollution_degree", &tip.pollution_degree);
    map.set("ip_code", &tip.ip_code);
    map.set("ip_rating", &tip.ip_code);
    map.set("tma", &tip.tma);
    map.set("tma_c", &tip.tma);
    map.set("altitude_limit_m", &tip.altitude_limit_m);
    map.set("equipment_altitude", &tip.altitude_limit_m);
    if tip.altitude_limit_m.trim().is_empty() {
        map.set("altitude", "");
    } else {
        map.set("altitude", &format!("{} m 或更低", tip.altitude_limit_m.trim()));
    }
    map.set("mains_supply", &tip.mains_supply);
    map.set("rated_voltage", &tip.rated_voltage);
    map.set("rated_frequency", &tip.rated_frequency);
    map.set("rated_current", &tip.rated_current);
    map.set("protection_class", &tip.protection_class);
    map.set("insulation_type", &tip.insulation_type);
    // Mobility is shown through form controls only.
    map.set("mobility", "");
    map.set("equipment_mobility", "");
    map.set("classification_of_use", &tip.classification_of_use.join(", "));
    map.set("supply_connection", &tip.supply_connection.join(", "));
    map.set("supply_connection_type", &tip.supply_connection.join(", "));

    let all_models = record
        .series_models
        .iter()
        .map(SeriesModel::key)
        .filter(|m| !m.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    map.set("series_model", &all_models);
    map.set("model_list", &all_models);
    fill_series_slots(&mut map, &record.series_models, config.render.max_series_models);
    fill_revision_slots(&mut map, &record.revision_records, config.render.max_revisions);

    map.set("attachment_list", &record.attachments.join("; "));
    map.set("report_author", "");
    map.set("report_signer", "");

    let lab = &config.lab;
    map.set("lab_name", &lab.name);
    map.set("lab_address", &lab.address);
    map.set("lab_accreditation_no", &lab.accreditation_no);
    map.set("lab_altitude", &lab.altitude);
    for (name, default) in [
        ("test_type", &lab.default_test_type),
        ("cns_standard", &lab.default_cns_standard),
        ("cns_standard_version", &lab.default_cns_standard_version),
    ] {
        if map.value(name).is_empty() {
            map.set(name, default);
        }
    }

    map.set("extraction_timestamp", &record.meta.extraction_timestamp);
    map.set("source_filename", &record.meta.source_filename);

    apply_overrides(&mut map, overrides);

    info!(fields = map.len(), "built placeholder map");
    map
}

fn fill_series_slots(map: &mut PlaceholderMap, models: &[SeriesModel], max: usize) {
    for slot in 1..=max {
        let model = models.get(slot - 1);
        let values: [&str; 10] = match model {
            Some(m) => [
                &m.model,
                &m.vout,
                &m.iout,
                &m.pout,
                &m.vin,
                &m.iin,
                &m.case_type,
                &m.connector_type,
                &m.differences,
                &m.remarks,
            ],
            None => [""; 10],
        };
        for (suffix, value) in SERIES_SUFFIXES.iter().zip(values) {
            map.set(&format!("series_model_{slot}{suffix}"), value);
        }
    }
    if models.len() > max {
        warn!(
            models = models.len(),
            slots = max,
            "more series models than template slots"
        );
    }
}

fn fill_revision_slots(map: &mut PlaceholderMap, revisions: &[RevisionRecord], max: usize) {
    for slot in 1..=max {
        let (item, date, report_no, desc) = match revisions.get(slot - 1) {
            Some(r) => (
                r.item.as_str(),
                r.date.as_str(),
                r.report_no.as_str(),
                r.description.as_str(),
            ),
            None => ("", "", "", ""),
        };
        map.set(&format!("rev{slot}_item"), item);
        map.set(&format!("rev{slot}_date"), date);
        map.set(&format!("rev{slot}_report_no"), report_no);
        map.set(&format!("rev{slot}_desc"), desc);
    }
}

fn apply_overrides(map: &mut PlaceholderMap, overrides: &Overrides) {
    for (key, value) in overrides {
        if value.trim().is_empty() {
            continue;
        }
        match OVERRIDE_FANOUT.iter().find(|(allowed, _)| *allowed == key.as_str()) {
            Some((_, targets)) => {
                for target in *targets {
                    map.set(target, value);
                }
                debug!(key = %key, "applied operator override");
            }
            None => warn!(key = %key, "ignoring override outside the allow-list"),
        }
    }
}

/// Largest `<number> W` value across the rated output lines.
pub fn max_watts(lines: &[String]) -> Option<f64> {
    lines
        .iter()
        .flat_map(|line| WATTS.captures_iter(line))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .fold(None, |max: Option<f64>, value| {
            Some(max.map_or(value, |m| m.max(value)))
        })
}

/// Visible checkbox labels and whether each should be ticked.
pub fn checkbox_labels(record: &CanonicalRecord) -> IndexMap<String, bool> {
    let f = &record.flags;
    [
        ("AV", f.is_av),
        ("ICT", f.is_ict),
        ("Audio/Video & ICT", f.is_av_ict),
        ("AV & ICT", f.is_av_ict),
        ("Telecom", f.is_telecom),
        ("Ordinary", f.is_ordinary),
        ("Skilled", f.is_skilled),
        ("Instructed", f.is_instructed),
        ("Class I", f.is_class_i),
        ("Class II", f.is_class_ii),
        ("Class III", f.is_class_iii),
        ("Portable", f.is_portable),
        ("Stationary", f.is_stationary),
        ("Fixed", f.is_fixed),
        ("Pluggable Type A", f.is_pluggable_a),
        ("Pluggable Type B", f.is_pluggable_b),
        ("Permanently Connected", f.is_permanently_connected),
    ]
    .into_iter()
    .map(|(label, on)| (label.to_string(), on))
    .collect()
}
