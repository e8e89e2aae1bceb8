use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Declares a record section whose scalars are strings.
///
/// Besides the struct this generates `absorb`, which applies the field-level
/// merge rules (later non-empty scalar wins, a later non-empty replacing list
/// wins, union lists are unioned case-insensitively), and `is_empty`.
macro_rules! record_section {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            scalars: [$($scalar:ident),* $(,)?],
            replace_lists: [$($rlist:ident),* $(,)?],
            union_lists: [$($ulist:ident),* $(,)?] $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $name {
            $(
                #[serde(deserialize_with = "crate::partial::lenient_string")]
                pub $scalar: String,
            )*
            $(
                #[serde(deserialize_with = "crate::partial::lenient_string_list")]
                pub $rlist: Vec<String>,
            )*
            $(
                #[serde(deserialize_with = "crate::partial::lenient_string_list")]
                pub $ulist: Vec<String>,
            )*
        }

        impl $name {
            /// Fold a later partial section into this one.
            pub fn absorb(&mut self, later: Self) {
                $( overlay_scalar(&mut self.$scalar, later.$scalar); )*
                $(
                    if !later.$rlist.is_empty() {
                        self.$rlist = later.$rlist;
                    }
                )*
                $( union_case_insensitive(&mut self.$ulist, later.$ulist); )*
            }

            pub fn is_empty(&self) -> bool {
                true $( && self.$scalar.is_empty() )*
                    $( && self.$rlist.is_empty() )*
                    $( && self.$ulist.is_empty() )*
            }
        }
    };
}

/// Later non-empty overwrites; empty never overwrites.
pub fn overlay_scalar(current: &mut String, later: String) {
    if !later.is_empty() {
        *current = later;
    }
}

/// Set union that keeps the first spelling and first-appearance order.
pub fn union_case_insensitive(current: &mut Vec<String>, later: Vec<String>) {
    for item in later {
        if item.is_empty() {
            continue;
        }
        let folded = item.to_lowercase();
        if !current.iter().any(|existing| existing.to_lowercase() == folded) {
            current.push(item);
        }
    }
}

record_section! {
    /// Report identity, parties, product identity, ratings and dates.
    pub struct BasicInfo {
        scalars: [
            cb_report_no,
            ast_report_no,
            cns_report_no,
            bsmi_designated_report_no,
            standard,
            standard_version,
            cns_standard,
            cns_standard_version,
            national_differences,
            test_lab,
            test_lab_country,
            cb_scheme_member,
            applicant_en,
            applicant_address_en,
            manufacturer_en,
            manufacturer_address_en,
            factory_name_en,
            factory_address_en,
            product_name_en,
            model_main,
            brand,
            trademark,
            ratings_input,
            ratings_output,
            ratings_power,
            max_output_v,
            max_output_a,
            max_output_w,
            issue_date,
            issue_date_short,
            receive_date,
            test_date_from,
            test_date_to,
            cb_test_lab,
            cb_certificate_no,
            cb_standard,
            equipment_mass,
            protection_rating,
            test_type,
            overall_result,
            sample_conforms,
            sample_not_conforms,
            not_applicable_items,
            special_installation,
            national_differences_summary,
            model_differences,
            cb_report_note,
            temperature_requirements_text,
        ],
        replace_lists: [rated_output_lines],
        union_lists: [],
    }
}

record_section! {
    /// Test item particulars from the report's front matter.
    pub struct TestItemParticulars {
        scalars: [
            product_group,
            ovc,
            pollution_degree,
            ip_code,
            tma,
            altitude_limit_m,
            installation_type,
            operating_conditions,
            mains_supply,
            rated_voltage,
            rated_frequency,
            rated_current,
            protection_class,
            insulation_type,
            mobility,
            additional_info,
        ],
        replace_lists: [],
        union_lists: [classification_of_use, supply_connection],
    }
}

record_section! {
    pub struct SeriesModel {
        scalars: [
            model,
            vout,
            iout,
            pout,
            vin,
            iin,
            case_type,
            connector_type,
            differences,
            remarks,
        ],
        replace_lists: [],
        union_lists: [],
    }
}

record_section! {
    pub struct RevisionRecord {
        scalars: [item, date, report_no, description],
        replace_lists: [],
        union_lists: [],
    }
}

record_section! {
    pub struct ClauseVerdict {
        scalars: [clause, clause_title, verdict, comment_en, comment_zh, test_method, reference],
        replace_lists: [],
        union_lists: [],
    }
}

record_section! {
    pub struct Factory {
        scalars: [name, address],
        replace_lists: [],
        union_lists: [],
    }
}

record_section! {
    pub struct InputTestRow {
        scalars: [test_condition, voltage, current, power, frequency, power_factor, remarks],
        replace_lists: [],
        union_lists: [],
    }
}

record_section! {
    pub struct TemperatureRiseRow {
        scalars: [
            location,
            component,
            measured_temp,
            ambient_temp,
            temp_rise,
            limit,
            verdict,
            remarks,
        ],
        replace_lists: [],
        union_lists: [],
    }
}

record_section! {
    pub struct EnergySourceRow {
        scalars: [
            energy_source,
            class_level,
            voltage,
            current,
            power,
            location,
            safeguard,
            remarks,
        ],
        replace_lists: [],
        union_lists: [],
    }
}

record_section! {
    /// Top-level extraction metadata.
    pub struct RecordMeta {
        scalars: [source_filename, extraction_timestamp, extraction_notes],
        replace_lists: [],
        union_lists: [],
    }
}

impl SeriesModel {
    pub fn key(&self) -> &str {
        self.model.trim()
    }
}

impl ClauseVerdict {
    pub fn key(&self) -> &str {
        self.clause.trim()
    }
}

impl Factory {
    pub fn key(&self) -> (&str, &str) {
        (self.name.trim(), self.address.trim())
    }

    /// `name / address`, skipping empty parts.
    pub fn summary(&self) -> String {
        [self.name.trim(), self.address.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

/// A table carried verbatim from the source document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawTable {
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// First row as header, remainder as data.
    pub fn split_header(&self) -> (Vec<String>, Vec<Vec<String>>) {
        match self.rows.split_first() {
            Some((header, data)) => (header.clone(), data.to_vec()),
            None => (Vec::new(), Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyTables {
    #[serde(deserialize_with = "crate::partial::lenient_items")]
    pub input_tests: Vec<InputTestRow>,
    #[serde(deserialize_with = "crate::partial::lenient_items")]
    pub temperature_rise: Vec<TemperatureRiseRow>,
    #[serde(deserialize_with = "crate::partial::lenient_items")]
    pub energy_sources: Vec<EnergySourceRow>,
    #[serde(
        deserialize_with = "crate::partial::lenient_table",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_test_raw: Option<RawTable>,
    #[serde(
        deserialize_with = "crate::partial::lenient_table",
        skip_serializing_if = "Option::is_none"
    )]
    pub abnormal_fault_raw: Option<RawTable>,
}

impl KeyTables {
    pub fn absorb(&mut self, later: KeyTables) {
        self.input_tests.extend(later.input_tests);
        self.temperature_rise.extend(later.temperature_rise);
        self.energy_sources.extend(later.energy_sources);
        if later.input_test_raw.is_some() {
            self.input_test_raw = later.input_test_raw;
        }
        if later.abnormal_fault_raw.is_some() {
            self.abnormal_fault_raw = later.abnormal_fault_raw;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Translations {
    #[serde(deserialize_with = "crate::partial::lenient_string")]
    pub applicant_zh: String,
    #[serde(deserialize_with = "crate::partial::lenient_string")]
    pub applicant_address_zh: String,
    #[serde(deserialize_with = "crate::partial::lenient_string")]
    pub manufacturer_zh: String,
    #[serde(deserialize_with = "crate::partial::lenient_string")]
    pub manufacturer_address_zh: String,
    #[serde(deserialize_with = "crate::partial::lenient_string")]
    pub product_name_zh: String,
    #[serde(deserialize_with = "crate::partial::lenient_string")]
    pub factory_name_zh: String,
    #[serde(deserialize_with = "crate::partial::lenient_string")]
    pub factory_address_zh: String,
    #[serde(deserialize_with = "crate::partial::lenient_string")]
    pub factory_name_1: String,
    #[serde(deserialize_with = "crate::partial::lenient_string")]
    pub factory_address_1: String,
    #[serde(deserialize_with = "crate::partial::lenient_string")]
    pub factory_name_2: String,
    #[serde(deserialize_with = "crate::partial::lenient_string")]
    pub factory_address_2: String,
    #[serde(
        rename = "additional_translations",
        alias = "additional",
        deserialize_with = "crate::partial::lenient_string_map"
    )]
    pub additional: BTreeMap<String, String>,
}

impl Translations {
    fn scalars_mut(&mut self) -> [&mut String; 11] {
        [
            &mut self.applicant_zh,
            &mut self.applicant_address_zh,
            &mut self.manufacturer_zh,
            &mut self.manufacturer_address_zh,
            &mut self.product_name_zh,
            &mut self.factory_name_zh,
            &mut self.factory_address_zh,
            &mut self.factory_name_1,
            &mut self.factory_address_1,
            &mut self.factory_name_2,
            &mut self.factory_address_2,
        ]
    }

    pub fn absorb(&mut self, mut later: Translations) {
        let additional = std::mem::take(&mut later.additional);
        for (slot, value) in self.scalars_mut().into_iter().zip(later.scalars_mut()) {
            overlay_scalar(slot, std::mem::take(value));
        }
        for (key, value) in additional {
            overlay_scalar(self.additional.entry(key).or_default(), value);
        }
    }

    /// True when any translated identity field is still empty.
    pub fn has_gaps(&self) -> bool {
        [
            &self.applicant_zh,
            &self.applicant_address_zh,
            &self.manufacturer_zh,
            &self.manufacturer_address_zh,
            &self.product_name_zh,
        ]
        .iter()
        .any(|value| value.is_empty())
    }
}

macro_rules! flag_set {
    ($($flag:ident),* $(,)?) => {
        /// Named booleans driving checkbox state. Merging only ever turns a
        /// flag on.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct FlagSet {
            $(
                #[serde(deserialize_with = "crate::partial::lenient_bool")]
                pub $flag: bool,
            )*
        }

        impl FlagSet {
            pub fn absorb(&mut self, later: FlagSet) {
                $( self.$flag |= later.$flag; )*
            }

            /// Every flag with its wire name.
            pub fn iter(&self) -> impl Iterator<Item = (&'static str, bool)> {
                [$((stringify!($flag), self.$flag)),*].into_iter()
            }
        }
    };
}

flag_set! {
    is_av,
    is_ict,
    is_av_ict,
    is_telecom,
    is_ordinary,
    is_skilled,
    is_instructed,
    is_class_i,
    is_class_ii,
    is_class_iii,
    is_direct_plugin,
    is_stationary,
    is_building_in,
    is_wall_ceiling,
    is_rack_mounted,
    is_portable,
    is_fixed,
    is_pluggable_a,
    is_pluggable_b,
    is_permanently_connected,
}

static CLASS_I: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bclass\s*(?:i|1)\b").unwrap());
static CLASS_II: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bclass\s*(?:ii|2)\b").unwrap());
static CLASS_III: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bclass\s*(?:iii|3)\b").unwrap());

impl FlagSet {
    /// Turn on flags implied by the particulars text. Never clears a flag.
    pub fn infer_from(&mut self, particulars: &TestItemParticulars) {
        let group = particulars.product_group.to_uppercase();
        if group.contains("AV") && group.contains("ICT") {
            self.is_av_ict = true;
        } else if group.contains("AV") {
            self.is_av = true;
        } else if group.contains("ICT") {
            self.is_ict = true;
        } else if group.contains("TELECOM") {
            self.is_telecom = true;
        }

        for class in &particulars.classification_of_use {
            let class = class.to_uppercase();
            self.is_ordinary |= class.contains("ORDINARY");
            self.is_skilled |= class.contains("SKILLED");
            self.is_instructed |= class.contains("INSTRUCTED");
        }

        for connection in &particulars.supply_connection {
            self.is_class_i |= CLASS_I.is_match(connection);
            self.is_class_ii |= CLASS_II.is_match(connection);
            self.is_class_iii |= CLASS_III.is_match(connection);
            let upper = connection.to_uppercase();
            self.is_pluggable_a |= upper.contains("TYPE A");
            self.is_pluggable_b |= upper.contains("TYPE B");
            self.is_permanently_connected |= upper.contains("PERMANENT");
        }

        let mobility = particulars.mobility.to_uppercase();
        self.is_portable |= mobility.contains("PORTABLE");
        self.is_stationary |= mobility.contains("STATIONARY");
        self.is_fixed |= mobility.contains("FIXED");
        self.is_direct_plugin |= mobility.contains("DIRECT PLUG");
        self.is_building_in |= mobility.contains("BUILDING-IN") || mobility.contains("BUILT-IN");
        self.is_rack_mounted |= mobility.contains("RACK");
        self.is_wall_ceiling |= mobility.contains("WALL") || mobility.contains("CEILING");
    }
}

/// The single source of truth for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalRecord {
    #[serde(rename = "basic_info", deserialize_with = "crate::partial::lenient_section")]
    pub basic: BasicInfo,
    #[serde(
        rename = "test_item_particulars",
        deserialize_with = "crate::partial::lenient_section"
    )]
    pub particulars: TestItemParticulars,
    #[serde(deserialize_with = "crate::partial::lenient_items")]
    pub series_models: Vec<SeriesModel>,
    #[serde(deserialize_with = "crate::partial::lenient_items")]
    pub revision_records: Vec<RevisionRecord>,
    #[serde(deserialize_with = "crate::partial::lenient_items")]
    pub clause_verdicts: Vec<ClauseVerdict>,
    #[serde(deserialize_with = "crate::partial::lenient_items")]
    pub factories: Vec<Factory>,
    #[serde(deserialize_with = "crate::partial::lenient_section")]
    pub key_tables: KeyTables,
    #[serde(deserialize_with = "crate::partial::lenient_section")]
    pub translations: Translations,
    #[serde(rename = "checkbox_flags", deserialize_with = "crate::partial::lenient_section")]
    pub flags: FlagSet,
    #[serde(deserialize_with = "crate::partial::lenient_string_list")]
    pub attachments: Vec<String>,
    #[serde(flatten)]
    pub meta: RecordMeta,
}

impl CanonicalRecord {
    /// Names of every model the record knows about, main model first.
    pub fn model_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let main = self.basic.model_main.trim();
        if !main.is_empty() {
            names.push(main.to_string());
        }
        for model in &self.series_models {
            let key = model.key();
            if !key.is_empty() && !names.iter().any(|n| n == key) {
                names.push(key.to_string());
            }
        }
        names
    }

    /// Report number shown in headers and footers.
    pub fn header_report_no(&self) -> &str {
        if self.basic.ast_report_no.is_empty() {
            &self.basic.cb_report_no
        } else {
            &self.basic.ast_report_no
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_keeps_first_spelling() {
        let mut current = vec!["Ordinary".to_string()];
        union_case_insensitive(
            &mut current,
            vec!["ORDINARY".to_string(), "Skilled".to_string(), "".to_string()],
        );
        assert_eq!(current, vec!["Ordinary", "Skilled"]);
    }

    #[test]
    fn section_absorb_applies_scalar_and_list_rules() {
        let mut basic = BasicInfo {
            model_main: "X".into(),
            rated_output_lines: vec!["12V 5A".into()],
            ..Default::default()
        };
        basic.absorb(BasicInfo {
            brand: "B".into(),
            ..Default::default()
        });
        assert_eq!(basic.model_main, "X");
        assert_eq!(basic.brand, "B");
        assert_eq!(basic.rated_output_lines, vec!["12V 5A"]);

        basic.absorb(BasicInfo {
            model_main: "Y".into(),
            rated_output_lines: vec!["5V 3A".into(), "15V 3A".into()],
            ..Default::default()
        });
        assert_eq!(basic.model_main, "Y");
        assert_eq!(basic.rated_output_lines.len(), 2);
    }

    #[test]
    fn inference_distinguishes_supply_classes() {
        let particulars = TestItemParticulars {
            product_group: "ICT".into(),
            supply_connection: vec!["Class II".into()],
            mobility: "Direct plug-in".into(),
            ..Default::default()
        };
        let mut flags = FlagSet::default();
        flags.infer_from(&particulars);
        assert!(flags.is_ict);
        assert!(!flags.is_av_ict);
        assert!(flags.is_class_ii);
        assert!(!flags.is_class_i);
        assert!(!flags.is_class_iii);
        assert!(flags.is_direct_plugin);
    }

    #[test]
    fn inference_never_clears() {
        let mut flags = FlagSet {
            is_telecom: true,
            ..Default::default()
        };
        flags.infer_from(&TestItemParticulars::default());
        assert!(flags.is_telecom);
    }

    #[test]
    fn translations_absorb_additional_per_key() {
        let mut current = Translations::default();
        current.additional.insert("a".into(), "one".into());
        let mut later = Translations {
            product_name_zh: "電源供應器".into(),
            ..Default::default()
        };
        later.additional.insert("a".into(), String::new());
        later.additional.insert("b".into(), "two".into());
        current.absorb(later);
        assert_eq!(current.product_name_zh, "電源供應器");
        assert_eq!(current.additional["a"], "one");
        assert_eq!(current.additional["b"], "two");
    }

    #[test]
    fn header_number_prefers_lab_number() {
        let mut record = CanonicalRecord::default();
        record.basic.cb_report_no = "CB-1".into();
        assert_eq!(record.header_report_no(), "CB-1");
        record.basic.ast_report_no = "AST-B-1".into();
        assert_eq!(record.header_report_no(), "AST-B-1");
    }
}
