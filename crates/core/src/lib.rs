mod blocks;
mod config;
pub mod docx;
mod error;
mod formcheck;
mod merge;
mod partial;
mod placeholders;
mod record;
mod render;
mod substitute;
mod validate;

pub use blocks::{
    fill_labelled_cell, render_block, render_record_blocks, render_text_block,
    replace_everywhere, Anchor, ABNORMAL_FAULT_BLOCK, ALL_BLOCKS, ATTACHMENT_BLOCK,
    FACTORY_TABLE_BLOCK, INPUT_TEST_BLOCK, MAX_OUTPUT_BLOCK, TEMPERATURE_BLOCK,
};
pub use config::{
    AllowSource, FillConfig, IdentifierRule, LabConfig, LegacyRewrite, RenderConfig,
    ValidationConfig, DEFAULT_CONFIG,
};
pub use error::{FillError, Result, ValidationReport};
pub use formcheck::{patch as patch_form_controls, FormLabels};
pub use merge::{merge, Chunk, ChunkOutcome, MergeOutcome, MergeStats, TokenUsage};
pub use partial::decode_partial;
pub use placeholders::{
    build as build_placeholders, checkbox_labels, max_watts, Overrides, PlaceholderMap,
};
pub use record::{
    overlay_scalar, union_case_insensitive, BasicInfo, CanonicalRecord, ClauseVerdict,
    EnergySourceRow, Factory, FlagSet, InputTestRow, KeyTables, RawTable, RecordMeta,
    RevisionRecord, SeriesModel, TemperatureRiseRow, TestItemParticulars, Translations,
};
pub use render::{
    check_template, list_placeholders, render, RenderStats, RenderedReport, TemplateCheck,
    TemplateStore,
};
pub use substitute::{
    fill_placeholders, replace_all, substitute, substitute_from, tick_glyph_checkboxes,
    TextRun, CHECKED, UNCHECKED,
};
pub use validate::{check as check_rendered, validate, ValidationExpectations, ValidationFailure};
