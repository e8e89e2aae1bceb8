//! Turns the text of a CB test report into a [`CanonicalRecord`] by asking a
//! language model about one chunk of pages at a time.
//!
//! [`CanonicalRecord`]: certfill_core::CanonicalRecord

mod chunks;
mod config;
mod decode;
mod pipeline;
mod prompt;
mod translate;

pub use chunks::{
    prepare_chunks, ChunkInput, ChunkTable, PageElements, RawExtraction, TextElement,
    DEFAULT_PAGES_PER_CHUNK,
};
pub use config::{
    ExtractConfig, ExtractOptions, ExtractSection, DEFAULT_CALL_TIMEOUT_SECS,
    DEFAULT_MAX_CONCURRENCY,
};
pub use decode::decode_reply;
pub use pipeline::{extract_chunks, extract_record, usage_of, Completion};
pub use prompt::{chunk_request, clause_translation_request, translation_request, SYSTEM_PROMPT};
pub use translate::translate_record;
