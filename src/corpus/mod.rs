//! Corpus records and their on-disk forms.
//!
//! - [`records`]: generation and evaluation records and their identity key.
//! - [`cache`]: the fingerprinted evaluated-corpus cache.
//! - [`merge`]: first-wins merging of generation logs.

pub mod cache;
pub mod merge;
pub mod records;

pub use cache::{CacheLookup, CacheManifest, ResultCache, SourceFingerprint};
pub use merge::{merge, merge_with_report, MergeReport};
pub use records::{CsvRow, EvaluationRecord, GenerationRecord, RecordKey};
