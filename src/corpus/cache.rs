//! Evaluated-corpus cache.
//!
//! Evaluation is the expensive stage, so its output is cached next to the
//! analysis tables as `evaluated_results.csv`. A JSON manifest records the
//! fingerprint of the generation log the cache was built from; the cache is
//! only reused while that fingerprint still matches.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::corpus::{CsvRow, EvaluationRecord};
use crate::error::StorageError;

/// Evaluated corpus file name.
pub const CACHE_FILE: &str = "evaluated_results.csv";

/// Manifest file name.
pub const MANIFEST_FILE: &str = "evaluated_results.manifest.json";

/// Columns a cache must carry to be usable.
const REQUIRED_COLUMNS: [&str; 2] = ["passed", "code_length"];

/// Identity of a generation log's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    /// Hex SHA-256 of the log bytes.
    pub sha256: String,
    /// Records parsed from the log.
    pub records: usize,
}

impl SourceFingerprint {
    pub fn from_bytes(bytes: &[u8], records: usize) -> Self {
        Self {
            sha256: hex::encode(Sha256::digest(bytes)),
            records,
        }
    }
}

/// Sidecar describing a cached corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub source_sha256: String,
    pub source_records: usize,
    pub created_at: DateTime<Utc>,
    /// Every record carries a similarity score.
    pub has_codebleu: bool,
}

impl CacheManifest {
    fn matches(&self, source: &SourceFingerprint) -> bool {
        self.source_sha256 == source.sha256 && self.source_records == source.records
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// The cache is valid for the current source.
    Hit(Vec<EvaluationRecord>),
    /// No cache exists.
    Miss(String),
    /// A cache exists but cannot be used.
    Stale(String),
}

impl CacheLookup {
    /// Short label for logs and reports.
    pub fn status(&self) -> &'static str {
        match self {
            CacheLookup::Hit(_) => "hit",
            CacheLookup::Miss(_) => "miss",
            CacheLookup::Stale(_) => "stale",
        }
    }
}

/// Cache rooted in an analysis output directory.
#[derive(Debug, Clone)]
pub struct ResultCache {
    csv_path: PathBuf,
    manifest_path: PathBuf,
}

impl ResultCache {
    pub fn for_output_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            csv_path: dir.join(CACHE_FILE),
            manifest_path: dir.join(MANIFEST_FILE),
        }
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Reads the manifest, if present and well-formed.
    pub fn manifest(&self) -> Option<CacheManifest> {
        let bytes = fs::read(&self.manifest_path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(path = %self.manifest_path.display(), error = %e, "Unreadable cache manifest");
                None
            }
        }
    }

    /// Looks up cached records for `source`.
    pub fn load(&self, source: &SourceFingerprint) -> CacheLookup {
        if !self.csv_path.exists() {
            return CacheLookup::Miss("no cached results".to_string());
        }

        let Some(manifest) = self.manifest() else {
            return CacheLookup::Stale("cache manifest missing or unreadable".to_string());
        };
        if !manifest.matches(source) {
            return CacheLookup::Stale(format!(
                "source log changed ({} records, cached from {})",
                source.records, manifest.source_records
            ));
        }

        let records = match self.read_records() {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.csv_path.display(), error = %e, "Malformed cache, ignoring");
                return CacheLookup::Stale(e.to_string());
            }
        };
        if records.len() != manifest.source_records {
            return CacheLookup::Stale(format!(
                "cache holds {} records, manifest expects {}",
                records.len(),
                manifest.source_records
            ));
        }

        debug!(path = %self.csv_path.display(), records = records.len(), "Cache hit");
        CacheLookup::Hit(records)
    }

    fn read_records(&self) -> Result<Vec<EvaluationRecord>, StorageError> {
        let file = File::open(&self.csv_path).map_err(|e| StorageError::io(&self.csv_path, e))?;
        let mut reader = csv::Reader::from_reader(file);

        let headers = reader.headers()?.clone();
        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(StorageError::SchemaMismatch {
                    path: self.csv_path.clone(),
                    column: column.to_string(),
                });
            }
        }

        let mut records = Vec::new();
        for row in reader.deserialize() {
            records.push(row?);
        }
        Ok(records)
    }

    /// Writes `records` and then the manifest for `source`.
    pub fn store(
        &self,
        records: &[EvaluationRecord],
        source: &SourceFingerprint,
    ) -> Result<(), StorageError> {
        if let Some(parent) = self.csv_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        // A stale manifest must not vouch for a half-written CSV.
        if self.manifest_path.exists() {
            fs::remove_file(&self.manifest_path)
                .map_err(|e| StorageError::io(&self.manifest_path, e))?;
        }

        let mut writer = csv::Writer::from_path(&self.csv_path)?;
        if records.is_empty() {
            writer.write_record(EvaluationRecord::COLUMNS)?;
        }
        for record in records {
            writer.serialize(record)?;
        }
        writer
            .flush()
            .map_err(|e| StorageError::io(&self.csv_path, e))?;

        let manifest = CacheManifest {
            source_sha256: source.sha256.clone(),
            source_records: source.records,
            created_at: Utc::now(),
            has_codebleu: records.iter().all(|r| r.codebleu.is_some()),
        };
        let json = serde_json::to_vec_pretty(&manifest)?;
        fs::write(&self.manifest_path, json)
            .map_err(|e| StorageError::io(&self.manifest_path, e))?;

        info!(
            path = %self.csv_path.display(),
            records = records.len(),
            has_codebleu = manifest.has_codebleu,
            "Evaluated corpus cached"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::Condition;
    use tempfile::TempDir;

    fn record(task: &str, iteration: u32, codebleu: Option<f64>) -> EvaluationRecord {
        EvaluationRecord {
            task_id: task.to_string(),
            condition: Condition::Speed,
            iteration,
            prompt: "def f():\n    \"\"\"doc, with comma\"\"\"\n".to_string(),
            completion: "    return 1\n".to_string(),
            model: "m".to_string(),
            canonical_solution: "    return 1\n".to_string(),
            entry_point: "f".to_string(),
            passed: iteration % 2 == 0,
            execution_detail: "failed: AssertionError".to_string(),
            code_length: 13,
            codebleu,
        }
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = SourceFingerprint::from_bytes(b"line\n", 1);
        let b = SourceFingerprint::from_bytes(b"line\nline\n", 2);
        assert_ne!(a, b);
        assert_eq!(a.sha256.len(), 64);
        assert_eq!(a, SourceFingerprint::from_bytes(b"line\n", 1));
    }

    #[test]
    fn test_missing_cache_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::for_output_dir(dir.path());
        let lookup = cache.load(&SourceFingerprint::from_bytes(b"x", 1));
        assert_eq!(lookup.status(), "miss");
    }

    #[test]
    fn test_store_then_hit() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::for_output_dir(dir.path().join("results"));
        let source = SourceFingerprint::from_bytes(b"log", 2);
        let records = vec![record("T/0", 0, Some(0.5)), record("T/0", 1, None)];

        cache.store(&records, &source).unwrap();
        assert!(!cache.manifest().unwrap().has_codebleu);

        match cache.load(&source) {
            CacheLookup::Hit(loaded) => assert_eq!(loaded, records),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn test_changed_source_is_stale() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::for_output_dir(dir.path());
        cache
            .store(&[record("T/0", 0, None)], &SourceFingerprint::from_bytes(b"v1", 1))
            .unwrap();

        let lookup = cache.load(&SourceFingerprint::from_bytes(b"v1 plus more", 2));
        assert_eq!(lookup.status(), "stale");
    }

    #[test]
    fn test_missing_manifest_is_stale() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::for_output_dir(dir.path());
        let source = SourceFingerprint::from_bytes(b"v1", 1);
        cache.store(&[record("T/0", 0, None)], &source).unwrap();
        fs::remove_file(cache.manifest_path()).unwrap();

        assert_eq!(cache.load(&source).status(), "stale");
    }

    #[test]
    fn test_missing_required_column_is_stale() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::for_output_dir(dir.path());
        let source = SourceFingerprint::from_bytes(b"v1", 1);
        cache.store(&[record("T/0", 0, None)], &source).unwrap();
        fs::write(cache.csv_path(), "task_id,condition\nT/0,speed\n").unwrap();

        assert_eq!(cache.load(&source).status(), "stale");
    }

    #[test]
    fn test_empty_corpus_keeps_header_and_hits() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::for_output_dir(dir.path());
        let source = SourceFingerprint::from_bytes(b"", 0);

        cache.store(&[], &source).unwrap();
        let content = fs::read_to_string(cache.csv_path()).unwrap();
        assert_eq!(content.trim_end(), EvaluationRecord::COLUMNS.join(","));

        match cache.load(&source) {
            CacheLookup::Hit(loaded) => assert!(loaded.is_empty()),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn test_columns_match_serialized_header() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::for_output_dir(dir.path());
        cache
            .store(&[record("T/0", 0, Some(0.5))], &SourceFingerprint::from_bytes(b"x", 1))
            .unwrap();
        let content = fs::read_to_string(cache.csv_path()).unwrap();
        assert_eq!(content.lines().next(), Some(EvaluationRecord::COLUMNS.join(",").as_str()));
    }
}
