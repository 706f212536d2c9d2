//! Merging generation logs with first-wins deduplication.
//!
//! Inputs are scanned in order; the first line seen for each identity key is
//! copied verbatim to the output and later duplicates are dropped. Missing
//! inputs and malformed lines are logged and skipped. Only failing to write
//! the output is an error.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::corpus::RecordKey;
use crate::error::StorageError;

/// Counters from a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Lines written to the output.
    pub unique: usize,
    /// Lines dropped because their key was already seen.
    pub duplicates: usize,
    /// Lines that could not be parsed.
    pub malformed: usize,
    /// Inputs that did not exist or could not be read.
    pub missing_inputs: Vec<PathBuf>,
}

/// Merges `inputs` into `output`, returning the number of unique records.
pub fn merge<P: AsRef<Path>>(output: &Path, inputs: &[P]) -> Result<usize, StorageError> {
    Ok(merge_with_report(output, inputs)?.unique)
}

/// Merges `inputs` into `output` and reports what was kept and dropped.
///
/// All inputs are read before the output is created, so `output` may also
/// appear among the inputs.
pub fn merge_with_report<P: AsRef<Path>>(
    output: &Path,
    inputs: &[P],
) -> Result<MergeReport, StorageError> {
    let mut report = MergeReport::default();
    let mut seen: HashSet<RecordKey> = HashSet::new();
    let mut kept: Vec<String> = Vec::new();

    for input in inputs {
        let input = input.as_ref();
        let bytes = match fs::read(input) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %input.display(), error = %e, "Merge input unavailable, skipping");
                report.missing_inputs.push(input.to_path_buf());
                continue;
            }
        };

        let content = String::from_utf8_lossy(&bytes);
        let before = kept.len();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match RecordKey::from_json_line(line) {
                Ok(key) => {
                    if seen.insert(key) {
                        kept.push(line.to_string());
                    } else {
                        report.duplicates += 1;
                    }
                }
                Err(e) => {
                    report.malformed += 1;
                    warn!(path = %input.display(), line = idx + 1, error = %e, "Skipping malformed line");
                }
            }
        }
        debug!(path = %input.display(), new_records = kept.len() - before, "Merged input");
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }
    let file = File::create(output).map_err(|e| StorageError::io(output, e))?;
    let mut writer = BufWriter::new(file);
    for line in &kept {
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.write_all(b"\n"))
            .map_err(|e| StorageError::io(output, e))?;
    }
    writer.flush().map_err(|e| StorageError::io(output, e))?;

    report.unique = kept.len();
    info!(
        output = %output.display(),
        inputs = inputs.len(),
        unique = report.unique,
        duplicates = report.duplicates,
        malformed = report.malformed,
        missing = report.missing_inputs.len(),
        "Merge complete"
    );
    Ok(report)
}
