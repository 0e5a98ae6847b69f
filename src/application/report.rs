//! Result reporting
//!
//! Turns a finished job into a manifest: totals, per-extension and
//! per-confidence counts and the full file, skip and issue lists. The
//! manifest renders as JSON or as a short human-readable summary.

use humansize::{BINARY, format_size};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::domain::entities::{
    Confidence, JobState, RecoveredEntry, RecoveryIssue, RecoveryMode, RecoveryResult,
    SkippedEntry,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestTotals {
    pub files_recovered: usize,
    pub files_skipped: usize,
    pub files_partial: usize,
    pub records_filtered: u64,
    pub bytes_written: u64,
    pub sectors_scanned: u64,
    pub bad_sectors: usize,
    pub issues: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub tool: &'static str,
    pub version: &'static str,
    pub device: String,
    pub mode: RecoveryMode,
    pub state: JobState,
    pub metadata_available: bool,
    pub totals: ManifestTotals,
    pub by_extension: BTreeMap<String, usize>,
    pub by_confidence: BTreeMap<Confidence, usize>,
    pub files: Vec<RecoveredEntry>,
    pub skipped: Vec<SkippedEntry>,
    pub issues: Vec<RecoveryIssue>,
}

/// Builds the manifest of a result
pub fn summarize(result: &RecoveryResult) -> Manifest {
    let mut by_extension = BTreeMap::new();
    let mut by_confidence = BTreeMap::new();
    for entry in &result.recovered {
        let extension = if entry.extension.is_empty() {
            "(none)".to_string()
        } else {
            entry.extension.clone()
        };
        *by_extension.entry(extension).or_insert(0) += 1;
        *by_confidence.entry(entry.confidence).or_insert(0) += 1;
    }

    Manifest {
        tool: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        device: result.device.clone(),
        mode: result.mode,
        state: result.state,
        metadata_available: result.metadata_available,
        totals: ManifestTotals {
            files_recovered: result.files_recovered(),
            files_skipped: result.files_skipped(),
            files_partial: result.recovered.iter().filter(|e| e.is_partial()).count(),
            records_filtered: result.records_filtered,
            bytes_written: result.bytes_written,
            sectors_scanned: result.sectors_scanned,
            bad_sectors: result.bad_sectors.len(),
            issues: result.issues.len(),
        },
        by_extension,
        by_confidence,
        files: result.recovered.clone(),
        skipped: result.skipped.clone(),
        issues: result.issues.clone(),
    }
}

impl Manifest {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Short summary for terminals and logs
    pub fn to_text(&self) -> String {
        let totals = &self.totals;
        let mut text = String::new();
        let _ = writeln!(text, "Device:           {}", self.device);
        let _ = writeln!(text, "Mode:             {}", self.mode);
        let _ = writeln!(text, "State:            {}", self.state);
        let _ = writeln!(
            text,
            "Metadata:         {}",
            if self.metadata_available { "available" } else { "not available" }
        );
        let _ = writeln!(
            text,
            "Recovered:        {} files ({})",
            totals.files_recovered,
            format_size(totals.bytes_written, BINARY)
        );
        if totals.files_partial > 0 {
            let _ = writeln!(text, "Partial:          {} files", totals.files_partial);
        }
        let _ = writeln!(text, "Skipped:          {}", totals.files_skipped);
        let _ = writeln!(text, "Filtered out:     {}", totals.records_filtered);
        let _ = writeln!(text, "Bad sectors:      {}", totals.bad_sectors);
        let _ = writeln!(text, "Issues:           {}", totals.issues);

        if !self.by_extension.is_empty() {
            let _ = writeln!(text, "By type:");
            for (extension, count) in &self.by_extension {
                let _ = writeln!(text, "  {extension:<10} {count}");
            }
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{FileRecord, SkipReason};

    fn entry(name: &str, extension: &str, size: u64, confidence: Confidence) -> RecoveredEntry {
        RecoveredEntry {
            file_name: name.into(),
            original_path: None,
            extension: extension.into(),
            size,
            start_sector: Some(0),
            confidence,
            low_confidence: false,
            deleted: true,
            bad_sectors: 0,
            sha256: String::new(),
        }
    }

    fn sample() -> RecoveryResult {
        let mut result = RecoveryResult::new(RecoveryMode::Combined, "disk.img");
        result.state = JobState::Completed;
        result.add_recovered(entry("a.jpg", "jpg", 2048, Confidence::MetadataConfirmed));
        result.add_recovered(entry("f9.jpg", "jpg", 1024, Confidence::SignatureGuessed));
        result.add_recovered(entry("notes", "", 10, Confidence::MetadataConfirmed));
        let record = FileRecord::from_signature(100, "png", 4096, 512, false);
        result.add_skipped(&record, SkipReason::SizeLimit);
        result
    }

    #[test]
    fn test_counts_per_extension_and_confidence() {
        let manifest = summarize(&sample());
        assert_eq!(manifest.totals.files_recovered, 3);
        assert_eq!(manifest.totals.files_skipped, 1);
        assert_eq!(manifest.totals.bytes_written, 3082);
        assert_eq!(manifest.by_extension["jpg"], 2);
        assert_eq!(manifest.by_extension["(none)"], 1);
        assert_eq!(manifest.by_confidence[&Confidence::MetadataConfirmed], 2);
    }

    #[test]
    fn test_summary_is_pure() {
        let result = sample();
        assert_eq!(summarize(&result), summarize(&result));
    }

    #[test]
    fn test_renderings() {
        let manifest = summarize(&sample());
        let json: serde_json::Value = serde_json::from_str(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(json["state"], "completed");
        assert_eq!(json["files"].as_array().unwrap().len(), 3);
        assert_eq!(json["skipped"][0]["reason"], "size_limit");

        let text = manifest.to_text();
        assert!(text.contains("Recovered:        3 files (3.01 KiB)"));
        assert!(text.contains("  jpg        2"));
    }
}
