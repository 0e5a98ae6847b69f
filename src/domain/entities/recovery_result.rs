//! Recovery result entity
//!
//! Everything a finished (or cancelled) job reports: written files,
//! skipped candidates with a reason, and the non-fatal issues met on
//! the way. Output file names are stored relative to the output
//! directory so two runs over the same input compare equal.

use serde::Serialize;
use std::collections::BTreeSet;

use super::{Confidence, FileRecord, JobState, RecoveryMode};

/// A file written to the output directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveredEntry {
    /// File name inside the output directory
    pub file_name: String,
    pub original_path: Option<String>,
    pub extension: String,
    pub size: u64,
    pub start_sector: Option<u64>,
    pub confidence: Confidence,
    pub low_confidence: bool,
    pub deleted: bool,
    /// Unreadable sectors replaced with zeros
    pub bad_sectors: u64,
    /// Hex SHA-256 of the written content
    pub sha256: String,
}

impl RecoveredEntry {
    /// True when some content could not be read
    pub fn is_partial(&self) -> bool {
        self.bad_sectors > 0
    }
}

/// Why a candidate was not written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Writing it would exceed the cumulative byte budget
    SizeLimit,
    /// Overlaps a record that was kept
    Duplicate,
    /// Zero-length content
    Empty,
    /// The job was cancelled before it was written
    Cancelled,
    /// The output file could not be written
    WriteFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub name: String,
    pub extension: String,
    pub size: u64,
    pub start_sector: Option<u64>,
    pub confidence: Confidence,
    pub reason: SkipReason,
}

impl SkippedEntry {
    pub fn from_record(record: &FileRecord, reason: SkipReason) -> Self {
        Self {
            name: record.display_name(),
            extension: record.extension.clone(),
            size: record.size,
            start_sector: record.first_sector(),
            confidence: record.confidence,
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Io,
    Timeout,
    MetadataCorrupt,
    WriteFailure,
}

/// A non-fatal problem met during the job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryIssue {
    pub kind: IssueKind,
    pub sector: Option<u64>,
    pub subject: Option<String>,
    pub message: String,
}

impl RecoveryIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            sector: None,
            subject: None,
            message: message.into(),
        }
    }

    pub fn at_sector(mut self, sector: u64) -> Self {
        self.sector = Some(sector);
        self
    }

    pub fn about(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Result of a recovery job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryResult {
    pub state: JobState,
    pub mode: RecoveryMode,
    pub device: String,
    /// At least one volume exposed usable metadata
    pub metadata_available: bool,
    /// Sectors covered by the signature scan
    pub sectors_scanned: u64,
    pub recovered: Vec<RecoveredEntry>,
    pub skipped: Vec<SkippedEntry>,
    pub issues: Vec<RecoveryIssue>,
    /// Sectors that could not be read anywhere in the job
    pub bad_sectors: BTreeSet<u64>,
    /// Candidates dropped by the extension filter
    pub records_filtered: u64,
    pub bytes_written: u64,
}

impl RecoveryResult {
    pub fn new(mode: RecoveryMode, device: impl Into<String>) -> Self {
        Self {
            state: JobState::Created,
            mode,
            device: device.into(),
            metadata_available: false,
            sectors_scanned: 0,
            recovered: Vec::new(),
            skipped: Vec::new(),
            issues: Vec::new(),
            bad_sectors: BTreeSet::new(),
            records_filtered: 0,
            bytes_written: 0,
        }
    }

    pub fn add_recovered(&mut self, entry: RecoveredEntry) {
        self.bytes_written += entry.size;
        self.recovered.push(entry);
    }

    pub fn add_skipped(&mut self, record: &FileRecord, reason: SkipReason) {
        self.skipped.push(SkippedEntry::from_record(record, reason));
    }

    pub fn add_issue(&mut self, issue: RecoveryIssue) {
        self.issues.push(issue);
    }

    pub fn files_recovered(&self) -> usize {
        self.recovered.len()
    }

    pub fn files_skipped(&self) -> usize {
        self.skipped.len()
    }

    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.iter().filter(|s| s.reason == reason).count()
    }

    /// Returns success rate (0.0 - 1.0) over files that reached the writer
    pub fn success_rate(&self) -> f64 {
        let failed = self.skipped_for(SkipReason::WriteFailed);
        let total = self.recovered.len() + failed;
        if total == 0 {
            return 1.0;
        }
        self.recovered.len() as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_track_entries() {
        let mut result = RecoveryResult::new(RecoveryMode::Combined, "mem");
        let record = FileRecord::from_signature(8, "jpg", 100, 512, false);
        result.add_skipped(&record, SkipReason::SizeLimit);
        result.add_skipped(&record, SkipReason::WriteFailed);
        result.add_recovered(RecoveredEntry {
            file_name: "f8.jpg".into(),
            original_path: None,
            extension: "jpg".into(),
            size: 100,
            start_sector: Some(8),
            confidence: Confidence::SignatureGuessed,
            low_confidence: false,
            deleted: true,
            bad_sectors: 0,
            sha256: String::new(),
        });

        assert_eq!(result.files_skipped(), 2);
        assert_eq!(result.skipped_for(SkipReason::SizeLimit), 1);
        assert_eq!(result.bytes_written, 100);
        assert_eq!(result.success_rate(), 0.5);
    }
}
