//! Recovery progress snapshots

use serde::Serialize;

use super::JobState;

/// Coarse phase of a running job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Idle,
    Partitions,
    Metadata,
    Signatures,
    Writing,
    Done,
}

/// Progress information published while a job runs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryProgress {
    pub state: JobState,
    pub phase: ScanPhase,
    /// Volume whose metadata is being read
    pub volume: Option<usize>,
    /// Sectors covered by the signature scan so far
    pub sectors_scanned: u64,
    /// Sectors the signature scan will cover
    pub total_sectors: u64,
    /// Candidate records found so far
    pub records_found: usize,
    /// Files written so far
    pub files_written: usize,
    /// Files selected for writing
    pub files_total: usize,
    pub bytes_written: u64,
}

impl Default for RecoveryProgress {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RecoveryProgress {
    pub fn new(total_sectors: u64) -> Self {
        Self {
            state: JobState::Created,
            phase: ScanPhase::Idle,
            volume: None,
            sectors_scanned: 0,
            total_sectors,
            records_found: 0,
            files_written: 0,
            files_total: 0,
            bytes_written: 0,
        }
    }

    /// Percentage of the current phase (0.0 - 100.0)
    pub fn percentage(&self) -> f64 {
        match self.phase {
            ScanPhase::Writing => ratio(self.files_written as u64, self.files_total as u64),
            ScanPhase::Done => 100.0,
            _ => ratio(self.sectors_scanned, self.total_sectors),
        }
    }
}

fn ratio(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 100.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_follows_phase() {
        let mut progress = RecoveryProgress::new(200);
        progress.phase = ScanPhase::Signatures;
        progress.sectors_scanned = 50;
        assert_eq!(progress.percentage(), 25.0);

        progress.phase = ScanPhase::Writing;
        progress.files_total = 4;
        progress.files_written = 1;
        assert_eq!(progress.percentage(), 25.0);
    }
}
