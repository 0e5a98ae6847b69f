//! Progress reporting for CLI

use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::domain::entities::{RecoveryProgress, ScanPhase};

const SECTOR_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} sectors ({eta})";
const FILE_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} files ({eta})";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// Progress reporter using indicatif
///
/// Follows the phases of a job: sectors while scanning, files while
/// writing.
#[derive(Clone)]
pub struct ProgressReporter {
    bar: Arc<ProgressBar>,
    phase: Arc<Mutex<ScanPhase>>,
}

impl ProgressReporter {
    pub fn new(total_sectors: u64) -> Self {
        let bar = ProgressBar::new(total_sectors);
        bar.set_style(style(SECTOR_TEMPLATE));
        bar.set_message("Opening device...");
        Self {
            bar: Arc::new(bar),
            phase: Arc::new(Mutex::new(ScanPhase::Idle)),
        }
    }

    /// Updates the bar from a progress snapshot
    pub fn update(&self, progress: &RecoveryProgress) {
        let mut phase = self.phase.lock();
        if *phase != progress.phase {
            *phase = progress.phase;
            if progress.phase == ScanPhase::Writing {
                self.bar.set_style(style(FILE_TEMPLATE));
            }
        }

        match progress.phase {
            ScanPhase::Writing => {
                self.bar.set_length(progress.files_total as u64);
                self.bar.set_position(progress.files_written as u64);
                self.bar.set_message(format!(
                    "Writing files ({} so far)",
                    humansize::format_size(progress.bytes_written, humansize::BINARY)
                ));
            }
            ScanPhase::Metadata => {
                let volume = progress.volume.map(|v| format!(" of volume {v}")).unwrap_or_default();
                self.bar.set_message(format!(
                    "Reading file system metadata{volume} | {} candidates",
                    progress.records_found
                ));
            }
            ScanPhase::Signatures => {
                self.bar.set_length(progress.total_sectors);
                self.bar.set_position(progress.sectors_scanned);
                self.bar.set_message(format!(
                    "Scanning for file signatures | {} candidates",
                    progress.records_found
                ));
            }
            ScanPhase::Partitions => self.bar.set_message("Reading partition table..."),
            ScanPhase::Idle | ScanPhase::Done => {}
        }
    }

    /// Finishes with a message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Stops the bar where it is
    pub fn abandon(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }
}
