//! Recovery orchestrator
//!
//! Runs one recovery job against an open device: metadata enumeration
//! per volume, the parallel signature scan, candidate selection, and the
//! serial writer. Non-fatal problems become issues on the result; the
//! job itself only fails for invalid input or an unusable output
//! directory, ending in `Failed`.

use crossbeam_channel::unbounded;
use std::sync::Arc;
use std::thread;

use super::report::summarize;
use super::scan_pipeline::{PipelineOptions, ScanPipeline};
use super::writer_task::{WriteEvent, WriterTask};
use crate::config::EngineConfig;
use crate::domain::entities::{
    Extent, FileRecord, IssueKind, JobState, JobStateMachine, RecoveryIssue, RecoveryJob,
    RecoveryMode, RecoveryProgress, RecoveryResult, ScanPhase, SkipReason, Volume,
};
use crate::domain::errors::RecoveryError;
use crate::domain::repositories::{BlockDevice, InterpreterOptions, RecoveredFileWriter};
use crate::domain::services::{CancellationToken, SignatureRegistry, select_candidates};
use crate::infrastructure::carving::SignatureScanner;
use crate::infrastructure::file_systems::open_interpreter;
use crate::infrastructure::partition::enumerate_volumes;
use crate::infrastructure::persistence::{LocalFileWriter, MANIFEST_FILE_NAME, ManifestWriter};

/// Receives progress snapshots while a job runs
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: &RecoveryProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(&RecoveryProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &RecoveryProgress) {
        self(progress)
    }
}

/// Discards progress
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _progress: &RecoveryProgress) {}
}

/// Tracks the state machine and the published progress together
struct JobTracker<'p> {
    machine: JobStateMachine,
    progress: RecoveryProgress,
    sink: &'p dyn ProgressSink,
}

impl<'p> JobTracker<'p> {
    fn new(total_sectors: u64, sink: &'p dyn ProgressSink) -> Self {
        Self {
            machine: JobStateMachine::new(),
            progress: RecoveryProgress::new(total_sectors),
            sink,
        }
    }

    fn advance(&mut self, state: JobState) -> Result<(), RecoveryError> {
        self.machine.advance(state)?;
        self.progress.state = state;
        self.publish();
        Ok(())
    }

    fn phase(&mut self, phase: ScanPhase, volume: Option<usize>) {
        self.progress.phase = phase;
        self.progress.volume = volume;
        self.publish();
    }

    fn publish(&self) {
        self.sink.on_progress(&self.progress);
    }
}

pub struct RecoveryOrchestrator {
    device: Arc<dyn BlockDevice>,
    volumes: Vec<Volume>,
    config: EngineConfig,
    registry: SignatureRegistry,
    cancel: CancellationToken,
}

impl RecoveryOrchestrator {
    /// Orchestrator over `device`; volumes are enumerated immediately
    pub fn new(device: Arc<dyn BlockDevice>, config: EngineConfig) -> Self {
        let volumes = enumerate_volumes(device.as_ref());
        Self::with_volumes(device, volumes, config)
    }

    /// Orchestrator over already enumerated volumes
    pub fn with_volumes(device: Arc<dyn BlockDevice>, volumes: Vec<Volume>, config: EngineConfig) -> Self {
        Self {
            device,
            volumes,
            config,
            registry: SignatureRegistry::default_formats(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_registry(mut self, registry: SignatureRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs `job`, writing into a local directory.
    ///
    /// An output directory that cannot be created fails the job.
    pub fn run_job(&self, job: &RecoveryJob, progress: &dyn ProgressSink) -> Result<RecoveryResult, RecoveryError> {
        let (mut tracker, result) = self.start(job, progress)?;
        let mut writer = match LocalFileWriter::new(&job.output_dir) {
            Ok(writer) => writer,
            Err(e) => {
                tracing::error!("Cannot use output directory {}: {}", job.output_dir.display(), e);
                tracker.advance(JobState::Failed)?;
                return Err(RecoveryError::InvalidJob(format!(
                    "cannot use output directory: {e}"
                )));
            }
        };
        self.finish(job, &mut writer, tracker, result)
    }

    /// Runs `job`, writing through `writer`
    pub fn run_job_with_writer(
        &self,
        job: &RecoveryJob,
        writer: &mut dyn RecoveredFileWriter,
        progress: &dyn ProgressSink,
    ) -> Result<RecoveryResult, RecoveryError> {
        let (tracker, result) = self.start(job, progress)?;
        self.finish(job, writer, tracker, result)
    }

    fn start<'p>(
        &self,
        job: &RecoveryJob,
        progress: &'p dyn ProgressSink,
    ) -> Result<(JobTracker<'p>, RecoveryResult), RecoveryError> {
        let info = self.device.info();
        let mut tracker = JobTracker::new(info.total_sectors, progress);
        tracker.advance(JobState::Initializing)?;
        if let Err(e) = job.validate() {
            tracker.advance(JobState::Failed)?;
            return Err(e);
        }
        Ok((tracker, RecoveryResult::new(job.mode, info.path.clone())))
    }

    fn finish(
        &self,
        job: &RecoveryJob,
        writer: &mut dyn RecoveredFileWriter,
        mut tracker: JobTracker<'_>,
        mut result: RecoveryResult,
    ) -> Result<RecoveryResult, RecoveryError> {
        let info = self.device.info().clone();
        tracing::info!(
            "Recovery job on {} ({} mode, {} volumes)",
            info.path,
            job.mode,
            self.volumes.len()
        );
        tracker.phase(ScanPhase::Partitions, None);

        tracker.advance(JobState::Scanning)?;
        let mut metadata = Vec::new();
        let mut cancelled = false;
        if job.mode.uses_metadata() {
            cancelled = self.collect_metadata(&mut tracker, &mut result, &mut metadata);
        }

        let mut signature = Vec::new();
        let fallback = job.mode == RecoveryMode::MetadataOnly
            && !result.metadata_available
            && self.config.fallback_to_signatures;
        if fallback {
            tracing::warn!("No volume exposed usable metadata, falling back to a signature scan");
            result.add_issue(RecoveryIssue::new(
                IssueKind::MetadataCorrupt,
                "no volume exposed usable metadata; signature scan used instead",
            ));
        }
        if !cancelled && (job.mode.uses_signatures() || fallback) {
            cancelled = self.collect_signatures(job, &mut tracker, &mut result, &mut signature);
        }

        let selection = select_candidates(metadata, signature, &job.extensions, job.max_bytes);
        result.records_filtered = selection.filtered;
        for (record, reason) in &selection.skipped {
            result.add_skipped(record, *reason);
        }
        tracing::info!(
            "{} candidates selected, {} skipped, {} filtered out",
            selection.accepted.len(),
            selection.skipped.len(),
            selection.filtered
        );

        if cancelled {
            for record in &selection.accepted {
                result.add_skipped(record, SkipReason::Cancelled);
            }
            tracker.advance(JobState::Cancelling)?;
        } else {
            tracker.advance(JobState::Writing)?;
            tracker.progress.files_total = selection.accepted.len();
            tracker.phase(ScanPhase::Writing, None);
            if self.write_records(selection.accepted, writer, &mut tracker, &mut result) {
                tracker.advance(JobState::Cancelling)?;
            }
        }

        let final_state = if tracker.machine.state() == JobState::Cancelling {
            JobState::Cancelled
        } else {
            JobState::Completed
        };
        result.state = final_state;

        if self.config.write_manifest {
            if let Err(e) = ManifestWriter::write(writer, &summarize(&result)) {
                tracing::warn!("Manifest not written: {}", e);
                result.add_issue(
                    RecoveryIssue::new(IssueKind::WriteFailure, e.to_string()).about(MANIFEST_FILE_NAME),
                );
            }
        }

        tracker.progress.phase = ScanPhase::Done;
        tracker.advance(final_state)?;
        tracing::info!(
            "Job {}: {} files recovered, {} skipped, {} issues",
            final_state,
            result.files_recovered(),
            result.files_skipped(),
            result.issues.len()
        );
        Ok(result)
    }

    /// Enumerates every interpretable volume; returns true if cancelled
    fn collect_metadata(
        &self,
        tracker: &mut JobTracker<'_>,
        result: &mut RecoveryResult,
        records: &mut Vec<FileRecord>,
    ) -> bool {
        let options = InterpreterOptions {
            include_live: self.config.include_live_files,
        };
        let info = self.device.info();

        for volume in &self.volumes {
            if self.cancel.is_cancelled() {
                return true;
            }
            tracker.phase(ScanPhase::Metadata, Some(volume.index));

            let interpreter = match open_interpreter(Arc::clone(&self.device), volume, options) {
                Ok(Some(interpreter)) => interpreter,
                Ok(None) => {
                    tracing::info!("Volume {} ({}) has no interpretable metadata", volume.index, volume.file_system);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Volume {} metadata unusable: {}", volume.index, e);
                    add_error_issue(result, RecoveryError::from_file_system(volume.index, e));
                    continue;
                }
            };
            result.metadata_available = true;

            let before = records.len();
            for item in interpreter.enumerate_files() {
                if self.cancel.is_cancelled() {
                    return true;
                }
                match item {
                    Ok(record) if record.extents.iter().all(|e| info.contains(e)) => {
                        records.push(record);
                        tracker.progress.records_found += 1;
                    }
                    Ok(record) => {
                        tracing::warn!("{} points outside the device, skipped", record.display_name());
                        result.add_issue(
                            RecoveryIssue::new(IssueKind::MetadataCorrupt, "extents leave the device")
                                .about(record.display_name()),
                        );
                    }
                    Err(e) => {
                        tracing::warn!("Volume {}: {}", volume.index, e);
                        add_error_issue(result, RecoveryError::from_file_system(volume.index, e));
                    }
                }
            }
            tracing::info!("Volume {}: {} metadata records", volume.index, records.len() - before);
            tracker.publish();
        }
        false
    }

    /// Scans the whole device; returns true if cancelled
    fn collect_signatures(
        &self,
        job: &RecoveryJob,
        tracker: &mut JobTracker<'_>,
        result: &mut RecoveryResult,
        records: &mut Vec<FileRecord>,
    ) -> bool {
        tracker.phase(ScanPhase::Signatures, None);
        let scanner = SignatureScanner::new(
            self.registry.clone(),
            job.extensions.clone(),
            self.config.max_carve_bytes,
        );
        let pipeline = ScanPipeline::new(
            &scanner,
            PipelineOptions {
                chunk_sectors: self.config.chunk_sectors,
                workers: self.config.workers(),
                progress_interval_sectors: self.config.progress_interval_sectors,
            },
        );

        let metadata_found = tracker.progress.records_found;
        let whole = Extent::new(0, self.device.total_sectors());
        let outcome = pipeline.run(self.device.as_ref(), &[whole], &self.cancel, &mut |scanned, found| {
            tracker.progress.sectors_scanned = scanned;
            tracker.progress.records_found = metadata_found + found;
            tracker.publish();
        });

        tracker.progress.sectors_scanned = outcome.sectors_scanned;
        tracker.progress.records_found = metadata_found + outcome.records.len();
        result.sectors_scanned = outcome.sectors_scanned;
        for run in sector_runs(&outcome.bad_sectors) {
            result.add_issue(
                RecoveryIssue::new(IssueKind::Io, format!("{} unreadable sectors read as zeros", run.length))
                    .at_sector(run.start_sector),
            );
        }
        result.bad_sectors.extend(outcome.bad_sectors);
        for issue in outcome.issues {
            result.add_issue(issue);
        }
        records.extend(outcome.records);
        outcome.cancelled
    }

    /// Writes the selected records on the writer thread; returns true if
    /// cancellation stopped it
    fn write_records(
        &self,
        records: Vec<FileRecord>,
        writer: &mut dyn RecoveredFileWriter,
        tracker: &mut JobTracker<'_>,
        result: &mut RecoveryResult,
    ) -> bool {
        let (events_tx, events_rx) = unbounded();
        let task = WriterTask::new(self.device.as_ref(), &self.cancel);
        let mut cancelled = false;

        thread::scope(|threads| {
            let spawned = thread::Builder::new()
                .name("file-writer".to_string())
                .spawn_scoped(threads, || task.run(writer, records, events_tx));
            if let Err(e) = spawned {
                result.add_issue(RecoveryIssue::new(
                    IssueKind::WriteFailure,
                    format!("Cannot start writer thread: {e}"),
                ));
                return;
            }

            for event in events_rx.iter() {
                match event {
                    WriteEvent::Written { entry, bad_sectors } => {
                        if !bad_sectors.is_empty() {
                            tracing::warn!(
                                "{} written with {} zero-filled sectors",
                                entry.file_name,
                                bad_sectors.len()
                            );
                            result.add_issue(
                                RecoveryIssue::new(
                                    IssueKind::Io,
                                    format!("{} unreadable sectors written as zeros", bad_sectors.len()),
                                )
                                .at_sector(bad_sectors[0])
                                .about(entry.file_name.clone()),
                            );
                            result.bad_sectors.extend(bad_sectors);
                        }
                        tracker.progress.files_written += 1;
                        tracker.progress.bytes_written += entry.size;
                        result.add_recovered(entry);
                    }
                    WriteEvent::Failed { record, issue } => {
                        result.add_skipped(&record, SkipReason::WriteFailed);
                        result.add_issue(issue);
                    }
                    WriteEvent::Cancelled { remaining } => {
                        cancelled = true;
                        for record in &remaining {
                            result.add_skipped(record, SkipReason::Cancelled);
                        }
                    }
                }
                tracker.publish();
            }
        });
        cancelled
    }
}

fn add_error_issue(result: &mut RecoveryResult, err: RecoveryError) {
    let issue = match &err {
        RecoveryError::MetadataCorrupt { volume, message } => {
            RecoveryIssue::new(IssueKind::MetadataCorrupt, message.clone()).about(format!("volume {volume}"))
        }
        RecoveryError::Timeout { sector } => {
            RecoveryIssue::new(IssueKind::Timeout, err.to_string()).at_sector(*sector)
        }
        RecoveryError::Io { sector, .. } => RecoveryIssue::new(IssueKind::Io, err.to_string()).at_sector(*sector),
        _ => RecoveryIssue::new(IssueKind::Io, err.to_string()),
    };
    result.add_issue(issue);
}

/// Groups sorted sector numbers into contiguous runs
fn sector_runs(sectors: &[u64]) -> Vec<Extent> {
    let mut runs: Vec<Extent> = Vec::new();
    for &sector in sectors {
        match runs.last_mut() {
            Some(run) if run.end_sector() == sector => run.length += 1,
            Some(run) if run.contains_sector(sector) => {}
            _ => runs.push(Extent::new(sector, 1)),
        }
    }
    runs
}
