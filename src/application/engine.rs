//! Recovery engine facade
//!
//! The entry point for hosts. An engine owns at most one open device
//! and runs at most one job at a time. Jobs run on tokio's blocking
//! pool; progress can be polled through a watch channel or observed
//! through the injected logger.

use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use super::logging::{EngineLogger, LogLevel, TracingLogger};
use super::orchestrator::{ProgressSink, RecoveryOrchestrator};
use crate::config::EngineConfig;
use crate::domain::entities::{
    DeviceId, DeviceInfo, ExtensionSet, JobState, RecoveryJob, RecoveryMode, RecoveryProgress,
    RecoveryResult, ScanPhase, Volume,
};
use crate::domain::errors::RecoveryError;
use crate::domain::repositories::BlockDevice;
use crate::domain::services::CancellationToken;
use crate::infrastructure::block_device::{
    FileBlockDevice, MmapBlockDevice, TimeoutBlockDevice, resolve_device_path,
};
use crate::infrastructure::partition::enumerate_volumes;

/// An open device and what was learned about it
struct Session {
    device: Arc<dyn BlockDevice>,
    volumes: Vec<Volume>,
}

/// Clears the busy flag when a job ends, however it ends
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A job ready to run
struct PreparedJob {
    orchestrator: RecoveryOrchestrator,
    job: RecoveryJob,
    sink: EngineProgress,
    _busy: BusyGuard,
}

impl PreparedJob {
    fn run(self) -> Result<RecoveryResult, RecoveryError> {
        let outcome = self.orchestrator.run_job(&self.job, &self.sink);
        match &outcome {
            Ok(result) => self.sink.logger.log(
                LogLevel::Info,
                &format!(
                    "Job {}: {} files recovered, {} skipped, {} issues",
                    result.state,
                    result.files_recovered(),
                    result.files_skipped(),
                    result.issues.len()
                ),
            ),
            Err(e) => self.sink.logger.log(LogLevel::Error, &format!("Job failed: {e}")),
        }
        outcome
    }
}

/// Publishes progress to the watch channel and reports state and phase
/// changes to the logger
struct EngineProgress {
    progress: Arc<watch::Sender<RecoveryProgress>>,
    logger: Arc<dyn EngineLogger>,
    last: Mutex<(JobState, ScanPhase, Option<usize>)>,
}

impl ProgressSink for EngineProgress {
    fn on_progress(&self, progress: &RecoveryProgress) {
        self.progress.send_replace(progress.clone());

        let current = (progress.state, progress.phase, progress.volume);
        let mut last = self.last.lock();
        if *last == current {
            return;
        }
        *last = current;
        let message = match (progress.phase, progress.volume) {
            (ScanPhase::Metadata, Some(volume)) => format!("{}: reading metadata of volume {volume}", progress.state),
            (phase, _) => format!("{}: {:?}", progress.state, phase),
        };
        self.logger.log(LogLevel::Info, &message);
    }
}

pub struct RecoveryEngine {
    logger: Arc<dyn EngineLogger>,
    config: EngineConfig,
    session: Mutex<Option<Session>>,
    busy: Arc<AtomicBool>,
    cancel: Mutex<CancellationToken>,
    progress: Arc<watch::Sender<RecoveryProgress>>,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(TracingLogger)
    }
}

impl RecoveryEngine {
    pub fn new(logger: impl EngineLogger + 'static) -> Self {
        Self::with_config(logger, EngineConfig::default())
    }

    pub fn with_config(logger: impl EngineLogger + 'static, config: EngineConfig) -> Self {
        let (progress, _) = watch::channel(RecoveryProgress::default());
        Self {
            logger: Arc::new(logger),
            config,
            session: Mutex::new(None),
            busy: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
            progress: Arc::new(progress),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens physical drive `drive_index`; failures are logged
    pub fn initialize(&self, drive_index: u32) -> bool {
        match self.open(&DeviceId::Index(drive_index)) {
            Ok(_) => true,
            Err(e) => {
                self.logger.log(LogLevel::Error, &format!("Cannot open drive #{drive_index}: {e}"));
                false
            }
        }
    }

    /// Opens a device read-only, replacing any device already open
    pub fn open(&self, id: &DeviceId) -> Result<DeviceInfo, RecoveryError> {
        let path = resolve_device_path(id)?;
        let device = self.open_path(&path)?;
        self.attach(device)
    }

    /// Adopts an already open device (an in-memory image, for example)
    pub fn attach(&self, device: Arc<dyn BlockDevice>) -> Result<DeviceInfo, RecoveryError> {
        if self.is_busy() {
            return Err(RecoveryError::EngineBusy);
        }
        let info = device.info().clone();
        let volumes = enumerate_volumes(device.as_ref());
        self.logger.log(
            LogLevel::Info,
            &format!(
                "Opened {} ({} sectors of {} bytes, {} volumes)",
                info.path,
                info.total_sectors,
                info.sector_size,
                volumes.len()
            ),
        );
        *self.session.lock() = Some(Session { device, volumes });
        Ok(info)
    }

    fn open_path(&self, path: &Path) -> Result<Arc<dyn BlockDevice>, RecoveryError> {
        let is_image = std::fs::metadata(path).is_ok_and(|m| m.is_file());
        if is_image && self.config.use_mmap_for_images {
            return Ok(Arc::new(MmapBlockDevice::open(path)?));
        }
        let device: Arc<dyn BlockDevice> = Arc::new(FileBlockDevice::open(path)?);
        match self.config.read_timeout() {
            Some(timeout) if !is_image => Ok(Arc::new(TimeoutBlockDevice::new(device, timeout)?)),
            _ => Ok(device),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.session.lock().as_ref().map(|s| s.device.info().clone())
    }

    pub fn volumes(&self) -> Result<Vec<Volume>, RecoveryError> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.volumes.clone())
            .ok_or(RecoveryError::NotInitialized)
    }

    /// Latest progress of the running (or last) job
    pub fn progress(&self) -> watch::Receiver<RecoveryProgress> {
        self.progress.subscribe()
    }

    /// Asks the running job to stop; a no-op when idle
    pub fn cancel(&self) {
        if self.is_busy() {
            self.logger.log(LogLevel::Warn, "Cancellation requested");
        }
        self.cancel.lock().cancel();
    }

    /// Starts a job on the blocking pool.
    ///
    /// The engine is marked busy before this returns, so a second call
    /// made before the first future completes fails with `EngineBusy`.
    pub fn recover_files(
        &self,
        mode: RecoveryMode,
        extensions: ExtensionSet,
        max_bytes: u64,
        output: impl Into<PathBuf>,
    ) -> impl Future<Output = Result<RecoveryResult, RecoveryError>> + Send + 'static {
        let prepared = self.prepare(mode, extensions, max_bytes, output.into());
        async move {
            let prepared = prepared?;
            tokio::task::spawn_blocking(move || prepared.run())
                .await
                .map_err(|e| RecoveryError::Worker(e.to_string()))?
        }
    }

    /// Runs a job on the calling thread
    pub fn recover_files_blocking(
        &self,
        mode: RecoveryMode,
        extensions: ExtensionSet,
        max_bytes: u64,
        output: impl Into<PathBuf>,
    ) -> Result<RecoveryResult, RecoveryError> {
        self.prepare(mode, extensions, max_bytes, output.into())?.run()
    }

    fn prepare(
        &self,
        mode: RecoveryMode,
        extensions: ExtensionSet,
        max_bytes: u64,
        output: PathBuf,
    ) -> Result<PreparedJob, RecoveryError> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(RecoveryError::NotInitialized)?;
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RecoveryError::EngineBusy);
        }
        let busy = BusyGuard(Arc::clone(&self.busy));

        let info = session.device.info();
        let job = RecoveryJob::new(DeviceId::Path(PathBuf::from(&info.path)), mode, output)
            .with_extensions(extensions)
            .with_max_bytes(max_bytes);
        job.validate()?;

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        self.progress.send_replace(RecoveryProgress::new(info.total_sectors));

        let orchestrator = RecoveryOrchestrator::with_volumes(
            Arc::clone(&session.device),
            session.volumes.clone(),
            self.config.clone(),
        )
        .with_cancellation(token);

        self.logger.log(
            LogLevel::Info,
            &format!("Starting {} recovery into {}", mode, job.output_dir.display()),
        );
        Ok(PreparedJob {
            orchestrator,
            job,
            sink: EngineProgress {
                progress: Arc::clone(&self.progress),
                logger: Arc::clone(&self.logger),
                last: Mutex::new((JobState::Created, ScanPhase::Idle, None)),
            },
            _busy: busy,
        })
    }

    /// Releases the device, cancelling a running job first
    pub fn close(&self) {
        if self.is_busy() {
            self.cancel();
        }
        if self.session.lock().take().is_some() {
            self.logger.log(LogLevel::Info, "Device closed");
        }
    }
}

impl Drop for RecoveryEngine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::logging::NullLogger;
    use crate::infrastructure::block_device::MemoryBlockDevice;
    use tempfile::TempDir;

    #[test]
    fn test_jobs_need_a_device() {
        let engine = RecoveryEngine::new(NullLogger);
        let err = engine
            .recover_files_blocking(RecoveryMode::Combined, ExtensionSet::all(), u64::MAX, "/tmp/out")
            .unwrap_err();
        assert!(matches!(err, RecoveryError::NotInitialized));
        assert!(matches!(engine.volumes(), Err(RecoveryError::NotInitialized)));
    }

    #[test]
    fn test_blank_device_completes_empty() {
        let dir = TempDir::new().unwrap();
        let engine = RecoveryEngine::with_config(NullLogger, EngineConfig::default().with_worker_threads(2));
        engine
            .attach(Arc::new(MemoryBlockDevice::new(vec![0u8; 64 * 512], 512)))
            .unwrap();
        assert_eq!(engine.volumes().unwrap().len(), 1);

        let result = engine
            .recover_files_blocking(RecoveryMode::Combined, ExtensionSet::all(), u64::MAX, dir.path())
            .unwrap();
        assert_eq!(result.state, JobState::Completed);
        assert_eq!(result.files_recovered(), 0);
        assert!(!engine.is_busy());
        assert_eq!(engine.progress().borrow().state, JobState::Completed);
    }

    #[test]
    fn test_close_releases_device() {
        let engine = RecoveryEngine::new(NullLogger);
        engine
            .attach(Arc::new(MemoryBlockDevice::new(vec![0u8; 4096], 512)))
            .unwrap();
        assert!(engine.is_initialized());
        engine.close();
        assert!(!engine.is_initialized());
        assert!(engine.device_info().is_none());
    }
}
