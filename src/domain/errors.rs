//! Job-level error taxonomy
//!
//! Errors returned by the engine and the orchestrator. Only the fatal
//! kinds end a job; the per-sector and per-file kinds are also recorded
//! as issues on the result while the job carries on.

use thiserror::Error;

use super::entities::JobState;
use super::repositories::{BlockDeviceError, FileSystemError, FileWriterError};

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("I/O error at sector {sector}: {message}")]
    Io { sector: u64, message: String },

    #[error("Sectors {start}..{end} are outside a device of {total} sectors")]
    OutOfRange { start: u64, end: u64, total: u64 },

    #[error("Read timed out at sector {sector}")]
    Timeout { sector: u64 },

    #[error("Corrupted metadata on volume {volume}: {message}")]
    MetadataCorrupt { volume: usize, message: String },

    #[error("Failed to write {path}: {message}")]
    WriteFailure { path: String, message: String },

    #[error("Invalid recovery job: {0}")]
    InvalidJob(String),

    #[error("A recovery job is already running on this engine")]
    EngineBusy,

    #[error("No device is open")]
    NotInitialized,

    #[error("Illegal job transition {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("Worker failure: {0}")]
    Worker(String),
}

impl RecoveryError {
    /// Errors that end a job instead of being recorded on it
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RecoveryError::AccessDenied(_)
                | RecoveryError::DeviceNotFound(_)
                | RecoveryError::InvalidJob(_)
                | RecoveryError::EngineBusy
                | RecoveryError::NotInitialized
                | RecoveryError::InvalidTransition { .. }
                | RecoveryError::Worker(_)
        )
    }
}

impl From<BlockDeviceError> for RecoveryError {
    fn from(err: BlockDeviceError) -> Self {
        match err {
            BlockDeviceError::PermissionDenied(path) => RecoveryError::AccessDenied(path),
            BlockDeviceError::DeviceNotFound(path) => RecoveryError::DeviceNotFound(path),
            BlockDeviceError::Timeout(sector) => RecoveryError::Timeout { sector },
            BlockDeviceError::OutOfRange {
                start,
                count,
                total,
            } => RecoveryError::OutOfRange {
                start,
                end: start.saturating_add(count),
                total,
            },
            other => RecoveryError::Io {
                sector: other.failed_sector().unwrap_or_default(),
                message: other.to_string(),
            },
        }
    }
}

impl From<FileWriterError> for RecoveryError {
    fn from(err: FileWriterError) -> Self {
        RecoveryError::WriteFailure {
            path: err.path().to_string(),
            message: err.to_string(),
        }
    }
}

impl RecoveryError {
    pub fn from_file_system(volume: usize, err: FileSystemError) -> Self {
        match err {
            FileSystemError::Read(inner) => inner.into(),
            other => RecoveryError::MetadataCorrupt {
                volume,
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_errors_map_to_job_errors() {
        let err: RecoveryError = BlockDeviceError::PermissionDenied("/dev/sda".into()).into();
        assert!(matches!(err, RecoveryError::AccessDenied(_)));
        assert!(err.is_fatal());

        let err: RecoveryError = BlockDeviceError::Timeout(77).into();
        assert!(matches!(err, RecoveryError::Timeout { sector: 77 }));
        assert!(!err.is_fatal());

        let err: RecoveryError = BlockDeviceError::OutOfRange {
            start: 10,
            count: 5,
            total: 12,
        }
        .into();
        assert!(matches!(
            err,
            RecoveryError::OutOfRange {
                start: 10,
                end: 15,
                total: 12
            }
        ));
    }
}
