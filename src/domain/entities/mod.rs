//! Domain entities
//!
//! Core business objects of the recovery domain: devices, volumes,
//! file records, jobs and their results.

mod device;
mod extent;
mod file_record;
mod file_signature;
mod job;
mod progress;
mod recovery_result;
mod volume;

pub use device::{DeviceId, DeviceInfo};
pub use extent::{Extent, extents_overlap};
pub use file_record::{Confidence, FileRecord, RecordOrigin, normalize_extension};
pub use file_signature::{FileFormat, FileSignature, SignatureMatch};
pub use job::{ExtensionSet, JobState, JobStateMachine, RecoveryJob, RecoveryMode};
pub use progress::{RecoveryProgress, ScanPhase};
pub use recovery_result::{
    IssueKind, RecoveredEntry, RecoveryIssue, RecoveryResult, SkipReason, SkippedEntry,
};
pub use volume::{FileSystemType, PartitionScheme, Volume};
