//! Volume interpreter trait
//!
//! Defines the interface for reading file system metadata to locate
//! deleted files. This is separate from signature scanning.

use thiserror::Error;

use super::BlockDeviceError;
use crate::domain::entities::{FileRecord, FileSystemType, Volume};

/// Errors that can occur when interpreting a file system
#[derive(Error, Debug)]
pub enum FileSystemError {
    #[error("Unsupported file system: {0}")]
    Unsupported(String),

    #[error("Invalid boot sector: {0}")]
    InvalidBootSector(String),

    #[error("Corrupted metadata at byte {offset}: {message}")]
    Corrupt { offset: u64, message: String },

    #[error("Read error: {0}")]
    Read(#[from] BlockDeviceError),
}

impl FileSystemError {
    pub fn corrupt(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupt {
            offset,
            message: message.into(),
        }
    }
}

/// Options shared by every interpreter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterpreterOptions {
    /// Also yield files that are not deleted
    pub include_live: bool,
}

pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<FileRecord, FileSystemError>> + 'a>;

/// Reads one volume's metadata
///
/// Enumeration is lazy: nothing is read until the iterator is pulled,
/// and a caller that stops pulling stops the reads. A corrupt entry is
/// reported as an `Err` item and enumeration continues past it.
///
/// # Example
///
/// ```ignore
/// let interpreter = NtfsInterpreter::open(device, &volume, options)?;
/// for record in interpreter.enumerate_files() {
///     println!("{:?}", record?.original_path);
/// }
/// ```
pub trait VolumeInterpreter: Send + Sync {
    /// Returns the filesystem type this interpreter handles
    fn file_system(&self) -> FileSystemType;

    fn volume(&self) -> &Volume;

    /// Yields deleted (and optionally live) file records
    fn enumerate_files(&self) -> RecordIter<'_>;
}
