//! File writer trait
//!
//! Defines the interface for storing recovered content.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur when writing recovered files
#[derive(Error, Debug)]
pub enum FileWriterError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("Disk full: {0}")]
    DiskFull(String),

    #[error("No free name for {0}")]
    NameExhausted(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl FileWriterError {
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        let path = path.display().to_string();
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            io::ErrorKind::NotFound => Self::DirectoryNotFound(path),
            io::ErrorKind::StorageFull => Self::DiskFull(path),
            _ => Self::Io { path, source: err },
        }
    }

    /// Path the failure refers to
    pub fn path(&self) -> &str {
        match self {
            Self::PermissionDenied(path)
            | Self::DirectoryNotFound(path)
            | Self::DiskFull(path)
            | Self::NameExhausted(path)
            | Self::Io { path, .. } => path,
        }
    }
}

/// A freshly created output file
pub struct OutputFile {
    /// Name relative to the output directory
    pub file_name: String,
    pub path: PathBuf,
    pub sink: Box<dyn Write + Send>,
}

/// Trait for storing recovered files
///
/// Implementations never overwrite: a name that is taken gets a
/// numeric suffix instead.
///
/// # Example
///
/// ```ignore
/// let mut writer = LocalFileWriter::new("/output/recovered")?;
/// let mut out = writer.create("f2048.jpg")?;
/// out.sink.write_all(&content)?;
/// ```
pub trait RecoveredFileWriter: Send {
    /// Returns the output directory
    fn output_dir(&self) -> &Path;

    /// Creates a new file named after `preferred`
    fn create(&mut self, preferred: &str) -> Result<OutputFile, FileWriterError>;

    /// Removes a file whose content could not be completed
    fn discard(&mut self, file_name: &str) -> Result<(), FileWriterError>;
}
