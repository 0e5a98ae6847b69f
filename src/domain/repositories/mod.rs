//! Repository traits (interfaces)
//!
//! These traits define the contracts for devices, file system
//! interpreters and output storage.

mod block_device;
mod file_system;
mod file_writer;

pub use crate::domain::entities::FileSystemType;
pub use block_device::{BlockDevice, BlockDeviceError, SectorData};
pub use file_system::{FileSystemError, InterpreterOptions, RecordIter, VolumeInterpreter};
pub use file_writer::{FileWriterError, OutputFile, RecoveredFileWriter};
