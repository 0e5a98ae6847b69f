//! Volume entity
//!
//! A contiguous sector range of the device holding one file system,
//! found through a partition table or assumed for a whole device.

use serde::Serialize;
use std::fmt;

use super::Extent;

/// Supported file system types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSystemType {
    /// Windows NTFS filesystem
    Ntfs,
    Fat12,
    Fat16,
    Fat32,
    /// Recognized but not interpreted
    ExFat,
    /// Linux ext2/3/4, recognized but deleted entries are not interpreted
    Ext,
    /// Raw/unknown content (signature scanning only)
    Raw,
}

impl FileSystemType {
    pub fn name(&self) -> &'static str {
        match self {
            FileSystemType::Ntfs => "NTFS",
            FileSystemType::Fat12 => "FAT12",
            FileSystemType::Fat16 => "FAT16",
            FileSystemType::Fat32 => "FAT32",
            FileSystemType::ExFat => "exFAT",
            FileSystemType::Ext => "ext2/3/4",
            FileSystemType::Raw => "Raw",
        }
    }

    /// Returns whether deleted file metadata can be interpreted
    pub fn supports_deleted_entries(&self) -> bool {
        matches!(
            self,
            FileSystemType::Ntfs
                | FileSystemType::Fat12
                | FileSystemType::Fat16
                | FileSystemType::Fat32
        )
    }
}

impl fmt::Display for FileSystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a volume's boundaries came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionScheme {
    Mbr,
    Gpt,
    /// No usable partition table; the whole device is one volume
    Whole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Volume {
    pub index: usize,
    pub start_sector: u64,
    pub sector_count: u64,
    pub scheme: PartitionScheme,
    /// MBR type byte (`0x07`) or GPT type GUID
    pub partition_type: String,
    pub name: Option<String>,
    pub file_system: FileSystemType,
}

impl Volume {
    pub fn new(index: usize, start_sector: u64, sector_count: u64, scheme: PartitionScheme) -> Self {
        Self {
            index,
            start_sector,
            sector_count,
            scheme,
            partition_type: String::new(),
            name: None,
            file_system: FileSystemType::Raw,
        }
    }

    pub fn end_sector(&self) -> u64 {
        self.start_sector + self.sector_count
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.start_sector, self.sector_count)
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} sectors {}..{} ({})",
            self.index,
            self.file_system,
            self.start_sector,
            self.end_sector(),
            self.partition_type
        )
    }
}
