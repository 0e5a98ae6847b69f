//! File system interpreters
//!
//! Detection of the file system on a volume and the interpreters that
//! read deleted entries from NTFS and FAT metadata. ext and exFAT are
//! recognized only, so their volumes fall through to signature scanning.

pub mod ext;
pub mod fat;
pub mod ntfs;

pub use fat::FatInterpreter;
pub use ntfs::NtfsInterpreter;

use std::sync::Arc;

use crate::domain::entities::{Extent, FileSystemType, Volume};
use crate::domain::repositories::{
    BlockDevice, FileSystemError, InterpreterOptions, VolumeInterpreter,
};

/// Identifies a file system from the first sector of a volume
pub fn probe_boot_sector(sector: &[u8]) -> Option<FileSystemType> {
    if sector.len() < 512 {
        return None;
    }
    if ntfs::NtfsBootSector::parse(sector).is_ok() {
        return Some(FileSystemType::Ntfs);
    }
    if &sector[3..11] == b"EXFAT   " {
        return Some(FileSystemType::ExFat);
    }
    fat::FatBootSector::parse(sector).ok().map(|bpb| bpb.fat_type())
}

/// Detects the file system of a volume, `Raw` when nothing matches
pub fn detect_file_system(device: &dyn BlockDevice, volume: &Volume) -> FileSystemType {
    let sector_size = device.sector_size() as u64;
    let probe_sectors = 2048u64.div_ceil(sector_size).min(volume.sector_count);
    let head = match device.read_sectors(volume.start_sector, probe_sectors) {
        Ok(head) => head,
        Err(e) => {
            tracing::warn!("Cannot read start of volume {}: {}", volume.index, e);
            return FileSystemType::Raw;
        }
    };

    if let Some(fs) = probe_boot_sector(&head) {
        return fs;
    }
    if head.len() >= 2048 && ext::probe_superblock(&head[1024..2048]) {
        return FileSystemType::Ext;
    }
    FileSystemType::Raw
}

/// Opens the interpreter for a volume.
///
/// Returns `Ok(None)` for file systems whose deleted entries are not
/// interpreted; the caller then relies on signature scanning alone.
pub fn open_interpreter(
    device: Arc<dyn BlockDevice>,
    volume: &Volume,
    options: InterpreterOptions,
) -> Result<Option<Box<dyn VolumeInterpreter>>, FileSystemError> {
    match volume.file_system {
        FileSystemType::Ntfs => Ok(Some(Box::new(NtfsInterpreter::open(
            device, volume, options,
        )?))),
        FileSystemType::Fat12 | FileSystemType::Fat16 | FileSystemType::Fat32 => Ok(Some(
            Box::new(FatInterpreter::open(device, volume, options)?),
        )),
        FileSystemType::Ext => {
            tracing::info!(
                "Volume {} is ext2/3/4; deleted inodes are not interpreted",
                volume.index
            );
            Ok(None)
        }
        FileSystemType::ExFat | FileSystemType::Raw => Ok(None),
    }
}

/// Byte-addressed reads inside one volume
pub(crate) struct VolumeReader {
    device: Arc<dyn BlockDevice>,
    start_byte: u64,
    size_bytes: u64,
    sector_size: u64,
}

impl VolumeReader {
    pub(crate) fn new(device: Arc<dyn BlockDevice>, volume: &Volume) -> Self {
        let sector_size = device.sector_size() as u64;
        Self {
            start_byte: volume.start_sector * sector_size,
            size_bytes: volume.sector_count * sector_size,
            sector_size,
            device,
        }
    }

    pub(crate) fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub(crate) fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, FileSystemError> {
        if offset
            .checked_add(len as u64)
            .is_none_or(|end| end > self.size_bytes)
        {
            return Err(FileSystemError::corrupt(
                offset,
                format!("read of {len} bytes leaves the volume"),
            ));
        }
        Ok(self.device.read_bytes(self.start_byte + offset, len)?)
    }

    /// Converts a volume byte range into device sectors
    pub(crate) fn extent(&self, offset: u64, len: u64) -> Result<Extent, FileSystemError> {
        if offset.checked_add(len).is_none_or(|end| end > self.size_bytes) {
            return Err(FileSystemError::corrupt(
                offset,
                format!("data run of {len} bytes leaves the volume"),
            ));
        }
        let absolute = self.start_byte + offset;
        if absolute % self.sector_size != 0 {
            return Err(FileSystemError::corrupt(
                offset,
                "data run is not sector aligned",
            ));
        }
        Ok(Extent::new(
            absolute / self.sector_size,
            len.div_ceil(self.sector_size),
        ))
    }

    /// Trims extents so they cover exactly `size` bytes
    pub(crate) fn clip_extents(&self, extents: Vec<Extent>, size: u64) -> Vec<Extent> {
        let mut remaining = size.div_ceil(self.sector_size);
        let mut clipped = Vec::with_capacity(extents.len());
        for extent in extents {
            if remaining == 0 {
                break;
            }
            let length = extent.length.min(remaining);
            remaining -= length;
            clipped.push(Extent::new(extent.start_sector, length));
        }
        Extent::coalesce(&mut clipped);
        clipped
    }
}
