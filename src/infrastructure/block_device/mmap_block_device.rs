//! Memory-mapped block device
//!
//! Read access to disk image files through a read-only mapping. Scan
//! workers can read concurrently without contending on a file lock.

use memmap2::Mmap;
use std::fs::OpenOptions;
use std::path::Path;

use super::file_block_device::DEFAULT_SECTOR_SIZE;
use crate::domain::entities::DeviceInfo;
use crate::domain::repositories::{BlockDevice, BlockDeviceError};

/// Memory-mapped image reader
///
/// Only suitable for regular files; block device nodes go through
/// [`super::FileBlockDevice`].
///
/// # Example
///
/// ```ignore
/// let device = MmapBlockDevice::open("disk.img")?;
/// let boot = device.sector_slice(0, 1);
/// ```
pub struct MmapBlockDevice {
    mmap: Mmap,
    info: DeviceInfo,
}

impl MmapBlockDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BlockDeviceError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| BlockDeviceError::from_open(&display, e))?;

        let size = file
            .metadata()
            .map_err(|e| BlockDeviceError::from_open(&display, e))?
            .len();
        if size == 0 {
            return Err(BlockDeviceError::Other(format!(
                "File {display} has zero size"
            )));
        }

        // The mapping is read-only and the image is not expected to change
        // while it is open.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| BlockDeviceError::Other(format!("Failed to memory-map {display}: {e}")))?;

        let total_sectors = size.div_ceil(DEFAULT_SECTOR_SIZE as u64);
        Ok(Self {
            mmap,
            info: DeviceInfo::new(display, DEFAULT_SECTOR_SIZE, total_sectors),
        })
    }

    /// Zero-copy view of whole sectors; the final partial sector is
    /// returned short
    pub fn sector_slice(&self, start: u64, count: u64) -> Option<&[u8]> {
        let sector_size = self.info.sector_size as u64;
        let begin = usize::try_from(start.checked_mul(sector_size)?).ok()?;
        let end = usize::try_from(start.checked_add(count)?.checked_mul(sector_size)?).ok()?;
        if begin > self.mmap.len() {
            return None;
        }
        Some(&self.mmap[begin..end.min(self.mmap.len())])
    }
}

impl BlockDevice for MmapBlockDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn read_sectors(&self, start: u64, count: u64) -> Result<Vec<u8>, BlockDeviceError> {
        self.check_range(start, count)?;
        let mut buffer = vec![0u8; (count * self.info.sector_size as u64) as usize];
        if let Some(slice) = self.sector_slice(start, count) {
            buffer[..slice.len()].copy_from_slice(slice);
        }
        Ok(buffer)
    }
}
