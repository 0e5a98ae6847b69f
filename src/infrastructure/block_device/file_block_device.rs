//! File-backed block device
//!
//! Raw read access to block device nodes (/dev/sdX, \\.\PhysicalDriveN)
//! and disk image files through ordinary positioned reads.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::domain::entities::DeviceInfo;
use crate::domain::repositories::{BlockDevice, BlockDeviceError};

/// Sector size assumed when the platform does not report one
pub const DEFAULT_SECTOR_SIZE: u32 = 512;

/// Block device reader over a file handle
///
/// The handle is opened read-only. A size that is not a multiple of the
/// sector size is rounded up and the tail of the last sector reads as
/// zeros.
///
/// # Example
///
/// ```ignore
/// let device = FileBlockDevice::open("/dev/sdb")?;
/// let mbr = device.read_sectors(0, 1)?;
/// ```
pub struct FileBlockDevice {
    file: Mutex<File>,
    info: DeviceInfo,
    size_bytes: u64,
}

impl FileBlockDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BlockDeviceError> {
        let path = path.as_ref();
        let label = path.display().to_string();

        let mut file = OpenOptions::new()
            .read(true)
            .write(false)
            .open(path)
            .map_err(|e| BlockDeviceError::from_open(&label, e))?;

        #[cfg(target_os = "linux")]
        {
            use rustix::fs::{Advice, fadvise};

            let _ = fadvise(&file, 0, None, Advice::Sequential);
        }

        let size_bytes = Self::detect_size(&mut file, &label)?;
        let sector_size = detect_sector_size(path);
        let total_sectors = size_bytes.div_ceil(sector_size as u64);

        tracing::debug!(
            "Opened {} ({} bytes, {} byte sectors)",
            label,
            size_bytes,
            sector_size
        );

        Ok(Self {
            file: Mutex::new(file),
            info: DeviceInfo::new(label, sector_size, total_sectors),
            size_bytes,
        })
    }

    /// Gets the device/file size
    fn detect_size(file: &mut File, path: &str) -> Result<u64, BlockDeviceError> {
        let metadata = file
            .metadata()
            .map_err(|e| BlockDeviceError::from_open(path, e))?;
        if metadata.is_file() {
            return Ok(metadata.len());
        }

        // Block devices report zero length; seeking to the end works
        let size = file
            .seek(SeekFrom::End(0))
            .and_then(|size| file.seek(SeekFrom::Start(0)).map(|_| size))
            .map_err(|e| BlockDeviceError::from_open(path, e))?;
        if size == 0 {
            return Err(BlockDeviceError::Other(format!(
                "Could not determine size of {path}"
            )));
        }
        Ok(size)
    }
}

/// Logical sector size from sysfs for Linux block devices
#[cfg(target_os = "linux")]
fn detect_sector_size(path: &Path) -> u32 {
    let Some(name) = path
        .strip_prefix("/dev")
        .ok()
        .and_then(|p| p.to_str())
        .filter(|n| !n.contains('/'))
    else {
        return DEFAULT_SECTOR_SIZE;
    };
    std::fs::read_to_string(format!("/sys/class/block/{name}/queue/logical_block_size"))
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|size| size.is_power_of_two() && *size >= 512)
        .unwrap_or(DEFAULT_SECTOR_SIZE)
}

#[cfg(not(target_os = "linux"))]
fn detect_sector_size(_path: &Path) -> u32 {
    DEFAULT_SECTOR_SIZE
}

impl BlockDevice for FileBlockDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn read_sectors(&self, start: u64, count: u64) -> Result<Vec<u8>, BlockDeviceError> {
        self.check_range(start, count)?;
        let sector_size = self.info.sector_size as u64;
        let offset = start * sector_size;
        let len = (count * sector_size) as usize;
        let mut buffer = vec![0u8; len];

        // The last sector may extend past the end of an image file
        let available = self.size_bytes.saturating_sub(offset).min(len as u64) as usize;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(&mut buffer[..available]))
            .map_err(|source| BlockDeviceError::Io {
                sector: start,
                source,
            })?;

        Ok(buffer)
    }
}
