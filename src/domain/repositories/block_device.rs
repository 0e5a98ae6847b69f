//! Block device trait
//!
//! Sector-addressed, read-only access to a disk or image. This
//! abstraction lets the interpreters and the scanner work against real
//! devices, image files and in-memory fixtures alike.

use std::io;
use thiserror::Error;

use crate::domain::entities::DeviceInfo;

/// Errors that can occur when reading from a block device
#[derive(Error, Debug)]
pub enum BlockDeviceError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("I/O error at sector {sector}: {source}")]
    Io {
        sector: u64,
        #[source]
        source: io::Error,
    },

    #[error("Unreadable sector {0}")]
    BadSector(u64),

    #[error("Read of {count} sectors at {start} exceeds device size of {total} sectors")]
    OutOfRange { start: u64, count: u64, total: u64 },

    #[error("Read timed out at sector {0}")]
    Timeout(u64),

    #[error("Device error: {0}")]
    Other(String),
}

impl BlockDeviceError {
    /// Maps an `open` failure onto the access/not-found kinds
    pub fn from_open(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::DeviceNotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_string()),
            _ => Self::Other(format!("{path}: {err}")),
        }
    }

    /// Sector the failure is attributed to, if any
    pub fn failed_sector(&self) -> Option<u64> {
        match self {
            Self::Io { sector, .. } | Self::BadSector(sector) | Self::Timeout(sector) => {
                Some(*sector)
            }
            Self::OutOfRange { start, .. } => Some(*start),
            _ => None,
        }
    }

    /// Failures local to the sectors read, worth retrying sector by sector
    pub fn is_sector_fault(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::BadSector(_) | Self::Timeout(_))
    }
}

/// Result of a read that tolerates unreadable sectors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectorData {
    /// Sector contents; unreadable sectors are zero-filled
    pub data: Vec<u8>,
    /// Sectors that could not be read
    pub bad_sectors: Vec<u64>,
}

/// Read-only sector access
///
/// Implementations must be safe to share between the reader thread and
/// the scan workers.
///
/// # Example
///
/// ```ignore
/// let device = FileBlockDevice::open("/dev/sdb")?;
/// let boot = device.read_sectors(0, 1)?;
/// ```
pub trait BlockDevice: Send + Sync {
    /// Returns the geometry of the device
    fn info(&self) -> &DeviceInfo;

    /// Reads `count` whole sectors starting at `start`
    ///
    /// Fails with `OutOfRange` if the range leaves the device.
    fn read_sectors(&self, start: u64, count: u64) -> Result<Vec<u8>, BlockDeviceError>;

    fn sector_size(&self) -> u32 {
        self.info().sector_size
    }

    fn total_sectors(&self) -> u64 {
        self.info().total_sectors
    }

    /// Validates a sector range against the device size
    fn check_range(&self, start: u64, count: u64) -> Result<(), BlockDeviceError> {
        let total = self.total_sectors();
        match start.checked_add(count) {
            Some(end) if end <= total => Ok(()),
            _ => Err(BlockDeviceError::OutOfRange {
                start,
                count,
                total,
            }),
        }
    }

    /// Reads a range, retrying sector by sector when the bulk read hits
    /// a sector fault. Unreadable sectors come back zero-filled and are
    /// listed in `bad_sectors`.
    fn read_sectors_lenient(&self, start: u64, count: u64) -> Result<SectorData, BlockDeviceError> {
        match self.read_sectors(start, count) {
            Ok(data) => Ok(SectorData {
                data,
                bad_sectors: Vec::new(),
            }),
            Err(err) if err.is_sector_fault() => {
                tracing::debug!("Bulk read at sector {} failed ({}), retrying per sector", start, err);
                let sector_size = self.sector_size() as usize;
                let mut data = vec![0u8; count as usize * sector_size];
                let mut bad_sectors = Vec::new();
                for i in 0..count {
                    match self.read_sectors(start + i, 1) {
                        Ok(sector) => {
                            let offset = i as usize * sector_size;
                            let len = sector.len().min(sector_size);
                            data[offset..offset + len].copy_from_slice(&sector[..len]);
                        }
                        Err(err) if err.is_sector_fault() => bad_sectors.push(start + i),
                        Err(err) => return Err(err),
                    }
                }
                Ok(SectorData { data, bad_sectors })
            }
            Err(err) => Err(err),
        }
    }

    /// Reads `len` bytes at a byte offset, going through whole sectors
    fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>, BlockDeviceError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let sector_size = self.sector_size() as u64;
        let first = offset / sector_size;
        let last = (offset + len as u64).div_ceil(sector_size);
        let data = self.read_sectors(first, last - first)?;
        let skip = (offset - first * sector_size) as usize;
        Ok(data[skip..skip + len].to_vec())
    }
}
