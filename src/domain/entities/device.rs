//! Device identity and geometry
//!
//! A device is addressed either by a platform drive index or by a path
//! (block device node or disk image file).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::Extent;

/// How a caller names the device to open
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceId {
    /// Platform drive index (`\\.\PhysicalDriveN` on Windows, the N-th
    /// discovered disk elsewhere)
    Index(u32),
    /// Explicit device node or image path
    Path(PathBuf),
}

impl FromStr for DeviceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<u32>() {
            Ok(index) => Self::Index(index),
            Err(_) => Self::Path(PathBuf::from(s)),
        })
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "drive #{index}"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Geometry and identity of an open device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Path the device was opened from
    pub path: String,
    /// Logical sector size in bytes
    pub sector_size: u32,
    /// Total number of addressable sectors
    pub total_sectors: u64,
    /// Whether the handle is read-only (always true for recovery sources)
    pub read_only: bool,
}

impl DeviceInfo {
    pub fn new(path: impl Into<String>, sector_size: u32, total_sectors: u64) -> Self {
        Self {
            path: path.into(),
            sector_size,
            total_sectors,
            read_only: true,
        }
    }

    /// Total size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.total_sectors * self.sector_size as u64
    }

    /// Returns true if the extent lies entirely on the device
    pub fn contains(&self, extent: &Extent) -> bool {
        extent
            .start_sector
            .checked_add(extent.length)
            .is_some_and(|end| end <= self.total_sectors)
    }

    /// The whole device as a single extent
    pub fn whole(&self) -> Extent {
        Extent::new(0, self.total_sectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_parses_index_or_path() {
        assert_eq!("2".parse::<DeviceId>().unwrap(), DeviceId::Index(2));
        assert_eq!(
            "/dev/sdb".parse::<DeviceId>().unwrap(),
            DeviceId::Path(PathBuf::from("/dev/sdb"))
        );
    }

    #[test]
    fn test_contains_rejects_overflowing_extent() {
        let info = DeviceInfo::new("mem", 512, 100);
        assert!(info.contains(&Extent::new(90, 10)));
        assert!(!info.contains(&Extent::new(90, 11)));
        assert!(!info.contains(&Extent::new(u64::MAX, 2)));
        assert_eq!(info.size_bytes(), 51_200);
    }
}
