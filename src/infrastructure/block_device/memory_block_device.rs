//! In-memory block device
//!
//! Holds a disk image in memory. Used by tests and by hosts that already
//! have the bytes, with hooks to simulate unreadable and slow sectors.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::domain::entities::DeviceInfo;
use crate::domain::repositories::{BlockDevice, BlockDeviceError};

pub struct MemoryBlockDevice {
    data: Vec<u8>,
    info: DeviceInfo,
    bad_sectors: RwLock<BTreeSet<u64>>,
    slow_sectors: RwLock<BTreeMap<u64, Duration>>,
    reads: AtomicU64,
}

impl MemoryBlockDevice {
    /// Wraps `data`, zero-padding it to a whole number of sectors
    pub fn new(mut data: Vec<u8>, sector_size: u32) -> Self {
        let sectors = (data.len() as u64).div_ceil(sector_size as u64);
        data.resize((sectors * sector_size as u64) as usize, 0);
        Self {
            data,
            info: DeviceInfo::new("memory", sector_size, sectors),
            bad_sectors: RwLock::new(BTreeSet::new()),
            slow_sectors: RwLock::new(BTreeMap::new()),
            reads: AtomicU64::new(0),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.info.path = label.into();
        self
    }

    /// Makes every read touching these sectors fail
    pub fn with_bad_sectors(self, sectors: impl IntoIterator<Item = u64>) -> Self {
        self.bad_sectors.write().extend(sectors);
        self
    }

    pub fn inject_bad_sector(&self, sector: u64) {
        self.bad_sectors.write().insert(sector);
    }

    /// Makes reads touching `sector` sleep before returning
    pub fn with_slow_sector(self, sector: u64, delay: Duration) -> Self {
        self.slow_sectors.write().insert(sector, delay);
        self
    }

    /// Number of `read_sectors` calls served so far
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn read_sectors(&self, start: u64, count: u64) -> Result<Vec<u8>, BlockDeviceError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.check_range(start, count)?;
        let end = start + count;

        let delay = self
            .slow_sectors
            .read()
            .range(start..end)
            .map(|(_, delay)| *delay)
            .max();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if let Some(&bad) = self.bad_sectors.read().range(start..end).next() {
            return Err(BlockDeviceError::BadSector(bad));
        }

        let sector_size = self.info.sector_size as usize;
        Ok(self.data[start as usize * sector_size..end as usize * sector_size].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_sector_fails_bulk_read_but_lenient_read_recovers() {
        let mut data = vec![0xAAu8; 512 * 4];
        data[512 * 2..512 * 3].fill(0xBB);
        let device = MemoryBlockDevice::new(data, 512).with_bad_sectors([1]);

        assert!(matches!(
            device.read_sectors(0, 4),
            Err(BlockDeviceError::BadSector(1))
        ));

        let lenient = device.read_sectors_lenient(0, 4).unwrap();
        assert_eq!(lenient.bad_sectors, vec![1]);
        assert!(lenient.data[512..1024].iter().all(|&b| b == 0));
        assert_eq!(lenient.data[1024], 0xBB);
        assert_eq!(lenient.data[0], 0xAA);
    }

    #[test]
    fn test_pads_to_whole_sectors() {
        let device = MemoryBlockDevice::new(vec![1u8; 600], 512);
        assert_eq!(device.total_sectors(), 2);
        assert_eq!(device.read_bytes(598, 4).unwrap(), vec![1, 1, 0, 0]);
    }
}
