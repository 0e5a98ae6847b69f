//! Byte-addressed cache over a block device for length resolution
//!
//! Format rules walk structures that span many sectors. The window keeps
//! one block of the device in memory and reloads it when a rule moves
//! past it. Unreadable sectors come back zero-filled and are remembered.

use memchr::memmem;
use thiserror::Error;

use crate::domain::repositories::{BlockDevice, BlockDeviceError};
use crate::domain::services::CancellationToken;

/// Bytes loaded per window refill
pub const WINDOW_BYTES: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum CarveAbort {
    #[error("Scan cancelled")]
    Cancelled,

    #[error("Device error: {0}")]
    Device(#[from] BlockDeviceError),
}

pub struct CarveWindow<'a> {
    device: &'a dyn BlockDevice,
    cancel: &'a CancellationToken,
    sector_size: u64,
    device_len: u64,
    block_start: u64,
    block: Vec<u8>,
    bad_sectors: Vec<u64>,
    reads: u64,
}

impl<'a> CarveWindow<'a> {
    pub fn new(device: &'a dyn BlockDevice, cancel: &'a CancellationToken) -> Self {
        let sector_size = device.sector_size() as u64;
        Self {
            device,
            cancel,
            sector_size,
            device_len: device.total_sectors() * sector_size,
            block_start: 0,
            block: Vec::new(),
            bad_sectors: Vec::new(),
            reads: 0,
        }
    }

    /// Device length in bytes
    pub fn len(&self) -> u64 {
        self.device_len
    }

    pub fn is_empty(&self) -> bool {
        self.device_len == 0
    }

    pub fn bad_sectors(&self) -> &[u64] {
        &self.bad_sectors
    }

    pub fn into_bad_sectors(self) -> Vec<u64> {
        self.bad_sectors
    }

    /// Number of device reads issued so far
    pub fn reads(&self) -> u64 {
        self.reads
    }

    fn block_end(&self) -> u64 {
        self.block_start + self.block.len() as u64
    }

    /// Makes `pos..pos + want` resident, loading a block that starts at
    /// the sector holding `pos`
    fn load(&mut self, pos: u64, want: usize) -> Result<(), CarveAbort> {
        let want_end = pos.saturating_add(want as u64).min(self.device_len);
        if pos >= self.block_start && pos < self.block_end() && want_end <= self.block_end() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(CarveAbort::Cancelled);
        }
        let total_sectors = self.device.total_sectors();
        let first = pos / self.sector_size;
        let count = (WINDOW_BYTES as u64 / self.sector_size).min(total_sectors.saturating_sub(first));
        if count == 0 {
            self.block_start = pos;
            self.block.clear();
            return Ok(());
        }

        let read = self.device.read_sectors_lenient(first, count)?;
        self.reads += 1;
        for sector in read.bad_sectors {
            if !self.bad_sectors.contains(&sector) {
                tracing::warn!("Unreadable sector {} while resolving a carved file", sector);
                self.bad_sectors.push(sector);
            }
        }
        self.block_start = first * self.sector_size;
        self.block = read.data;
        Ok(())
    }

    /// The byte at `pos`, `None` past the device end
    pub fn byte(&mut self, pos: u64) -> Result<Option<u8>, CarveAbort> {
        if pos >= self.device_len {
            return Ok(None);
        }
        self.load(pos, 1)?;
        Ok(self.block.get((pos - self.block_start) as usize).copied())
    }

    /// Up to `len` bytes at `pos`; shorter at the device end
    pub fn slice(&mut self, pos: u64, len: usize) -> Result<Vec<u8>, CarveAbort> {
        let end = pos.saturating_add(len as u64).min(self.device_len);
        let mut out = Vec::with_capacity(end.saturating_sub(pos) as usize);
        let mut at = pos;
        while at < end {
            self.load(at, 1)?;
            if self.block.is_empty() {
                break;
            }
            let from = (at - self.block_start) as usize;
            let to = (end.min(self.block_end()) - self.block_start) as usize;
            out.extend_from_slice(&self.block[from..to]);
            at = self.block_start + to as u64;
        }
        Ok(out)
    }

    /// Offset of the first `needle` starting at or after `from` and
    /// ending at or before `limit`
    pub fn find(&mut self, needle: &[u8], from: u64, limit: u64) -> Result<Option<u64>, CarveAbort> {
        let limit = limit.min(self.device_len);
        let finder = memmem::Finder::new(needle);
        let mut pos = from;

        while pos + needle.len() as u64 <= limit {
            self.load(pos, needle.len())?;
            if self.block.is_empty() {
                return Ok(None);
            }
            let start = (pos - self.block_start) as usize;
            let end = (limit.min(self.block_end()) - self.block_start) as usize;
            if let Some(hit) = finder.find(&self.block[start..end]) {
                return Ok(Some(pos + hit as u64));
            }
            if self.block_end() >= limit {
                return Ok(None);
            }
            // Rescan the tail in case the needle straddles two blocks
            pos = (self.block_end() + 1).saturating_sub(needle.len() as u64).max(pos + 1);
        }
        Ok(None)
    }

    /// Offset of the last `needle` inside `from..limit`
    pub fn rfind(&mut self, needle: &[u8], from: u64, limit: u64) -> Result<Option<u64>, CarveAbort> {
        let mut last = None;
        let mut pos = from;
        while let Some(hit) = self.find(needle, pos, limit)? {
            last = Some(hit);
            pos = hit + 1;
        }
        Ok(last)
    }

    pub fn u16_le(&mut self, pos: u64) -> Result<Option<u16>, CarveAbort> {
        let b = self.slice(pos, 2)?;
        Ok((b.len() == 2).then(|| u16::from_le_bytes([b[0], b[1]])))
    }

    pub fn u16_be(&mut self, pos: u64) -> Result<Option<u16>, CarveAbort> {
        let b = self.slice(pos, 2)?;
        Ok((b.len() == 2).then(|| u16::from_be_bytes([b[0], b[1]])))
    }

    pub fn u32_le(&mut self, pos: u64) -> Result<Option<u32>, CarveAbort> {
        let b = self.slice(pos, 4)?;
        Ok((b.len() == 4).then(|| u32::from_le_bytes([b[0], b[1], b[2], b[3]])))
    }

    pub fn u32_be(&mut self, pos: u64) -> Result<Option<u32>, CarveAbort> {
        let b = self.slice(pos, 4)?;
        Ok((b.len() == 4).then(|| u32::from_be_bytes([b[0], b[1], b[2], b[3]])))
    }

    pub fn u64_le(&mut self, pos: u64) -> Result<Option<u64>, CarveAbort> {
        let b = self.slice(pos, 8)?;
        Ok(b.as_slice().try_into().ok().map(u64::from_le_bytes))
    }

    pub fn u64_be(&mut self, pos: u64) -> Result<Option<u64>, CarveAbort> {
        let b = self.slice(pos, 8)?;
        Ok(b.as_slice().try_into().ok().map(u64::from_be_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::block_device::MemoryBlockDevice;

    #[test]
    fn test_find_across_window_boundary() {
        let mut image = vec![0u8; WINDOW_BYTES * 2];
        image[WINDOW_BYTES - 1] = 0xFF;
        image[WINDOW_BYTES] = 0xD9;
        let device = MemoryBlockDevice::new(image, 512);
        let cancel = CancellationToken::new();
        let mut window = CarveWindow::new(&device, &cancel);

        let hit = window.find(&[0xFF, 0xD9], 0, u64::MAX).unwrap();
        assert_eq!(hit, Some(WINDOW_BYTES as u64 - 1));
        assert_eq!(window.find(&[0xFF, 0xD9], WINDOW_BYTES as u64, u64::MAX).unwrap(), None);
    }

    #[test]
    fn test_bad_sectors_are_zero_filled_and_recorded() {
        let mut image = vec![0xAAu8; 4096];
        image[1024..1536].fill(0x55);
        let device = MemoryBlockDevice::new(image, 512).with_bad_sectors([2]);
        let cancel = CancellationToken::new();
        let mut window = CarveWindow::new(&device, &cancel);

        assert_eq!(window.byte(1024).unwrap(), Some(0));
        assert_eq!(window.byte(2048).unwrap(), Some(0xAA));
        assert_eq!(window.bad_sectors(), &[2]);
    }

    #[test]
    fn test_cancelled_window_stops_reading() {
        let device = MemoryBlockDevice::new(vec![0u8; 4096], 512);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut window = CarveWindow::new(&device, &cancel);
        assert!(matches!(window.byte(0), Err(CarveAbort::Cancelled)));
    }
}
