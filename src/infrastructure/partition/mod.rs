//! Partition table reading and volume enumeration
//!
//! Volumes come from a GPT (behind a protective MBR), from an MBR with
//! its extended partition chain, or, when neither is usable, from the
//! whole device.

mod gpt;
mod mbr;

pub use gpt::{GptHeader, format_guid, read_gpt};
pub use mbr::{Mbr, MbrEntry, PROTECTIVE_GPT_TYPE, read_logical_partitions};

use thiserror::Error;

use crate::domain::entities::{PartitionScheme, Volume};
use crate::domain::repositories::{BlockDevice, BlockDeviceError};
use crate::infrastructure::file_systems::{detect_file_system, probe_boot_sector};

#[derive(Error, Debug)]
pub enum PartitionError {
    #[error("Invalid partition table: {0}")]
    InvalidTable(String),

    #[error("Checksum mismatch in {0}")]
    Checksum(&'static str),

    #[error("Read error: {0}")]
    Read(#[from] BlockDeviceError),
}

/// A partition as described by the table, before clipping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub start_sector: u64,
    pub sector_count: u64,
    pub scheme: PartitionScheme,
    pub partition_type: String,
    pub name: Option<String>,
}

/// Reads the partition table; an empty list means none was usable
pub fn read_partition_table(device: &dyn BlockDevice) -> Vec<PartitionEntry> {
    let sector0 = match device.read_sectors(0, 1) {
        Ok(sector) => sector,
        Err(e) => {
            tracing::warn!("Cannot read sector 0 ({}), treating device as one volume", e);
            return Vec::new();
        }
    };

    // A file system starting at sector 0 also ends in 0x55AA
    if let Some(fs) = probe_boot_sector(&sector0) {
        tracing::debug!("Sector 0 holds a {} boot sector, no partition table", fs);
        return Vec::new();
    }

    let mbr = match Mbr::parse(&sector0) {
        Ok(mbr) => mbr,
        Err(e) => {
            tracing::debug!("No MBR: {}", e);
            return Vec::new();
        }
    };

    if mbr.is_protective() {
        match read_gpt(device) {
            Ok(entries) => return entries,
            Err(e) => {
                tracing::warn!("Protective MBR without a usable GPT: {}", e);
                return Vec::new();
            }
        }
    }

    mbr.partitions(device)
}

/// Lists the volumes of a device.
///
/// Entries starting past the device end are dropped and entries running
/// past it are clipped, both with a warning. Without a usable table the
/// whole device is returned as volume 0.
pub fn enumerate_volumes(device: &dyn BlockDevice) -> Vec<Volume> {
    let total = device.total_sectors();
    let mut volumes: Vec<Volume> = Vec::new();

    for entry in read_partition_table(device) {
        if entry.sector_count == 0 {
            continue;
        }
        if entry.start_sector >= total {
            tracing::warn!(
                "Partition at sector {} starts beyond the device end ({}), ignored",
                entry.start_sector,
                total
            );
            continue;
        }
        let mut count = entry.sector_count;
        if entry.start_sector.saturating_add(count) > total {
            tracing::warn!(
                "Partition at sector {} runs past the device end, clipped to {} sectors",
                entry.start_sector,
                total - entry.start_sector
            );
            count = total - entry.start_sector;
        }

        let mut volume = Volume::new(volumes.len(), entry.start_sector, count, entry.scheme);
        volume.partition_type = entry.partition_type;
        volume.name = entry.name;
        volumes.push(volume);
    }

    if volumes.is_empty() {
        volumes.push(Volume::new(0, 0, total, PartitionScheme::Whole));
    }

    for volume in &mut volumes {
        volume.file_system = detect_file_system(device, volume);
        tracing::info!("Volume {}", volume);
    }
    volumes
}
