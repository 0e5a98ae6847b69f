//! Master Boot Record and extended boot record chains

use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashSet;

use super::{PartitionEntry, PartitionError};
use crate::domain::entities::PartitionScheme;
use crate::domain::repositories::BlockDevice;

const PARTITION_TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
/// Protective MBR entry type announcing a GPT disk
pub const PROTECTIVE_GPT_TYPE: u8 = 0xEE;
/// Bound on the EBR chain; real disks stay far below this
const MAX_LOGICAL_PARTITIONS: usize = 128;

/// One of the four primary partition slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbrEntry {
    pub bootable: bool,
    pub partition_type: u8,
    pub start_lba: u32,
    pub sector_count: u32,
}

impl MbrEntry {
    fn parse(raw: &[u8]) -> Option<Self> {
        let status = raw[0];
        if status != 0x00 && status != 0x80 {
            return None;
        }
        Some(Self {
            bootable: status == 0x80,
            partition_type: raw[4],
            start_lba: LittleEndian::read_u32(&raw[8..12]),
            sector_count: LittleEndian::read_u32(&raw[12..16]),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.partition_type == 0 || self.sector_count == 0
    }

    pub fn is_extended(&self) -> bool {
        matches!(self.partition_type, 0x05 | 0x0F | 0x85)
    }

    pub fn is_protective(&self) -> bool {
        self.partition_type == PROTECTIVE_GPT_TYPE
    }
}

/// Parsed partition sector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mbr {
    pub entries: Vec<MbrEntry>,
}

impl Mbr {
    /// Parses sector 0 (or an EBR). Fails without the 0x55AA signature
    /// or when a status byte is neither 0x00 nor 0x80, which is what a
    /// volume boot record in that place looks like.
    pub fn parse(sector: &[u8]) -> Result<Self, PartitionError> {
        if sector.len() < 512 || sector[510] != 0x55 || sector[511] != 0xAA {
            return Err(PartitionError::InvalidTable(
                "missing 0x55AA boot signature".to_string(),
            ));
        }
        let mut entries = Vec::with_capacity(4);
        for slot in 0..4 {
            let offset = PARTITION_TABLE_OFFSET + slot * ENTRY_SIZE;
            let entry = MbrEntry::parse(&sector[offset..offset + ENTRY_SIZE]).ok_or_else(|| {
                PartitionError::InvalidTable(format!("invalid status byte in slot {slot}"))
            })?;
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    pub fn is_protective(&self) -> bool {
        self.entries.iter().any(MbrEntry::is_protective)
    }

    pub fn has_partitions(&self) -> bool {
        self.entries.iter().any(|e| !e.is_empty())
    }

    /// Primary and logical partitions in on-disk order
    pub fn partitions(&self, device: &dyn BlockDevice) -> Vec<PartitionEntry> {
        let mut partitions = Vec::new();
        for entry in self.entries.iter().filter(|e| !e.is_empty()) {
            if entry.is_extended() {
                partitions.extend(read_logical_partitions(device, entry.start_lba as u64));
            } else {
                partitions.push(PartitionEntry {
                    start_sector: entry.start_lba as u64,
                    sector_count: entry.sector_count as u64,
                    scheme: PartitionScheme::Mbr,
                    partition_type: format!("0x{:02X}", entry.partition_type),
                    name: None,
                });
            }
        }
        partitions
    }
}

/// Follows the EBR chain of an extended partition.
///
/// Each EBR describes one logical partition relative to itself and
/// links to the next EBR relative to the start of the extended
/// partition. A broken link ends the chain with what was found so far.
pub fn read_logical_partitions(device: &dyn BlockDevice, extended_start: u64) -> Vec<PartitionEntry> {
    let mut partitions = Vec::new();
    let mut visited = HashSet::new();
    let mut ebr_lba = extended_start;

    while partitions.len() < MAX_LOGICAL_PARTITIONS && visited.insert(ebr_lba) {
        let ebr = match device.read_sectors(ebr_lba, 1).map_err(PartitionError::from) {
            Ok(sector) => Mbr::parse(&sector),
            Err(e) => Err(e),
        };
        let ebr = match ebr {
            Ok(ebr) => ebr,
            Err(e) => {
                tracing::warn!("Extended partition chain broken at sector {}: {}", ebr_lba, e);
                break;
            }
        };

        let logical = ebr.entries[0];
        if !logical.is_empty() {
            partitions.push(PartitionEntry {
                start_sector: ebr_lba + logical.start_lba as u64,
                sector_count: logical.sector_count as u64,
                scheme: PartitionScheme::Mbr,
                partition_type: format!("0x{:02X}", logical.partition_type),
                name: None,
            });
        }

        let link = ebr.entries[1];
        if link.is_empty() || !link.is_extended() {
            break;
        }
        ebr_lba = extended_start + link.start_lba as u64;
    }

    partitions
}
