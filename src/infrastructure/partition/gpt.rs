//! GUID Partition Table
//!
//! Reads the primary header at LBA 1 and falls back to the backup
//! header at the last LBA when the primary fails its checksum.

use byteorder::{ByteOrder, LittleEndian};

use super::{PartitionEntry, PartitionError};
use crate::domain::entities::PartitionScheme;
use crate::domain::repositories::BlockDevice;

const SIGNATURE: &[u8; 8] = b"EFI PART";
const MIN_HEADER_SIZE: usize = 92;
/// Upper bound on the entry array; the common layout is 128 x 128 bytes
const MAX_ENTRY_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptHeader {
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub entries_lba: u64,
    pub entry_count: u32,
    pub entry_size: u32,
    pub entries_crc32: u32,
}

impl GptHeader {
    /// Parses and checksums a header sector
    pub fn parse(sector: &[u8]) -> Result<Self, PartitionError> {
        if sector.len() < MIN_HEADER_SIZE || &sector[0..8] != SIGNATURE {
            return Err(PartitionError::InvalidTable(
                "missing EFI PART signature".to_string(),
            ));
        }
        let header_size = LittleEndian::read_u32(&sector[12..16]) as usize;
        if !(MIN_HEADER_SIZE..=sector.len()).contains(&header_size) {
            return Err(PartitionError::InvalidTable(format!(
                "header size {header_size} out of range"
            )));
        }

        let stored_crc = LittleEndian::read_u32(&sector[16..20]);
        let mut header = sector[..header_size].to_vec();
        header[16..20].fill(0);
        if crc32fast::hash(&header) != stored_crc {
            return Err(PartitionError::Checksum("GPT header"));
        }

        let parsed = Self {
            current_lba: LittleEndian::read_u64(&sector[24..32]),
            backup_lba: LittleEndian::read_u64(&sector[32..40]),
            first_usable_lba: LittleEndian::read_u64(&sector[40..48]),
            last_usable_lba: LittleEndian::read_u64(&sector[48..56]),
            entries_lba: LittleEndian::read_u64(&sector[72..80]),
            entry_count: LittleEndian::read_u32(&sector[80..84]),
            entry_size: LittleEndian::read_u32(&sector[84..88]),
            entries_crc32: LittleEndian::read_u32(&sector[88..92]),
        };
        if parsed.entry_size < 128 || parsed.entry_size % 8 != 0 {
            return Err(PartitionError::InvalidTable(format!(
                "entry size {} not supported",
                parsed.entry_size
            )));
        }
        if parsed.entry_count as u64 * parsed.entry_size as u64 > MAX_ENTRY_BYTES {
            return Err(PartitionError::InvalidTable(format!(
                "{} entries of {} bytes exceed the supported table size",
                parsed.entry_count, parsed.entry_size
            )));
        }
        Ok(parsed)
    }
}

/// Reads the partitions of a GPT disk
pub fn read_gpt(device: &dyn BlockDevice) -> Result<Vec<PartitionEntry>, PartitionError> {
    match read_table(device, 1) {
        Ok(entries) => Ok(entries),
        Err(primary_err) => {
            let last = device.total_sectors().saturating_sub(1);
            tracing::warn!("Primary GPT unusable ({}), trying backup at LBA {}", primary_err, last);
            read_table(device, last).map_err(|_| primary_err)
        }
    }
}

fn read_table(device: &dyn BlockDevice, header_lba: u64) -> Result<Vec<PartitionEntry>, PartitionError> {
    let header = GptHeader::parse(&device.read_sectors(header_lba, 1)?)?;

    let table_bytes = header.entry_count as u64 * header.entry_size as u64;
    let sector_size = device.sector_size() as u64;
    let table = device.read_sectors(header.entries_lba, table_bytes.div_ceil(sector_size))?;
    let table = &table[..table_bytes as usize];
    if crc32fast::hash(table) != header.entries_crc32 {
        return Err(PartitionError::Checksum("GPT partition entries"));
    }

    Ok(table
        .chunks_exact(header.entry_size as usize)
        .filter_map(parse_entry)
        .collect())
}

fn parse_entry(raw: &[u8]) -> Option<PartitionEntry> {
    let type_guid: [u8; 16] = raw[0..16].try_into().ok()?;
    if type_guid == [0u8; 16] {
        return None;
    }
    let first_lba = LittleEndian::read_u64(&raw[32..40]);
    let last_lba = LittleEndian::read_u64(&raw[40..48]);
    if last_lba < first_lba {
        return None;
    }

    let name_units: Vec<u16> = raw[56..128]
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .take_while(|&unit| unit != 0)
        .collect();
    let name = String::from_utf16_lossy(&name_units);

    Some(PartitionEntry {
        start_sector: first_lba,
        sector_count: last_lba - first_lba + 1,
        scheme: PartitionScheme::Gpt,
        partition_type: format_guid(&type_guid),
        name: (!name.is_empty()).then_some(name),
    })
}

/// Formats a GUID in its mixed-endian textual form
pub fn format_guid(guid: &[u8; 16]) -> String {
    format!(
        "{:08X}-{:04X}-{:04X}-{}-{}",
        LittleEndian::read_u32(&guid[0..4]),
        LittleEndian::read_u16(&guid[4..6]),
        LittleEndian::read_u16(&guid[6..8]),
        hex::encode_upper(&guid[8..10]),
        hex::encode_upper(&guid[10..16])
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_guid_basic_data() {
        // EBD0A0A2-B9E5-4433-87C0-68B6B72699C7 (Microsoft basic data)
        let raw = [
            0xA2, 0xA0, 0xD0, 0xEB, 0xE5, 0xB9, 0x33, 0x44, 0x87, 0xC0, 0x68, 0xB6, 0xB7, 0x26,
            0x99, 0xC7,
        ];
        assert_eq!(format_guid(&raw), "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7");
    }

    #[test]
    fn test_header_checksum_is_verified() {
        let mut sector = vec![0u8; 512];
        sector[0..8].copy_from_slice(SIGNATURE);
        LittleEndian::write_u32(&mut sector[12..16], 92);
        LittleEndian::write_u32(&mut sector[80..84], 128);
        LittleEndian::write_u32(&mut sector[84..88], 128);
        let crc = crc32fast::hash(&sector[..92]);
        LittleEndian::write_u32(&mut sector[16..20], crc);
        assert!(GptHeader::parse(&sector).is_ok());

        sector[40] ^= 0xFF;
        assert!(matches!(
            GptHeader::parse(&sector),
            Err(PartitionError::Checksum(_))
        ));
    }
}
