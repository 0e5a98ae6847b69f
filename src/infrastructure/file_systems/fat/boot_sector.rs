//! FAT BIOS parameter block

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Seek, SeekFrom};

use crate::domain::entities::FileSystemType;
use crate::domain::repositories::FileSystemError;

const DIR_ENTRY_SIZE: u64 = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatBootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    /// Fixed root directory entries (zero on FAT32)
    pub root_entries: u16,
    pub total_sectors: u32,
    /// Sectors per FAT
    pub fat_size: u32,
    /// First cluster of the root directory on FAT32
    pub root_cluster: u32,
}

impl FatBootSector {
    pub fn parse(data: &[u8]) -> Result<Self, FileSystemError> {
        if data.len() < 512 {
            return Err(FileSystemError::InvalidBootSector("FAT boot sector too small".to_string()));
        }
        if !matches!(data[0], 0xEB | 0xE9) {
            return Err(FileSystemError::InvalidBootSector("missing jump instruction".to_string()));
        }

        let invalid = |e: std::io::Error| FileSystemError::InvalidBootSector(e.to_string());
        let mut cursor = Cursor::new(data);
        cursor.seek(SeekFrom::Start(11)).map_err(invalid)?;
        let bytes_per_sector = cursor.read_u16::<LittleEndian>().map_err(invalid)?;
        let sectors_per_cluster = cursor.read_u8().map_err(invalid)?;
        let reserved_sectors = cursor.read_u16::<LittleEndian>().map_err(invalid)?;
        let fat_count = cursor.read_u8().map_err(invalid)?;
        let root_entries = cursor.read_u16::<LittleEndian>().map_err(invalid)?;
        let total16 = cursor.read_u16::<LittleEndian>().map_err(invalid)?;
        cursor.seek(SeekFrom::Start(22)).map_err(invalid)?;
        let fat_size16 = cursor.read_u16::<LittleEndian>().map_err(invalid)?;
        cursor.seek(SeekFrom::Start(32)).map_err(invalid)?;
        let total32 = cursor.read_u32::<LittleEndian>().map_err(invalid)?;
        let fat_size32 = cursor.read_u32::<LittleEndian>().map_err(invalid)?;
        cursor.seek(SeekFrom::Start(44)).map_err(invalid)?;
        let root_cluster = cursor.read_u32::<LittleEndian>().map_err(invalid)?;

        let fat32 = fat_size16 == 0;
        let boot = Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            root_entries,
            total_sectors: if total16 != 0 { total16 as u32 } else { total32 },
            fat_size: if fat32 { fat_size32 } else { fat_size16 as u32 },
            root_cluster: if fat32 { root_cluster } else { 0 },
        };
        boot.validate()?;
        Ok(boot)
    }

    fn validate(&self) -> Result<(), FileSystemError> {
        let invalid = |msg: String| Err(FileSystemError::InvalidBootSector(msg));
        if !self.bytes_per_sector.is_power_of_two() || !(512..=4096).contains(&self.bytes_per_sector) {
            return invalid(format!("invalid bytes per sector {}", self.bytes_per_sector));
        }
        if self.sectors_per_cluster == 0 || !self.sectors_per_cluster.is_power_of_two() {
            return invalid(format!("invalid sectors per cluster {}", self.sectors_per_cluster));
        }
        if self.reserved_sectors == 0 || self.fat_count == 0 || self.fat_size == 0 {
            return invalid("empty reserved area or FAT".to_string());
        }
        if self.total_sectors == 0 || self.first_data_sector() >= self.total_sectors as u64 {
            return invalid(format!("{} sectors leave no data region", self.total_sectors));
        }
        Ok(())
    }

    pub fn fat_type(&self) -> FileSystemType {
        match self.cluster_count() {
            n if n < 4085 => FileSystemType::Fat12,
            n if n < 65525 => FileSystemType::Fat16,
            _ => FileSystemType::Fat32,
        }
    }

    pub fn cluster_size(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    fn root_dir_sectors(&self) -> u64 {
        (self.root_entries as u64 * DIR_ENTRY_SIZE).div_ceil(self.bytes_per_sector as u64)
    }

    fn first_data_sector(&self) -> u64 {
        self.reserved_sectors as u64
            + self.fat_count as u64 * self.fat_size as u64
            + self.root_dir_sectors()
    }

    /// Number of data clusters; valid cluster numbers are 2..cluster_count+2
    pub fn cluster_count(&self) -> u64 {
        (self.total_sectors as u64).saturating_sub(self.first_data_sector())
            / self.sectors_per_cluster as u64
    }

    /// Byte offset of the first FAT
    pub fn fat_offset(&self) -> u64 {
        self.reserved_sectors as u64 * self.bytes_per_sector as u64
    }

    pub fn fat_bytes(&self) -> u64 {
        self.fat_size as u64 * self.bytes_per_sector as u64
    }

    /// Byte offset and length of the fixed FAT12/16 root directory
    pub fn root_dir_region(&self) -> (u64, u64) {
        let offset = (self.reserved_sectors as u64 + self.fat_count as u64 * self.fat_size as u64)
            * self.bytes_per_sector as u64;
        (offset, self.root_entries as u64 * DIR_ENTRY_SIZE)
    }

    pub fn data_offset(&self) -> u64 {
        self.first_data_sector() * self.bytes_per_sector as u64
    }

    pub fn cluster_offset(&self, cluster: u32) -> u64 {
        self.data_offset() + (cluster as u64 - 2) * self.cluster_size()
    }

    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        cluster >= 2 && (cluster as u64) < self.cluster_count() + 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, LittleEndian};

    fn bpb(total: u16, fat_size: u16, root_entries: u16) -> Vec<u8> {
        let mut data = vec![0u8; 512];
        data[0] = 0xEB;
        LittleEndian::write_u16(&mut data[11..13], 512);
        data[13] = 1;
        LittleEndian::write_u16(&mut data[14..16], 1);
        data[16] = 2;
        LittleEndian::write_u16(&mut data[17..19], root_entries);
        LittleEndian::write_u16(&mut data[19..21], total);
        LittleEndian::write_u16(&mut data[22..24], fat_size);
        data
    }

    #[test]
    fn test_fat12_geometry() {
        let boot = FatBootSector::parse(&bpb(2880, 9, 224)).unwrap();
        assert_eq!(boot.fat_type(), FileSystemType::Fat12);
        assert_eq!(boot.root_dir_region(), (19 * 512, 224 * 32));
        assert_eq!(boot.data_offset(), 33 * 512);
        assert_eq!(boot.cluster_offset(2), 33 * 512);
        assert_eq!(boot.cluster_count(), 2847);
    }

    #[test]
    fn test_fat16_by_cluster_count() {
        let boot = FatBootSector::parse(&bpb(40000, 160, 512)).unwrap();
        assert_eq!(boot.fat_type(), FileSystemType::Fat16);
    }

    #[test]
    fn test_rejects_garbage() {
        let mut data = bpb(2880, 9, 224);
        data[13] = 3;
        assert!(FatBootSector::parse(&data).is_err());
        assert!(FatBootSector::parse(&[0u8; 512]).is_err());
    }
}
