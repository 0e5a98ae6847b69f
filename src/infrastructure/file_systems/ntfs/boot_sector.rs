//! NTFS boot sector (BIOS parameter block)

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Seek, SeekFrom};

use crate::domain::repositories::FileSystemError;

/// NTFS boot sector OEM ID "NTFS    "
const NTFS_OEM_ID: &[u8; 8] = b"NTFS    ";

/// Boot sector size
const BOOT_SECTOR_SIZE: usize = 512;

/// Fields of the NTFS boot sector the interpreter needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtfsBootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u32,
    /// Total sectors in volume
    pub total_sectors: u64,
    /// LCN of MFT
    pub mft_lcn: u64,
    /// LCN of MFT mirror
    pub mft_mirror_lcn: u64,
    /// Clusters per MFT record, or -log2(bytes) when negative
    pub clusters_per_mft_record: i8,
    pub volume_serial: u64,
}

impl NtfsBootSector {
    /// Parses boot sector from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self, FileSystemError> {
        if data.len() < BOOT_SECTOR_SIZE {
            return Err(FileSystemError::InvalidBootSector(
                "NTFS boot sector too small".to_string(),
            ));
        }
        if &data[3..11] != NTFS_OEM_ID {
            return Err(FileSystemError::InvalidBootSector(
                "missing NTFS OEM id".to_string(),
            ));
        }

        let invalid = |e: std::io::Error| FileSystemError::InvalidBootSector(e.to_string());
        let mut cursor = Cursor::new(data);

        // Bytes per sector at offset 11
        cursor.seek(SeekFrom::Start(11)).map_err(invalid)?;
        let bytes_per_sector = cursor.read_u16::<LittleEndian>().map_err(invalid)?;
        // Sectors per cluster at offset 13; values above 0x80 encode 2^(256 - n)
        let raw_spc = cursor.read_u8().map_err(invalid)?;
        let sectors_per_cluster = match raw_spc {
            0 => 0,
            1..=0x80 => raw_spc as u32,
            _ => 1u32.checked_shl(256 - raw_spc as u32).unwrap_or(0),
        };

        // Total sectors at offset 40
        cursor.seek(SeekFrom::Start(40)).map_err(invalid)?;
        let total_sectors = cursor.read_u64::<LittleEndian>().map_err(invalid)?;
        let mft_lcn = cursor.read_u64::<LittleEndian>().map_err(invalid)?;
        let mft_mirror_lcn = cursor.read_u64::<LittleEndian>().map_err(invalid)?;
        let clusters_per_mft_record = cursor.read_i8().map_err(invalid)?;

        // Volume serial at offset 72
        cursor.seek(SeekFrom::Start(72)).map_err(invalid)?;
        let volume_serial = cursor.read_u64::<LittleEndian>().map_err(invalid)?;

        let boot = Self {
            bytes_per_sector,
            sectors_per_cluster,
            total_sectors,
            mft_lcn,
            mft_mirror_lcn,
            clusters_per_mft_record,
            volume_serial,
        };
        boot.validate()?;
        Ok(boot)
    }

    fn validate(&self) -> Result<(), FileSystemError> {
        if !self.bytes_per_sector.is_power_of_two() || !(256..=4096).contains(&self.bytes_per_sector)
        {
            return Err(FileSystemError::InvalidBootSector(format!(
                "invalid bytes per sector {}",
                self.bytes_per_sector
            )));
        }
        if self.sectors_per_cluster == 0 || !self.sectors_per_cluster.is_power_of_two() {
            return Err(FileSystemError::InvalidBootSector(format!(
                "invalid sectors per cluster {}",
                self.sectors_per_cluster
            )));
        }
        let record_size = self.mft_record_size();
        if !(256..=65536).contains(&record_size) || !record_size.is_power_of_two() {
            return Err(FileSystemError::InvalidBootSector(format!(
                "invalid MFT record size {record_size}"
            )));
        }
        if self.mft_lcn >= self.total_clusters() {
            return Err(FileSystemError::InvalidBootSector(format!(
                "MFT cluster {} beyond volume",
                self.mft_lcn
            )));
        }
        Ok(())
    }

    pub fn cluster_size(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    pub fn total_clusters(&self) -> u64 {
        self.total_sectors / self.sectors_per_cluster.max(1) as u64
    }

    pub fn mft_record_size(&self) -> u64 {
        if self.clusters_per_mft_record > 0 {
            self.clusters_per_mft_record as u64 * self.cluster_size()
        } else {
            1u64.checked_shl(self.clusters_per_mft_record.unsigned_abs() as u32)
                .unwrap_or(0)
        }
    }

    /// Byte offset of the MFT inside the volume
    pub fn mft_offset(&self) -> u64 {
        self.mft_lcn * self.cluster_size()
    }
}
