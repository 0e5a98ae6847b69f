//! MFT record parsing
//!
//! Update sequence fixups, attribute walking and data run decoding.

use byteorder::{ByteOrder, LittleEndian};

use crate::domain::repositories::FileSystemError;

/// MFT entry signature "FILE"
const FILE_SIGNATURE: &[u8; 4] = b"FILE";
/// Marker NTFS writes over records it found torn
const BAAD_SIGNATURE: &[u8; 4] = b"BAAD";

const ATTR_FILE_NAME: u32 = 0x30;
const ATTR_DATA: u32 = 0x80;
const ATTR_END: u32 = 0xFFFF_FFFF;

const FLAG_IN_USE: u16 = 0x0001;
const FLAG_DIRECTORY: u16 = 0x0002;

/// Low 48 bits of a file reference hold the record number
const REFERENCE_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;
const MAX_DATA_RUNS: usize = 65_536;

/// Record number of the root directory
pub const ROOT_RECORD: u64 = 5;

/// $FILE_NAME namespaces
pub const NAMESPACE_POSIX: u8 = 0;
pub const NAMESPACE_WIN32: u8 = 1;
pub const NAMESPACE_DOS: u8 = 2;
pub const NAMESPACE_WIN32_AND_DOS: u8 = 3;

/// Restores the sector tails saved in the update sequence array.
///
/// Each sector of a record ends with the update sequence number; a
/// mismatch means the record was torn by an interrupted write.
pub fn apply_fixups(record: &mut [u8], bytes_per_sector: usize, offset: u64) -> Result<(), FileSystemError> {
    if record.len() < 8 {
        return Err(FileSystemError::corrupt(offset, "MFT record too small"));
    }
    let usa_offset = LittleEndian::read_u16(&record[4..6]) as usize;
    let usa_count = LittleEndian::read_u16(&record[6..8]) as usize;
    let sectors = record.len() / bytes_per_sector;

    if usa_count == 0 || usa_count - 1 != sectors || usa_offset + usa_count * 2 > record.len() {
        return Err(FileSystemError::corrupt(
            offset,
            format!("update sequence array of {usa_count} entries does not fit"),
        ));
    }

    let usn = [record[usa_offset], record[usa_offset + 1]];
    for i in 1..usa_count {
        let tail = i * bytes_per_sector - 2;
        if record[tail..tail + 2] != usn {
            return Err(FileSystemError::corrupt(
                offset,
                format!("torn write in sector {} of MFT record", i - 1),
            ));
        }
        let saved = usa_offset + i * 2;
        record[tail] = record[saved];
        record[tail + 1] = record[saved + 1];
    }
    Ok(())
}

/// One run of a non-resident attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRun {
    /// First logical cluster, `None` for a sparse run
    pub lcn: Option<u64>,
    /// Run length in clusters
    pub length: u64,
}

/// Decodes a mapping pairs array
pub fn decode_data_runs(runlist: &[u8], offset: u64) -> Result<Vec<DataRun>, FileSystemError> {
    let mut runs = Vec::new();
    let mut pos = 0usize;
    let mut current_lcn: i64 = 0;

    while pos < runlist.len() {
        let header = runlist[pos];
        if header == 0 {
            return Ok(runs);
        }
        let length_size = (header & 0x0F) as usize;
        let lcn_size = (header >> 4) as usize;
        pos += 1;

        if length_size == 0 || length_size > 8 || lcn_size > 8 {
            return Err(FileSystemError::corrupt(offset, format!("bad data run header 0x{header:02X}")));
        }
        if pos + length_size + lcn_size > runlist.len() {
            return Err(FileSystemError::corrupt(offset, "data run truncated"));
        }

        let length = read_unsigned(&runlist[pos..pos + length_size]);
        pos += length_size;

        let lcn = if lcn_size == 0 {
            None
        } else {
            current_lcn = current_lcn
                .checked_add(read_signed(&runlist[pos..pos + lcn_size]))
                .filter(|lcn| *lcn >= 0)
                .ok_or_else(|| FileSystemError::corrupt(offset, "data run points before the volume"))?;
            Some(current_lcn as u64)
        };
        pos += lcn_size;

        if length == 0 {
            return Err(FileSystemError::corrupt(offset, "zero-length data run"));
        }
        runs.push(DataRun { lcn, length });
        if runs.len() > MAX_DATA_RUNS {
            return Err(FileSystemError::corrupt(offset, "too many data runs"));
        }
    }
    // Some writers omit the terminator when the list fills the attribute
    Ok(runs)
}

fn read_unsigned(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn read_signed(bytes: &[u8]) -> i64 {
    let value = read_unsigned(bytes);
    let bits = bytes.len() * 8;
    if bits < 64 && bytes.last().is_some_and(|&b| b & 0x80 != 0) {
        (value | (u64::MAX << bits)) as i64
    } else {
        value as i64
    }
}

/// A $FILE_NAME attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileName {
    pub parent: u64,
    pub name: String,
    pub namespace: u8,
}

/// The unnamed $DATA attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataAttribute {
    Resident(Vec<u8>),
    NonResident { runs: Vec<DataRun>, real_size: u64 },
}

/// The parts of an MFT record used for recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MftRecord {
    pub number: u64,
    pub flags: u16,
    pub base_record: u64,
    pub file_names: Vec<FileName>,
    pub data: Option<DataAttribute>,
}

impl MftRecord {
    /// Parses a raw record in place (fixups are applied to `buf`).
    ///
    /// Returns `Ok(None)` for never-used slots and `Err` for records
    /// that are present but damaged.
    pub fn parse(
        number: u64,
        buf: &mut [u8],
        bytes_per_sector: usize,
        offset: u64,
    ) -> Result<Option<Self>, FileSystemError> {
        if buf.len() < 48 {
            return Err(FileSystemError::corrupt(offset, "MFT record too small"));
        }
        let signature = &buf[0..4];
        if signature == BAAD_SIGNATURE {
            return Err(FileSystemError::corrupt(offset, format!("MFT record {number} marked BAAD")));
        }
        if signature != FILE_SIGNATURE {
            return Ok(None);
        }
        apply_fixups(buf, bytes_per_sector, offset)?;

        let first_attr = LittleEndian::read_u16(&buf[0x14..0x16]) as usize;
        let flags = LittleEndian::read_u16(&buf[0x16..0x18]);
        let used = (LittleEndian::read_u32(&buf[0x18..0x1C]) as usize).min(buf.len());
        let base_record = LittleEndian::read_u64(&buf[0x20..0x28]) & REFERENCE_MASK;

        let mut record = Self {
            number,
            flags,
            base_record,
            file_names: Vec::new(),
            data: None,
        };

        let mut pos = first_attr;
        while pos + 16 <= used {
            let attr_type = LittleEndian::read_u32(&buf[pos..pos + 4]);
            if attr_type == ATTR_END {
                break;
            }
            let attr_len = LittleEndian::read_u32(&buf[pos + 4..pos + 8]) as usize;
            if attr_len < 16 || pos + attr_len > used {
                return Err(FileSystemError::corrupt(
                    offset + pos as u64,
                    format!("attribute 0x{attr_type:X} of length {attr_len} overruns record {number}"),
                ));
            }
            let attr = &buf[pos..pos + attr_len];
            let non_resident = attr[8] != 0;
            let name_len = attr[9];

            match attr_type {
                ATTR_FILE_NAME if !non_resident => {
                    if let Some(name) = resident_value(attr).and_then(parse_file_name) {
                        record.file_names.push(name);
                    }
                }
                ATTR_DATA if name_len == 0 && record.data.is_none() => {
                    record.data = parse_data(attr, non_resident, offset + pos as u64)?;
                }
                _ => {}
            }
            pos += attr_len;
        }

        Ok(Some(record))
    }

    pub fn is_in_use(&self) -> bool {
        self.flags & FLAG_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }

    /// Extension records carry overflow attributes of another record
    pub fn is_base(&self) -> bool {
        self.base_record == 0
    }

    /// Preferred name: Win32 over POSIX over the 8.3 DOS alias
    pub fn best_name(&self) -> Option<&FileName> {
        let rank = |ns: u8| match ns {
            NAMESPACE_WIN32 | NAMESPACE_WIN32_AND_DOS => 0,
            NAMESPACE_POSIX => 1,
            _ => 2,
        };
        self.file_names.iter().min_by_key(|n| rank(n.namespace))
    }
}

fn resident_value(attr: &[u8]) -> Option<&[u8]> {
    if attr.len() < 24 {
        return None;
    }
    let len = LittleEndian::read_u32(&attr[16..20]) as usize;
    let start = LittleEndian::read_u16(&attr[20..22]) as usize;
    attr.get(start..start.checked_add(len)?)
}

fn parse_file_name(value: &[u8]) -> Option<FileName> {
    if value.len() < 66 {
        return None;
    }
    let parent = LittleEndian::read_u64(&value[0..8]) & REFERENCE_MASK;
    let name_len = value[64] as usize;
    let namespace = value[65];
    let raw = value.get(66..66 + name_len * 2)?;
    let units: Vec<u16> = raw.chunks_exact(2).map(LittleEndian::read_u16).collect();
    Some(FileName {
        parent,
        name: String::from_utf16_lossy(&units),
        namespace,
    })
}

fn parse_data(attr: &[u8], non_resident: bool, offset: u64) -> Result<Option<DataAttribute>, FileSystemError> {
    if !non_resident {
        return Ok(resident_value(attr).map(|v| DataAttribute::Resident(v.to_vec())));
    }
    if attr.len() < 64 {
        return Err(FileSystemError::corrupt(offset, "non-resident attribute header truncated"));
    }
    let start_vcn = LittleEndian::read_u64(&attr[16..24]);
    if start_vcn != 0 {
        // Continuation of an attribute split across extension records
        return Ok(None);
    }
    let runlist_offset = LittleEndian::read_u16(&attr[32..34]) as usize;
    let real_size = LittleEndian::read_u64(&attr[48..56]);
    let runlist = attr
        .get(runlist_offset..)
        .ok_or_else(|| FileSystemError::corrupt(offset, "data run offset outside attribute"))?;
    Ok(Some(DataAttribute::NonResident {
        runs: decode_data_runs(runlist, offset)?,
        real_size,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_runs_with_negative_delta_and_sparse() {
        // 0x10 clusters at LCN 0x1000, sparse 4 clusters, 8 clusters at 0x1000 - 0x100
        let runlist = [
            0x21, 0x10, 0x00, 0x10, //
            0x01, 0x04, //
            0x21, 0x08, 0x00, 0xFF, //
            0x00,
        ];
        let runs = decode_data_runs(&runlist, 0).unwrap();
        assert_eq!(
            runs,
            vec![
                DataRun { lcn: Some(0x1000), length: 0x10 },
                DataRun { lcn: None, length: 4 },
                DataRun { lcn: Some(0x0F00), length: 8 },
            ]
        );
    }

    #[test]
    fn test_decode_runs_rejects_truncation() {
        assert!(decode_data_runs(&[0x32, 0x01], 0).is_err());
        assert!(decode_data_runs(&[0x11, 0x05, 0x80], 0).is_err());
    }

    #[test]
    fn test_fixups_restore_sector_tails() {
        let mut record = vec![0u8; 1024];
        record[0..4].copy_from_slice(FILE_SIGNATURE);
        LittleEndian::write_u16(&mut record[4..6], 0x30);
        LittleEndian::write_u16(&mut record[6..8], 3);
        record[0x30..0x32].copy_from_slice(&[0x07, 0x00]);
        record[0x32..0x34].copy_from_slice(&[0xAA, 0xBB]);
        record[0x34..0x36].copy_from_slice(&[0xCC, 0xDD]);
        record[510..512].copy_from_slice(&[0x07, 0x00]);
        record[1022..1024].copy_from_slice(&[0x07, 0x00]);

        apply_fixups(&mut record, 512, 0).unwrap();
        assert_eq!(&record[510..512], &[0xAA, 0xBB]);
        assert_eq!(&record[1022..1024], &[0xCC, 0xDD]);

        record[510..512].copy_from_slice(&[0x09, 0x00]);
        assert!(apply_fixups(&mut record, 512, 0).is_err());
    }
}
