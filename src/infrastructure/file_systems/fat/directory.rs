//! FAT directory entries and long file names

use byteorder::{ByteOrder, LittleEndian};

pub const ENTRY_SIZE: usize = 32;

const DELETED_MARKER: u8 = 0xE5;
/// First byte 0x05 stands for a real 0xE5 (KANJI lead byte)
const ESCAPED_E5: u8 = 0x05;

const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_LONG_NAME: u8 = 0x0F;

const LOWERCASE_BASE: u8 = 0x08;
const LOWERCASE_EXT: u8 = 0x10;

/// Byte offsets of the 13 UTF-16 units inside an LFN entry
const LFN_OFFSETS: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Slot index inside the directory
    pub slot: usize,
    pub name: String,
    pub is_directory: bool,
    pub deleted: bool,
    pub first_cluster: u32,
    pub size: u32,
}

/// Checksum of an 8.3 name stored in each of its LFN entries
pub fn short_name_checksum(short_name: &[u8]) -> u8 {
    short_name[..11]
        .iter()
        .fold(0u8, |sum, &b| sum.rotate_right(1).wrapping_add(b))
}

struct LfnPart {
    units: [u16; 13],
    checksum: u8,
    deleted: bool,
}

/// Parses the entries of one directory.
///
/// Stops at the end-of-directory marker. Dot entries and volume labels
/// are dropped. Deleted entries keep their long name when the LFN run
/// before them was deleted with them.
pub fn parse_directory(data: &[u8]) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    let mut lfn: Vec<LfnPart> = Vec::new();

    for (slot, raw) in data.chunks_exact(ENTRY_SIZE).enumerate() {
        let first = raw[0];
        if first == 0x00 {
            break;
        }
        let attr = raw[11];
        let deleted = first == DELETED_MARKER;

        if attr & 0x3F == ATTR_LONG_NAME {
            let mut units = [0u16; 13];
            for (unit, &offset) in units.iter_mut().zip(LFN_OFFSETS.iter()) {
                *unit = LittleEndian::read_u16(&raw[offset..offset + 2]);
            }
            lfn.push(LfnPart {
                units,
                checksum: raw[13],
                deleted,
            });
            continue;
        }

        let parts = std::mem::take(&mut lfn);
        if attr & ATTR_VOLUME_ID != 0 {
            continue;
        }
        let short = short_name(raw, deleted);
        if short == "." || short == ".." {
            continue;
        }

        let long = long_name(&parts, raw, deleted);
        entries.push(DirEntry {
            slot,
            name: long.unwrap_or(short),
            is_directory: attr & ATTR_DIRECTORY != 0,
            deleted,
            first_cluster: (LittleEndian::read_u16(&raw[20..22]) as u32) << 16
                | LittleEndian::read_u16(&raw[26..28]) as u32,
            size: LittleEndian::read_u32(&raw[28..32]),
        });
    }
    entries
}

fn long_name(parts: &[LfnPart], raw: &[u8], deleted: bool) -> Option<String> {
    if parts.is_empty() {
        return None;
    }
    let checksum = parts[0].checksum;
    if parts.iter().any(|p| p.checksum != checksum || p.deleted != deleted) {
        return None;
    }
    // Deleting overwrites the first byte the checksum covers
    if !deleted && short_name_checksum(raw) != checksum {
        return None;
    }
    let units: Vec<u16> = parts
        .iter()
        .rev()
        .flat_map(|p| p.units)
        .take_while(|&u| u != 0x0000 && u != 0xFFFF)
        .collect();
    let name = String::from_utf16_lossy(&units);
    (!name.is_empty()).then_some(name)
}

fn short_name(raw: &[u8], deleted: bool) -> String {
    let flags = raw[12];
    let mut base: Vec<u8> = raw[0..8].to_vec();
    if deleted {
        base[0] = b'_';
    } else if base[0] == ESCAPED_E5 {
        base[0] = DELETED_MARKER;
    }
    let mut base = latin1(&base);
    let mut ext = latin1(&raw[8..11]);
    if flags & LOWERCASE_BASE != 0 {
        base = base.to_lowercase();
    }
    if flags & LOWERCASE_EXT != 0 {
        ext = ext.to_lowercase();
    }
    if ext.is_empty() { base } else { format!("{base}.{ext}") }
}

fn latin1(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| b as char)
        .collect::<String>()
        .trim_end_matches(' ')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_entry(name: &[u8; 11], attr: u8, cluster: u32, size: u32) -> [u8; 32] {
        let mut e = [0u8; 32];
        e[0..11].copy_from_slice(name);
        e[11] = attr;
        LittleEndian::write_u16(&mut e[20..22], (cluster >> 16) as u16);
        LittleEndian::write_u16(&mut e[26..28], cluster as u16);
        LittleEndian::write_u32(&mut e[28..32], size);
        e
    }

    fn lfn_entry(seq: u8, text: &[u16], checksum: u8) -> [u8; 32] {
        let mut e = [0u8; 32];
        e[0] = seq;
        e[11] = ATTR_LONG_NAME;
        e[13] = checksum;
        for (i, &offset) in LFN_OFFSETS.iter().enumerate() {
            let unit = text.get(i).copied().unwrap_or(0xFFFF);
            LittleEndian::write_u16(&mut e[offset..offset + 2], unit);
        }
        e
    }

    #[test]
    fn test_live_long_name_with_checksum() {
        let short = short_entry(b"REPORT~1PDF", 0x20, 7, 1234);
        let checksum = short_name_checksum(&short);
        let mut text: Vec<u16> = "Report.pdf".encode_utf16().collect();
        text.push(0);

        let mut data = Vec::new();
        data.extend_from_slice(&lfn_entry(0x41, &text, checksum));
        data.extend_from_slice(&short);

        let entries = parse_directory(&data);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Report.pdf");
        assert_eq!(entries[0].slot, 1);
        assert_eq!(entries[0].first_cluster, 7);
        assert!(!entries[0].deleted);
    }

    #[test]
    fn test_mismatched_checksum_falls_back_to_short_name() {
        let short = short_entry(b"REPORT~1PDF", 0x20, 7, 1234);
        let text: Vec<u16> = "Other.pdf\0".encode_utf16().collect();
        let mut data = lfn_entry(0x41, &text, 0x00).to_vec();
        data.extend_from_slice(&short);

        assert_eq!(parse_directory(&data)[0].name, "REPORT~1.PDF");
    }

    #[test]
    fn test_deleted_short_name_and_markers() {
        let mut data = Vec::new();
        data.extend_from_slice(&short_entry(b"DISK       ", ATTR_VOLUME_ID, 0, 0));
        data.extend_from_slice(&short_entry(b".          ", ATTR_DIRECTORY, 3, 0));
        data.extend_from_slice(&short_entry(b"\xE5OTES   TXT", 0x20, 9, 10));
        data.extend_from_slice(&[0u8; 32]);
        data.extend_from_slice(&short_entry(b"AFTER   END", 0x20, 4, 1));

        let entries = parse_directory(&data);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "_OTES.TXT");
        assert!(entries[0].deleted);
    }
}
