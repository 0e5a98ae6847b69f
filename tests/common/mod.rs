//! Disk image builders shared by the integration tests

#![allow(dead_code)]

use byteorder::{ByteOrder, LittleEndian};

pub const SECTOR: usize = 512;

/// Microsoft basic data partition type
pub const BASIC_DATA_GUID: [u8; 16] = [
    0xA2, 0xA0, 0xD0, 0xEB, 0xE5, 0xB9, 0x33, 0x44, 0x87, 0xC0, 0x68, 0xB6, 0xB7, 0x26, 0x99, 0xC7,
];

/// GIF of exactly `len` bytes, ending in its trailer
pub fn gif(len: usize, fill: u8) -> Vec<u8> {
    let mut gif = b"GIF89a\x10\x00\x10\x00".to_vec();
    gif.resize(len - 2, fill);
    gif.extend_from_slice(&[0x00, 0x3B]);
    gif
}

pub fn place(image: &mut [u8], sector: usize, data: &[u8]) {
    image[sector * SECTOR..sector * SECTOR + data.len()].copy_from_slice(data);
}

/// Blank image with 600-byte GIFs at sectors 10, 40 and 90
pub fn gif_image(sectors: usize) -> Vec<u8> {
    let mut image = vec![0u8; sectors * SECTOR];
    for (sector, fill) in [(10, 0x41), (40, 0x42), (90, 0x43)] {
        place(&mut image, sector, &gif(600, fill));
    }
    image
}

pub fn boot_signature(sector: &mut [u8]) {
    sector[510] = 0x55;
    sector[511] = 0xAA;
}

/// Writes one 16-byte MBR/EBR slot
pub fn mbr_entry(sector: &mut [u8], slot: usize, kind: u8, start: u32, count: u32) {
    let offset = 446 + slot * 16;
    sector[offset + 4] = kind;
    LittleEndian::write_u32(&mut sector[offset + 8..offset + 12], start);
    LittleEndian::write_u32(&mut sector[offset + 12..offset + 16], count);
}

pub struct GptPartition {
    pub first_lba: u64,
    pub last_lba: u64,
    pub name: &'static str,
}

/// Protective MBR, primary GPT header at LBA 1 and entries at LBA 2..34
pub fn gpt_image(total_sectors: usize, partitions: &[GptPartition]) -> Vec<u8> {
    let mut image = vec![0u8; total_sectors * SECTOR];
    let last_lba = total_sectors as u64 - 1;

    let mbr = &mut image[..SECTOR];
    mbr_entry(mbr, 0, 0xEE, 1, (total_sectors - 1) as u32);
    boot_signature(mbr);

    let mut entries = vec![0u8; 128 * 128];
    for (i, part) in partitions.iter().enumerate() {
        let raw = &mut entries[i * 128..(i + 1) * 128];
        raw[0..16].copy_from_slice(&BASIC_DATA_GUID);
        raw[16] = i as u8 + 1;
        LittleEndian::write_u64(&mut raw[32..40], part.first_lba);
        LittleEndian::write_u64(&mut raw[40..48], part.last_lba);
        for (j, unit) in part.name.encode_utf16().enumerate() {
            LittleEndian::write_u16(&mut raw[56 + j * 2..58 + j * 2], unit);
        }
    }
    let entries_crc = crc32fast::hash(&entries);
    image[2 * SECTOR..2 * SECTOR + entries.len()].copy_from_slice(&entries);

    let header = gpt_header(1, last_lba, last_lba, entries_crc);
    image[SECTOR..2 * SECTOR].copy_from_slice(&header);
    image
}

/// GPT header sector at `current`, entries at LBA 2
pub fn gpt_header(current: u64, backup: u64, last_lba: u64, entries_crc: u32) -> Vec<u8> {
    let mut header = vec![0u8; SECTOR];
    header[0..8].copy_from_slice(b"EFI PART");
    LittleEndian::write_u32(&mut header[8..12], 0x0001_0000);
    LittleEndian::write_u32(&mut header[12..16], 92);
    LittleEndian::write_u64(&mut header[24..32], current);
    LittleEndian::write_u64(&mut header[32..40], backup);
    LittleEndian::write_u64(&mut header[40..48], 34);
    LittleEndian::write_u64(&mut header[48..56], last_lba.saturating_sub(34));
    LittleEndian::write_u64(&mut header[72..80], 2);
    LittleEndian::write_u32(&mut header[80..84], 128);
    LittleEndian::write_u32(&mut header[84..88], 128);
    LittleEndian::write_u32(&mut header[88..92], entries_crc);
    let crc = crc32fast::hash(&header[..92]);
    LittleEndian::write_u32(&mut header[16..20], crc);
    header
}

fn dir_entry(name: &[u8; 11], attr: u8, cluster: u16, size: u32) -> [u8; 32] {
    let mut e = [0u8; 32];
    e[0..11].copy_from_slice(name);
    e[11] = attr;
    LittleEndian::write_u16(&mut e[26..28], cluster);
    LittleEndian::write_u32(&mut e[28..32], size);
    e
}

/// Deleted long-name entries in on-disk order (last part first)
fn deleted_lfn(name: &str) -> Vec<[u8; 32]> {
    let offsets = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];
    let mut units: Vec<u16> = name.encode_utf16().collect();
    units.push(0);
    units.resize(units.len().next_multiple_of(13), 0xFFFF);
    units
        .chunks(13)
        .rev()
        .map(|chunk| {
            let mut e = [0u8; 32];
            e[0] = 0xE5;
            e[11] = 0x0F;
            e[13] = 0x2A;
            for (unit, offset) in chunk.iter().zip(offsets) {
                LittleEndian::write_u16(&mut e[offset..offset + 2], *unit);
            }
            e
        })
        .collect()
}

/// A deleted file placed in a FAT12 image
pub struct DeletedFile<'a> {
    pub long_name: &'a str,
    pub short_name: &'a [u8; 11],
    pub cluster: u16,
    pub content: &'a [u8],
}

/// FAT12 volume of `sectors` sectors: one reserved sector, one FAT at
/// sector 1, a one-sector root directory at sector 2 and cluster N at
/// sector N + 1
pub fn fat12_image(sectors: u16, files: &[DeletedFile<'_>]) -> Vec<u8> {
    let mut image = vec![0u8; sectors as usize * SECTOR];
    image[0] = 0xEB;
    image[1] = 0x3C;
    image[2] = 0x90;
    image[3..11].copy_from_slice(b"MSDOS5.0");
    LittleEndian::write_u16(&mut image[11..13], 512);
    image[13] = 1;
    LittleEndian::write_u16(&mut image[14..16], 1);
    image[16] = 1;
    LittleEndian::write_u16(&mut image[17..19], 16);
    LittleEndian::write_u16(&mut image[19..21], sectors);
    LittleEndian::write_u16(&mut image[22..24], 1);
    boot_signature(&mut image[..SECTOR]);

    image[SECTOR] = 0xF8;
    image[SECTOR + 1] = 0xFF;
    image[SECTOR + 2] = 0xFF;

    let mut root: Vec<[u8; 32]> = Vec::new();
    for file in files {
        root.extend(deleted_lfn(file.long_name));
        root.push(dir_entry(file.short_name, 0x20, file.cluster, file.content.len() as u32));
        place(&mut image, file.cluster as usize + 1, file.content);
    }
    assert!(root.len() <= 16, "root directory holds 16 entries");
    for (i, e) in root.iter().enumerate() {
        let offset = 2 * SECTOR + i * 32;
        image[offset..offset + 32].copy_from_slice(e);
    }
    image
}
