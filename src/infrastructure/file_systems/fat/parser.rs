//! FAT12/16/32 volume interpreter
//!
//! Deleting a file marks its directory slot with 0xE5 and zeroes its
//! cluster chain in the FAT. The first cluster and the size survive in
//! the slot, so a deleted file is rebuilt as a contiguous run starting
//! at its first cluster, provided none of those clusters was allocated
//! again.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::boot_sector::FatBootSector;
use super::directory::{DirEntry, ENTRY_SIZE, parse_directory};
use crate::domain::entities::{FileRecord, FileSystemType, Volume};
use crate::domain::repositories::{
    BlockDevice, FileSystemError, InterpreterOptions, RecordIter, VolumeInterpreter,
};
use crate::infrastructure::file_systems::VolumeReader;

/// Directories larger than this are treated as corrupt
const MAX_DIRECTORY_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
enum DirLocation {
    /// FAT12/16 root directory region
    FixedRoot,
    Chain(Vec<u32>),
}

struct PendingDir {
    path: String,
    location: DirLocation,
}

pub struct FatInterpreter {
    reader: VolumeReader,
    volume: Volume,
    boot: FatBootSector,
    fat_type: FileSystemType,
    fat: Vec<u8>,
    options: InterpreterOptions,
    directories_read: AtomicU64,
}

impl FatInterpreter {
    pub fn open(
        device: Arc<dyn BlockDevice>,
        volume: &Volume,
        options: InterpreterOptions,
    ) -> Result<Self, FileSystemError> {
        let reader = VolumeReader::new(device, volume);
        let boot = FatBootSector::parse(&reader.read(0, 512)?)?;
        let fat_type = boot.fat_type();
        let fat = reader.read(boot.fat_offset(), boot.fat_bytes() as usize)?;

        tracing::info!(
            "{} volume {}: {} clusters of {} bytes",
            fat_type,
            volume.index,
            boot.cluster_count(),
            boot.cluster_size()
        );
        Ok(Self {
            reader,
            volume: volume.clone(),
            boot,
            fat_type,
            fat,
            options,
            directories_read: AtomicU64::new(0),
        })
    }

    /// Number of directories read by enumerations so far
    pub fn directories_read(&self) -> u64 {
        self.directories_read.load(Ordering::Relaxed)
    }

    /// Raw FAT value for a cluster, `None` past the end of the table
    fn fat_entry(&self, cluster: u32) -> Option<u32> {
        let cluster = cluster as usize;
        match self.fat_type {
            FileSystemType::Fat12 => {
                let offset = cluster * 3 / 2;
                let pair = self.fat.get(offset..offset + 2)?;
                let pair = u16::from_le_bytes([pair[0], pair[1]]) as u32;
                Some(if cluster % 2 == 0 { pair & 0x0FFF } else { pair >> 4 })
            }
            FileSystemType::Fat16 => {
                let raw = self.fat.get(cluster * 2..cluster * 2 + 2)?;
                Some(u16::from_le_bytes([raw[0], raw[1]]) as u32)
            }
            _ => {
                let raw = self.fat.get(cluster * 4..cluster * 4 + 4)?;
                Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) & 0x0FFF_FFFF)
            }
        }
    }

    fn end_of_chain(&self) -> u32 {
        match self.fat_type {
            FileSystemType::Fat12 => 0x0FF8,
            FileSystemType::Fat16 => 0xFFF8,
            _ => 0x0FFF_FFF8,
        }
    }

    fn first_cluster(&self, entry: &DirEntry) -> u32 {
        // The high word holds extended attributes outside FAT32
        if self.fat_type == FileSystemType::Fat32 {
            entry.first_cluster
        } else {
            entry.first_cluster & 0xFFFF
        }
    }

    /// Follows a live cluster chain
    fn chain(&self, first: u32) -> Result<Vec<u32>, FileSystemError> {
        let limit = self.boot.cluster_count() as usize;
        let eoc = self.end_of_chain();
        let mut clusters = Vec::new();
        let mut cluster = first;

        loop {
            if !self.boot.is_valid_cluster(cluster) {
                return Err(FileSystemError::corrupt(
                    self.boot.fat_offset(),
                    format!("cluster chain from {first} reaches invalid cluster {cluster}"),
                ));
            }
            if clusters.len() >= limit {
                return Err(FileSystemError::corrupt(
                    self.boot.fat_offset(),
                    format!("cluster chain from {first} loops"),
                ));
            }
            clusters.push(cluster);
            match self.fat_entry(cluster) {
                Some(next) if next >= eoc => return Ok(clusters),
                Some(next) => cluster = next,
                None => {
                    return Err(FileSystemError::corrupt(
                        self.boot.fat_offset(),
                        format!("cluster {cluster} outside the FAT"),
                    ));
                }
            }
        }
    }

    fn read_directory(&self, location: &DirLocation) -> Result<Vec<u8>, FileSystemError> {
        self.directories_read.fetch_add(1, Ordering::Relaxed);
        match location {
            DirLocation::FixedRoot => {
                let (offset, len) = self.boot.root_dir_region();
                self.reader.read(offset, len as usize)
            }
            DirLocation::Chain(clusters) => {
                let cluster_size = self.boot.cluster_size();
                if clusters.len() as u64 * cluster_size > MAX_DIRECTORY_BYTES {
                    return Err(FileSystemError::corrupt(
                        self.boot.cluster_offset(clusters[0]),
                        format!("directory of {} clusters", clusters.len()),
                    ));
                }
                let mut data = Vec::with_capacity(clusters.len() * cluster_size as usize);
                for &cluster in clusters {
                    data.extend_from_slice(
                        &self.reader.read(self.boot.cluster_offset(cluster), cluster_size as usize)?,
                    );
                }
                Ok(data)
            }
        }
    }

    /// Entry number reported for a slot: its byte offset / 32
    fn slot_number(&self, location: &DirLocation, slot: usize) -> u64 {
        let byte = (slot * ENTRY_SIZE) as u64;
        let offset = match location {
            DirLocation::FixedRoot => self.boot.root_dir_region().0 + byte,
            DirLocation::Chain(clusters) => {
                let cluster_size = self.boot.cluster_size();
                let index = (byte / cluster_size) as usize;
                clusters
                    .get(index)
                    .map(|&c| self.boot.cluster_offset(c) + byte % cluster_size)
                    .unwrap_or_default()
            }
        };
        offset / ENTRY_SIZE as u64
    }

    fn file_record(
        &self,
        entry: &DirEntry,
        path: String,
        number: u64,
    ) -> Result<Option<FileRecord>, FileSystemError> {
        if !entry.deleted && !self.options.include_live {
            return Ok(None);
        }
        let size = entry.size as u64;
        if size == 0 {
            if entry.deleted {
                return Ok(None);
            }
            return Ok(Some(FileRecord::from_metadata(
                self.volume.index,
                number,
                path,
                Vec::new(),
                0,
                false,
            )));
        }

        let cluster_size = self.boot.cluster_size();
        let needed = size.div_ceil(cluster_size);
        let first = self.first_cluster(entry);

        let clusters: Vec<u32> = if entry.deleted {
            let last = first as u64 + needed - 1;
            if !self.boot.is_valid_cluster(first) || last >= self.boot.cluster_count() + 2 {
                tracing::debug!("Deleted {} points outside the data region, skipped", path);
                return Ok(None);
            }
            let run = first..=last as u32;
            if run.clone().any(|c| self.fat_entry(c) != Some(0)) {
                tracing::debug!("Clusters of deleted {} were reallocated, skipped", path);
                return Ok(None);
            }
            run.collect()
        } else {
            let chain = self.chain(first)?;
            if (chain.len() as u64) < needed {
                return Err(FileSystemError::corrupt(
                    self.boot.cluster_offset(first),
                    format!("{path}: chain of {} clusters holds less than {size} bytes", chain.len()),
                ));
            }
            chain
        };

        let extents = clusters
            .iter()
            .take(needed as usize)
            .map(|&c| self.reader.extent(self.boot.cluster_offset(c), cluster_size))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(FileRecord::from_metadata(
            self.volume.index,
            number,
            path,
            self.reader.clip_extents(extents, size),
            size,
            entry.deleted,
        )))
    }
}

impl VolumeInterpreter for FatInterpreter {
    fn file_system(&self) -> FileSystemType {
        self.fat_type
    }

    fn volume(&self) -> &Volume {
        &self.volume
    }

    fn enumerate_files(&self) -> RecordIter<'_> {
        let root = if self.fat_type == FileSystemType::Fat32 {
            match self.chain(self.boot.root_cluster) {
                Ok(clusters) => DirLocation::Chain(clusters),
                Err(e) => return Box::new(std::iter::once(Err(e))),
            }
        } else {
            DirLocation::FixedRoot
        };
        let mut visited = HashSet::new();
        if let DirLocation::Chain(clusters) = &root {
            visited.insert(clusters[0]);
        }
        Box::new(FatEntries {
            interpreter: self,
            directories: vec![PendingDir {
                path: String::new(),
                location: root,
            }],
            pending: VecDeque::new(),
            visited,
        })
    }
}

/// Depth-first walk over live directories
struct FatEntries<'a> {
    interpreter: &'a FatInterpreter,
    directories: Vec<PendingDir>,
    pending: VecDeque<Result<FileRecord, FileSystemError>>,
    visited: HashSet<u32>,
}

impl FatEntries<'_> {
    fn scan(&mut self, dir: PendingDir) {
        let fat = self.interpreter;
        let data = match fat.read_directory(&dir.location) {
            Ok(data) => data,
            Err(e) => {
                self.pending.push_back(Err(e));
                return;
            }
        };

        let mut subdirectories = Vec::new();
        for entry in parse_directory(&data) {
            let path = format!("{}/{}", dir.path, entry.name);
            if entry.is_directory {
                if entry.deleted {
                    continue;
                }
                let first = fat.first_cluster(&entry);
                if !self.visited.insert(first) {
                    continue;
                }
                match fat.chain(first) {
                    Ok(clusters) => subdirectories.push(PendingDir {
                        path,
                        location: DirLocation::Chain(clusters),
                    }),
                    Err(e) => self.pending.push_back(Err(e)),
                }
                continue;
            }

            let number = fat.slot_number(&dir.location, entry.slot);
            match fat.file_record(&entry, path, number) {
                Ok(Some(record)) => self.pending.push_back(Ok(record)),
                Ok(None) => {}
                Err(e) => self.pending.push_back(Err(e)),
            }
        }
        // Reverse so the stack visits subdirectories in on-disk order
        self.directories.extend(subdirectories.into_iter().rev());
    }
}

impl Iterator for FatEntries<'_> {
    type Item = Result<FileRecord, FileSystemError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            let dir = self.directories.pop()?;
            self.scan(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Extent, PartitionScheme};
    use crate::infrastructure::block_device::MemoryBlockDevice;
    use byteorder::{ByteOrder, LittleEndian};

    const ROOT: usize = 1024;

    fn entry(name: &[u8; 11], attr: u8, cluster: u16, size: u32) -> [u8; 32] {
        let mut e = [0u8; 32];
        e[0..11].copy_from_slice(name);
        e[11] = attr;
        LittleEndian::write_u16(&mut e[26..28], cluster);
        LittleEndian::write_u32(&mut e[28..32], size);
        e
    }

    /// Deleted LFN run in on-disk order (last part first)
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
                e[13] = 0x5C;
                for (unit, offset) in chunk.iter().zip(offsets) {
                    LittleEndian::write_u16(&mut e[offset..offset + 2], *unit);
                }
                e
            })
            .collect()
    }

    fn set_fat12(fat: &mut [u8], cluster: usize, value: u16) {
        let offset = cluster * 3 / 2;
        let mut pair = LittleEndian::read_u16(&fat[offset..offset + 2]);
        pair = if cluster % 2 == 0 {
            (pair & 0xF000) | (value & 0x0FFF)
        } else {
            (pair & 0x000F) | (value << 4)
        };
        LittleEndian::write_u16(&mut fat[offset..offset + 2], pair);
    }

    /// FAT12, 64 sectors, one FAT at sector 1, root at sector 2,
    /// cluster N at sector N + 1
    fn fat_image() -> Vec<u8> {
        let mut image = vec![0u8; 64 * 512];
        image[0] = 0xEB;
        LittleEndian::write_u16(&mut image[11..13], 512);
        image[13] = 1;
        LittleEndian::write_u16(&mut image[14..16], 1);
        image[16] = 1;
        LittleEndian::write_u16(&mut image[17..19], 16);
        LittleEndian::write_u16(&mut image[19..21], 64);
        LittleEndian::write_u16(&mut image[22..24], 1);

        let fat = &mut image[512..1024];
        set_fat12(fat, 0, 0xFF8);
        set_fat12(fat, 1, 0xFFF);
        set_fat12(fat, 10, 0xFFF);
        set_fat12(fat, 12, 0xFFF);

        let mut root: Vec<[u8; 32]> = deleted_lfn("holiday photo.jpg");
        root.push(entry(b"\xE5OLIDA~1JPG", 0x20, 5, 1000));
        root.push(entry(b"LIVE    TXT", 0x20, 10, 10));
        root.push(entry(b"\xE5SED    BIN", 0x20, 10, 100));
        root.push(entry(b"SUB        ", 0x10, 12, 0));
        for (i, e) in root.iter().enumerate() {
            image[ROOT + i * 32..ROOT + (i + 1) * 32].copy_from_slice(e);
        }

        let sub = 13 * 512;
        image[sub..sub + 32].copy_from_slice(&entry(b".          ", 0x10, 12, 0));
        image[sub + 32..sub + 64].copy_from_slice(&entry(b"..         ", 0x10, 0, 0));
        image[sub + 64..sub + 96].copy_from_slice(&entry(b"\xE5NNER   DAT", 0x20, 20, 512));
        image
    }

    fn open_image(include_live: bool) -> FatInterpreter {
        let device: Arc<dyn BlockDevice> = Arc::new(MemoryBlockDevice::new(fat_image(), 512));
        let mut volume = Volume::new(0, 0, 64, PartitionScheme::Whole);
        volume.file_system = FileSystemType::Fat12;
        FatInterpreter::open(device, &volume, InterpreterOptions { include_live }).unwrap()
    }

    #[test]
    fn test_deleted_files_rebuilt_from_first_cluster() {
        let fat = open_image(false);
        assert_eq!(fat.file_system(), FileSystemType::Fat12);

        let records: Vec<FileRecord> = fat.enumerate_files().collect::<Result<_, _>>().unwrap();
        let paths: Vec<_> = records.iter().map(|r| r.original_path.clone().unwrap()).collect();
        assert_eq!(paths, vec!["/holiday photo.jpg", "/SUB/_NNER.DAT"]);

        assert_eq!(records[0].extents, vec![Extent::new(6, 2)]);
        assert_eq!(records[0].size, 1000);
        assert_eq!(records[0].extension, "jpg");
        assert_eq!(records[1].extents, vec![Extent::new(21, 1)]);
        assert_eq!(fat.directories_read(), 2);
    }

    #[test]
    fn test_live_files_follow_the_chain() {
        let fat = open_image(true);
        let records: Vec<FileRecord> = fat.enumerate_files().collect::<Result<_, _>>().unwrap();
        let live: Vec<_> = records.iter().filter(|r| !r.deleted).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].original_path.as_deref(), Some("/LIVE.TXT"));
        assert_eq!(live[0].extents, vec![Extent::new(11, 1)]);
    }

    #[test]
    fn test_enumeration_is_lazy() {
        let fat = open_image(false);
        let first = fat.enumerate_files().next().unwrap().unwrap();
        assert_eq!(first.original_path.as_deref(), Some("/holiday photo.jpg"));
        assert_eq!(fat.directories_read(), 1);
    }
}
