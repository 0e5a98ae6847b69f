//! NTFS volume interpreter
//!
//! Walks the Master File Table and yields records for entries whose
//! in-use flag is cleared. Deleted entries keep their attributes until
//! the slot is reused, so the name, parent and data runs are usually
//! still there.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::boot_sector::NtfsBootSector;
use super::mft::{DataAttribute, DataRun, FileName, MftRecord, ROOT_RECORD};
use crate::domain::entities::{Extent, FileRecord, FileSystemType, Volume};
use crate::domain::repositories::{
    BlockDevice, FileSystemError, InterpreterOptions, RecordIter, VolumeInterpreter,
};
use crate::infrastructure::file_systems::VolumeReader;

/// Records below this number belong to the file system itself
const FIRST_USER_RECORD: u64 = 16;
const BITMAP_RECORD: u64 = 6;
const MAX_PATH_DEPTH: usize = 64;
const ORPHAN_DIR: &str = "/$Orphan";

pub struct NtfsInterpreter {
    reader: VolumeReader,
    volume: Volume,
    boot: NtfsBootSector,
    mft_runs: Vec<DataRun>,
    record_count: u64,
    /// $Bitmap contents, one bit per cluster
    bitmap: Option<Vec<u8>>,
    options: InterpreterOptions,
    dir_paths: Mutex<HashMap<u64, String>>,
}

impl NtfsInterpreter {
    /// Reads the boot sector, the $MFT runs and the cluster bitmap
    pub fn open(
        device: Arc<dyn BlockDevice>,
        volume: &Volume,
        options: InterpreterOptions,
    ) -> Result<Self, FileSystemError> {
        let reader = VolumeReader::new(device, volume);
        let boot = NtfsBootSector::parse(&reader.read(0, 512)?)?;
        let record_size = boot.mft_record_size();
        let cluster_size = boot.cluster_size();

        let mut raw = reader.read(boot.mft_offset(), record_size as usize)?;
        let mft = MftRecord::parse(0, &mut raw, boot.bytes_per_sector as usize, boot.mft_offset())?
            .ok_or_else(|| FileSystemError::corrupt(boot.mft_offset(), "$MFT record missing"))?;
        let (mft_runs, mft_size) = match mft.data {
            Some(DataAttribute::NonResident { runs, real_size }) => (runs, real_size),
            _ => {
                return Err(FileSystemError::corrupt(
                    boot.mft_offset(),
                    "$MFT has no non-resident data",
                ));
            }
        };

        let covered = mft_runs.iter().map(|r| r.length).sum::<u64>().saturating_mul(cluster_size);
        let record_count = (mft_size / record_size).min(covered / record_size);
        if record_count < mft_size / record_size {
            tracing::warn!(
                "Volume {}: $MFT continues in extension records, reading first {} entries",
                volume.index,
                record_count
            );
        }

        let mut interpreter = Self {
            reader,
            volume: volume.clone(),
            boot,
            mft_runs,
            record_count,
            bitmap: None,
            options,
            dir_paths: Mutex::new(HashMap::new()),
        };
        interpreter.bitmap = match interpreter.load_bitmap() {
            Ok(bitmap) => bitmap,
            Err(e) => {
                tracing::warn!(
                    "Volume {}: cannot read $Bitmap ({}), cluster reuse is not checked",
                    volume.index,
                    e
                );
                None
            }
        };

        tracing::info!(
            "NTFS volume {}: {} MFT records of {} bytes, cluster size {}",
            volume.index,
            record_count,
            record_size,
            cluster_size
        );
        Ok(interpreter)
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    fn load_bitmap(&self) -> Result<Option<Vec<u8>>, FileSystemError> {
        let Some(record) = self.read_record(BITMAP_RECORD)? else {
            return Ok(None);
        };
        let wanted = self.boot.total_clusters().div_ceil(8);
        match record.data {
            Some(DataAttribute::Resident(bytes)) => Ok(Some(bytes)),
            Some(DataAttribute::NonResident { runs, real_size }) => {
                let len = real_size.min(wanted) as usize;
                Ok(Some(self.read_runs(&runs, 0, len)?))
            }
            None => Ok(None),
        }
    }

    /// Reads `len` bytes at `offset` of a non-resident stream
    fn read_runs(&self, runs: &[DataRun], offset: u64, len: usize) -> Result<Vec<u8>, FileSystemError> {
        let cluster_size = self.boot.cluster_size();
        let end = offset + len as u64;
        let mut out = Vec::with_capacity(len);
        let mut pos = offset;
        let mut run_start = 0u64;

        for run in runs {
            let run_end = run_start + run.length.saturating_mul(cluster_size);
            if pos < run_end {
                let take = (run_end.min(end) - pos) as usize;
                match run.lcn {
                    Some(lcn) => {
                        let at = lcn.saturating_mul(cluster_size).saturating_add(pos - run_start);
                        out.extend_from_slice(&self.reader.read(at, take)?);
                    }
                    None => out.resize(out.len() + take, 0),
                }
                pos += take as u64;
            }
            if pos >= end {
                return Ok(out);
            }
            run_start = run_end;
        }
        Err(FileSystemError::corrupt(offset, "read past the end of a data run list"))
    }

    fn read_record(&self, number: u64) -> Result<Option<MftRecord>, FileSystemError> {
        let record_size = self.boot.mft_record_size();
        let offset = number * record_size;
        let mut raw = self.read_runs(&self.mft_runs, offset, record_size as usize)?;
        MftRecord::parse(number, &mut raw, self.boot.bytes_per_sector as usize, offset)
    }

    /// Builds the record for one MFT entry, `None` when it is not a candidate
    fn file_record(&self, number: u64) -> Result<Option<FileRecord>, FileSystemError> {
        let Some(record) = self.read_record(number)? else {
            return Ok(None);
        };
        if !record.is_base() || record.is_directory() {
            return Ok(None);
        }
        let deleted = !record.is_in_use();
        if !deleted && !self.options.include_live {
            return Ok(None);
        }
        let Some(name) = record.best_name() else {
            return Ok(None);
        };
        let path = self.full_path(name);

        match record.data {
            None => {
                tracing::debug!("MFT record {} ({}) has no unnamed data stream", number, path);
                Ok(None)
            }
            Some(DataAttribute::Resident(bytes)) => Ok(Some(
                FileRecord::from_metadata(self.volume.index, number, path, Vec::new(), 0, deleted)
                    .with_resident_data(Bytes::from(bytes)),
            )),
            Some(DataAttribute::NonResident { runs, real_size }) => {
                self.non_resident_record(number, path, &runs, real_size, deleted)
            }
        }
    }

    fn non_resident_record(
        &self,
        number: u64,
        path: String,
        runs: &[DataRun],
        real_size: u64,
        deleted: bool,
    ) -> Result<Option<FileRecord>, FileSystemError> {
        let cluster_size = self.boot.cluster_size();
        let needed_clusters = real_size.div_ceil(cluster_size);
        let mut extents = Vec::with_capacity(runs.len());
        let mut clusters = 0u64;

        for run in runs {
            if clusters >= needed_clusters {
                break;
            }
            let Some(lcn) = run.lcn else {
                tracing::debug!("MFT record {} ({}) is sparse, skipped", number, path);
                return Ok(None);
            };
            if deleted && !self.clusters_free(lcn, run.length.min(needed_clusters - clusters)) {
                tracing::debug!("Clusters of deleted {} were reallocated, skipped", path);
                return Ok(None);
            }
            extents.push(self.reader.extent(
                lcn.saturating_mul(cluster_size),
                run.length.saturating_mul(cluster_size),
            )?);
            clusters += run.length;
        }

        if clusters < needed_clusters {
            tracing::debug!(
                "MFT record {} ({}) maps {} of {} clusters, skipped",
                number,
                path,
                clusters,
                needed_clusters
            );
            return Ok(None);
        }

        let extents = self.reader.clip_extents(extents, real_size);
        Ok(Some(FileRecord::from_metadata(
            self.volume.index,
            number,
            path,
            extents,
            real_size,
            deleted,
        )))
    }

    /// True when no cluster of the run is marked allocated
    fn clusters_free(&self, lcn: u64, length: u64) -> bool {
        let Some(bitmap) = &self.bitmap else {
            return true;
        };
        (lcn..lcn.saturating_add(length)).all(|cluster| {
            bitmap
                .get((cluster / 8) as usize)
                .is_some_and(|byte| byte & (1 << (cluster % 8)) == 0)
        })
    }

    fn full_path(&self, name: &FileName) -> String {
        format!("{}/{}", self.directory_path(name.parent), name.name)
    }

    /// Path of a directory record, "" for the root
    fn directory_path(&self, record: u64) -> String {
        let mut chain: Vec<(u64, String)> = Vec::new();
        let mut current = record;

        let prefix = loop {
            if current == ROOT_RECORD {
                break String::new();
            }
            if let Some(path) = self.dir_paths.lock().get(&current) {
                break path.clone();
            }
            if chain.len() >= MAX_PATH_DEPTH || chain.iter().any(|(r, _)| *r == current) {
                break ORPHAN_DIR.to_string();
            }
            match self.directory_name(current) {
                Some(name) => {
                    chain.push((current, name.name));
                    current = name.parent;
                }
                None => break ORPHAN_DIR.to_string(),
            }
        };

        let mut path = prefix;
        let mut cache = self.dir_paths.lock();
        for (record, name) in chain.into_iter().rev() {
            path = format!("{path}/{name}");
            cache.insert(record, path.clone());
        }
        path
    }

    fn directory_name(&self, record: u64) -> Option<FileName> {
        match self.read_record(record) {
            Ok(Some(entry)) if entry.is_directory() => entry.best_name().cloned(),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("Parent directory record {} unreadable: {}", record, e);
                None
            }
        }
    }
}

impl VolumeInterpreter for NtfsInterpreter {
    fn file_system(&self) -> FileSystemType {
        FileSystemType::Ntfs
    }

    fn volume(&self) -> &Volume {
        &self.volume
    }

    fn enumerate_files(&self) -> RecordIter<'_> {
        Box::new(MftEntries {
            interpreter: self,
            next: FIRST_USER_RECORD,
        })
    }
}

struct MftEntries<'a> {
    interpreter: &'a NtfsInterpreter,
    next: u64,
}

impl Iterator for MftEntries<'_> {
    type Item = Result<FileRecord, FileSystemError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.interpreter.record_count {
            let number = self.next;
            self.next += 1;
            match self.interpreter.file_record(number) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::PartitionScheme;
    use crate::infrastructure::block_device::MemoryBlockDevice;
    use byteorder::{ByteOrder, LittleEndian};

    const RECORD_SIZE: usize = 1024;
    const MFT_LCN: usize = 4;

    fn resident(attr_type: u32, value: &[u8]) -> Vec<u8> {
        let len = (24 + value.len()).next_multiple_of(8);
        let mut attr = vec![0u8; len];
        LittleEndian::write_u32(&mut attr[0..4], attr_type);
        LittleEndian::write_u32(&mut attr[4..8], len as u32);
        LittleEndian::write_u32(&mut attr[16..20], value.len() as u32);
        LittleEndian::write_u16(&mut attr[20..22], 24);
        attr[24..24 + value.len()].copy_from_slice(value);
        attr
    }

    fn file_name(parent: u64, name: &str) -> Vec<u8> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let mut value = vec![0u8; 66 + units.len() * 2];
        LittleEndian::write_u64(&mut value[0..8], parent);
        value[64] = units.len() as u8;
        value[65] = super::super::mft::NAMESPACE_WIN32;
        for (i, unit) in units.iter().enumerate() {
            LittleEndian::write_u16(&mut value[66 + i * 2..68 + i * 2], *unit);
        }
        resident(0x30, &value)
    }

    fn non_resident_data(runlist: &[u8], real_size: u64) -> Vec<u8> {
        let len = (64 + runlist.len()).next_multiple_of(8);
        let mut attr = vec![0u8; len];
        LittleEndian::write_u32(&mut attr[0..4], 0x80);
        LittleEndian::write_u32(&mut attr[4..8], len as u32);
        attr[8] = 1;
        LittleEndian::write_u16(&mut attr[32..34], 64);
        LittleEndian::write_u64(&mut attr[48..56], real_size);
        attr[64..64 + runlist.len()].copy_from_slice(runlist);
        attr
    }

    fn mft_record(flags: u16, attrs: &[Vec<u8>]) -> Vec<u8> {
        let mut record = vec![0u8; RECORD_SIZE];
        record[0..4].copy_from_slice(b"FILE");
        LittleEndian::write_u16(&mut record[4..6], 0x30);
        LittleEndian::write_u16(&mut record[6..8], 3);
        LittleEndian::write_u16(&mut record[0x14..0x16], 0x38);
        LittleEndian::write_u16(&mut record[0x16..0x18], flags);
        let mut pos = 0x38;
        for attr in attrs {
            record[pos..pos + attr.len()].copy_from_slice(attr);
            pos += attr.len();
        }
        LittleEndian::write_u32(&mut record[pos..pos + 4], 0xFFFF_FFFF);
        LittleEndian::write_u32(&mut record[0x18..0x1C], (pos + 8) as u32);
        // Update sequence number 1; the saved tails stay zero
        record[0x30] = 1;
        record[510] = 1;
        record[1022] = 1;
        record
    }

    /// 64 sectors, 512-byte clusters, 18 MFT records at cluster 4
    fn ntfs_image() -> Vec<u8> {
        let mut image = vec![0u8; 64 * 512];
        image[3..11].copy_from_slice(b"NTFS    ");
        LittleEndian::write_u16(&mut image[11..13], 512);
        image[13] = 1;
        LittleEndian::write_u64(&mut image[40..48], 64);
        LittleEndian::write_u64(&mut image[48..56], MFT_LCN as u64);
        LittleEndian::write_u64(&mut image[56..64], 32);
        image[64] = 0xF6;
        image[510] = 0x55;
        image[511] = 0xAA;

        let mft_start = MFT_LCN * 512;
        let mut put = |number: usize, record: Vec<u8>| {
            let at = mft_start + number * RECORD_SIZE;
            image[at..at + RECORD_SIZE].copy_from_slice(&record);
        };
        put(0, mft_record(1, &[non_resident_data(&[0x11, 36, MFT_LCN as u8, 0], 18 * 1024)]));
        put(16, mft_record(0, &[file_name(ROOT_RECORD, "a.txt"), resident(0x80, b"hello")]));
        put(17, mft_record(0, &[file_name(12, "b.bin"), non_resident_data(&[0x11, 2, 50, 0], 700)]));

        image[50 * 512..50 * 512 + 700].fill(0x5A);
        image
    }

    fn open_image(image: Vec<u8>) -> NtfsInterpreter {
        let device: Arc<dyn BlockDevice> = Arc::new(MemoryBlockDevice::new(image, 512));
        let mut volume = Volume::new(0, 0, 64, PartitionScheme::Whole);
        volume.file_system = FileSystemType::Ntfs;
        NtfsInterpreter::open(device, &volume, InterpreterOptions::default()).unwrap()
    }

    #[test]
    fn test_enumerates_deleted_entries() {
        let interpreter = open_image(ntfs_image());
        assert_eq!(interpreter.record_count(), 18);

        let records: Vec<FileRecord> = interpreter
            .enumerate_files()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].original_path.as_deref(), Some("/a.txt"));
        assert_eq!(records[0].resident_data, Some(Bytes::from_static(b"hello")));
        assert_eq!(records[0].size, 5);

        // Parent record 12 is not a directory
        assert_eq!(records[1].original_path.as_deref(), Some("/$Orphan/b.bin"));
        assert_eq!(records[1].extents, vec![Extent::new(50, 2)]);
        assert_eq!(records[1].size, 700);
        assert!(records[1].deleted);
        assert_eq!(records[1].extension, "bin");
    }

    #[test]
    fn test_torn_record_is_reported_and_enumeration_continues() {
        let mut image = ntfs_image();
        let record16 = MFT_LCN * 512 + 16 * RECORD_SIZE;
        image[record16 + 510] = 9;

        let interpreter = open_image(image);
        let items: Vec<_> = interpreter.enumerate_files().collect();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Err(FileSystemError::Corrupt { .. })));
        assert!(items[1].is_ok());
    }
}
