//! Serial file writer
//!
//! Copies the content of selected records from the device into the
//! output directory, one file at a time, on a dedicated thread. Each
//! file is hashed while it is written. Unreadable sectors are written as
//! zeros and the file is reported partial.

use crossbeam_channel::Sender;
use sha2::{Digest, Sha256};
use std::io::Write;

use crate::domain::entities::{FileRecord, IssueKind, RecoveredEntry, RecoveryIssue};
use crate::domain::repositories::{BlockDevice, BlockDeviceError, FileWriterError, RecoveredFileWriter};
use crate::domain::services::CancellationToken;

/// Bytes read from the device per step
pub const WRITE_CHUNK_BYTES: u64 = 1024 * 1024;

/// Progress of the writer thread, in record order
#[derive(Debug)]
pub enum WriteEvent {
    Written {
        entry: RecoveredEntry,
        bad_sectors: Vec<u64>,
    },
    Failed {
        record: FileRecord,
        issue: RecoveryIssue,
    },
    /// Cancellation was seen before this record was started
    Cancelled { remaining: Vec<FileRecord> },
}

#[derive(Debug, thiserror::Error)]
enum CopyError {
    #[error(transparent)]
    Device(#[from] BlockDeviceError),
    #[error(transparent)]
    Writer(#[from] FileWriterError),
}

pub struct WriterTask<'a> {
    device: &'a dyn BlockDevice,
    cancel: &'a CancellationToken,
}

impl<'a> WriterTask<'a> {
    pub fn new(device: &'a dyn BlockDevice, cancel: &'a CancellationToken) -> Self {
        Self { device, cancel }
    }

    /// Writes `records` in order, reporting each through `events`.
    ///
    /// Cancellation is checked between files; the file being written
    /// when it fires is completed.
    pub fn run(
        &self,
        writer: &mut dyn RecoveredFileWriter,
        records: Vec<FileRecord>,
        events: Sender<WriteEvent>,
    ) {
        let mut records = records.into_iter();
        while let Some(record) = records.next() {
            if self.cancel.is_cancelled() {
                let mut remaining = vec![record];
                remaining.extend(records);
                let _ = events.send(WriteEvent::Cancelled { remaining });
                return;
            }
            let event = self.write_record(writer, record);
            if events.send(event).is_err() {
                return;
            }
        }
    }

    /// Writes one record
    pub fn write_record(&self, writer: &mut dyn RecoveredFileWriter, record: FileRecord) -> WriteEvent {
        let preferred = record
            .original_name()
            .map(str::to_string)
            .unwrap_or_else(|| record.display_name());

        let mut out = match writer.create(&preferred) {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!("Cannot create output for {}: {}", preferred, e);
                let issue = RecoveryIssue::new(IssueKind::WriteFailure, e.to_string()).about(preferred);
                return WriteEvent::Failed { record, issue };
            }
        };

        let mut hasher = Sha256::new();
        let mut bad_sectors = Vec::new();
        let mut copied = {
            let sink = &mut out.sink;
            let mut feed = |chunk: &[u8]| {
                hasher.update(chunk);
                sink.write_all(chunk)
            };
            self.copy_content(&record, &mut feed, &mut bad_sectors)
        };
        if copied.is_ok() {
            copied = out
                .sink
                .flush()
                .map_err(|e| FileWriterError::from_io(&out.path, e).into());
        }

        let file_name = out.file_name.clone();
        let path = out.path.clone();
        drop(out);

        if let Err(e) = copied {
            tracing::warn!("Writing {} failed: {}", path.display(), e);
            if let Err(discard) = writer.discard(&file_name) {
                tracing::warn!("Cannot remove incomplete {}: {}", path.display(), discard);
            }
            let kind = match e {
                CopyError::Device(_) => IssueKind::Io,
                CopyError::Writer(_) => IssueKind::WriteFailure,
            };
            let mut issue = RecoveryIssue::new(kind, e.to_string()).about(file_name);
            if let CopyError::Device(device) = &e {
                issue.sector = device.failed_sector();
            }
            return WriteEvent::Failed { record, issue };
        }

        tracing::debug!(
            "Recovered {} ({} bytes{})",
            file_name,
            record.size,
            if bad_sectors.is_empty() { "" } else { ", partial" }
        );
        WriteEvent::Written {
            entry: RecoveredEntry {
                file_name,
                original_path: record.original_path.clone(),
                extension: record.extension.clone(),
                size: record.size,
                start_sector: record.first_sector(),
                confidence: record.confidence,
                low_confidence: record.low_confidence,
                deleted: record.deleted,
                bad_sectors: bad_sectors.len() as u64,
                sha256: hex::encode(hasher.finalize()),
            },
            bad_sectors,
        }
    }

    /// Feeds exactly `record.size` bytes of content to `sink`
    fn copy_content(
        &self,
        record: &FileRecord,
        sink: &mut dyn FnMut(&[u8]) -> std::io::Result<()>,
        bad_sectors: &mut Vec<u64>,
    ) -> Result<(), CopyError> {
        let write_err = |e: std::io::Error| CopyError::Writer(FileWriterError::Io {
            path: record.display_name(),
            source: e,
        });

        if let Some(data) = &record.resident_data {
            return sink(&data[..]).map_err(write_err);
        }

        let sector_size = self.device.sector_size() as u64;
        let chunk_sectors = (WRITE_CHUNK_BYTES / sector_size).max(1);
        let mut remaining = record.size;

        for extent in &record.extents {
            let mut sector = extent.start_sector;
            let end = extent.end_sector();
            while sector < end && remaining > 0 {
                let count = chunk_sectors.min(end - sector);
                let data = self.device.read_sectors_lenient(sector, count)?;
                let take = remaining.min(data.data.len() as u64);
                let used_sectors = take.div_ceil(sector_size);
                bad_sectors.extend(
                    data.bad_sectors
                        .into_iter()
                        .filter(|&bad| bad < sector + used_sectors),
                );
                sink(&data.data[..take as usize]).map_err(write_err)?;
                remaining -= take;
                sector += count;
            }
        }

        if remaining > 0 {
            return Err(CopyError::Device(BlockDeviceError::Other(format!(
                "extents of {} end {} bytes short",
                record.display_name(),
                remaining
            ))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Extent;
    use crate::infrastructure::block_device::MemoryBlockDevice;
    use crate::infrastructure::persistence::LocalFileWriter;
    use bytes::Bytes;
    use std::fs;
    use tempfile::TempDir;

    fn device() -> MemoryBlockDevice {
        let mut image = vec![0u8; 32 * 512];
        image[4 * 512..6 * 512].fill(0x41);
        image[10 * 512..11 * 512].fill(0x42);
        MemoryBlockDevice::new(image, 512)
    }

    #[test]
    fn test_fragmented_record_is_trimmed_to_size() {
        let device = device();
        let cancel = CancellationToken::new();
        let dir = TempDir::new().unwrap();
        let mut writer = LocalFileWriter::new(dir.path()).unwrap();
        let record = FileRecord::from_metadata(
            0,
            40,
            "/docs/split.txt",
            vec![Extent::new(4, 2), Extent::new(10, 1)],
            1200,
            true,
        );

        let WriteEvent::Written { entry, bad_sectors } =
            WriterTask::new(&device, &cancel).write_record(&mut writer, record)
        else {
            panic!("record was not written");
        };
        assert!(bad_sectors.is_empty());
        assert_eq!(entry.file_name, "split.txt");

        let content = fs::read(dir.path().join("split.txt")).unwrap();
        assert_eq!(content.len(), 1200);
        assert!(content[..1024].iter().all(|&b| b == 0x41));
        assert!(content[1024..].iter().all(|&b| b == 0x42));
        assert_eq!(entry.sha256, hex::encode(Sha256::digest(&content)));
    }

    #[test]
    fn test_bad_sector_is_zero_filled_and_reported() {
        let device = device().with_bad_sectors([5]);
        let cancel = CancellationToken::new();
        let dir = TempDir::new().unwrap();
        let mut writer = LocalFileWriter::new(dir.path()).unwrap();
        let record = FileRecord::from_signature(4, "bin", 1024, 512, false);

        let WriteEvent::Written { entry, bad_sectors } =
            WriterTask::new(&device, &cancel).write_record(&mut writer, record)
        else {
            panic!("record was not written");
        };
        assert_eq!(bad_sectors, vec![5]);
        assert!(entry.is_partial());

        let content = fs::read(dir.path().join("f4.bin")).unwrap();
        assert!(content[..512].iter().all(|&b| b == 0x41));
        assert!(content[512..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_resident_content_needs_no_device_reads() {
        let device = device();
        let cancel = CancellationToken::new();
        let dir = TempDir::new().unwrap();
        let mut writer = LocalFileWriter::new(dir.path()).unwrap();
        let record = FileRecord::from_metadata(0, 64, "/a.txt", vec![], 0, true)
            .with_resident_data(Bytes::from_static(b"hello"));

        let reads = device.read_count();
        let event = WriterTask::new(&device, &cancel).write_record(&mut writer, record);
        assert!(matches!(event, WriteEvent::Written { .. }));
        assert_eq!(device.read_count(), reads);
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"hello");
    }

    #[test]
    fn test_cancel_stops_before_next_file() {
        let device = device();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dir = TempDir::new().unwrap();
        let mut writer = LocalFileWriter::new(dir.path()).unwrap();
        let records = vec![
            FileRecord::from_signature(4, "bin", 512, 512, false),
            FileRecord::from_signature(10, "bin", 512, 512, false),
        ];

        let (tx, rx) = crossbeam_channel::unbounded();
        WriterTask::new(&device, &cancel).run(&mut writer, records, tx);
        let events: Vec<_> = rx.iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], WriteEvent::Cancelled { remaining } if remaining.len() == 2));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
