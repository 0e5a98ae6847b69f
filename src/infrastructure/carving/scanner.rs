//! Sector-aligned signature scanner
//!
//! Matching and resolution are split so the scan pipeline can match
//! headers on chunks in parallel. `SignatureScan` combines both into a
//! lazy iterator that can be stopped and resumed at any sector.

use std::collections::VecDeque;

use super::window::{CarveAbort, CarveWindow};
use super::{FileCarver, default_carvers};
use crate::domain::entities::{Extent, ExtensionSet, FileFormat, FileRecord, SignatureMatch};
use crate::domain::repositories::BlockDevice;
use crate::domain::services::{CancellationToken, SignatureRegistry};

/// Bytes handed to header validation
pub const HEAD_BYTES: usize = 4096;
/// Sectors read per step of a `SignatureScan`
const SCAN_CHUNK_SECTORS: u64 = 2048;

/// Result of resolving one header hit
#[derive(Debug, Default)]
pub struct Resolved {
    /// `None` when the hit was rejected
    pub record: Option<FileRecord>,
    /// Unreadable sectors met while measuring
    pub bad_sectors: Vec<u64>,
}

pub struct SignatureScanner {
    registry: SignatureRegistry,
    carvers: Vec<Box<dyn FileCarver>>,
    targets: ExtensionSet,
    max_carve_bytes: u64,
}

impl SignatureScanner {
    /// Scanner for `targets` (empty = every format); unterminated files
    /// are capped at `max_carve_bytes`
    pub fn new(registry: SignatureRegistry, targets: ExtensionSet, max_carve_bytes: u64) -> Self {
        Self {
            registry: registry.restricted_to(&targets),
            carvers: default_carvers(),
            targets,
            max_carve_bytes,
        }
    }

    pub fn registry(&self) -> &SignatureRegistry {
        &self.registry
    }

    /// True when no format can produce a target extension
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    fn carver(&self, format: FileFormat) -> Option<&dyn FileCarver> {
        self.carvers
            .iter()
            .find(|c| c.formats().contains(&format))
            .map(|c| c.as_ref())
    }

    /// Headers found at the start of each sector of `chunk`.
    ///
    /// Validation runs here when the chunk holds enough bytes after the
    /// sector; otherwise it is left to `resolve`.
    pub fn header_hits(&self, first_sector: u64, chunk: &[u8], sector_size: usize) -> Vec<SignatureMatch> {
        let mut hits = Vec::new();
        for (index, offset) in (0..chunk.len()).step_by(sector_size).enumerate() {
            let data = &chunk[offset..];
            for signature in self.registry.find_at_start(data) {
                let head = &data[..data.len().min(HEAD_BYTES)];
                let valid = head.len() < HEAD_BYTES
                    || self
                        .carver(signature.format())
                        .is_some_and(|c| c.validate(signature.format(), head));
                if valid {
                    hits.push(SignatureMatch {
                        format: signature.format(),
                        sector: first_sector + index as u64,
                        max_size: signature.max_size(),
                    });
                }
            }
        }
        hits
    }

    /// Measures a hit into a record, or rejects it
    pub fn resolve(
        &self,
        device: &dyn BlockDevice,
        hit: &SignatureMatch,
        cancel: &CancellationToken,
    ) -> Result<Resolved, CarveAbort> {
        let mut window = CarveWindow::new(device, cancel);
        let sector_size = device.sector_size();
        let start = hit.sector * sector_size as u64;
        let Some(carver) = self.carver(hit.format) else {
            return Ok(Resolved::default());
        };

        let head = window.slice(start, HEAD_BYTES)?;
        if !carver.validate(hit.format, &head) {
            return Ok(Resolved {
                record: None,
                bad_sectors: window.into_bad_sectors(),
            });
        }

        let limit = hit
            .max_size
            .min(self.max_carve_bytes)
            .min(window.len().saturating_sub(start));
        let measured = carver.measure(hit.format, &mut window, start, start + limit)?;

        let record = measured.and_then(|m| {
            let (size, low_confidence) = match m.size {
                Some(0) => return None,
                Some(size) if size <= limit => (size, m.low_confidence),
                _ => (limit, true),
            };
            let extension = m.extension.unwrap_or(hit.format.default_extension());
            if !self.targets.matches(extension) {
                tracing::debug!("{} at sector {} is not a target, dropped", extension, hit.sector);
                return None;
            }
            Some(FileRecord::from_signature(
                hit.sector,
                extension,
                size,
                sector_size,
                low_confidence,
            ))
        });

        if let Some(record) = &record {
            tracing::debug!(
                "Carved {} at sector {} ({} bytes{})",
                record.extension,
                hit.sector,
                record.size,
                if record.low_confidence { ", capped" } else { "" }
            );
        }
        Ok(Resolved {
            record,
            bad_sectors: window.into_bad_sectors(),
        })
    }

    /// Lazy scan of `region` in sector order
    pub fn scan<'a>(
        &'a self,
        device: &'a dyn BlockDevice,
        region: Extent,
        cancel: &'a CancellationToken,
    ) -> SignatureScan<'a> {
        let region_end = region.end_sector().min(device.total_sectors());
        SignatureScan {
            scanner: self,
            device,
            cancel,
            region_start: region.start_sector,
            region_end,
            next_sector: region.start_sector,
            pending: VecDeque::new(),
            bad_sectors: Vec::new(),
            finished: false,
        }
    }
}

/// Iterator over carved records of one region.
///
/// Yields `Err(CarveAbort::Cancelled)` once when the token fires and
/// then ends; `position()` is where a new scan would pick up.
pub struct SignatureScan<'a> {
    scanner: &'a SignatureScanner,
    device: &'a dyn BlockDevice,
    cancel: &'a CancellationToken,
    region_start: u64,
    region_end: u64,
    next_sector: u64,
    pending: VecDeque<SignatureMatch>,
    bad_sectors: Vec<u64>,
    finished: bool,
}

impl SignatureScan<'_> {
    /// First sector whose records have not been yielded yet
    pub fn position(&self) -> u64 {
        self.pending
            .front()
            .map(|hit| hit.sector)
            .unwrap_or(self.next_sector)
    }

    /// Restarts the scan at `sector`
    pub fn resume_at(&mut self, sector: u64) {
        self.pending.clear();
        self.next_sector = sector.clamp(self.region_start, self.region_end);
        self.finished = false;
    }

    /// Unreadable sectors met so far
    pub fn bad_sectors(&self) -> &[u64] {
        &self.bad_sectors
    }

    pub fn is_finished(&self) -> bool {
        self.finished || (self.pending.is_empty() && self.next_sector >= self.region_end)
    }

    fn fail(&mut self, abort: CarveAbort) -> Option<Result<FileRecord, CarveAbort>> {
        self.finished = true;
        Some(Err(abort))
    }
}

impl Iterator for SignatureScan<'_> {
    type Item = Result<FileRecord, CarveAbort>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(hit) = self.pending.front().copied() {
                match self.scanner.resolve(self.device, &hit, self.cancel) {
                    Ok(resolved) => {
                        self.pending.pop_front();
                        self.bad_sectors.extend(resolved.bad_sectors);
                        if let Some(record) = resolved.record {
                            return Some(Ok(record));
                        }
                        continue;
                    }
                    Err(abort) => return self.fail(abort),
                }
            }

            if self.next_sector >= self.region_end {
                return None;
            }
            if self.cancel.is_cancelled() {
                return self.fail(CarveAbort::Cancelled);
            }
            let count = SCAN_CHUNK_SECTORS.min(self.region_end - self.next_sector);
            let chunk = match self.device.read_sectors_lenient(self.next_sector, count) {
                Ok(chunk) => chunk,
                Err(e) => return self.fail(e.into()),
            };
            self.bad_sectors.extend(chunk.bad_sectors);
            let sector_size = self.device.sector_size() as usize;
            self.pending
                .extend(self.scanner.header_hits(self.next_sector, &chunk.data, sector_size));
            self.next_sector += count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::block_device::MemoryBlockDevice;

    fn scanner(targets: &str) -> SignatureScanner {
        SignatureScanner::new(
            SignatureRegistry::default_formats(),
            targets.parse().unwrap(),
            1024 * 1024,
        )
    }

    fn gif(len: usize) -> Vec<u8> {
        let mut gif = b"GIF89a\x10\x00\x10\x00".to_vec();
        gif.resize(len - 2, 0x44);
        gif.extend_from_slice(&[0x00, 0x3B]);
        gif
    }

    fn image_with_gifs() -> Vec<u8> {
        let mut image = vec![0u8; 64 * 512];
        image[512..512 + 700].copy_from_slice(&gif(700));
        image[20 * 512..20 * 512 + 100].copy_from_slice(&gif(100));
        image
    }

    #[test]
    fn test_scan_yields_records_in_sector_order() {
        let device = MemoryBlockDevice::new(image_with_gifs(), 512);
        let cancel = CancellationToken::new();
        let scanner = scanner("");
        let records: Vec<FileRecord> = scanner
            .scan(&device, Extent::new(0, 64), &cancel)
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].extents, vec![Extent::new(1, 2)]);
        assert_eq!(records[0].size, 700);
        assert_eq!(records[1].first_sector(), Some(20));
        assert_eq!(records[1].size, 100);
    }

    #[test]
    fn test_scan_resumes_from_position() {
        let device = MemoryBlockDevice::new(image_with_gifs(), 512);
        let cancel = CancellationToken::new();
        let scanner = scanner("gif");
        let mut scan = scanner.scan(&device, Extent::new(0, 64), &cancel);

        let first = scan.next().unwrap().unwrap();
        assert_eq!(first.first_sector(), Some(1));
        let position = scan.position();
        assert_eq!(position, 20);

        let mut resumed = scanner.scan(&device, Extent::new(0, 64), &cancel);
        resumed.resume_at(position);
        let rest: Vec<_> = resumed.collect::<Result<_, _>>().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].first_sector(), Some(20));
    }

    #[test]
    fn test_untargeted_formats_are_not_matched() {
        let device = MemoryBlockDevice::new(image_with_gifs(), 512);
        let cancel = CancellationToken::new();
        let scanner = scanner("png");
        assert_eq!(scanner.scan(&device, Extent::new(0, 64), &cancel).count(), 0);
    }

    #[test]
    fn test_cancelled_scan_reports_once() {
        let device = MemoryBlockDevice::new(image_with_gifs(), 512);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scanner = scanner("");
        let items: Vec<_> = scanner.scan(&device, Extent::new(0, 64), &cancel).collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(CarveAbort::Cancelled)));
    }
}
