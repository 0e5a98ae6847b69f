//! Parallel signature scan
//!
//! One reader thread streams sector chunks through a bounded channel.
//! Each chunk is matched and its hits resolved as a task on a rayon
//! pool; the coordinator (the calling thread) puts the chunk results
//! back into sector order before handing them on, so the records come
//! out exactly as a sequential scan would produce them.

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use std::collections::BTreeMap;
use std::thread;

use crate::domain::entities::{Extent, FileRecord, IssueKind, RecoveryIssue};
use crate::domain::repositories::BlockDevice;
use crate::domain::services::CancellationToken;
use crate::infrastructure::carving::{CarveAbort, SignatureScanner};

/// Chunks waiting in the channel per worker
const CHUNKS_PER_WORKER: usize = 2;

struct Chunk {
    seq: u64,
    first_sector: u64,
    sector_count: u64,
    data: Vec<u8>,
    bad_sectors: Vec<u64>,
}

/// What one chunk produced
struct ChunkResult {
    seq: u64,
    end_sector: u64,
    sector_count: u64,
    records: Vec<FileRecord>,
    bad_sectors: Vec<u64>,
    issues: Vec<RecoveryIssue>,
    /// Cancellation was seen part way; `records` is a prefix
    cancelled: bool,
}

/// What the reader thread ended with
enum ReaderEnd {
    Finished,
    Cancelled,
    Failed(RecoveryIssue),
}

/// Result of a whole scan
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Records in sector order
    pub records: Vec<FileRecord>,
    pub bad_sectors: Vec<u64>,
    pub issues: Vec<RecoveryIssue>,
    /// Sectors whose results were fully delivered
    pub sectors_scanned: u64,
    pub cancelled: bool,
}

/// Scan tuning
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub chunk_sectors: u64,
    pub workers: usize,
    pub progress_interval_sectors: u64,
}

pub struct ScanPipeline<'a> {
    scanner: &'a SignatureScanner,
    options: PipelineOptions,
}

impl<'a> ScanPipeline<'a> {
    pub fn new(scanner: &'a SignatureScanner, options: PipelineOptions) -> Self {
        Self { scanner, options }
    }

    /// Scans `regions` in order.
    ///
    /// `on_progress` receives the delivered sector count and the number
    /// of records so far, at most once per progress interval.
    pub fn run(
        &self,
        device: &dyn BlockDevice,
        regions: &[Extent],
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(u64, usize),
    ) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        if self.scanner.is_empty() {
            tracing::info!("No signature can produce a target extension, scan skipped");
            return outcome;
        }

        let workers = self.options.workers.max(1);
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("scan-worker-{i}"))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                outcome.issues.push(RecoveryIssue::new(
                    IssueKind::Io,
                    format!("Cannot start scan workers: {e}"),
                ));
                return outcome;
            }
        };

        let max_in_flight = workers * CHUNKS_PER_WORKER;
        let (chunk_tx, chunk_rx) = bounded::<Chunk>(max_in_flight);
        let (result_tx, result_rx) = unbounded::<ChunkResult>();
        let chunk_sectors = self.options.chunk_sectors.max(1);

        thread::scope(|threads| {
            let reader = thread::Builder::new()
                .name("scan-reader".to_string())
                .spawn_scoped(threads, || read_chunks(device, regions, chunk_sectors, cancel, chunk_tx));
            let reader = match reader {
                Ok(handle) => handle,
                Err(e) => {
                    outcome.issues.push(RecoveryIssue::new(
                        IssueKind::Io,
                        format!("Cannot start scan reader: {e}"),
                    ));
                    return;
                }
            };

            pool.in_place_scope(|scope| {
                let mut coordinator = Coordinator::new(&mut outcome, self.options.progress_interval_sectors);
                let mut in_flight = 0usize;
                let mut reader_done = false;

                while !(reader_done && in_flight == 0) {
                    let next = if reader_done || in_flight >= max_in_flight {
                        Event::Result(result_rx.recv().ok())
                    } else {
                        wait_for_event(&chunk_rx, &result_rx)
                    };
                    match next {
                        Event::Chunk(Some(chunk)) => {
                            in_flight += 1;
                            let result_tx = result_tx.clone();
                            let scanner = self.scanner;
                            scope.spawn(move |_| {
                                let result = process_chunk(scanner, device, chunk, cancel);
                                let _ = result_tx.send(result);
                            });
                        }
                        Event::Chunk(None) => reader_done = true,
                        Event::Result(Some(result)) => {
                            in_flight -= 1;
                            coordinator.accept(result, on_progress);
                        }
                        Event::Result(None) => break,
                    }
                }
            });

            match reader.join() {
                Ok(ReaderEnd::Finished) => {}
                Ok(ReaderEnd::Cancelled) => outcome.cancelled = true,
                Ok(ReaderEnd::Failed(issue)) => outcome.issues.push(issue),
                Err(_) => outcome.issues.push(RecoveryIssue::new(
                    IssueKind::Io,
                    "Scan reader thread panicked",
                )),
            }
        });

        outcome.bad_sectors.sort_unstable();
        outcome.bad_sectors.dedup();
        tracing::info!(
            "Signature scan {}: {} records over {} sectors",
            if outcome.cancelled { "cancelled" } else { "finished" },
            outcome.records.len(),
            outcome.sectors_scanned
        );
        outcome
    }
}

enum Event {
    Chunk(Option<Chunk>),
    Result(Option<ChunkResult>),
}

fn wait_for_event(chunks: &Receiver<Chunk>, results: &Receiver<ChunkResult>) -> Event {
    select! {
        recv(results) -> result => Event::Result(result.ok()),
        recv(chunks) -> chunk => Event::Chunk(chunk.ok()),
    }
}

/// Delivers chunk results in sequence order
struct Coordinator<'o> {
    outcome: &'o mut ScanOutcome,
    pending: BTreeMap<u64, ChunkResult>,
    next_seq: u64,
    stopped: bool,
    interval: u64,
    since_report: u64,
}

impl<'o> Coordinator<'o> {
    fn new(outcome: &'o mut ScanOutcome, interval: u64) -> Self {
        Self {
            outcome,
            pending: BTreeMap::new(),
            next_seq: 0,
            stopped: false,
            interval: interval.max(1),
            since_report: 0,
        }
    }

    fn accept(&mut self, result: ChunkResult, on_progress: &mut dyn FnMut(u64, usize)) {
        self.pending.insert(result.seq, result);
        while let Some(result) = self.pending.remove(&self.next_seq) {
            self.next_seq += 1;
            // Bad sectors and issues are facts about the device, kept
            // even for chunks past the cancellation point
            self.outcome.bad_sectors.extend(result.bad_sectors);
            self.outcome.issues.extend(result.issues);
            if self.stopped {
                continue;
            }

            self.outcome.records.extend(result.records);
            if result.cancelled {
                self.stopped = true;
                self.outcome.cancelled = true;
                continue;
            }
            self.outcome.sectors_scanned += result.sector_count;
            self.since_report += result.sector_count;
            if self.since_report >= self.interval {
                self.since_report = 0;
                on_progress(self.outcome.sectors_scanned, self.outcome.records.len());
            }
            tracing::trace!("Chunk ending at sector {} delivered", result.end_sector);
        }
    }
}

fn read_chunks(
    device: &dyn BlockDevice,
    regions: &[Extent],
    chunk_sectors: u64,
    cancel: &CancellationToken,
    chunks: Sender<Chunk>,
) -> ReaderEnd {
    let total = device.total_sectors();
    let mut seq = 0u64;
    for region in regions {
        let end = region.end_sector().min(total);
        let mut sector = region.start_sector;
        while sector < end {
            if cancel.is_cancelled() {
                return ReaderEnd::Cancelled;
            }
            let count = chunk_sectors.min(end - sector);
            let data = match device.read_sectors_lenient(sector, count) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("Scan read at sector {} failed: {}", sector, e);
                    return ReaderEnd::Failed(
                        RecoveryIssue::new(IssueKind::Io, e.to_string()).at_sector(sector),
                    );
                }
            };
            if !data.bad_sectors.is_empty() {
                tracing::warn!(
                    "{} unreadable sectors in chunk at {}",
                    data.bad_sectors.len(),
                    sector
                );
            }
            let chunk = Chunk {
                seq,
                first_sector: sector,
                sector_count: count,
                data: data.data,
                bad_sectors: data.bad_sectors,
            };
            if chunks.send(chunk).is_err() {
                return ReaderEnd::Finished;
            }
            seq += 1;
            sector += count;
        }
    }
    ReaderEnd::Finished
}

fn process_chunk(
    scanner: &SignatureScanner,
    device: &dyn BlockDevice,
    chunk: Chunk,
    cancel: &CancellationToken,
) -> ChunkResult {
    let sector_size = device.sector_size() as usize;
    let mut result = ChunkResult {
        seq: chunk.seq,
        end_sector: chunk.first_sector + chunk.sector_count,
        sector_count: chunk.sector_count,
        records: Vec::new(),
        bad_sectors: chunk.bad_sectors,
        issues: Vec::new(),
        cancelled: false,
    };

    for hit in scanner.header_hits(chunk.first_sector, &chunk.data, sector_size) {
        match scanner.resolve(device, &hit, cancel) {
            Ok(resolved) => {
                result.bad_sectors.extend(resolved.bad_sectors);
                result.records.extend(resolved.record);
            }
            Err(CarveAbort::Cancelled) => {
                result.cancelled = true;
                break;
            }
            Err(CarveAbort::Device(e)) => {
                tracing::warn!("Cannot measure {:?} at sector {}: {}", hit.format, hit.sector, e);
                result.issues.push(
                    RecoveryIssue::new(IssueKind::Io, e.to_string()).at_sector(hit.sector),
                );
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::SignatureRegistry;
    use crate::infrastructure::block_device::MemoryBlockDevice;

    fn gif(len: usize) -> Vec<u8> {
        let mut gif = b"GIF89a\x10\x00\x10\x00".to_vec();
        gif.resize(len - 2, 0x44);
        gif.extend_from_slice(&[0x00, 0x3B]);
        gif
    }

    fn image() -> Vec<u8> {
        let mut image = vec![0u8; 256 * 512];
        for sector in [3usize, 40, 41 + 3, 130, 255] {
            let g = gif(300);
            image[sector * 512..sector * 512 + 300].copy_from_slice(&g);
        }
        image
    }

    fn options(chunk_sectors: u64, workers: usize) -> PipelineOptions {
        PipelineOptions {
            chunk_sectors,
            workers,
            progress_interval_sectors: 32,
        }
    }

    #[test]
    fn test_parallel_output_matches_sequential_scan() {
        let device = MemoryBlockDevice::new(image(), 512);
        let scanner = SignatureScanner::new(SignatureRegistry::default_formats(), Default::default(), 1 << 20);
        let cancel = CancellationToken::new();

        let sequential: Vec<FileRecord> = scanner
            .scan(&device, Extent::new(0, 256), &cancel)
            .collect::<Result<_, _>>()
            .unwrap();

        let pipeline = ScanPipeline::new(&scanner, options(16, 4));
        let mut reports = 0;
        let outcome = pipeline.run(&device, &[Extent::new(0, 256)], &cancel, &mut |_, _| reports += 1);

        assert_eq!(outcome.records, sequential);
        assert_eq!(outcome.records.len(), 5);
        assert_eq!(outcome.sectors_scanned, 256);
        assert!(!outcome.cancelled);
        assert!(reports >= 1);
    }

    #[test]
    fn test_bad_sectors_are_collected() {
        let device = MemoryBlockDevice::new(image(), 512).with_bad_sectors([7, 200]);
        let scanner = SignatureScanner::new(SignatureRegistry::default_formats(), Default::default(), 1 << 20);
        let cancel = CancellationToken::new();
        let outcome = ScanPipeline::new(&scanner, options(64, 2)).run(
            &device,
            &[Extent::new(0, 256)],
            &cancel,
            &mut |_, _| {},
        );
        assert_eq!(outcome.bad_sectors, vec![7, 200]);
        assert_eq!(outcome.records.len(), 5);
    }

    #[test]
    fn test_cancelled_before_start_delivers_nothing() {
        let device = MemoryBlockDevice::new(image(), 512);
        let scanner = SignatureScanner::new(SignatureRegistry::default_formats(), Default::default(), 1 << 20);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = ScanPipeline::new(&scanner, options(16, 2)).run(
            &device,
            &[Extent::new(0, 256)],
            &cancel,
            &mut |_, _| {},
        );
        assert!(outcome.cancelled);
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.sectors_scanned, 0);
    }
}
