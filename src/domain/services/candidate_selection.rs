//! Candidate selection
//!
//! Turns the raw metadata and signature records of a job into the
//! ordered list of files to write. Metadata records come first in
//! enumeration order, signature records follow by start sector.

use crate::domain::entities::{Extent, ExtensionSet, FileRecord, SkipReason};

/// Outcome of candidate selection
#[derive(Debug, Default)]
pub struct Selection {
    /// Records to write, in write order
    pub accepted: Vec<FileRecord>,
    /// Records not written, with the reason
    pub skipped: Vec<(FileRecord, SkipReason)>,
    /// Records whose extension is not a target
    pub filtered: u64,
}

/// Removes overlapping records.
///
/// Metadata records are never displaced by signature records. Among
/// metadata records the one enumerated first wins; among signature
/// records the one starting earlier wins. Returns the kept records
/// (metadata first, then signature by sector) and the dropped.
pub fn deduplicate(
    metadata: Vec<FileRecord>,
    mut signature: Vec<FileRecord>,
) -> (Vec<FileRecord>, Vec<FileRecord>) {
    let mut kept = Vec::with_capacity(metadata.len() + signature.len());
    let mut dropped = Vec::new();

    let mut claimed: Vec<(u64, u64)> = Vec::new();
    for record in metadata {
        if overlaps_any(&claimed, &record.extents) {
            dropped.push(record);
            continue;
        }
        claim(&mut claimed, &record.extents);
        kept.push(record);
    }

    signature.sort_by_key(|r| r.first_sector().unwrap_or(u64::MAX));
    let mut kept_end = 0u64;
    for record in signature {
        let (Some(start), Some(end)) = (record.first_sector(), record.end_sector()) else {
            dropped.push(record);
            continue;
        };
        if start < kept_end || overlaps_any(&claimed, &record.extents) {
            dropped.push(record);
            continue;
        }
        kept_end = end;
        kept.push(record);
    }

    (kept, dropped)
}

/// Filters, deduplicates and applies the cumulative byte budget.
///
/// Extension filtering happens first, so a non-target metadata record
/// never hides a target signature record. Once one record does not fit
/// in `max_bytes`, it and every later record are skipped.
pub fn select_candidates(
    metadata: Vec<FileRecord>,
    signature: Vec<FileRecord>,
    filter: &ExtensionSet,
    max_bytes: u64,
) -> Selection {
    let mut selection = Selection::default();

    let keep = |records: Vec<FileRecord>, selection: &mut Selection| {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            if !filter.matches(&record.extension) {
                selection.filtered += 1;
            } else if record.size == 0 {
                selection.skipped.push((record, SkipReason::Empty));
            } else {
                out.push(record);
            }
        }
        out
    };
    let metadata = keep(metadata, &mut selection);
    let signature = keep(signature, &mut selection);

    let (kept, dropped) = deduplicate(metadata, signature);
    selection
        .skipped
        .extend(dropped.into_iter().map(|r| (r, SkipReason::Duplicate)));

    let mut total = 0u64;
    let mut limit_reached = false;
    for record in kept {
        if !limit_reached {
            match total.checked_add(record.size) {
                Some(next) if next <= max_bytes => {
                    total = next;
                    selection.accepted.push(record);
                    continue;
                }
                _ => limit_reached = true,
            }
        }
        selection.skipped.push((record, SkipReason::SizeLimit));
    }

    selection
}

/// Adds extents to a sorted list of disjoint half-open intervals
fn claim(intervals: &mut Vec<(u64, u64)>, extents: &[Extent]) {
    for extent in extents.iter().filter(|e| !e.is_empty()) {
        let (mut start, mut end) = (extent.start_sector, extent.end_sector());
        let first = intervals.partition_point(|&(_, e)| e < start);
        let mut last = first;
        while let Some(&(s, e)) = intervals.get(last) {
            if s > end {
                break;
            }
            start = start.min(s);
            end = end.max(e);
            last += 1;
        }
        intervals.splice(first..last, [(start, end)]);
    }
}

fn overlaps_any(intervals: &[(u64, u64)], extents: &[Extent]) -> bool {
    extents.iter().filter(|e| !e.is_empty()).any(|extent| {
        let idx = intervals.partition_point(|&(_, end)| end <= extent.start_sector);
        intervals
            .get(idx)
            .is_some_and(|&(start, _)| start < extent.end_sector())
    })
}
