//! Sector extents

use serde::{Deserialize, Serialize};

/// A contiguous run of device sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Extent {
    pub start_sector: u64,
    pub length: u64,
}

impl Extent {
    pub fn new(start_sector: u64, length: u64) -> Self {
        Self {
            start_sector,
            length,
        }
    }

    /// First sector past the extent
    pub fn end_sector(&self) -> u64 {
        self.start_sector.saturating_add(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn contains_sector(&self, sector: u64) -> bool {
        sector >= self.start_sector && sector < self.end_sector()
    }

    pub fn overlaps(&self, other: &Extent) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start_sector < other.end_sector()
            && other.start_sector < self.end_sector()
    }

    /// Length in bytes for the given sector size
    pub fn byte_len(&self, sector_size: u32) -> u64 {
        self.length * sector_size as u64
    }

    /// Merges adjacent extents in place, preserving order
    pub fn coalesce(extents: &mut Vec<Extent>) {
        let mut merged: Vec<Extent> = Vec::with_capacity(extents.len());
        for extent in extents.drain(..).filter(|e| !e.is_empty()) {
            match merged.last_mut() {
                Some(last) if last.end_sector() == extent.start_sector => {
                    last.length += extent.length;
                }
                _ => merged.push(extent),
            }
        }
        *extents = merged;
    }
}

/// Returns true if any extent of `a` overlaps any extent of `b`
pub fn extents_overlap(a: &[Extent], b: &[Extent]) -> bool {
    a.iter().any(|x| b.iter().any(|y| x.overlaps(y)))
}
