//! File record entity
//!
//! A candidate file located either through file system metadata or by a
//! byte signature. Records are what the orchestrator deduplicates,
//! filters and finally hands to the writer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{Extent, extents_overlap};

/// How much the recovered content can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Located by a header signature; length inferred from content
    SignatureGuessed,
    /// Located through file system metadata
    MetadataConfirmed,
}

/// Where a record came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOrigin {
    /// A directory entry or MFT record on the given volume
    Metadata { volume: usize, entry: u64 },
    /// A header match at the given device sector
    Signature { sector: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub origin: RecordOrigin,
    /// Full path inside the volume, when metadata knows it
    pub original_path: Option<String>,
    /// Device sectors holding the content, in file order
    pub extents: Vec<Extent>,
    /// Exact content length in bytes
    pub size: u64,
    pub confidence: Confidence,
    /// Set when the length could not be determined and was capped
    pub low_confidence: bool,
    /// Set when metadata marks the entry as deleted
    pub deleted: bool,
    /// Lowercase extension without the leading dot (may be empty)
    pub extension: String,
    /// Content stored inline in metadata (NTFS resident data)
    pub resident_data: Option<Bytes>,
}

impl FileRecord {
    /// Record found through file system metadata
    pub fn from_metadata(
        volume: usize,
        entry: u64,
        path: impl Into<String>,
        extents: Vec<Extent>,
        size: u64,
        deleted: bool,
    ) -> Self {
        let path = path.into();
        let extension = extension_of(&path);
        Self {
            origin: RecordOrigin::Metadata { volume, entry },
            original_path: Some(path),
            extents,
            size,
            confidence: Confidence::MetadataConfirmed,
            low_confidence: false,
            deleted,
            extension,
            resident_data: None,
        }
    }

    /// Record found by a header signature at `sector`
    pub fn from_signature(
        sector: u64,
        extension: &str,
        size: u64,
        sector_size: u32,
        low_confidence: bool,
    ) -> Self {
        let length = size.div_ceil(sector_size as u64);
        Self {
            origin: RecordOrigin::Signature { sector },
            original_path: None,
            extents: vec![Extent::new(sector, length)],
            size,
            confidence: Confidence::SignatureGuessed,
            low_confidence,
            deleted: true,
            extension: normalize_extension(extension),
            resident_data: None,
        }
    }

    /// Attaches inline content, replacing any extents
    pub fn with_resident_data(mut self, data: Bytes) -> Self {
        self.size = data.len() as u64;
        self.extents.clear();
        self.resident_data = Some(data);
        self
    }

    pub fn is_metadata(&self) -> bool {
        self.confidence == Confidence::MetadataConfirmed
    }

    /// First device sector of the content, if it lives on disk
    pub fn first_sector(&self) -> Option<u64> {
        self.extents.first().map(|e| e.start_sector)
    }

    /// Sector just past the last extent
    pub fn end_sector(&self) -> Option<u64> {
        self.extents.iter().map(Extent::end_sector).max()
    }

    pub fn overlaps(&self, other: &FileRecord) -> bool {
        extents_overlap(&self.extents, &other.extents)
    }

    /// Last path component of the original path
    pub fn original_name(&self) -> Option<&str> {
        self.original_path
            .as_deref()
            .and_then(|p| p.rsplit(['/', '\\']).next())
            .filter(|n| !n.is_empty())
    }

    /// Name used for reporting skipped records and for output naming
    pub fn display_name(&self) -> String {
        if let Some(path) = &self.original_path {
            return path.clone();
        }
        let sector = self.first_sector().unwrap_or_default();
        if self.extension.is_empty() {
            format!("f{sector}.bin")
        } else {
            format!("f{sector}.{}", self.extension)
        }
    }
}

/// Lowercases an extension, strips a leading dot and folds aliases
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    match ext.as_str() {
        "jpeg" | "jpe" | "jfif" => "jpg".to_string(),
        "tif" => "tiff".to_string(),
        "htm" => "html".to_string(),
        _ => ext,
    }
}

fn extension_of(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => normalize_extension(ext),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_extension_folds_aliases() {
        assert_eq!(normalize_extension(".JPEG"), "jpg");
        assert_eq!(normalize_extension("Tif"), "tiff");
        assert_eq!(normalize_extension("docx"), "docx");
    }

    #[test]
    fn test_metadata_record_takes_extension_from_path() {
        let record = FileRecord::from_metadata(0, 42, "/Photos/IMG_01.JPG", vec![], 10, true);
        assert_eq!(record.extension, "jpg");
        assert_eq!(record.original_name(), Some("IMG_01.JPG"));

        let hidden = FileRecord::from_metadata(0, 43, "/home/.bashrc", vec![], 10, true);
        assert_eq!(hidden.extension, "");
    }

    #[test]
    fn test_signature_record_covers_whole_sectors() {
        let record = FileRecord::from_signature(100, "png", 1025, 512, false);
        assert_eq!(record.extents, vec![Extent::new(100, 3)]);
        assert_eq!(record.display_name(), "f100.png");
        assert_eq!(record.end_sector(), Some(103));
    }
}
