//! Signature carving
//!
//! Finds file headers at sector boundaries and resolves each hit into a
//! file record by walking the format's structure on the device.

mod archive_carver;
mod document_carver;
mod image_carver;
mod media_carver;
mod scanner;
mod window;

pub use archive_carver::{ArchiveCarver, classify_zip};
pub use document_carver::DocumentCarver;
pub use image_carver::ImageCarver;
pub use media_carver::MediaCarver;
pub use scanner::{HEAD_BYTES, Resolved, SignatureScan, SignatureScanner};
pub use window::{CarveAbort, CarveWindow, WINDOW_BYTES};

use crate::domain::entities::FileFormat;

/// Outcome of a format's length rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measured {
    /// Content length, `None` when the format does not reveal it
    pub size: Option<u64>,
    /// Overrides the format's default extension
    pub extension: Option<&'static str>,
    pub low_confidence: bool,
}

impl Measured {
    pub fn exact(size: u64) -> Self {
        Self {
            size: Some(size),
            extension: None,
            low_confidence: false,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            size: None,
            extension: None,
            low_confidence: true,
        }
    }

    pub fn from_size(size: Option<u64>) -> Self {
        size.map_or_else(Self::unbounded, Self::exact)
    }

    pub fn with_extension(mut self, extension: &'static str) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn low_confidence(mut self) -> Self {
        self.low_confidence = true;
        self
    }
}

/// Format-specific validation and length resolution
pub trait FileCarver: Send + Sync {
    /// Formats this carver handles
    fn formats(&self) -> &[FileFormat];

    /// Checks the bytes following a header hit; `head` holds up to
    /// `HEAD_BYTES` bytes starting at the hit
    fn validate(&self, format: FileFormat, head: &[u8]) -> bool;

    /// Resolves the length of the file starting at byte `start`.
    ///
    /// `end` bounds every read. `Ok(None)` rejects the hit.
    fn measure(
        &self,
        format: FileFormat,
        window: &mut CarveWindow<'_>,
        start: u64,
        end: u64,
    ) -> Result<Option<Measured>, CarveAbort>;
}

/// Every built-in carver
pub fn default_carvers() -> Vec<Box<dyn FileCarver>> {
    vec![
        Box::new(ImageCarver),
        Box::new(ArchiveCarver),
        Box::new(DocumentCarver),
        Box::new(MediaCarver),
    ]
}
