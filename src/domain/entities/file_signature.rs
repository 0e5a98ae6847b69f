//! File signature entity
//!
//! Magic bytes that identify a container format at the start of a
//! sector. The format decides how the content length is resolved and
//! which extensions a hit can be classified as.

use std::fmt;

/// Container formats the signature scanner understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileFormat {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Tiff,
    Pdf,
    /// ZIP and the OOXML/ODF/JAR families built on it
    Zip,
    Rar,
    SevenZip,
    Gzip,
    /// MP3 with an ID3v2 tag
    Mp3,
    /// RIFF container (WAV, AVI, WebP)
    Riff,
    /// ISO base media file (MP4, MOV, M4A)
    IsoBmff,
    Sqlite,
    /// PE executable
    Exe,
}

impl FileFormat {
    /// Every extension a hit of this format may be classified as.
    /// The first entry is the default.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            FileFormat::Jpeg => &["jpg"],
            FileFormat::Png => &["png"],
            FileFormat::Gif => &["gif"],
            FileFormat::Bmp => &["bmp"],
            FileFormat::Tiff => &["tiff"],
            FileFormat::Pdf => &["pdf"],
            FileFormat::Zip => &[
                "zip", "docx", "xlsx", "pptx", "odt", "ods", "odp", "jar", "apk", "epub",
            ],
            FileFormat::Rar => &["rar"],
            FileFormat::SevenZip => &["7z"],
            FileFormat::Gzip => &["gz"],
            FileFormat::Mp3 => &["mp3"],
            FileFormat::Riff => &["wav", "avi", "webp"],
            FileFormat::IsoBmff => &["mp4", "mov", "m4a", "3gp", "heic"],
            FileFormat::Sqlite => &["sqlite"],
            FileFormat::Exe => &["exe", "dll"],
        }
    }

    pub fn default_extension(&self) -> &'static str {
        self.extensions()[0]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FileFormat::Jpeg => "JPEG image",
            FileFormat::Png => "PNG image",
            FileFormat::Gif => "GIF image",
            FileFormat::Bmp => "BMP image",
            FileFormat::Tiff => "TIFF image",
            FileFormat::Pdf => "PDF document",
            FileFormat::Zip => "ZIP archive",
            FileFormat::Rar => "RAR archive",
            FileFormat::SevenZip => "7-Zip archive",
            FileFormat::Gzip => "gzip stream",
            FileFormat::Mp3 => "MP3 audio",
            FileFormat::Riff => "RIFF container",
            FileFormat::IsoBmff => "ISO media",
            FileFormat::Sqlite => "SQLite database",
            FileFormat::Exe => "PE executable",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A header pattern for one format
#[derive(Debug, Clone)]
pub struct FileSignature {
    format: FileFormat,
    header: Vec<u8>,
    /// Offset from the start of the file where the header sits
    header_offset: usize,
    /// Upper bound for the recovered length of this format
    max_size: u64,
}

impl FileSignature {
    pub fn new(format: FileFormat, header: impl Into<Vec<u8>>, max_size: u64) -> Self {
        Self {
            format,
            header: header.into(),
            header_offset: 0,
            max_size,
        }
    }

    /// Sets a custom header offset
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.header_offset = offset;
        self
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn header_offset(&self) -> usize {
        self.header_offset
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Bytes that must be present to test this signature
    pub fn probe_len(&self) -> usize {
        self.header_offset + self.header.len()
    }

    /// Checks whether `data` starts with this signature
    pub fn matches_header(&self, data: &[u8]) -> bool {
        data.len() >= self.probe_len()
            && data[self.header_offset..self.probe_len()] == self.header[..]
    }
}

/// A header hit at the start of a device sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureMatch {
    pub format: FileFormat,
    pub sector: u64,
    pub max_size: u64,
}
