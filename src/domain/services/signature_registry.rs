//! Signature registry service
//!
//! Manages the header patterns used by the signature scanner.
//! Uses the Aho-Corasick algorithm so every sector is tested against
//! all headers in a single pass.

use aho_corasick::AhoCorasick;

use crate::domain::entities::{ExtensionSet, FileFormat, FileSignature};

const MB: u64 = 1024 * 1024;

/// Registry of header signatures
///
/// # Example
///
/// ```
/// use filerecall::domain::entities::FileFormat;
/// use filerecall::domain::services::SignatureRegistry;
///
/// let registry = SignatureRegistry::default_formats();
/// let matches = registry.find_at_start(&[0xFF, 0xD8, 0xFF, 0xE0]);
/// assert_eq!(matches.len(), 1);
/// assert_eq!(matches[0].format(), FileFormat::Jpeg);
/// ```
#[derive(Debug, Clone)]
pub struct SignatureRegistry {
    signatures: Vec<FileSignature>,
    /// Automaton over every header; pattern id is the signature index
    pattern_matcher: Option<AhoCorasick>,
    /// Longest header offset + length; no sector needs more bytes tested
    probe_len: usize,
}

impl SignatureRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self {
            signatures: Vec::new(),
            pattern_matcher: None,
            probe_len: 0,
        }
    }

    /// Creates a registry with every supported format
    pub fn default_formats() -> Self {
        let mut registry = Self::new();
        let headers: [(FileFormat, &[u8], u64); 17] = [
            (FileFormat::Jpeg, &[0xFF, 0xD8, 0xFF], 50 * MB),
            (
                FileFormat::Png,
                &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
                100 * MB,
            ),
            (FileFormat::Gif, b"GIF87a", 50 * MB),
            (FileFormat::Gif, b"GIF89a", 50 * MB),
            (FileFormat::Bmp, b"BM", 100 * MB),
            (FileFormat::Tiff, &[0x49, 0x49, 0x2A, 0x00], 500 * MB),
            (FileFormat::Tiff, &[0x4D, 0x4D, 0x00, 0x2A], 500 * MB),
            (FileFormat::Pdf, b"%PDF-", 500 * MB),
            (FileFormat::Zip, &[0x50, 0x4B, 0x03, 0x04], 2048 * MB),
            (FileFormat::Rar, &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07], 2048 * MB),
            (
                FileFormat::SevenZip,
                &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C],
                2048 * MB,
            ),
            (FileFormat::Gzip, &[0x1F, 0x8B, 0x08], 2048 * MB),
            (FileFormat::Mp3, b"ID3", 100 * MB),
            (FileFormat::Riff, b"RIFF", 2048 * MB),
            (FileFormat::Sqlite, b"SQLite format 3\0", 2048 * MB),
            (FileFormat::Exe, b"MZ", 500 * MB),
            // ISO media carries its marker after the 4-byte box size
            (FileFormat::IsoBmff, b"ftyp", 4096 * MB),
        ];
        for (format, header, max_size) in headers {
            let signature = FileSignature::new(format, header, max_size);
            let signature = if format == FileFormat::IsoBmff {
                signature.with_offset(4)
            } else {
                signature
            };
            registry.register(signature);
        }
        registry.build_pattern_matcher();
        registry
    }

    /// Registers a new signature; call `build_pattern_matcher` afterwards
    pub fn register(&mut self, signature: FileSignature) {
        self.probe_len = self.probe_len.max(signature.probe_len());
        self.signatures.push(signature);
        self.pattern_matcher = None;
    }

    /// Builds the Aho-Corasick automaton from registered signatures
    pub fn build_pattern_matcher(&mut self) {
        if self.signatures.is_empty() {
            self.pattern_matcher = None;
            return;
        }
        self.pattern_matcher = AhoCorasick::new(self.signatures.iter().map(|s| s.header())).ok();
    }

    /// Keeps only formats able to produce one of `targets`
    pub fn restricted_to(mut self, targets: &ExtensionSet) -> Self {
        if targets.is_all() {
            return self;
        }
        self.signatures
            .retain(|s| targets.matches_any(s.format().extensions()));
        self.probe_len = self
            .signatures
            .iter()
            .map(FileSignature::probe_len)
            .max()
            .unwrap_or(0);
        self.build_pattern_matcher();
        self
    }

    /// Signatures whose header sits at its expected offset in `data`
    pub fn find_at_start(&self, data: &[u8]) -> Vec<&FileSignature> {
        let probe = &data[..data.len().min(self.probe_len)];
        let Some(matcher) = &self.pattern_matcher else {
            return self
                .signatures
                .iter()
                .filter(|sig| sig.matches_header(probe))
                .collect();
        };

        let mut results: Vec<&FileSignature> = Vec::new();
        for mat in matcher.find_overlapping_iter(probe) {
            let sig = &self.signatures[mat.pattern().as_usize()];
            if mat.start() == sig.header_offset() && !results.iter().any(|r| r.format() == sig.format()) {
                results.push(sig);
            }
        }
        results
    }

    pub fn signatures(&self) -> &[FileSignature] {
        &self.signatures
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

impl Default for SignatureRegistry {
    fn default() -> Self {
        Self::default_formats()
    }
}
