//! Archive carver implementation
//!
//! ZIP archives are measured through their end-of-central-directory
//! record and classified by the member names (OOXML, ODF, JAR, APK,
//! EPUB). 7z declares its length in the start header. RAR and gzip
//! carry no total length and are capped.

use byteorder::{ByteOrder, LittleEndian};

use super::window::{CarveAbort, CarveWindow};
use super::{FileCarver, Measured};
use crate::domain::entities::FileFormat;

const ZIP_EOCD: &[u8; 4] = b"PK\x05\x06";
const ZIP_CENTRAL_HEADER: &[u8; 4] = b"PK\x01\x02";
const EOCD_LEN: u64 = 22;
/// Central directory entries inspected for classification
const MAX_CLASSIFY_ENTRIES: usize = 256;
const SEVEN_ZIP_START_HEADER: u64 = 32;

pub struct ArchiveCarver;

impl ArchiveCarver {
    /// Finds the EOCD whose central directory ends right before it
    fn zip_end(window: &mut CarveWindow<'_>, start: u64, end: u64) -> Result<Option<(u64, u64, u64)>, CarveAbort> {
        let mut from = start + 30;
        while let Some(eocd) = window.find(ZIP_EOCD, from, end)? {
            from = eocd + 1;
            let (Some(cd_size), Some(cd_offset), Some(comment)) = (
                window.u32_le(eocd + 12)?,
                window.u32_le(eocd + 16)?,
                window.u16_le(eocd + 20)?,
            ) else {
                return Ok(None);
            };
            if start + cd_offset as u64 + cd_size as u64 == eocd {
                let size = eocd + EOCD_LEN + comment as u64 - start;
                return Ok(Some((size, start + cd_offset as u64, cd_size as u64)));
            }
        }
        Ok(None)
    }

    /// Member names listed in the central directory
    fn central_names(window: &mut CarveWindow<'_>, cd_start: u64, cd_size: u64) -> Result<Vec<String>, CarveAbort> {
        let directory = window.slice(cd_start, cd_size.min(4 * 1024 * 1024) as usize)?;
        let mut names = Vec::new();
        let mut pos = 0usize;
        while pos + 46 <= directory.len() && names.len() < MAX_CLASSIFY_ENTRIES {
            if &directory[pos..pos + 4] != ZIP_CENTRAL_HEADER {
                break;
            }
            let name_len = LittleEndian::read_u16(&directory[pos + 28..pos + 30]) as usize;
            let extra_len = LittleEndian::read_u16(&directory[pos + 30..pos + 32]) as usize;
            let comment_len = LittleEndian::read_u16(&directory[pos + 32..pos + 34]) as usize;
            let Some(name) = directory.get(pos + 46..pos + 46 + name_len) else {
                break;
            };
            names.push(String::from_utf8_lossy(name).into_owned());
            pos += 46 + name_len + extra_len + comment_len;
        }
        Ok(names)
    }

    /// Name of the first member and, for a stored `mimetype`, its content
    fn first_member(window: &mut CarveWindow<'_>, start: u64) -> Result<(String, Option<String>), CarveAbort> {
        let header = window.slice(start, 30)?;
        if header.len() < 30 {
            return Ok((String::new(), None));
        }
        let method = LittleEndian::read_u16(&header[8..10]);
        let compressed = LittleEndian::read_u32(&header[18..22]) as u64;
        let name_len = LittleEndian::read_u16(&header[26..28]) as u64;
        let extra_len = LittleEndian::read_u16(&header[28..30]) as u64;
        let name = String::from_utf8_lossy(&window.slice(start + 30, name_len as usize)?).into_owned();

        let content = if name == "mimetype" && method == 0 && compressed <= 128 {
            let data = window.slice(start + 30 + name_len + extra_len, compressed as usize)?;
            Some(String::from_utf8_lossy(&data).into_owned())
        } else {
            None
        };
        Ok((name, content))
    }
}

/// Picks the most specific extension for a ZIP from its member names
pub fn classify_zip(names: &[String], mimetype: Option<&str>) -> &'static str {
    if let Some(mime) = mimetype {
        let mime = mime.trim();
        if mime == "application/epub+zip" {
            return "epub";
        }
        if let Some(kind) = mime.strip_prefix("application/vnd.oasis.opendocument.") {
            match kind {
                "text" => return "odt",
                "spreadsheet" => return "ods",
                "presentation" => return "odp",
                _ => {}
            }
        }
    }
    let has_prefix = |prefix: &str| names.iter().any(|n| n.starts_with(prefix));
    if has_prefix("word/") {
        "docx"
    } else if has_prefix("xl/") {
        "xlsx"
    } else if has_prefix("ppt/") {
        "pptx"
    } else if names.iter().any(|n| n == "AndroidManifest.xml") {
        "apk"
    } else if names.iter().any(|n| n == "META-INF/MANIFEST.MF") {
        "jar"
    } else {
        "zip"
    }
}

impl FileCarver for ArchiveCarver {
    fn formats(&self) -> &[FileFormat] {
        &[FileFormat::Zip, FileFormat::Rar, FileFormat::SevenZip, FileFormat::Gzip]
    }

    fn validate(&self, format: FileFormat, head: &[u8]) -> bool {
        match format {
            FileFormat::Zip => {
                head.len() >= 30 && LittleEndian::read_u16(&head[4..6]) <= 63 && {
                    let name_len = LittleEndian::read_u16(&head[26..28]);
                    (1..=1024).contains(&name_len)
                }
            }
            FileFormat::Rar => head.len() >= 7,
            // Major version byte, always 0 so far
            FileFormat::SevenZip => head.len() >= 32 && head[6] == 0,
            // Reserved flag bits must be clear
            FileFormat::Gzip => head.len() >= 10 && head[3] & 0xE0 == 0,
            _ => false,
        }
    }

    fn measure(
        &self,
        format: FileFormat,
        window: &mut CarveWindow<'_>,
        start: u64,
        end: u64,
    ) -> Result<Option<Measured>, CarveAbort> {
        match format {
            FileFormat::Zip => {
                let (first_name, mimetype) = Self::first_member(window, start)?;
                match Self::zip_end(window, start, end)? {
                    Some((size, cd_start, cd_size)) => {
                        let mut names = Self::central_names(window, cd_start, cd_size)?;
                        if names.is_empty() {
                            names.push(first_name);
                        }
                        let extension = classify_zip(&names, mimetype.as_deref());
                        Ok(Some(Measured::exact(size).with_extension(extension)))
                    }
                    None => {
                        let extension = classify_zip(&[first_name], mimetype.as_deref());
                        Ok(Some(Measured::unbounded().with_extension(extension)))
                    }
                }
            }
            FileFormat::SevenZip => {
                let (Some(offset), Some(len)) = (window.u64_le(start + 12)?, window.u64_le(start + 20)?) else {
                    return Ok(None);
                };
                let size = SEVEN_ZIP_START_HEADER
                    .checked_add(offset)
                    .and_then(|s| s.checked_add(len));
                Ok(Some(Measured::from_size(size)))
            }
            FileFormat::Rar | FileFormat::Gzip => Ok(Some(Measured::unbounded())),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::CancellationToken;
    use crate::infrastructure::block_device::MemoryBlockDevice;

    fn zip_with(member: &str, trailing_comment: &[u8]) -> Vec<u8> {
        let mut zip = Vec::new();
        zip.extend_from_slice(b"PK\x03\x04");
        zip.extend_from_slice(&[20, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        zip.extend_from_slice(&[0u8; 12]);
        zip.extend_from_slice(&(member.len() as u16).to_le_bytes());
        zip.extend_from_slice(&[0, 0]);
        zip.extend_from_slice(member.as_bytes());

        let cd_offset = zip.len() as u32;
        zip.extend_from_slice(ZIP_CENTRAL_HEADER);
        zip.extend_from_slice(&[0u8; 24]);
        zip.extend_from_slice(&(member.len() as u16).to_le_bytes());
        zip.extend_from_slice(&[0u8; 16]);
        zip.extend_from_slice(member.as_bytes());
        let cd_size = zip.len() as u32 - cd_offset;

        zip.extend_from_slice(ZIP_EOCD);
        zip.extend_from_slice(&[0, 0, 0, 0, 1, 0, 1, 0]);
        zip.extend_from_slice(&cd_size.to_le_bytes());
        zip.extend_from_slice(&cd_offset.to_le_bytes());
        zip.extend_from_slice(&(trailing_comment.len() as u16).to_le_bytes());
        zip.extend_from_slice(trailing_comment);
        zip
    }

    fn measure(image: Vec<u8>) -> Measured {
        let device = MemoryBlockDevice::new(image, 512);
        let cancel = CancellationToken::new();
        let mut window = CarveWindow::new(&device, &cancel);
        let end = window.len();
        ArchiveCarver
            .measure(FileFormat::Zip, &mut window, 0, end)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_zip_length_includes_comment() {
        let zip = zip_with("notes.txt", b"hi");
        let size = zip.len() as u64;
        let measured = measure(zip);
        assert_eq!(measured.size, Some(size));
        assert_eq!(measured.extension, Some("zip"));
    }

    #[test]
    fn test_docx_classified_from_central_directory() {
        let measured = measure(zip_with("word/document.xml", b""));
        assert_eq!(measured.extension, Some("docx"));
    }

    #[test]
    fn test_classify_zip_by_mimetype() {
        let names = vec!["mimetype".to_string()];
        assert_eq!(
            classify_zip(&names, Some("application/vnd.oasis.opendocument.spreadsheet")),
            "ods"
        );
        assert_eq!(classify_zip(&names, Some("application/epub+zip")), "epub");
        assert_eq!(classify_zip(&["META-INF/MANIFEST.MF".to_string()], None), "jar");
    }
}
