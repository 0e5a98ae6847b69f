//! Document, database and executable carver
//!
//! PDF ends at its last `%%EOF` marker (incremental updates append
//! further ones), SQLite declares page size and page count, and a PE
//! image ends with its last section's raw data.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::window::{CarveAbort, CarveWindow};
use super::{FileCarver, Measured};
use crate::domain::entities::FileFormat;

const PDF_EOF: &[u8; 5] = b"%%EOF";
/// How far past one `%%EOF` an incremental update may end
const PDF_UPDATE_LOOKAHEAD: u64 = 1024 * 1024;
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const MAX_PE_HEADER_OFFSET: usize = 4096;
const IMAGE_FILE_DLL: u16 = 0x2000;

pub struct DocumentCarver;

impl DocumentCarver {
    fn pdf_length(window: &mut CarveWindow<'_>, start: u64, end: u64) -> Result<Option<u64>, CarveAbort> {
        let Some(mut last) = window.find(PDF_EOF, start + 5, end)? else {
            return Ok(None);
        };
        loop {
            let from = last + PDF_EOF.len() as u64;
            let lookahead = from.saturating_add(PDF_UPDATE_LOOKAHEAD).min(end);
            match window.find(PDF_EOF, from, lookahead)? {
                Some(next) => last = next,
                None => break,
            }
        }

        let mut file_end = last + PDF_EOF.len() as u64;
        for _ in 0..2 {
            match window.byte(file_end)? {
                Some(b'\r') | Some(b'\n') if file_end < end => file_end += 1,
                _ => break,
            }
        }
        Ok(Some(file_end - start))
    }

    fn sqlite_length(window: &mut CarveWindow<'_>, start: u64) -> Result<Option<u64>, CarveAbort> {
        let (Some(page_size), Some(pages)) = (window.u16_be(start + 16)?, window.u32_be(start + 28)?) else {
            return Ok(None);
        };
        let page_size = if page_size == 1 { 65536 } else { page_size as u64 };
        Ok((pages > 0).then(|| page_size * pages as u64))
    }

    /// Size of a PE image and whether it is a DLL
    fn pe_length(window: &mut CarveWindow<'_>, start: u64) -> Result<Option<(u64, bool)>, CarveAbort> {
        let Some(pe) = window.u32_le(start + 60)? else {
            return Ok(None);
        };
        let pe = start + pe as u64;
        let header = window.slice(pe, 24)?;
        if header.len() < 24 || &header[0..4] != PE_SIGNATURE {
            return Ok(None);
        }
        let sections = LittleEndian::read_u16(&header[6..8]) as u64;
        let optional_size = LittleEndian::read_u16(&header[20..22]) as u64;
        let characteristics = LittleEndian::read_u16(&header[22..24]);
        if sections == 0 || sections > 96 {
            return Ok(None);
        }

        let table = window.slice(pe + 24 + optional_size, (sections * 40) as usize)?;
        let end = table
            .chunks_exact(40)
            .map(|s| LittleEndian::read_u32(&s[20..24]) as u64 + LittleEndian::read_u32(&s[16..20]) as u64)
            .max()
            .unwrap_or(0);
        Ok((end > 0).then_some((end, characteristics & IMAGE_FILE_DLL != 0)))
    }
}

impl FileCarver for DocumentCarver {
    fn formats(&self) -> &[FileFormat] {
        &[FileFormat::Pdf, FileFormat::Sqlite, FileFormat::Exe]
    }

    fn validate(&self, format: FileFormat, head: &[u8]) -> bool {
        match format {
            FileFormat::Pdf => head.len() >= 8 && head[5].is_ascii_digit() && head[6] == b'.',
            FileFormat::Sqlite => {
                if head.len() < 32 {
                    return false;
                }
                let page_size = BigEndian::read_u16(&head[16..18]);
                page_size == 1 || (page_size >= 512 && page_size.is_power_of_two())
            }
            FileFormat::Exe => {
                if head.len() < 64 {
                    return false;
                }
                let pe = LittleEndian::read_u32(&head[60..64]) as usize;
                pe >= 64
                    && pe < MAX_PE_HEADER_OFFSET
                    && head.get(pe..pe + 4).is_some_and(|sig| sig == PE_SIGNATURE)
            }
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
            FileFormat::Pdf => Ok(Some(Measured::from_size(Self::pdf_length(window, start, end)?))),
            FileFormat::Sqlite => Ok(Some(Measured::from_size(Self::sqlite_length(window, start)?))),
            FileFormat::Exe => Ok(Self::pe_length(window, start)?.map(|(size, dll)| {
                Measured::exact(size).with_extension(if dll { "dll" } else { "exe" })
            })),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::CancellationToken;
    use crate::infrastructure::block_device::MemoryBlockDevice;

    fn measure(format: FileFormat, image: Vec<u8>) -> Option<Measured> {
        let device = MemoryBlockDevice::new(image, 512);
        let cancel = CancellationToken::new();
        let mut window = CarveWindow::new(&device, &cancel);
        let end = window.len();
        DocumentCarver.measure(format, &mut window, 0, end).unwrap()
    }

    #[test]
    fn test_pdf_ends_at_last_eof_with_newline() {
        let mut pdf = b"%PDF-1.7\n1 0 obj\n%%EOF\n".to_vec();
        pdf.extend_from_slice(b"2 0 obj update\n%%EOF\r\n");
        let size = pdf.len() as u64;
        pdf.extend_from_slice(&[0xAA; 100]);

        assert_eq!(measure(FileFormat::Pdf, pdf).unwrap().size, Some(size));
    }

    #[test]
    fn test_sqlite_declared_length() {
        let mut db = b"SQLite format 3\0".to_vec();
        db.extend_from_slice(&[0x10, 0x00]);
        db.resize(28, 0);
        db.extend_from_slice(&3u32.to_be_bytes());
        db.resize(100, 0);

        assert_eq!(measure(FileFormat::Sqlite, db).unwrap().size, Some(3 * 4096));
    }

    #[test]
    fn test_pe_size_from_section_table() {
        let mut exe = vec![0u8; 1024];
        exe[0..2].copy_from_slice(b"MZ");
        LittleEndian::write_u32(&mut exe[60..64], 128);
        exe[128..132].copy_from_slice(PE_SIGNATURE);
        LittleEndian::write_u16(&mut exe[134..136], 2);
        LittleEndian::write_u16(&mut exe[148..150], 0);
        // Section table at 128 + 24
        let table = 152;
        LittleEndian::write_u32(&mut exe[table + 16..table + 20], 0x200);
        LittleEndian::write_u32(&mut exe[table + 20..table + 24], 0x400);
        LittleEndian::write_u32(&mut exe[table + 56..table + 60], 0x600);
        LittleEndian::write_u32(&mut exe[table + 60..table + 64], 0x600);

        assert!(DocumentCarver.validate(FileFormat::Exe, &exe));
        let measured = measure(FileFormat::Exe, exe).unwrap();
        assert_eq!(measured.size, Some(0xC00));
        assert_eq!(measured.extension, Some("exe"));
    }
}
