//! Audio and video carver
//!
//! RIFF declares its length in the header. ISO base media files are a
//! sequence of top-level boxes that is walked to its end; a walk that
//! did not see both `moov` and `mdat` is marked low confidence. MP3 has
//! no container length at all.

use super::window::{CarveAbort, CarveWindow};
use super::{FileCarver, Measured};
use crate::domain::entities::FileFormat;

/// Top-level boxes that may legitimately follow `ftyp`
const ISO_TOP_LEVEL: [&[u8; 4]; 14] = [
    b"ftyp", b"moov", b"mdat", b"free", b"skip", b"wide", b"uuid", b"meta", b"moof", b"mfra",
    b"pdin", b"styp", b"sidx", b"pnot",
];

pub struct MediaCarver;

impl MediaCarver {
    fn riff_extension(form: &[u8]) -> Option<&'static str> {
        match form {
            b"WAVE" => Some("wav"),
            b"AVI " => Some("avi"),
            b"WEBP" => Some("webp"),
            _ => None,
        }
    }

    fn iso_extension(brand: &[u8]) -> &'static str {
        match brand {
            b"qt  " => "mov",
            b"M4A " | b"M4B " => "m4a",
            b"heic" | b"heix" | b"mif1" => "heic",
            _ if brand.starts_with(b"3g") => "3gp",
            _ => "mp4",
        }
    }

    fn iso_measure(window: &mut CarveWindow<'_>, start: u64, end: u64) -> Result<Option<Measured>, CarveAbort> {
        let brand = window.slice(start + 8, 4)?;
        let extension = Self::iso_extension(&brand);
        let mut pos = start;
        let mut seen_moov = false;
        let mut seen_mdat = false;

        while pos + 8 <= end {
            let (Some(size32), kind) = (window.u32_be(pos)?, window.slice(pos + 4, 4)?) else {
                break;
            };
            if !ISO_TOP_LEVEL.iter().any(|k| k[..] == kind[..]) {
                break;
            }
            let size = match size32 {
                0 => return Ok(Some(Measured::unbounded().with_extension(extension))),
                1 => match window.u64_be(pos + 8)? {
                    Some(large) if large >= 16 => large,
                    _ => break,
                },
                n if n < 8 => break,
                n => n as u64,
            };
            seen_moov |= kind == b"moov";
            seen_mdat |= kind == b"mdat";
            pos = pos.saturating_add(size);
        }

        if pos == start {
            return Ok(None);
        }
        let measured = Measured::exact(pos - start).with_extension(extension);
        Ok(Some(if seen_moov && seen_mdat {
            measured
        } else {
            measured.low_confidence()
        }))
    }
}

impl FileCarver for MediaCarver {
    fn formats(&self) -> &[FileFormat] {
        &[FileFormat::Riff, FileFormat::IsoBmff, FileFormat::Mp3]
    }

    fn validate(&self, format: FileFormat, head: &[u8]) -> bool {
        match format {
            FileFormat::Riff => head.len() >= 12 && Self::riff_extension(&head[8..12]).is_some(),
            FileFormat::IsoBmff => {
                head.len() >= 12
                    && head[8..12]
                        .iter()
                        .all(|b| b.is_ascii_alphanumeric() || *b == b' ')
            }
            // ID3v2.2-2.4, revision byte never 0xFF
            FileFormat::Mp3 => head.len() >= 10 && (2..=4).contains(&head[3]) && head[4] != 0xFF,
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
            FileFormat::Riff => {
                let form = window.slice(start + 8, 4)?;
                let Some(extension) = Self::riff_extension(&form) else {
                    return Ok(None);
                };
                let size = window.u32_le(start + 4)?.map(|len| len as u64 + 8);
                Ok(Some(Measured::from_size(size).with_extension(extension)))
            }
            FileFormat::IsoBmff => Self::iso_measure(window, start, end),
            FileFormat::Mp3 => Ok(Some(Measured::unbounded())),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::CancellationToken;
    use crate::infrastructure::block_device::MemoryBlockDevice;

    fn iso_box(kind: &[u8; 4], payload: usize) -> Vec<u8> {
        let mut b = ((payload + 8) as u32).to_be_bytes().to_vec();
        b.extend_from_slice(kind);
        b.resize(payload + 8, 0x11);
        b
    }

    fn measure(format: FileFormat, image: Vec<u8>) -> Option<Measured> {
        let device = MemoryBlockDevice::new(image, 512);
        let cancel = CancellationToken::new();
        let mut window = CarveWindow::new(&device, &cancel);
        let end = window.len();
        MediaCarver.measure(format, &mut window, 0, end).unwrap()
    }

    #[test]
    fn test_mov_box_walk() {
        let mut mov = b"\x00\x00\x00\x14ftypqt  \x00\x00\x02\x00qt  ".to_vec();
        mov.extend(iso_box(b"mdat", 700));
        mov.extend(iso_box(b"moov", 100));
        let size = mov.len() as u64;

        let measured = measure(FileFormat::IsoBmff, mov).unwrap();
        assert_eq!(measured.size, Some(size));
        assert_eq!(measured.extension, Some("mov"));
        assert!(!measured.low_confidence);
    }

    #[test]
    fn test_mp4_without_moov_is_low_confidence() {
        let mut mp4 = b"\x00\x00\x00\x10ftypisom\x00\x00\x02\x00".to_vec();
        mp4.extend(iso_box(b"mdat", 100));

        let measured = measure(FileFormat::IsoBmff, mp4).unwrap();
        assert_eq!(measured.size, Some(16 + 108));
        assert!(measured.low_confidence);
    }

    #[test]
    fn test_riff_forms() {
        let mut wav = b"RIFF".to_vec();
        wav.extend_from_slice(&36u32.to_le_bytes());
        wav.extend_from_slice(b"WAVEfmt ");
        let measured = measure(FileFormat::Riff, wav).unwrap();
        assert_eq!(measured.size, Some(44));
        assert_eq!(measured.extension, Some("wav"));

        assert!(!MediaCarver.validate(FileFormat::Riff, b"RIFF\x10\x00\x00\x00CDXA"));
    }
}
