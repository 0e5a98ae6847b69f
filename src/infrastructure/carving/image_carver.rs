//! Image carver implementation
//!
//! Resolves the length of JPEG, PNG, GIF, BMP and TIFF files by walking
//! their structure, falling back to footer detection when the structure
//! breaks off.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::window::{CarveAbort, CarveWindow};
use super::{FileCarver, Measured};
use crate::domain::entities::FileFormat;

const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const PNG_IEND: &[u8; 8] = b"IEND\xAE\x42\x60\x82";
const GIF_TRAILER: [u8; 2] = [0x00, 0x3B];

/// BITMAPINFOHEADER and its variants
const BMP_DIB_SIZES: [u32; 6] = [12, 40, 52, 56, 108, 124];

pub struct ImageCarver;

impl ImageCarver {
    /// Walks JPEG segments to the EOI marker.
    ///
    /// Entropy-coded data after SOS is skipped by looking for the next
    /// marker that is neither a stuffed 0xFF00 nor a restart marker.
    fn jpeg_length(window: &mut CarveWindow<'_>, start: u64, end: u64) -> Result<Option<u64>, CarveAbort> {
        let mut pos = start + 2;
        while pos + 4 <= end {
            if window.byte(pos)? != Some(0xFF) {
                return Ok(None);
            }
            let mut marker_at = pos + 1;
            while window.byte(marker_at)? == Some(0xFF) {
                marker_at += 1;
            }
            let Some(marker) = window.byte(marker_at)? else {
                return Ok(None);
            };
            match marker {
                0xD9 => return Ok(Some(marker_at + 1 - start)),
                0x01 | 0xD0..=0xD7 => {
                    pos = marker_at + 1;
                    continue;
                }
                0x00 => return Ok(None),
                _ => {}
            }
            let Some(len) = window.u16_be(marker_at + 1)? else {
                return Ok(None);
            };
            if len < 2 {
                return Ok(None);
            }
            pos = marker_at + 1 + len as u64;

            if marker == 0xDA {
                match Self::skip_entropy_data(window, pos, end)? {
                    Some(next) => pos = next,
                    None => return Ok(None),
                }
            }
        }
        Ok(None)
    }

    fn skip_entropy_data(window: &mut CarveWindow<'_>, mut pos: u64, end: u64) -> Result<Option<u64>, CarveAbort> {
        while let Some(ff) = window.find(&[0xFF], pos, end)? {
            match window.byte(ff + 1)? {
                Some(0x00) | Some(0xD0..=0xD7) | Some(0xFF) => pos = ff + 1,
                Some(_) => return Ok(Some(ff)),
                None => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Walks PNG chunks to IEND
    fn png_length(window: &mut CarveWindow<'_>, start: u64, end: u64) -> Result<Option<u64>, CarveAbort> {
        let mut pos = start + 8;
        while pos + 12 <= end {
            let Some(len) = window.u32_be(pos)? else {
                return Ok(None);
            };
            let kind = window.slice(pos + 4, 4)?;
            if kind.len() < 4 || !kind.iter().all(u8::is_ascii_alphabetic) {
                return Ok(None);
            }
            let next = pos + 12 + len as u64;
            if kind == b"IEND" {
                return Ok(Some(next - start));
            }
            pos = next;
        }
        Ok(None)
    }

    fn footer(
        window: &mut CarveWindow<'_>,
        footer: &[u8],
        start: u64,
        from: u64,
        end: u64,
    ) -> Result<Option<u64>, CarveAbort> {
        Ok(window
            .find(footer, from, end)?
            .map(|hit| hit + footer.len() as u64 - start))
    }
}

impl FileCarver for ImageCarver {
    fn formats(&self) -> &[FileFormat] {
        &[
            FileFormat::Jpeg,
            FileFormat::Png,
            FileFormat::Gif,
            FileFormat::Bmp,
            FileFormat::Tiff,
        ]
    }

    fn validate(&self, format: FileFormat, head: &[u8]) -> bool {
        match format {
            // SOF/DHT/DQT/APPn all sit in 0xC0..0xFE
            FileFormat::Jpeg => head.len() >= 4 && (0xC0..0xFF).contains(&head[3]),
            FileFormat::Png => {
                head.len() >= 33
                    && BigEndian::read_u32(&head[8..12]) == 13
                    && &head[12..16] == b"IHDR"
                    && crc32fast::hash(&head[12..29]) == BigEndian::read_u32(&head[29..33])
            }
            FileFormat::Gif => {
                head.len() >= 10
                    && LittleEndian::read_u16(&head[6..8]) != 0
                    && LittleEndian::read_u16(&head[8..10]) != 0
            }
            FileFormat::Bmp => {
                if head.len() < 18 {
                    return false;
                }
                let size = LittleEndian::read_u32(&head[2..6]);
                let reserved = LittleEndian::read_u32(&head[6..10]);
                let data_offset = LittleEndian::read_u32(&head[10..14]);
                let dib = LittleEndian::read_u32(&head[14..18]);
                size >= 26 && reserved == 0 && data_offset < size && BMP_DIB_SIZES.contains(&dib)
            }
            FileFormat::Tiff => {
                if head.len() < 8 {
                    return false;
                }
                let ifd = if head[0] == b'I' {
                    LittleEndian::read_u32(&head[4..8])
                } else {
                    BigEndian::read_u32(&head[4..8])
                };
                ifd >= 8
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
        let size = match format {
            FileFormat::Jpeg => match Self::jpeg_length(window, start, end)? {
                Some(size) => Some(size),
                None => Self::footer(window, &JPEG_EOI, start, start + 2, end)?,
            },
            FileFormat::Png => match Self::png_length(window, start, end)? {
                Some(size) => Some(size),
                None => Self::footer(window, PNG_IEND, start, start + 8, end)?,
            },
            FileFormat::Gif => Self::footer(window, &GIF_TRAILER, start, start + 13, end)?,
            FileFormat::Bmp => window.u32_le(start + 2)?.map(u64::from),
            // IFD chains point anywhere in the file
            FileFormat::Tiff => None,
            _ => return Ok(None),
        };
        Ok(Some(Measured::from_size(size)))
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
        ImageCarver.measure(format, &mut window, 0, end).unwrap()
    }

    #[test]
    fn test_jpeg_marker_walk_skips_stuffed_bytes() {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00];
        // SOS with a 2-byte header, entropy data containing FF00 and RST0
        jpeg.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02, 0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD0, 0x56]);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        let size = jpeg.len() as u64;
        jpeg.extend_from_slice(&[0xFF, 0xD9, 0xAB]);

        let measured = measure(FileFormat::Jpeg, jpeg).unwrap();
        assert_eq!(measured.size, Some(size));
        assert!(!measured.low_confidence);
    }

    #[test]
    fn test_png_chunk_walk() {
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(&[0, 0, 0, 13]);
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&[0u8; 13 + 4]);
        png.extend_from_slice(&[0, 0, 0, 0]);
        png.extend_from_slice(PNG_IEND);
        let size = png.len() as u64;

        assert_eq!(measure(FileFormat::Png, png).unwrap().size, Some(size));
    }

    #[test]
    fn test_tiff_is_unbounded() {
        let measured = measure(FileFormat::Tiff, b"II*\x00\x08\x00\x00\x00".to_vec()).unwrap();
        assert_eq!(measured.size, None);
        assert!(measured.low_confidence);
    }

    #[test]
    fn test_png_header_crc_is_checked() {
        let mut head = b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR".to_vec();
        head.extend_from_slice(&[0, 0, 0, 16, 0, 0, 0, 16, 8, 2, 0, 0, 0]);
        let crc = crc32fast::hash(&head[12..29]);
        head.extend_from_slice(&crc.to_be_bytes());
        assert!(ImageCarver.validate(FileFormat::Png, &head));

        head[20] ^= 1;
        assert!(!ImageCarver.validate(FileFormat::Png, &head));
    }
}
