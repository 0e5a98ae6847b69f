//! Local file writer implementation
//!
//! Writes recovered files into one flat output directory. Files are
//! created exclusively; a taken name gets `_1`, `_2`, ... before its
//! extension.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use crate::domain::repositories::{FileWriterError, OutputFile, RecoveredFileWriter};

/// Suffixes tried before giving up on a name
const MAX_NAME_ATTEMPTS: u32 = 100_000;
const MAX_NAME_LEN: usize = 200;

/// Local file system writer
pub struct LocalFileWriter {
    output_dir: PathBuf,
    files_created: usize,
}

impl LocalFileWriter {
    /// Creates the output directory if needed
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self, FileWriterError> {
        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir).map_err(|e| FileWriterError::from_io(output_dir, e))?;
        if !output_dir.is_dir() {
            return Err(FileWriterError::DirectoryNotFound(
                output_dir.display().to_string(),
            ));
        }
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            files_created: 0,
        })
    }

    pub fn files_created(&self) -> usize {
        self.files_created
    }
}

/// Makes a single safe path component out of a recovered name
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.');
    if cleaned.is_empty() {
        return "unnamed".to_string();
    }
    if cleaned.len() <= MAX_NAME_LEN {
        return cleaned.to_string();
    }
    // Keep the extension when truncating
    let (stem, ext) = split_extension(cleaned);
    let keep = MAX_NAME_LEN.saturating_sub(ext.map_or(0, |e| e.len() + 1));
    let mut cut = keep.min(stem.len());
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    match ext {
        Some(ext) => format!("{}.{}", &stem[..cut], ext),
        None => stem[..cut].to_string(),
    }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

fn numbered(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    match split_extension(name) {
        (stem, Some(ext)) => format!("{stem}_{n}.{ext}"),
        (stem, None) => format!("{stem}_{n}"),
    }
}

impl RecoveredFileWriter for LocalFileWriter {
    fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn create(&mut self, preferred: &str) -> Result<OutputFile, FileWriterError> {
        let name = sanitize_file_name(preferred);
        for n in 0..MAX_NAME_ATTEMPTS {
            let file_name = numbered(&name, n);
            let path = self.output_dir.join(&file_name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    self.files_created += 1;
                    return Ok(OutputFile {
                        file_name,
                        path,
                        sink: Box::new(BufWriter::new(file)),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(FileWriterError::from_io(&path, e)),
            }
        }
        Err(FileWriterError::NameExhausted(name))
    }

    fn discard(&mut self, file_name: &str) -> Result<(), FileWriterError> {
        let path = self.output_dir.join(file_name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FileWriterError::from_io(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_collisions_get_counter_before_extension() {
        let dir = TempDir::new().unwrap();
        let mut writer = LocalFileWriter::new(dir.path()).unwrap();

        let names: Vec<String> = (0..3)
            .map(|_| writer.create("photo.jpg").unwrap().file_name)
            .collect();
        assert_eq!(names, vec!["photo.jpg", "photo_1.jpg", "photo_2.jpg"]);
        assert_eq!(writer.files_created(), 3);
    }

    #[test]
    fn test_existing_files_are_never_overwritten() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("report.pdf"), b"keep").unwrap();
        let mut writer = LocalFileWriter::new(dir.path()).unwrap();

        let mut out = writer.create("report.pdf").unwrap();
        out.sink.write_all(b"new").unwrap();
        out.sink.flush().unwrap();
        drop(out);

        assert_eq!(fs::read(dir.path().join("report.pdf")).unwrap(), b"keep");
        assert_eq!(fs::read(dir.path().join("report_1.pdf")).unwrap(), b"new");
    }

    #[test]
    fn test_sanitize_strips_directories_and_reserved_chars() {
        assert_eq!(sanitize_file_name("/Users/a/b:c?.txt"), "b_c_.txt");
        assert_eq!(sanitize_file_name("..\\.."), "unnamed");
        assert_eq!(sanitize_file_name("README"), "README");
    }

    #[test]
    fn test_discard_removes_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = LocalFileWriter::new(dir.path()).unwrap();
        let out = writer.create("partial.bin").unwrap();
        drop(out);
        writer.discard("partial.bin").unwrap();
        assert!(!dir.path().join("partial.bin").exists());
    }
}
