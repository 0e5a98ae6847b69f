//! Manifest persistence
//!
//! Writes the job manifest as `manifest.json` next to the recovered
//! files, wrapped with the time it was written.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

use crate::domain::repositories::{FileWriterError, RecoveredFileWriter};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    written_at: String,
    manifest: &'a T,
}

pub struct ManifestWriter;

impl ManifestWriter {
    /// Writes `manifest` through `writer`, returning the created path.
    ///
    /// An existing manifest is never replaced; the new one gets a
    /// numbered name like any other output file.
    pub fn write<T: Serialize>(
        writer: &mut dyn RecoveredFileWriter,
        manifest: &T,
    ) -> Result<PathBuf, FileWriterError> {
        let envelope = Envelope {
            written_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            manifest,
        };
        let json = serde_json::to_vec_pretty(&envelope).map_err(|e| FileWriterError::Io {
            path: MANIFEST_FILE_NAME.to_string(),
            source: e.into(),
        })?;

        let mut out = writer.create(MANIFEST_FILE_NAME)?;
        let written = out.sink.write_all(&json).and_then(|_| out.sink.flush());
        if let Err(e) = written {
            let path = out.path.clone();
            drop(out);
            let _ = writer.discard(MANIFEST_FILE_NAME);
            return Err(FileWriterError::from_io(&path, e));
        }
        tracing::info!("Manifest written to {}", out.path.display());
        Ok(out.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::LocalFileWriter;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Serialize)]
    struct Counts {
        files: u32,
    }

    #[test]
    fn test_manifest_is_wrapped_with_timestamp() {
        let dir = TempDir::new().unwrap();
        let mut writer = LocalFileWriter::new(dir.path()).unwrap();

        let path = ManifestWriter::write(&mut writer, &Counts { files: 3 }).unwrap();
        assert_eq!(path, dir.path().join(MANIFEST_FILE_NAME));

        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["manifest"]["files"], 3);
        assert!(value["written_at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_second_manifest_gets_numbered_name() {
        let dir = TempDir::new().unwrap();
        let mut writer = LocalFileWriter::new(dir.path()).unwrap();
        ManifestWriter::write(&mut writer, &Counts { files: 1 }).unwrap();
        let second = ManifestWriter::write(&mut writer, &Counts { files: 2 }).unwrap();
        assert_eq!(second, dir.path().join("manifest_1.json"));
    }
}
