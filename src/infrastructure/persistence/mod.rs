//! Output storage for recovered files and manifests

mod local_file_writer;
mod manifest_writer;

pub use local_file_writer::{LocalFileWriter, sanitize_file_name};
pub use manifest_writer::{MANIFEST_FILE_NAME, ManifestWriter};
