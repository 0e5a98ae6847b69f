//! Engine configuration
//!
//! Tuning knobs shared by the engine, the orchestrator and the CLI.
//! Every field has a default, so a JSON file only needs to name the
//! values it changes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sectors per signature-scan chunk
    pub chunk_sectors: u64,
    /// Scan workers; 0 means one per CPU
    pub worker_threads: usize,
    /// Per-read deadline in milliseconds; 0 disables the deadline
    pub read_timeout_ms: u64,
    /// Sectors between two progress reports of the scan
    pub progress_interval_sectors: u64,
    /// Cap for files whose length cannot be determined
    pub max_carve_bytes: u64,
    /// Also recover files that are not deleted
    pub include_live_files: bool,
    /// Scan signatures when a metadata-only job finds no metadata
    pub fallback_to_signatures: bool,
    /// Write `manifest.json` into the output directory
    pub write_manifest: bool,
    /// Memory-map image files instead of reading them
    pub use_mmap_for_images: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_sectors: 2048,
            worker_threads: num_cpus::get().max(1),
            read_timeout_ms: 5000,
            progress_interval_sectors: 65536,
            max_carve_bytes: 256 * 1024 * 1024,
            include_live_files: false,
            fallback_to_signatures: true,
            write_manifest: true,
            use_mmap_for_images: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_sectors == 0 {
            return Err(ConfigError::Invalid("chunk_sectors must be positive".into()));
        }
        if self.progress_interval_sectors == 0 {
            return Err(ConfigError::Invalid(
                "progress_interval_sectors must be positive".into(),
            ));
        }
        if self.max_carve_bytes == 0 {
            return Err(ConfigError::Invalid("max_carve_bytes must be positive".into()));
        }
        Ok(())
    }

    /// Worker count with 0 resolved to the CPU count
    pub fn workers(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_threads
        }
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn with_chunk_sectors(mut self, sectors: u64) -> Self {
        self.chunk_sectors = sectors;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_read_timeout_ms(mut self, ms: u64) -> Self {
        self.read_timeout_ms = ms;
        self
    }

    pub fn with_progress_interval(mut self, sectors: u64) -> Self {
        self.progress_interval_sectors = sectors;
        self
    }

    pub fn with_max_carve_bytes(mut self, bytes: u64) -> Self {
        self.max_carve_bytes = bytes;
        self
    }

    pub fn with_live_files(mut self, include: bool) -> Self {
        self.include_live_files = include;
        self
    }

    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback_to_signatures = fallback;
        self
    }

    pub fn with_manifest(mut self, write: bool) -> Self {
        self.write_manifest = write;
        self
    }

    pub fn with_mmap(mut self, mmap: bool) -> Self {
        self.use_mmap_for_images = mmap;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{"chunk_sectors": 64, "write_manifest": false}"#)
            .unwrap();
        assert_eq!(config.chunk_sectors, 64);
        assert!(!config.write_manifest);
        assert_eq!(config.max_carve_bytes, 256 * 1024 * 1024);
        assert!(config.fallback_to_signatures);
    }

    #[test]
    fn test_zero_chunk_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{"chunk_sectors": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(matches!(
            EngineConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let config = EngineConfig::default().with_read_timeout_ms(0);
        assert_eq!(config.read_timeout(), None);
        assert!(EngineConfig::default().with_worker_threads(0).workers() >= 1);
    }
}
