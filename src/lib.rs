//! filerecall
//!
//! Recovers deleted files from raw block devices and disk images. Files
//! are found two ways: through the metadata of the volumes on the
//! device (NTFS master file table, FAT directories) and by scanning the
//! raw sectors for known file signatures. Both sources feed one
//! deduplicated candidate list that is copied into an output directory
//! together with a JSON manifest.
//!
//! The [`application::RecoveryEngine`] is the entry point for Rust
//! hosts; [`ffi`] exposes the same engine through a C ABI.

pub mod application;
pub mod config;
pub mod domain;
pub mod ffi;
pub mod infrastructure;
pub mod presentation;

pub use application::{Manifest, RecoveryEngine, summarize};
pub use config::{ConfigError, EngineConfig};
pub use domain::entities::{DeviceId, ExtensionSet, JobState, RecoveryMode, RecoveryResult};
pub use domain::errors::RecoveryError;
