//! Application layer
//!
//! The recovery job itself and the facade hosts drive it through.

mod engine;
mod logging;
mod orchestrator;
mod report;
mod scan_pipeline;
mod writer_task;

pub use engine::RecoveryEngine;
pub use logging::{EngineLogger, LogLevel, NullLogger, TracingLogger};
pub use orchestrator::{NoProgress, ProgressSink, RecoveryOrchestrator};
pub use report::{Manifest, ManifestTotals, summarize};
pub use scan_pipeline::{PipelineOptions, ScanOutcome, ScanPipeline};
pub use writer_task::{WRITE_CHUNK_BYTES, WriteEvent, WriterTask};
