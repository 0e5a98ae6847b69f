//! Injected logging capability
//!
//! Hosts hand the engine a logger instead of the engine writing to a
//! console. Library internals log through `tracing`; the engine also
//! forwards its job-level messages to the injected logger.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Receives the engine's messages
pub trait EngineLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Forwards every message into `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl EngineLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
    }
}

/// Drops every message
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl EngineLogger for NullLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

impl<F> EngineLogger for F
where
    F: Fn(LogLevel, &str) + Send + Sync,
{
    fn log(&self, level: LogLevel, message: &str) {
        self(level, message)
    }
}
