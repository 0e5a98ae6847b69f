//! Recovery job and its lifecycle

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::{DeviceId, normalize_extension};
use crate::domain::errors::RecoveryError;

/// Which discovery strategies a job uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    MetadataOnly,
    SignatureOnly,
    Combined,
}

impl RecoveryMode {
    pub fn uses_metadata(&self) -> bool {
        matches!(self, RecoveryMode::MetadataOnly | RecoveryMode::Combined)
    }

    pub fn uses_signatures(&self) -> bool {
        matches!(self, RecoveryMode::SignatureOnly | RecoveryMode::Combined)
    }
}

impl FromStr for RecoveryMode {
    type Err = RecoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "metadata" | "metadata-only" | "metadata_only" => Ok(Self::MetadataOnly),
            "signature" | "signatures" | "signature-only" | "signature_only" | "carve" => {
                Ok(Self::SignatureOnly)
            }
            "combined" | "all" => Ok(Self::Combined),
            other => Err(RecoveryError::InvalidJob(format!(
                "unknown recovery mode '{other}'"
            ))),
        }
    }
}

impl fmt::Display for RecoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryMode::MetadataOnly => "metadata",
            RecoveryMode::SignatureOnly => "signature",
            RecoveryMode::Combined => "combined",
        };
        f.write_str(name)
    }
}

/// Normalized set of target extensions. Empty means every type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionSet(BTreeSet<String>);

impl ExtensionSet {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, extension: &str) -> bool {
        self.0.is_empty() || self.0.contains(&normalize_extension(extension))
    }

    /// True if any of `candidates` is a target
    pub fn matches_any(&self, candidates: &[&str]) -> bool {
        self.0.is_empty() || candidates.iter().any(|c| self.matches(c))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for ExtensionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|s| normalize_extension(s.as_ref()))
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }
}

impl FromStr for ExtensionSet {
    type Err = std::convert::Infallible;

    /// Parses a list separated by commas, semicolons or whitespace
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.split([',', ';', ' ', '\t']).collect())
    }
}

/// One recovery request
#[derive(Debug, Clone)]
pub struct RecoveryJob {
    pub device: DeviceId,
    pub extensions: ExtensionSet,
    /// Cumulative byte budget for written files
    pub max_bytes: u64,
    pub output_dir: PathBuf,
    pub mode: RecoveryMode,
}

impl RecoveryJob {
    pub fn new(device: DeviceId, mode: RecoveryMode, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            device,
            extensions: ExtensionSet::all(),
            max_bytes: u64::MAX,
            output_dir: output_dir.into(),
            mode,
        }
    }

    pub fn with_extensions(mut self, extensions: ExtensionSet) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn validate(&self) -> Result<(), RecoveryError> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(RecoveryError::InvalidJob(
                "output directory must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Initializing,
    Scanning,
    Writing,
    Completed,
    Cancelling,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Created, Initializing)
                | (Initializing, Scanning)
                | (Initializing, Failed)
                | (Scanning, Writing)
                | (Scanning, Cancelling)
                | (Writing, Completed)
                | (Writing, Cancelling)
                | (Cancelling, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Enforces the legal state sequence of a single job
#[derive(Debug)]
pub struct JobStateMachine {
    state: JobState,
}

impl Default for JobStateMachine {
    fn default() -> Self {
        Self {
            state: JobState::Created,
        }
    }
}

impl JobStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn advance(&mut self, next: JobState) -> Result<JobState, RecoveryError> {
        if !self.state.can_transition_to(next) {
            return Err(RecoveryError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!("Job state {} -> {}", self.state, next);
        self.state = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_set_normalizes_and_matches() {
        let set: ExtensionSet = ".JPEG, png;docx".parse().unwrap();
        assert!(set.matches("jpg"));
        assert!(set.matches("PNG"));
        assert!(!set.matches("gif"));
        assert!(set.matches_any(&["zip", "docx"]));
        assert!(ExtensionSet::all().matches("anything"));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(
            "metadata".parse::<RecoveryMode>().unwrap(),
            RecoveryMode::MetadataOnly
        );
        assert!("bogus".parse::<RecoveryMode>().is_err());
        assert!(RecoveryMode::Combined.uses_metadata());
        assert!(RecoveryMode::Combined.uses_signatures());
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut machine = JobStateMachine::new();
        for next in [
            JobState::Initializing,
            JobState::Scanning,
            JobState::Writing,
            JobState::Completed,
        ] {
            machine.advance(next).unwrap();
        }
        assert!(machine.state().is_terminal());
    }

    #[test]
    fn test_state_machine_rejects_illegal_moves() {
        let mut machine = JobStateMachine::new();
        assert!(machine.advance(JobState::Scanning).is_err());
        machine.advance(JobState::Initializing).unwrap();
        assert!(machine.advance(JobState::Cancelling).is_err());
        machine.advance(JobState::Scanning).unwrap();
        assert!(machine.advance(JobState::Failed).is_err());
        machine.advance(JobState::Cancelling).unwrap();
        machine.advance(JobState::Cancelled).unwrap();
        assert!(machine.advance(JobState::Completed).is_err());
    }
}
