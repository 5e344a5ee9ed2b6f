//! Directory-tree dump and restore built on external archiving tools

pub mod classify;
pub mod errors;
pub mod excludes;
pub mod pipeline;
pub mod staging;
pub mod workflow;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use classify::{classify, FailureKind};
pub use errors::{BackupFailure, PipelineFailure, RestoreFailure};
pub use excludes::build_exclude_args;
pub use pipeline::{
    CommandPipelineRunner, PipelineResult, PipelineRunner, PipelineSpec, Stage, StageStatus,
};
pub use staging::{EntryMover, FsEntryMover};
pub use workflow::{BackupSettings, BackupWorkflow};

/// How a target is backed up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// tar piped through a compressor into `<backup root>/<name>.<ext>`.
    #[default]
    #[serde(rename = "tar", alias = "archive")]
    Archive,
    /// rsync of the directory itself into the backup root.
    #[serde(rename = "copy", alias = "rsync")]
    Copy,
}

impl Strategy {
    /// Interprets the `STRATEGY` toggle: only `copy` selects the copy strategy.
    pub fn from_toggle(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("copy") => Strategy::Copy,
            _ => Strategy::Archive,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Archive => write!(f, "tar"),
            Strategy::Copy => write!(f, "copy"),
        }
    }
}

/// One logical directory to dump or restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    pub name: String,
    pub source_path: PathBuf,
    pub exclude_patterns: Vec<String>,
    pub strategy: Strategy,
}

impl BackupTarget {
    pub fn new(name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source_path: source_path.into(),
            exclude_patterns: Vec::new(),
            strategy: Strategy::default(),
        }
    }

    pub fn with_excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Exclude arguments for this target's own strategy.
    pub fn exclude_args(&self) -> Vec<String> {
        build_exclude_args(&self.exclude_patterns, self.strategy)
    }
}
