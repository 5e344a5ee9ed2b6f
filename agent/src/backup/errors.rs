//! Failure taxonomy returned by dump and restore
//!
//! Nothing here is retried: permission and mountpoint failures reproduce
//! deterministically until an operator intervenes.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::pipeline::StageStatus;

/// One or more pipeline stages exited non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{operation} operation failed: {}{}",
    describe_stages(.failed_stages),
    stderr_suffix(.stderr)
)]
pub struct PipelineFailure {
    pub operation: &'static str,
    pub failed_stages: Vec<StageStatus>,
    pub stderr: String,
}

fn describe_stages(stages: &[StageStatus]) -> String {
    stages
        .iter()
        .map(|stage| stage.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn stderr_suffix(stderr: &str) -> String {
    match stderr.trim() {
        "" => String::new(),
        trimmed => format!(": {}", trimmed),
    }
}

#[derive(Debug, Error)]
pub enum BackupFailure {
    #[error(transparent)]
    Pipeline(#[from] PipelineFailure),

    #[error("Backup I/O failure while {context}: {source}")]
    GenericIo {
        context: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RestoreFailure {
    #[error(
        "### NOTICE ###\n\
         As part of restore, the task tried to move existing content from {path}.\n\
         However, it seems that directory contains files/folders that are not owned\n\
         by the agent user. To proceed, please move the files or folders inside\n\
         {path} to a secure location so that {path} is empty and run the restore\n\
         again.",
        path = .path.display()
    )]
    AccessDenied { path: PathBuf },

    #[error(
        "### NOTICE ###\n\
         As part of restore, the task tried to rename `{path}` before restoring.\n\
         This could not be completed, perhaps `{path}` is a mountpoint?\n\
         To complete the restore, please move the contents of `{path}` to a\n\
         different location and run the restore again.",
        path = .path.display()
    )]
    Mountpoint { path: PathBuf },

    #[error("Snapshot not found: {}", .path.display())]
    MissingSnapshot { path: PathBuf },

    #[error(transparent)]
    Pipeline(#[from] PipelineFailure),

    #[error("Restore I/O failure while {context}: {source}")]
    GenericIo {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl RestoreFailure {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        RestoreFailure::GenericIo {
            context: context.into(),
            source,
        }
    }
}

impl BackupFailure {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        BackupFailure::GenericIo {
            context: context.into(),
            source,
        }
    }
}
