//! Maps OS errors raised while staging a directory aside onto the few
//! failure kinds a restore knows how to report.

use std::io::{self, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// EACCES: some entry is not owned by (or writable for) the agent user.
    PermissionDenied,
    /// EBUSY: the source directory is itself a mountpoint.
    ResourceBusy,
    /// Anything else, with the original error text.
    Unknown(String),
}

pub fn classify(err: &io::Error) -> FailureKind {
    match err.kind() {
        ErrorKind::PermissionDenied => FailureKind::PermissionDenied,
        ErrorKind::ResourceBusy => FailureKind::ResourceBusy,
        _ => FailureKind::Unknown(err.to_string()),
    }
}
