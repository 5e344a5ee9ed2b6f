//! Moving a directory's current contents aside before a restore
//!
//! Entries are moved into `<backup root>/tmp/<name>.<unix seconds>` and are
//! never moved back or deleted automatically; that directory is what an
//! operator recovers from when a restore goes wrong.

use chrono::{DateTime, Utc};
use std::fs::{self, DirBuilder};
use std::io::{self, ErrorKind};
use std::os::unix::fs::{symlink, DirBuilderExt};
use std::path::{Path, PathBuf};
use tracing::debug;

pub fn quarantine_path(backup_root: &Path, name: &str, at: DateTime<Utc>) -> PathBuf {
    backup_root
        .join("tmp")
        .join(format!("{}.{}", name, at.timestamp()))
}

/// Entries directly under `dir`, dotfiles included, sorted by name.
///
/// A missing directory has nothing to stage and yields an empty list. Any
/// other failure, including one part-way through the listing, is returned:
/// a partial list would leave entries behind for the unpack to overwrite.
pub fn list_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let reader = match fs::read_dir(dir) {
        Ok(reader) => reader,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} does not exist, nothing to stage", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let mut entries = reader
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<io::Result<Vec<_>>>()?;

    entries.sort();
    Ok(entries)
}

/// Creates the quarantine directory with mode 0700, creating `tmp/` above it
/// as needed. The directory itself must be new: an existing quarantine of
/// the same name is never merged into.
pub fn create_quarantine_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    DirBuilder::new().mode(0o700).create(path)
}

/// Lists and moves a directory's entries. Both steps return the raw OS
/// error so the caller can classify it; moving stops at the first failure.
pub trait EntryMover: Clone + Send + Sync + 'static {
    fn list_entries(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        list_entries(dir)
    }

    fn move_entries(&self, entries: &[PathBuf], destination: &Path) -> io::Result<()>;
}

/// Renames entries; falls back to copy-then-remove across filesystems.
#[derive(Debug, Clone, Default)]
pub struct FsEntryMover;

impl EntryMover for FsEntryMover {
    fn move_entries(&self, entries: &[PathBuf], destination: &Path) -> io::Result<()> {
        for entry in entries {
            let file_name = entry.file_name().ok_or_else(|| {
                io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("cannot move {}: no file name", entry.display()),
                )
            })?;
            let target = destination.join(file_name);

            match fs::rename(entry, &target) {
                Ok(()) => debug!("Moved {} to {}", entry.display(), target.display()),
                Err(e) if e.kind() == ErrorKind::CrossesDevices => {
                    debug!(
                        "{} is on another filesystem than {}, copying",
                        entry.display(),
                        destination.display()
                    );
                    copy_recursive(entry, &target)?;
                    remove_entry(entry)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn copy_recursive(source: &Path, target: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(source)?;
    let file_type = metadata.file_type();

    if file_type.is_symlink() {
        symlink(fs::read_link(source)?, target)?;
    } else if file_type.is_dir() {
        fs::create_dir(target)?;
        for child in fs::read_dir(source)? {
            let child = child?;
            copy_recursive(&child.path(), &target.join(child.file_name()))?;
        }
        fs::set_permissions(target, metadata.permissions())?;
    } else {
        fs::copy(source, target)?;
    }

    Ok(())
}

fn remove_entry(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
