//! Shared fixtures for the backup integration tests
#![allow(dead_code)]

use backup_agent::backup::staging;
use backup_agent::backup::{
    BackupSettings, EntryMover, PipelineResult, PipelineRunner, PipelineSpec, StageStatus,
};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Records every pipeline instead of running it; stages "exit" with the
/// configured codes (0 when none given).
#[derive(Clone, Default)]
pub struct RecordingRunner {
    calls: Arc<Mutex<Vec<PipelineSpec>>>,
    exit_codes: Vec<i32>,
    stderr: String,
}

impl RecordingRunner {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn with_exit_codes(exit_codes: &[i32]) -> Self {
        Self {
            exit_codes: exit_codes.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.to_string();
        self
    }

    pub fn calls(&self) -> Vec<PipelineSpec> {
        self.calls.lock().unwrap().clone()
    }
}

impl PipelineRunner for RecordingRunner {
    async fn run(&self, spec: &PipelineSpec) -> io::Result<PipelineResult> {
        self.calls.lock().unwrap().push(spec.clone());

        let statuses = spec
            .stages
            .iter()
            .enumerate()
            .map(|(index, stage)| StageStatus {
                program: stage.program.clone(),
                code: Some(self.exit_codes.get(index).copied().unwrap_or(0)),
            })
            .collect();

        Ok(PipelineResult {
            statuses,
            stdout: String::new(),
            stderr: self.stderr.clone(),
        })
    }
}

/// Fails every move, or the listing that precedes it, with a fixed OS
/// error number.
#[derive(Clone)]
pub struct FailingMover {
    errno: i32,
    fail_listing: bool,
    attempts: Arc<Mutex<usize>>,
}

impl FailingMover {
    pub fn new(errno: i32) -> Self {
        Self {
            errno,
            fail_listing: false,
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing_listing(errno: i32) -> Self {
        Self {
            fail_listing: true,
            ..Self::new(errno)
        }
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl EntryMover for FailingMover {
    fn list_entries(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        if self.fail_listing {
            return Err(io::Error::from_raw_os_error(self.errno));
        }
        staging::list_entries(dir)
    }

    fn move_entries(&self, _entries: &[PathBuf], _destination: &Path) -> io::Result<()> {
        *self.attempts.lock().unwrap() += 1;
        Err(io::Error::from_raw_os_error(self.errno))
    }
}

pub const EACCES: i32 = 13;
pub const EBUSY: i32 = 16;
pub const EIO: i32 = 5;

pub fn restore_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 3, 22, 0, 0, 0).unwrap()
}

pub fn settings(root: &Path) -> BackupSettings {
    BackupSettings::new(root)
}

pub fn argv(spec: &PipelineSpec) -> Vec<Vec<String>> {
    spec.stages.iter().map(|stage| stage.argv()).collect()
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Every entry under `root` (relative path -> description), following no
/// symlinks: file contents, symlink targets, and directories.
pub fn snapshot_tree(root: &Path) -> BTreeMap<PathBuf, String> {
    let mut tree = BTreeMap::new();
    walk(root, root, &mut tree);
    tree
}

fn walk(root: &Path, dir: &Path, tree: &mut BTreeMap<PathBuf, String>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let relative = path.strip_prefix(root).unwrap().to_path_buf();
        let metadata = fs::symlink_metadata(&path).unwrap();

        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&path).unwrap();
            tree.insert(relative, format!("link:{}", target.display()));
        } else if metadata.is_dir() {
            tree.insert(relative, "dir".to_string());
            walk(root, &path, tree);
        } else {
            let bytes = fs::read(&path).unwrap();
            tree.insert(relative, format!("file:{:?}", bytes));
        }
    }
}

/// A small data directory: regular files, a dotfile, nesting, a symlink,
/// an empty directory and a scratch directory meant to be excluded.
pub fn populate_data_dir(root: &Path) {
    fs::create_dir_all(root.join("docker/registry/v2")).unwrap();
    fs::write(root.join("docker/registry/v2/blob"), vec![7u8; 64 * 1024]).unwrap();
    fs::write(root.join("sample1"), b"sample one").unwrap();
    fs::write(root.join(".hidden"), b"dotfile").unwrap();
    fs::create_dir_all(root.join("empty")).unwrap();
    std::os::unix::fs::symlink("sample1", root.join("latest")).unwrap();
}

pub fn tool_available(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
