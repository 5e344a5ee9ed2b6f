//! Dump and restore orchestration for a single target
//!
//! `dump`: exclude args -> strategy pipeline -> run.
//! `restore`: check snapshot -> move current contents to quarantine ->
//! unpack pipeline -> run. The quarantine is left in place whatever happens.

use chrono::{DateTime, Utc};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::classify::{classify, FailureKind};
use super::errors::{BackupFailure, PipelineFailure, RestoreFailure};
use super::excludes::build_exclude_args;
use super::pipeline::{CommandPipelineRunner, PipelineResult, PipelineRunner, PipelineSpec, Stage};
use super::staging::{self, EntryMover, FsEntryMover};
use super::{BackupTarget, Strategy};

/// Tool lines and locations the workflow needs; built from the agent config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSettings {
    pub backup_root: PathBuf,
    pub tar_command: String,
    pub rsync_command: String,
    pub compressor: Stage,
    pub decompressor: Stage,
    pub archive_extension: String,
    /// Accept tar exiting 1 ("some files differ") and the `.: Cannot mkdir`
    /// warning when every other stage succeeded.
    pub ignore_tar_warnings: bool,
}

impl BackupSettings {
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self {
            backup_root: backup_root.into(),
            tar_command: "tar".to_string(),
            rsync_command: "rsync".to_string(),
            compressor: Stage::new("gzip", ["-c", "-1"]),
            decompressor: Stage::new("gzip", ["-cd"]),
            archive_extension: "tar.gz".to_string(),
            ignore_tar_warnings: false,
        }
    }

    /// `<backup root>/<name>.<extension>`
    pub fn snapshot_path(&self, target: &BackupTarget) -> PathBuf {
        self.backup_root
            .join(format!("{}.{}", target.name, self.archive_extension))
    }

    /// Where rsync leaves the copy: `<backup root>/<basename of source>`.
    pub fn copy_destination(&self, target: &BackupTarget) -> PathBuf {
        match target.source_path.file_name() {
            Some(base) => self.backup_root.join(base),
            None => self.backup_root.join(&target.name),
        }
    }
}

pub struct BackupWorkflow<R = CommandPipelineRunner, M = FsEntryMover> {
    settings: BackupSettings,
    runner: R,
    mover: M,
    clock: fn() -> DateTime<Utc>,
}

impl BackupWorkflow {
    pub fn with_defaults(settings: BackupSettings) -> Self {
        Self::new(settings, CommandPipelineRunner::new(), FsEntryMover)
    }
}

impl<R: PipelineRunner, M: EntryMover> BackupWorkflow<R, M> {
    pub fn new(settings: BackupSettings, runner: R, mover: M) -> Self {
        Self {
            settings,
            runner,
            mover,
            clock: Utc::now,
        }
    }

    /// Overrides the time source used to name quarantine directories.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn dump_pipeline(&self, target: &BackupTarget) -> PipelineSpec {
        let source = target.source_path.display().to_string();
        let mut args = build_exclude_args(&target.exclude_patterns, target.strategy);

        match target.strategy {
            Strategy::Archive => {
                args.extend(["-C".to_string(), source, "-cf".into(), "-".into(), ".".into()]);
                PipelineSpec::new(vec![
                    Stage::new(self.settings.tar_command.clone(), args),
                    self.settings.compressor.clone(),
                ])
                .write_to(self.settings.snapshot_path(target))
            }
            Strategy::Copy => {
                let mut rsync_args = vec!["-a".to_string()];
                rsync_args.extend(args);
                rsync_args.push(source);
                rsync_args.push(self.settings.backup_root.display().to_string());
                PipelineSpec::new(vec![Stage::new(
                    self.settings.rsync_command.clone(),
                    rsync_args,
                )])
            }
        }
    }

    pub fn restore_pipeline(&self, target: &BackupTarget) -> PipelineSpec {
        let source = target.source_path.display().to_string();

        match target.strategy {
            Strategy::Archive => PipelineSpec::new(vec![
                self.settings.decompressor.clone(),
                Stage::new(
                    self.settings.tar_command.clone(),
                    [
                        "--unlink-first",
                        "--recursive-unlink",
                        "-C",
                        source.as_str(),
                        "-xf",
                        "-",
                    ],
                ),
            ])
            .read_from(self.settings.snapshot_path(target)),
            Strategy::Copy => {
                // Trailing slash: transfer the directory's contents, not the directory.
                let copy = format!("{}/", self.settings.copy_destination(target).display());
                PipelineSpec::new(vec![Stage::new(
                    self.settings.rsync_command.clone(),
                    ["-a".to_string(), copy, source],
                )])
            }
        }
    }

    pub async fn dump(&self, target: &BackupTarget) -> Result<(), BackupFailure> {
        info!(
            "Dumping {} from {} ({} strategy)",
            target.name,
            target.source_path.display(),
            target.strategy
        );

        let root = &self.settings.backup_root;
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| BackupFailure::io(format!("creating backup root {}", root.display()), e))?;

        if target.strategy == Strategy::Archive {
            let snapshot = self.settings.snapshot_path(target);
            match tokio::fs::remove_file(&snapshot).await {
                Ok(()) => debug!("Removed previous snapshot {}", snapshot.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(BackupFailure::io(
                        format!("removing previous snapshot {}", snapshot.display()),
                        e,
                    ))
                }
            }
        }

        let spec = self.dump_pipeline(target);
        info!("Running dump pipeline: {}", spec);

        let result = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| BackupFailure::io(format!("starting `{}`", spec), e))?;
        self.check_pipeline("Backup", &result)?;

        info!("✓ Dump of {} completed", target.name);
        Ok(())
    }

    pub async fn restore(&self, target: &BackupTarget) -> Result<(), RestoreFailure> {
        info!(
            "Restoring {} into {} ({} strategy)",
            target.name,
            target.source_path.display(),
            target.strategy
        );

        let snapshot = match target.strategy {
            Strategy::Archive => self.settings.snapshot_path(target),
            Strategy::Copy => self.settings.copy_destination(target),
        };
        let exists = tokio::fs::try_exists(&snapshot).await.map_err(|e| {
            RestoreFailure::io(format!("checking snapshot {}", snapshot.display()), e)
        })?;
        if !exists {
            error!("Snapshot for {} not found at {}", target.name, snapshot.display());
            return Err(RestoreFailure::MissingSnapshot { path: snapshot });
        }

        if let Some(quarantine) = self.stage_aside(target).await? {
            info!(
                "✓ Existing contents of {} moved to {}",
                target.source_path.display(),
                quarantine.display()
            );
        }

        tokio::fs::create_dir_all(&target.source_path)
            .await
            .map_err(|e| {
                RestoreFailure::io(
                    format!("creating {}", target.source_path.display()),
                    e,
                )
            })?;

        let spec = self.restore_pipeline(target);
        info!("Running restore pipeline: {}", spec);

        let result = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| RestoreFailure::io(format!("starting `{}`", spec), e))?;
        self.check_pipeline("Restore", &result)?;

        info!("✓ Restore of {} completed", target.name);
        Ok(())
    }

    /// Moves everything under the source path into a fresh quarantine
    /// directory. Returns the quarantine path, or `None` when there was
    /// nothing to move.
    async fn stage_aside(&self, target: &BackupTarget) -> Result<Option<PathBuf>, RestoreFailure> {
        let mover = self.mover.clone();
        let source = target.source_path.clone();
        let entries = tokio::task::spawn_blocking(move || mover.list_entries(&source))
            .await
            .map_err(|e| RestoreFailure::io("listing entries to move aside", io::Error::other(e)))?
            .map_err(|e| classify_staging_error(&target.source_path, e))?;
        if entries.is_empty() {
            info!("{} is empty, nothing to move aside", target.source_path.display());
            return Ok(None);
        }

        let quarantine =
            staging::quarantine_path(&self.settings.backup_root, &target.name, (self.clock)());
        staging::create_quarantine_dir(&quarantine).map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                error!(
                    "Quarantine {} is already in use, refusing to move anything into it",
                    quarantine.display()
                );
            }
            RestoreFailure::io(format!("creating quarantine {}", quarantine.display()), e)
        })?;

        debug!(
            "Moving {} entries from {} to {}",
            entries.len(),
            target.source_path.display(),
            quarantine.display()
        );

        let mover = self.mover.clone();
        let destination = quarantine.clone();
        let moved = tokio::task::spawn_blocking(move || mover.move_entries(&entries, &destination))
            .await
            .map_err(|e| RestoreFailure::io("moving entries aside", io::Error::other(e)))?;

        match moved {
            Ok(()) => Ok(Some(quarantine)),
            Err(e) => Err(classify_staging_error(&target.source_path, e)),
        }
    }

    fn check_pipeline(
        &self,
        operation: &'static str,
        result: &PipelineResult,
    ) -> Result<(), PipelineFailure> {
        if result.all_succeeded() {
            return Ok(());
        }

        let failed_stages = result.failed_stages();

        if self.settings.ignore_tar_warnings
            && failed_stages
                .iter()
                .all(|stage| stage.program == self.settings.tar_command)
        {
            if failed_stages.iter().all(|stage| stage.code == Some(1)) {
                warn!(
                    "Ignoring tar exit status 1 'Some files differ': {}",
                    result.stderr.trim()
                );
                return Ok(());
            }
            if noncritical_warnings_only(&result.stderr) {
                warn!(
                    "Ignoring non-success tar exit status due to non-critical warning(s): {}",
                    result.stderr.trim()
                );
                return Ok(());
            }
        }

        for stage in &failed_stages {
            error!("{} pipeline stage failed: {}", operation, stage);
        }

        Err(PipelineFailure {
            operation,
            failed_stages,
            stderr: result.stderr.clone(),
        })
    }
}

fn classify_staging_error(source_path: &Path, err: io::Error) -> RestoreFailure {
    let path = source_path.to_path_buf();
    match classify(&err) {
        FailureKind::PermissionDenied => {
            error!("Access denied while moving contents of {} aside", path.display());
            RestoreFailure::AccessDenied { path }
        }
        FailureKind::ResourceBusy => {
            error!("{} is busy and cannot be moved, likely a mountpoint", path.display());
            RestoreFailure::Mountpoint { path }
        }
        FailureKind::Unknown(message) => {
            error!("Failed to move contents of {} aside: {}", path.display(), message);
            RestoreFailure::io(format!("moving contents of {} aside", path.display()), err)
        }
    }
}

/// True when stderr is non-empty and consists only of tar's
/// `.: Cannot mkdir: No such file or directory` warning.
fn noncritical_warnings_only(stderr: &str) -> bool {
    let mut lines = stderr.lines().map(str::trim).filter(|line| !line.is_empty()).peekable();
    if lines.peek().is_none() {
        return false;
    }
    lines.all(|line| {
        let line = line.strip_prefix('g').unwrap_or(line);
        line == "tar: .: Cannot mkdir: No such file or directory"
    })
}
