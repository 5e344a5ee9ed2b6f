//! External command pipelines
//!
//! A pipeline is an ordered list of stages where stage `i`'s stdout feeds
//! stage `i + 1`'s stdin. Every stage is spawned before anything is awaited
//! and every stage is awaited to completion, even when an earlier one has
//! already failed: a decompressor must be allowed to drain or its producer
//! blocks on a full pipe.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{self, ErrorKind};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as AsyncCommand};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One external command: executable plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub program: String,
    pub args: Vec<String>,
}

impl Stage {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a stage from a configured command line such as `["gzip", "-c", "-1"]`.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned()))
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSpec {
    pub stages: Vec<Stage>,
    /// File connected to the first stage's stdin.
    pub input: Option<PathBuf>,
    /// File the last stage's stdout is written to (created with mode 0600).
    pub output: Option<PathBuf>,
}

impl PipelineSpec {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            input: None,
            output: None,
        }
    }

    pub fn read_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = Some(path.into());
        self
    }

    pub fn write_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }
}

impl fmt::Display for PipelineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<String> = self.stages.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", stages.join(" | "))?;
        if let Some(input) = &self.input {
            write!(f, " < {}", input.display())?;
        }
        if let Some(output) = &self.output {
            write!(f, " > {}", output.display())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStatus {
    pub program: String,
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl StageStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} exited with status {}", self.program, code),
            None => write!(f, "{} was killed by a signal", self.program),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineResult {
    /// One entry per stage, in pipeline order.
    pub statuses: Vec<StageStatus>,
    /// Last stage's stdout, when it was not redirected to a file.
    pub stdout: String,
    /// Standard error of every stage, concatenated in stage order.
    pub stderr: String,
}

impl PipelineResult {
    pub fn all_succeeded(&self) -> bool {
        self.statuses.iter().all(StageStatus::success)
    }

    pub fn failed_stages(&self) -> Vec<StageStatus> {
        self.statuses
            .iter()
            .filter(|status| !status.success())
            .cloned()
            .collect()
    }
}

/// Executes pipelines. Stage failures are reported in the result; `Err` is
/// reserved for pipelines that could not be started at all.
pub trait PipelineRunner: Send + Sync {
    fn run(&self, spec: &PipelineSpec)
        -> impl Future<Output = io::Result<PipelineResult>> + Send;
}

/// Runs stages as tokio child processes connected by anonymous pipes.
#[derive(Debug, Clone, Default)]
pub struct CommandPipelineRunner;

impl CommandPipelineRunner {
    pub fn new() -> Self {
        Self
    }
}

struct SpawnedStage {
    program: String,
    child: Child,
    stderr: JoinHandle<String>,
}

impl PipelineRunner for CommandPipelineRunner {
    async fn run(&self, spec: &PipelineSpec) -> io::Result<PipelineResult> {
        if spec.stages.is_empty() {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "pipeline has no stages",
            ));
        }

        debug!("Executing pipeline: {}", spec);

        let mut spawned: Vec<SpawnedStage> = Vec::with_capacity(spec.stages.len());
        let mut stdout_task: Option<JoinHandle<String>> = None;

        if let Err(e) = spawn_stages(spec, &mut spawned, &mut stdout_task) {
            warn!("Pipeline could not be started ({}), reaping spawned stages", e);
            for mut stage in spawned {
                let _ = stage.child.start_kill();
                let _ = stage.child.wait().await;
            }
            return Err(e);
        }

        let mut statuses = Vec::with_capacity(spawned.len());
        let mut stderr = String::new();

        for mut stage in spawned {
            let status = stage.child.wait().await?;
            let stage_status = StageStatus {
                program: stage.program,
                code: status.code(),
            };

            if stage_status.success() {
                debug!("Pipeline stage finished: {}", stage_status);
            } else {
                info!("Pipeline stage finished: {}", stage_status);
            }

            stderr.push_str(&stage.stderr.await.unwrap_or_default());
            statuses.push(stage_status);
        }

        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        Ok(PipelineResult {
            statuses,
            stdout,
            stderr,
        })
    }
}

fn spawn_stages(
    spec: &PipelineSpec,
    spawned: &mut Vec<SpawnedStage>,
    stdout_task: &mut Option<JoinHandle<String>>,
) -> io::Result<()> {
    let last = spec.stages.len() - 1;
    let mut upstream: Option<Stdio> = None;

    for (index, stage) in spec.stages.iter().enumerate() {
        let stdin = match upstream.take() {
            Some(stdio) => stdio,
            None => match &spec.input {
                Some(path) => Stdio::from(File::open(path).map_err(|e| {
                    io::Error::new(
                        e.kind(),
                        format!("failed to open pipeline input {}: {}", path.display(), e),
                    )
                })?),
                None => Stdio::null(),
            },
        };

        let stdout = match (&spec.output, index == last) {
            (Some(path), true) => Stdio::from(open_output(path)?),
            _ => Stdio::piped(),
        };

        let mut child = AsyncCommand::new(&stage.program)
            .args(&stage.args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("failed to spawn {}: {}", stage.program, e),
                )
            })?;

        if let Some(child_stdout) = child.stdout.take() {
            if index == last {
                *stdout_task = Some(drain(child_stdout));
            } else {
                upstream = Some(child_stdout.try_into()?);
            }
        }

        let stderr = match child.stderr.take() {
            Some(child_stderr) => drain(child_stderr),
            None => tokio::spawn(async { String::new() }),
        };

        spawned.push(SpawnedStage {
            program: stage.program.clone(),
            child,
            stderr,
        });
    }

    Ok(())
}

fn open_output(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to open pipeline output {}: {}", path.display(), e),
            )
        })
}

fn drain<R>(mut reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        let _ = reader.read_to_end(&mut buffer).await;
        String::from_utf8_lossy(&buffer).into_owned()
    })
}
