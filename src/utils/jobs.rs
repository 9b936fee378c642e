//! Job files and their bounded, fail-fast execution.
//!
//! A job file holds one shell command per line. Every batch is run with at
//! most `procs` commands in flight; the first failing command stops the whole
//! batch. The job file is removed after every run, and a failed run leaves a
//! failure record behind with the failing command and its stderr.
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Local;
use log::{debug, info, warn};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cli::Executor;
use crate::config::defs::{PipelineError, SHELL_TAG};
use crate::utils::command::parallel;

/// Accumulates independent shell commands for one batch.
#[derive(Debug, Default, Clone)]
pub struct JobFileBuilder {
    commands: Vec<String>,
}

impl JobFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: impl Into<String>) {
        let command = command.into();
        debug!("job: {}", command);
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Writes the batch to a fresh file in `dir` and hands back its path.
    /// The file outlives this call; the runner removes it.
    pub fn write(&self, dir: &Path, label: &str) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let prefix = format!("{}-", sanitize_label(label));
        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".jobs")
            .tempfile_in(dir)?;
        for command in &self.commands {
            writeln!(tmp, "{}", command)?;
        }
        tmp.flush()?;
        let (_, path) = tmp.keep().map_err(|e| anyhow!("Failed to keep job file: {}", e))?;
        Ok(path)
    }
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

/// Details of the sub-job that broke a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub command: Option<String>,
    pub exit_code: Option<i32>,
    pub stderr: String,
    /// Where the failure record was written.
    pub record: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub label: String,
    pub jobs: usize,
    /// 0 when every job succeeded.
    pub status: i32,
    pub failure: Option<JobFailure>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    /// Converts a failed batch into a fatal pipeline error.
    pub fn ensure_success(self) -> Result<Self, PipelineError> {
        if self.is_success() {
            return Ok(self);
        }
        let record = self
            .failure
            .as_ref()
            .map(|f| f.record.clone())
            .unwrap_or_default();
        Err(PipelineError::BatchFailed {
            label: self.label,
            status: self.status,
            record,
        })
    }
}

/// What the executor reports before the runner writes its record.
struct RawFailure {
    status: i32,
    command: Option<String>,
    exit_code: Option<i32>,
    stderr: String,
}

/// Runs job files with a bounded number of concurrent jobs.
#[derive(Debug, Clone)]
pub struct JobRunner {
    pub executor: Executor,
    pub procs: usize,
    pub parallel_bin: String,
    /// Failure records land here.
    pub failure_dir: PathBuf,
}

impl JobRunner {
    pub fn new(executor: Executor, procs: usize, parallel_bin: impl Into<String>, failure_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            procs: procs.max(1),
            parallel_bin: parallel_bin.into(),
            failure_dir: failure_dir.into(),
        }
    }

    /// Builds, writes and runs a batch in one go.
    pub async fn run_jobs(&self, jobs: &JobFileBuilder, job_dir: &Path, label: &str) -> Result<BatchOutcome, PipelineError> {
        let job_file = jobs
            .write(job_dir, label)
            .map_err(|e| PipelineError::IOError(e.to_string()))?;
        self.run_job_file(&job_file, label).await
    }

    /// Runs every line of `job_file`, then removes the file whatever the result.
    pub async fn run_job_file(&self, job_file: &Path, label: &str) -> Result<BatchOutcome, PipelineError> {
        let commands = match read_commands(job_file) {
            Ok(commands) => commands,
            Err(e) => {
                remove_job_file(job_file);
                return Err(e);
            }
        };
        info!("{} (# jobs = {})", label, commands.len());

        if commands.is_empty() {
            info!("No jobs to run!");
            remove_job_file(job_file);
            return Ok(BatchOutcome { label: label.to_string(), jobs: 0, status: 0, failure: None });
        }

        let result = match self.executor {
            Executor::Parallel => self.run_with_parallel(job_file, label).await,
            Executor::Native => self.run_native(&commands).await,
        };

        let outcome = match result {
            Ok(None) => Ok(BatchOutcome { label: label.to_string(), jobs: commands.len(), status: 0, failure: None }),
            Ok(Some(raw)) => {
                let failure = self.record_failure(label, &commands, raw.command, raw.exit_code, raw.stderr);
                match failure {
                    Ok(failure) => {
                        warn!(
                            "{} failed (status {}): {}",
                            label,
                            raw.status,
                            failure.command.as_deref().unwrap_or("<unknown command>")
                        );
                        Ok(BatchOutcome { label: label.to_string(), jobs: commands.len(), status: raw.status, failure: Some(failure) })
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        remove_job_file(job_file);
        outcome
    }

    async fn run_with_parallel(&self, job_file: &Path, label: &str) -> Result<Option<RawFailure>, PipelineError> {
        let joblog = job_file.with_extension("joblog");
        let args = parallel::arg_generator(self.procs, &joblog);
        info!("{} {} < {}", self.parallel_bin, args.join(" "), job_file.display());

        let stdin = File::open(job_file).map_err(|e| PipelineError::IOError(e.to_string()))?;
        let child = Command::new(&self.parallel_bin)
            .args(&args)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::ToolExecution {
                tool: self.parallel_bin.clone(),
                error: format!("Failed to spawn for '{}': {}. Is GNU parallel installed?", label, e),
            })?;

        let output = child.wait_with_output().await.map_err(|e| PipelineError::ToolExecution {
            tool: self.parallel_bin.clone(),
            error: e.to_string(),
        })?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        for line in stderr.lines() {
            debug!("[{}] {}", label, line);
        }

        let log_text = fs::read_to_string(&joblog).unwrap_or_default();
        let _ = fs::remove_file(&joblog);

        if output.status.success() {
            return Ok(None);
        }

        let failed = parallel::first_failed_job(&log_text);
        Ok(Some(RawFailure {
            status: output.status.code().unwrap_or(1),
            command: failed.as_ref().map(|f| f.command.clone()),
            exit_code: failed.map(|f| f.exit_code),
            stderr,
        }))
    }

    async fn run_native(&self, commands: &[String]) -> Result<Option<RawFailure>, PipelineError> {
        let permits = Arc::new(Semaphore::new(self.procs));
        let mut set: JoinSet<Result<(String, std::process::Output), (String, std::io::Error)>> = JoinSet::new();

        for command in commands {
            let permits = permits.clone();
            let command = command.clone();
            set.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => return Err((command, std::io::Error::other(e.to_string()))),
                };
                let child = Command::new(SHELL_TAG)
                    .arg("-c")
                    .arg(&command)
                    .stdin(Stdio::null())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .spawn();
                let child = match child {
                    Ok(c) => c,
                    Err(e) => return Err((command, e)),
                };
                match child.wait_with_output().await {
                    Ok(output) => Ok((command, output)),
                    Err(e) => Err((command, e)),
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            let failure = match joined {
                Ok(Ok((command, output))) => {
                    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                    if output.status.success() {
                        for line in stderr.lines() {
                            debug!("{}", line);
                        }
                        continue;
                    }
                    let code = output.status.code();
                    RawFailure { status: code.filter(|c| *c != 0).unwrap_or(1), command: Some(command), exit_code: code, stderr }
                }
                Ok(Err((command, e))) => RawFailure { status: 1, command: Some(command), exit_code: None, stderr: e.to_string() },
                Err(e) => RawFailure { status: 1, command: None, exit_code: None, stderr: e.to_string() },
            };
            // halt now: dropping the remaining tasks kills their children
            set.abort_all();
            while set.join_next().await.is_some() {}
            return Ok(Some(failure));
        }
        Ok(None)
    }

    fn record_failure(
        &self,
        label: &str,
        commands: &[String],
        command: Option<String>,
        exit_code: Option<i32>,
        stderr: String,
    ) -> Result<JobFailure, PipelineError> {
        let io_err = |e: std::io::Error| PipelineError::IOError(e.to_string());
        fs::create_dir_all(&self.failure_dir).map_err(io_err)?;
        let record = self.failure_dir.join(format!(
            "{}-{}.log",
            sanitize_label(label),
            Local::now().format("%Y%m%d%H%M%S%3f")
        ));

        let mut file = File::create(&record).map_err(io_err)?;
        writeln!(file, "batch: {}", label).map_err(io_err)?;
        writeln!(file, "failed command: {}", command.as_deref().unwrap_or("<unknown>")).map_err(io_err)?;
        let code = exit_code.map_or_else(|| "<none>".to_string(), |c| c.to_string());
        writeln!(file, "exit code: {}", code).map_err(io_err)?;
        writeln!(file, "--- stderr ---\n{}", stderr.trim_end()).map_err(io_err)?;
        writeln!(file, "--- jobs ({}) ---", commands.len()).map_err(io_err)?;
        for c in commands {
            writeln!(file, "{}", c).map_err(io_err)?;
        }
        warn!("Failure record written to {}", record.display());

        Ok(JobFailure { command, exit_code, stderr, record })
    }
}

fn read_commands(job_file: &Path) -> Result<Vec<String>, PipelineError> {
    let text = fs::read_to_string(job_file)
        .map_err(|e| PipelineError::IOError(format!("{}: {}", job_file.display(), e)))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

fn remove_job_file(job_file: &Path) {
    if let Err(e) = fs::remove_file(job_file) {
        warn!("Could not remove job file {}: {}", job_file.display(), e);
    }
}
