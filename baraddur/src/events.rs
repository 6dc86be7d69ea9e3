//! Data carried on the engine's event stream.
//!
//! Every value here is transient: a [`MatchEvent`] is consumed exactly once by
//! the worker pool, an [`ExecutionResult`] exactly once by whoever subscribed
//! to the stream. Nothing is persisted between runs.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// Stable identifier for a configured job.
///
/// The config schema carries no name field, so jobs are identified by their
/// ordinal position in the `jobsSettings` sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A scan target that satisfied a job's pattern
#[derive(Debug, Clone)]
pub struct MatchEvent {
    /// The job whose pattern matched
    pub job: JobId,
    /// The matched path
    pub target: PathBuf,
    /// When the scanner observed the match
    pub timestamp: SystemTime,
}

impl MatchEvent {
    pub fn new(job: JobId, target: impl Into<PathBuf>) -> Self {
        Self {
            job,
            target: target.into(),
            timestamp: SystemTime::now(),
        }
    }
}

/// How a script invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The process ran to completion. `code` is `None` when the process was
    /// terminated by a signal rather than exiting.
    Exited { code: Option<i32> },
    /// The process could not be started at all (missing executable,
    /// permission denied). Reported, never retried.
    StartFailure { message: String },
    /// The configured timeout elapsed and the process was terminated
    TimedOut,
    /// A forced shutdown terminated the process before it finished
    Cancelled,
    /// Dry-run mode: the invocation was reported but never spawned
    DryRun,
}

impl ExecutionOutcome {
    /// True for a clean zero exit
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Exited { code: Some(0) })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionOutcome::Exited { code } => *code,
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Exited { code: Some(code) } => write!(f, "exited({code})"),
            ExecutionOutcome::Exited { code: None } => write!(f, "killed"),
            ExecutionOutcome::StartFailure { message } => write!(f, "start failure: {message}"),
            ExecutionOutcome::TimedOut => write!(f, "timed out"),
            ExecutionOutcome::Cancelled => write!(f, "cancelled"),
            ExecutionOutcome::DryRun => write!(f, "dry run"),
        }
    }
}

/// The outcome of dispatching one match to its job's script
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub job: JobId,
    pub target: PathBuf,
    pub outcome: ExecutionOutcome,
    /// Wall-clock time from dispatch to process exit
    pub duration: Duration,
    /// Truncated stdout sample
    pub stdout: String,
    /// Truncated stderr sample
    pub stderr: String,
}

/// Per-job lifecycle.
///
/// `Interrupted` is reached only when `interupt_when_matched` is set and a
/// match occurred. `Failed` means the scan root itself was unusable; soft
/// per-entry errors never fail a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Interrupted,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Interrupted => "interrupted",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A per-entry scan failure that did not abort the scan
#[derive(Debug, Clone)]
pub struct ScanWarning {
    pub job: JobId,
    /// The entry the failure was about, when the walker could attribute it
    pub path: Option<PathBuf>,
    pub message: String,
}

/// Everything the engine publishes to its subscriber
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Result(ExecutionResult),
    Warning(ScanWarning),
    JobState { job: JobId, state: JobState },
}
