//! The engine: owns the two slot pools, starts one supervisor per configured
//! job and exposes start/stop/status plus the event stream.
//!
//! Per-job failures are isolated. One job transitioning to `Failed` never
//! stops the others; the aggregate of terminal states is available through
//! [`Engine::status`] (and the return values of [`Engine::wait`] and
//! [`Engine::stop`]) for whoever decides the process exit code.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ScanMode, Settings};
use crate::errors::{EngineError, EngineResult};
use crate::events::{EngineEvent, JobId, JobState};
use crate::pool::SlotPool;
use crate::supervisor::{JobRuntime, JobSupervisor};

/// Engine-level knobs that the config schema does not carry
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Default scan root for jobs without one of their own
    pub root: PathBuf,
    /// Report executions without spawning anything
    pub dry_run: bool,
    /// Run only the job with this ordinal index
    pub job_filter: Option<usize>,
    /// Force every job into this scan mode, ignoring per-job settings
    pub mode: Option<ScanMode>,
    /// Execution timeout for jobs without one of their own
    pub default_timeout: Option<Duration>,
    /// Watch-mode re-poll delay for jobs without one of their own
    pub poll_interval: Duration,
    /// Upper bound on how long [`Engine::stop`] may take
    pub grace: Duration,
    /// Capacity of the event stream channel
    pub event_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            dry_run: false,
            job_filter: None,
            mode: None,
            default_timeout: None,
            poll_interval: Duration::from_secs(2),
            grace: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

/// A job's current lifecycle state, as reported by [`Engine::status`]
#[derive(Debug, Clone, Copy)]
pub struct JobStatus {
    pub job: JobId,
    pub state: JobState,
}

/// A running watcher process: one supervisor task per configured job, fed
/// from a shared scanner pool and worker pool
#[derive(Debug)]
pub struct Engine {
    states: Arc<Mutex<Vec<(JobId, JobState)>>>,
    scan_pool: Arc<SlotPool>,
    work_pool: Arc<SlotPool>,
    shutdown: CancellationToken,
    kill: CancellationToken,
    supervisors: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl Engine {
    /// Validates the settings and starts every configured job.
    ///
    /// Nothing is spawned if validation fails; the returned receiver is the
    /// engine's result/event stream and closes once every job has reached a
    /// terminal state.
    pub fn start(
        settings: Settings,
        options: EngineOptions,
    ) -> EngineResult<(Engine, mpsc::Receiver<EngineEvent>)> {
        let mut plans = settings.validate()?;

        if let Some(index) = options.job_filter {
            if index >= plans.len() {
                return Err(EngineError::config_invalid(vec![format!(
                    "job {index} does not exist ({} jobs configured)",
                    plans.len()
                )]));
            }
            plans.retain(|plan| plan.id == JobId(index));
        }

        let scan_pool = SlotPool::new("scan", settings.scanner_concurrency);
        let work_pool = SlotPool::new("work", settings.worker_concurrency);
        let (events_tx, events_rx) = mpsc::channel(options.event_capacity.max(1));
        let shutdown = CancellationToken::new();
        let kill = CancellationToken::new();

        let states = Arc::new(Mutex::new(
            plans
                .iter()
                .map(|plan| (plan.id, JobState::Pending))
                .collect::<Vec<_>>(),
        ));

        info!(
            jobs = plans.len(),
            scanners = settings.scanner_concurrency.get(),
            workers = settings.worker_concurrency.get(),
            "starting engine"
        );

        let mut supervisors = Vec::with_capacity(plans.len());
        for (slot, plan) in plans.into_iter().enumerate() {
            let runtime = JobRuntime::from_plan(plan, &options);
            let supervisor = JobSupervisor::new(
                runtime,
                slot,
                Arc::clone(&scan_pool),
                Arc::clone(&work_pool),
                events_tx.clone(),
                Arc::clone(&states),
                shutdown.clone(),
                kill.clone(),
            );
            supervisors.push(tokio::spawn(supervisor.run()));
        }

        let engine = Engine {
            states,
            scan_pool,
            work_pool,
            shutdown,
            kill,
            supervisors,
            grace: options.grace,
        };
        Ok((engine, events_rx))
    }

    /// Current lifecycle state of every job
    pub fn status(&self) -> Vec<JobStatus> {
        self.states
            .lock()
            .expect("job state lock poisoned")
            .iter()
            .map(|&(job, state)| JobStatus { job, state })
            .collect()
    }

    /// The scanner concurrency pool (occupancy instrumentation)
    pub fn scan_pool(&self) -> Arc<SlotPool> {
        Arc::clone(&self.scan_pool)
    }

    /// The worker concurrency pool (occupancy instrumentation)
    pub fn work_pool(&self) -> Arc<SlotPool> {
        Arc::clone(&self.work_pool)
    }

    /// Signals shutdown without waiting. Graceful stops scanning and lets
    /// in-flight executions finish; forced also terminates child processes.
    pub fn shutdown(&self, graceful: bool) {
        self.shutdown.cancel();
        if !graceful {
            self.kill.cancel();
        }
    }

    /// Runs until every job reaches a terminal state. Only sensible when all
    /// jobs are in once mode or interrupt on match; watch jobs never finish
    /// on their own.
    pub async fn wait(mut self) -> Vec<JobStatus> {
        for handle in self.supervisors.drain(..) {
            let _ = handle.await;
        }
        self.status()
    }

    /// Stops the engine and waits for it to wind down, bounded by the grace
    /// period. Supervisors that outlive the grace period are aborted, so this
    /// always returns.
    pub async fn stop(mut self, graceful: bool) -> Vec<JobStatus> {
        self.shutdown(graceful);

        let deadline = Instant::now() + self.grace;
        for (slot, mut handle) in self.supervisors.drain(..).enumerate() {
            let left = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(left, &mut handle).await.is_err() {
                handle.abort();
                // The aborted supervisor can no longer report; record the
                // cut-off as a terminal state so status() stays consistent
                let mut states = self.states.lock().expect("job state lock poisoned");
                let (job, state) = &mut states[slot];
                if !state.is_terminal() {
                    warn!(job = %job, "job exceeded the grace period, cut off");
                    *state = JobState::Completed;
                }
            }
        }
        self.status()
    }
}
