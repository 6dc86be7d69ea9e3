//! Per-job supervision: one scanner lifecycle plus the downstream dispatch of
//! its matches into the worker pool.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{JobPlan, ScanMode};
use crate::engine::EngineOptions;
use crate::errors::EngineError;
use crate::events::{EngineEvent, JobId, JobState, ScanWarning};
use crate::matcher::PatternMatcher;
use crate::pool::SlotPool;
use crate::scanner::{PassEnd, Scanner};
use crate::worker;

/// Depth of the per-job scanner-to-dispatcher queue. When the worker pool is
/// saturated this queue fills and the scanner blocks, which is the
/// backpressure that bounds memory use.
const MATCH_QUEUE_DEPTH: usize = 64;

/// A job's settings resolved against engine-level defaults
#[derive(Debug, Clone)]
pub(crate) struct JobRuntime {
    pub id: JobId,
    pub matcher: PatternMatcher,
    pub root: PathBuf,
    pub interrupt: bool,
    pub mode: ScanMode,
    pub poll_interval: Duration,
    pub script: String,
    pub timeout: Option<Duration>,
    pub dry_run: bool,
}

impl JobRuntime {
    pub(crate) fn from_plan(plan: JobPlan, options: &EngineOptions) -> Self {
        let scan = plan.settings.scan;
        let work = plan.settings.work;
        // Resolve the mode before the root is moved out of `scan`
        let mode = options.mode.unwrap_or_else(|| scan.effective_mode());
        let root = match scan.root {
            // join() yields the per-job root unchanged when it is absolute
            Some(job_root) => options.root.join(job_root),
            None => options.root.clone(),
        };

        Self {
            id: plan.id,
            matcher: plan.matcher,
            root,
            interrupt: scan.interupt_when_matched,
            mode,
            poll_interval: scan.poll_interval.unwrap_or(options.poll_interval),
            script: work.script,
            timeout: work.timeout.or(options.default_timeout),
            dry_run: options.dry_run,
        }
    }
}

/// How the scan side of a job ended
enum ScanEnd {
    Exhausted,
    Interrupted,
    Cancelled,
    Failed(EngineError),
}

pub(crate) struct JobSupervisor {
    runtime: JobRuntime,
    /// Index into the shared state table (jobs may be filtered, so this is
    /// not necessarily the job's ordinal id)
    slot: usize,
    scan_pool: Arc<SlotPool>,
    work_pool: Arc<SlotPool>,
    events: mpsc::Sender<EngineEvent>,
    states: Arc<Mutex<Vec<(JobId, JobState)>>>,
    shutdown: CancellationToken,
    kill: CancellationToken,
}

impl JobSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        runtime: JobRuntime,
        slot: usize,
        scan_pool: Arc<SlotPool>,
        work_pool: Arc<SlotPool>,
        events: mpsc::Sender<EngineEvent>,
        states: Arc<Mutex<Vec<(JobId, JobState)>>>,
        shutdown: CancellationToken,
        kill: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            slot,
            scan_pool,
            work_pool,
            events,
            states,
            shutdown,
            kill,
        }
    }

    /// Drives the job to a terminal state.
    ///
    /// Matches are dispatched in scanner order: the work slot for each event
    /// is acquired before the next event is taken, so executions of one job
    /// start in FIFO order even though they may run in parallel. An
    /// interrupting job stops scanning after its first match but still waits
    /// for the in-flight execution before reporting `Interrupted`.
    pub(crate) async fn run(self) {
        self.set_state(JobState::Running).await;

        let (match_tx, mut match_rx) = mpsc::channel(MATCH_QUEUE_DEPTH);
        let job_cancel = self.shutdown.child_token();

        let scanner = Scanner::new(
            self.runtime.id,
            self.runtime.root.clone(),
            self.runtime.matcher.clone(),
            self.runtime.interrupt,
            match_tx,
            self.events.clone(),
            job_cancel.clone(),
        );
        let scan_task = tokio::spawn(scan_loop(
            scanner,
            Arc::clone(&self.scan_pool),
            self.runtime.mode,
            self.runtime.poll_interval,
            job_cancel,
        ));

        let mut executions = JoinSet::new();
        while let Some(event) = match_rx.recv().await {
            let slot = self.work_pool.acquire().await;
            let matcher = self.runtime.matcher.clone();
            let script = self.runtime.script.clone();
            let timeout = self.runtime.timeout;
            let dry_run = self.runtime.dry_run;
            let kill = self.kill.clone();
            let events = self.events.clone();

            executions.spawn(async move {
                let result =
                    worker::execute(&event, &matcher, &script, timeout, dry_run, &kill).await;
                if result.outcome.is_success() {
                    debug!(
                        job = %result.job,
                        target = %result.target.display(),
                        duration = %humantime::format_duration(result.duration),
                        "script finished"
                    );
                } else {
                    warn!(
                        job = %result.job,
                        target = %result.target.display(),
                        outcome = %result.outcome,
                        "script did not succeed"
                    );
                }
                // Free the slot before publishing so a slow subscriber
                // cannot pin worker capacity
                drop(slot);
                let _ = events.send(EngineEvent::Result(result)).await;
            });
            // Reap whatever already finished so the set stays small in
            // long-running watch jobs
            while executions.try_join_next().is_some() {}
        }

        // Channel closed: the scan side is done
        let end = match scan_task.await {
            Ok(end) => end,
            Err(e) => ScanEnd::Failed(EngineError::internal(format!("scan task panicked: {e}"))),
        };

        // Let in-flight executions finish before reporting terminal state
        while executions.join_next().await.is_some() {}

        let terminal = match end {
            ScanEnd::Interrupted => JobState::Interrupted,
            ScanEnd::Exhausted => JobState::Completed,
            // A shutdown mid-scan is a clean stop, not a failure
            ScanEnd::Cancelled => JobState::Completed,
            ScanEnd::Failed(err) => {
                error!(job = %self.runtime.id, "scan failed: {err}");
                let warning = ScanWarning {
                    job: self.runtime.id,
                    path: Some(self.runtime.root.clone()),
                    message: format!("scan failed: {err}"),
                };
                let _ = self.events.send(EngineEvent::Warning(warning)).await;
                JobState::Failed
            }
        };
        self.set_state(terminal).await;
    }

    async fn set_state(&self, state: JobState) {
        {
            let mut states = self.states.lock().expect("job state lock poisoned");
            states[self.slot].1 = state;
        }
        info!(job = %self.runtime.id, %state, "job state changed");
        let _ = self
            .events
            .send(EngineEvent::JobState {
                job: self.runtime.id,
                state,
            })
            .await;
    }
}

/// Repeatedly runs scan passes, holding a scan slot only while a pass is
/// actually running. Releasing the slot between passes is what rotates
/// capacity across jobs when there are more jobs than slots.
async fn scan_loop(
    mut scanner: Scanner,
    pool: Arc<SlotPool>,
    mode: ScanMode,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> ScanEnd {
    loop {
        let slot = tokio::select! {
            slot = pool.acquire() => slot,
            _ = cancel.cancelled() => return ScanEnd::Cancelled,
        };

        // The pass does blocking filesystem work and blocking channel sends
        let result = tokio::task::spawn_blocking(move || {
            let end = scanner.pass();
            (scanner, end)
        })
        .await;
        drop(slot);

        let (returned, end) = match result {
            Ok(pair) => pair,
            Err(e) => {
                return ScanEnd::Failed(EngineError::internal(format!("scan pass panicked: {e}")))
            }
        };
        scanner = returned;

        match end {
            Ok(PassEnd::Interrupted) => return ScanEnd::Interrupted,
            Ok(PassEnd::Cancelled) => return ScanEnd::Cancelled,
            Err(err) => return ScanEnd::Failed(err),
            Ok(PassEnd::Exhausted) => match mode {
                ScanMode::Once => return ScanEnd::Exhausted,
                ScanMode::Watch => {
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = cancel.cancelled() => return ScanEnd::Cancelled,
                    }
                }
            },
        }
    }
}
