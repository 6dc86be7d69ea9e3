//! Executes a job's script for one match event.
//!
//! The script string is whitespace-split into program and arguments, each
//! token gets capture-group expansion against the matched path, and the path
//! itself is appended as the final argument and exported as `BARADDUR_MATCH`.
//! A failure to even start the process is an ordinary reported outcome, never
//! an engine error.

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::events::{ExecutionOutcome, ExecutionResult, MatchEvent};
use crate::matcher::PatternMatcher;

/// Cap on the stdout/stderr samples kept per execution
pub(crate) const OUTPUT_SAMPLE_LIMIT: usize = 8 * 1024;

/// How long to keep draining output after the child was killed
const SAMPLE_DRAIN_LIMIT: Duration = Duration::from_millis(500);

/// Runs the script for one match and waits for it to finish.
///
/// `kill` is the forced-shutdown token: when it fires the child receives a
/// termination signal and the result records `Cancelled`. `timeout` bounds a
/// single execution the same way, recording `TimedOut`.
pub(crate) async fn execute(
    event: &MatchEvent,
    matcher: &PatternMatcher,
    script: &str,
    timeout: Option<Duration>,
    dry_run: bool,
    kill: &CancellationToken,
) -> ExecutionResult {
    let started = Instant::now();
    let target = event.target.to_string_lossy().into_owned();

    let mut tokens = script
        .split_whitespace()
        .map(|token| matcher.expand(&target, token));
    // Validation guarantees a non-empty script
    let program = tokens.next().unwrap_or_default();
    let args: Vec<String> = tokens.collect();

    if dry_run {
        debug!(job = %event.job, %program, ?args, target = %target, "dry run");
        return finish(event, ExecutionOutcome::DryRun, started, String::new(), String::new());
    }

    if kill.is_cancelled() {
        return finish(
            event,
            ExecutionOutcome::Cancelled,
            started,
            String::new(),
            String::new(),
        );
    }

    trace!(job = %event.job, %program, ?args, target = %target, "spawning script");

    let mut command = Command::new(&program);
    command
        .args(&args)
        .arg(&target)
        .env("BARADDUR_MATCH", &target)
        .env("BARADDUR_JOB", event.job.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group so a kill reaches the script's children too
    #[cfg(unix)]
    command.process_group(0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return finish(
                event,
                ExecutionOutcome::StartFailure {
                    message: e.to_string(),
                },
                started,
                String::new(),
                String::new(),
            );
        }
    };

    let stdout_task = sample_reader(child.stdout.take());
    let stderr_task = sample_reader(child.stderr.take());

    let mut timed_out = false;
    let mut cancelled = false;
    let status = if let Some(limit) = timeout {
        tokio::select! {
            status = child.wait() => status,
            _ = tokio::time::sleep(limit) => {
                timed_out = true;
                reap(&mut child).await
            }
            _ = kill.cancelled() => {
                cancelled = true;
                reap(&mut child).await
            }
        }
    } else {
        tokio::select! {
            status = child.wait() => status,
            _ = kill.cancelled() => {
                cancelled = true;
                reap(&mut child).await
            }
        }
    };

    let killed = timed_out || cancelled;
    let stdout = join_sample(stdout_task, killed).await;
    let stderr = join_sample(stderr_task, killed).await;

    let outcome = if cancelled {
        ExecutionOutcome::Cancelled
    } else if timed_out {
        ExecutionOutcome::TimedOut
    } else {
        match status {
            Ok(status) => ExecutionOutcome::Exited {
                code: status.code(),
            },
            Err(e) => ExecutionOutcome::StartFailure {
                message: e.to_string(),
            },
        }
    };

    finish(event, outcome, started, stdout, stderr)
}

fn finish(
    event: &MatchEvent,
    outcome: ExecutionOutcome,
    started: Instant,
    stdout: String,
    stderr: String,
) -> ExecutionResult {
    ExecutionResult {
        job: event.job,
        target: event.target.clone(),
        outcome,
        duration: started.elapsed(),
        stdout,
        stderr,
    }
}

async fn reap(child: &mut Child) -> std::io::Result<std::process::ExitStatus> {
    kill_group(child);
    let _ = child.start_kill();
    child.wait().await
}

/// Signals the child's whole process group. Without this a killed shell
/// script leaves its children alive and holding the output pipes.
#[cfg(unix)]
fn kill_group(child: &Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

/// Drains a child pipe completely, keeping at most [`OUTPUT_SAMPLE_LIMIT`]
/// bytes. Draining past the cap keeps the child from blocking on a full pipe.
fn sample_reader<R>(reader: Option<R>) -> Option<JoinHandle<String>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    reader.map(|mut reader| {
        tokio::spawn(async move {
            let mut sample = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let room = OUTPUT_SAMPLE_LIMIT.saturating_sub(sample.len());
                        if room > 0 {
                            sample.extend_from_slice(&buf[..n.min(room)]);
                        }
                    }
                }
            }
            String::from_utf8_lossy(&sample).into_owned()
        })
    })
}

/// Collects a sample reader's output. After a kill the pipes may still be
/// held open by an orphaned grandchild, so the wait is bounded then; the
/// truncated sample collected so far is forfeited rather than blocking the
/// execution result past the kill.
async fn join_sample(task: Option<JoinHandle<String>>, bounded: bool) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    if !bounded {
        return task.await.unwrap_or_default();
    }
    match tokio::time::timeout(SAMPLE_DRAIN_LIMIT, &mut task).await {
        Ok(sample) => sample.unwrap_or_default(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}
