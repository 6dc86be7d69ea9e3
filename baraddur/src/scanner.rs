//! One job's scanner: enumerates the scan root, applies the pattern matcher
//! and pushes match events toward the worker pool.
//!
//! A pass visits entries in lexicographic path order so results are
//! reproducible regardless of platform enumeration order. Unreadable entries
//! are skipped with a soft warning; only an unusable root fails the job.

use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{EngineError, EngineResult};
use crate::events::{EngineEvent, JobId, MatchEvent, ScanWarning};
use crate::matcher::PatternMatcher;

/// How a single scan pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassEnd {
    /// The root was exhausted
    Exhausted,
    /// The first match was found and the job interrupts on match
    Interrupted,
    /// Cancellation was observed mid-traversal
    Cancelled,
}

/// Scanner state for one job. Lives across passes in watch mode so a target
/// is reported at most once per run.
pub(crate) struct Scanner {
    job: JobId,
    root: PathBuf,
    matcher: PatternMatcher,
    interrupt: bool,
    seen: HashSet<PathBuf>,
    matches: mpsc::Sender<MatchEvent>,
    events: mpsc::Sender<EngineEvent>,
    cancel: CancellationToken,
}

impl Scanner {
    pub(crate) fn new(
        job: JobId,
        root: PathBuf,
        matcher: PatternMatcher,
        interrupt: bool,
        matches: mpsc::Sender<MatchEvent>,
        events: mpsc::Sender<EngineEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job,
            root,
            matcher,
            interrupt,
            seen: HashSet::new(),
            matches,
            events,
            cancel,
        }
    }

    /// Runs one blocking scan pass over the root.
    ///
    /// Pushing a match into a saturated channel blocks; that is the
    /// backpressure edge that throttles scanning when the worker pool is
    /// busy. Cancellation is checked per entry, so an in-progress traversal
    /// stops without finishing the tree.
    pub(crate) fn pass(&mut self) -> EngineResult<PassEnd> {
        // A missing or unreadable root is fatal for this job
        std::fs::metadata(&self.root)
            .map_err(|e| EngineError::scan_fatal(self.root.clone(), e))?;

        debug!(job = %self.job, root = %self.root.display(), "scan pass starting");

        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .follow_links(false)
            .sort_by_file_path(|a, b| a.cmp(b))
            .build();

        for entry in walker {
            if self.cancel.is_cancelled() {
                return Ok(PassEnd::Cancelled);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    self.soft_warning(error_path(&err), err.to_string());
                    continue;
                }
            };

            let path = entry.path();
            let target = path.to_string_lossy();
            if !self.matcher.is_match(&target) {
                continue;
            }
            if !self.seen.insert(path.to_path_buf()) {
                continue;
            }

            debug!(job = %self.job, target = %target, "match found");
            let event = MatchEvent::new(self.job, path);
            if self.matches.blocking_send(event).is_err() {
                // Receiver gone: the job is shutting down
                return Ok(PassEnd::Cancelled);
            }

            if self.interrupt {
                return Ok(PassEnd::Interrupted);
            }
        }

        Ok(PassEnd::Exhausted)
    }

    fn soft_warning(&self, path: Option<PathBuf>, message: String) {
        warn!(job = %self.job, "scan entry skipped: {message}");
        let warning = ScanWarning {
            job: self.job,
            path,
            message,
        };
        let _ = self.events.blocking_send(EngineEvent::Warning(warning));
    }
}

/// The entry a walk error was about, when the error carries one
fn error_path(err: &ignore::Error) -> Option<PathBuf> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::WithDepth { err, .. } => error_path(err),
        ignore::Error::WithLineNumber { err, .. } => error_path(err),
        ignore::Error::Loop { child, .. } => Some(child.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use tempfile::tempdir;

    fn scanner_for(
        root: PathBuf,
        pattern: &str,
        interrupt: bool,
        cancel: CancellationToken,
    ) -> (
        Scanner,
        mpsc::Receiver<MatchEvent>,
        mpsc::Receiver<EngineEvent>,
    ) {
        let (match_tx, match_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let scanner = Scanner::new(
            JobId(0),
            root,
            PatternMatcher::new(pattern).unwrap(),
            interrupt,
            match_tx,
            event_tx,
            cancel,
        );
        (scanner, match_rx, event_rx)
    }

    fn drain(rx: &mut mpsc::Receiver<MatchEvent>) -> Vec<PathBuf> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event.target);
        }
        out
    }

    #[test]
    fn test_matches_in_lexicographic_order() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("b.txt"), "")?;
        fs::write(dir.path().join("a.txt"), "")?;
        fs::write(dir.path().join("c.md"), "")?;

        let (mut scanner, mut match_rx, _events) = scanner_for(
            dir.path().to_path_buf(),
            r"\.txt$",
            false,
            CancellationToken::new(),
        );
        let end = scanner.pass()?;

        assert_eq!(end, PassEnd::Exhausted);
        let targets = drain(&mut match_rx);
        assert_eq!(
            targets,
            vec![dir.path().join("a.txt"), dir.path().join("b.txt")]
        );
        Ok(())
    }

    #[test]
    fn test_interrupt_stops_after_first_match() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("one.txt"), "")?;
        fs::write(dir.path().join("two.txt"), "")?;

        let (mut scanner, mut match_rx, _events) = scanner_for(
            dir.path().to_path_buf(),
            r"\.txt$",
            true,
            CancellationToken::new(),
        );
        let end = scanner.pass()?;

        assert_eq!(end, PassEnd::Interrupted);
        assert_eq!(drain(&mut match_rx).len(), 1);
        Ok(())
    }

    #[test]
    fn test_seen_targets_are_not_reported_twice() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("stable.txt"), "")?;

        let (mut scanner, mut match_rx, _events) = scanner_for(
            dir.path().to_path_buf(),
            r"\.txt$",
            false,
            CancellationToken::new(),
        );

        assert_eq!(scanner.pass()?, PassEnd::Exhausted);
        assert_eq!(drain(&mut match_rx).len(), 1);

        // Second pass over the same tree: nothing new
        fs::write(dir.path().join("fresh.txt"), "")?;
        assert_eq!(scanner.pass()?, PassEnd::Exhausted);
        assert_eq!(drain(&mut match_rx), vec![dir.path().join("fresh.txt")]);
        Ok(())
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let (mut scanner, _match_rx, _events) = scanner_for(
            PathBuf::from("/no/such/root/anywhere"),
            ".",
            false,
            CancellationToken::new(),
        );
        let err = scanner.pass().unwrap_err();
        assert!(matches!(err, EngineError::ScanFatal { .. }));
    }

    #[test]
    fn test_cancelled_token_stops_pass() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.txt"), "")?;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (mut scanner, mut match_rx, _events) =
            scanner_for(dir.path().to_path_buf(), r"\.txt$", false, cancel);

        assert_eq!(scanner.pass()?, PassEnd::Cancelled);
        assert!(drain(&mut match_rx).is_empty());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_entry_does_not_abort_scan() -> Result<()> {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        let dir = tempdir()?;
        // Permission bits do not restrict root, so there is nothing to
        // observe when running as root
        if fs::metadata(dir.path())?.uid() == 0 {
            return Ok(());
        }

        let locked = dir.path().join("locked");
        fs::create_dir(&locked)?;
        fs::write(locked.join("hidden.txt"), "")?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;
        fs::write(dir.path().join("visible.txt"), "")?;

        let (mut scanner, mut match_rx, mut event_rx) = scanner_for(
            dir.path().to_path_buf(),
            r"visible\.txt$",
            false,
            CancellationToken::new(),
        );
        let end = scanner.pass();

        // Restore permissions so the tempdir can be removed
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;

        assert_eq!(end?, PassEnd::Exhausted);
        assert_eq!(drain(&mut match_rx), vec![dir.path().join("visible.txt")]);
        match event_rx.try_recv() {
            Ok(EngineEvent::Warning(warning)) => {
                assert_eq!(warning.path.as_deref(), Some(locked.as_path()));
            }
            other => panic!("expected a scan warning, got {other:?}"),
        }
        Ok(())
    }
}
