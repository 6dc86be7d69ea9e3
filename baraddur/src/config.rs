use config::{Config as ConfigBuilder, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{EngineError, EngineResult};
use crate::events::JobId;
use crate::matcher::PatternMatcher;

/// Process-wide watcher configuration.
///
/// # Configuration Locations
///
/// The configuration can be loaded from multiple locations in order of
/// precedence:
/// 1. Custom config file specified via `--config`
/// 2. Global `$HOME/.baraddur/config.yaml`
///
/// # Configuration Format
///
/// The configuration uses YAML format. Example:
/// ```yaml
/// # Upper bound on concurrently running scanners, across all jobs
/// scanner_concurrency: 2
///
/// # Upper bound on concurrently running script executions, across all jobs
/// worker_concurrency: 4
///
/// # One entry per scan-rule + script pairing
/// jobsSettings:
///   - scan:
///       regex: "\\.csv$"
///       interupt_when_matched: false
///       # Optional per-job root; defaults to the engine root
///       root: "/srv/drop"
///       # Optional: "once" or "watch"; derived from the interrupt flag
///       # when absent
///       mode: watch
///       # Re-poll delay between passes in watch mode
///       poll_interval: "2s"
///     work:
///       script: "/usr/local/bin/import-csv"
///       timeout: "30s"
/// ```
///
/// Field names follow the schema verbatim, including `jobsSettings` and the
/// historical spelling of `interupt_when_matched`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Maximum number of concurrently running scanners
    pub scanner_concurrency: NonZeroUsize,

    /// Maximum number of concurrently running script executions
    pub worker_concurrency: NonZeroUsize,

    /// Ordered sequence of jobs; a job's identity is its position here
    #[serde(rename = "jobsSettings", alias = "jobssettings")]
    pub jobs_settings: Vec<JobSettings>,
}

/// One scan-rule + script pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    pub scan: ScanSettings,
    pub work: WorkSettings,
}

/// What to look for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Pattern applied to every visited path
    pub regex: String,

    /// Stop scanning this job after its first match
    #[serde(default)]
    pub interupt_when_matched: bool,

    /// Per-job scan root; relative paths are resolved against the engine root
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Scan once and complete, or watch continuously. When absent the mode is
    /// derived from the interrupt flag (see [`ScanSettings::effective_mode`]).
    #[serde(default)]
    pub mode: Option<ScanMode>,

    /// Delay between passes in watch mode (e.g. "2s", "500ms")
    #[serde(default, with = "opt_duration")]
    pub poll_interval: Option<Duration>,
}

/// What to run on a match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkSettings {
    /// Command to execute. Whitespace-split into program and arguments;
    /// each token may reference capture groups of the job's regex (`$1`,
    /// `$name`), and the matched path is appended as the final argument.
    /// Existence is checked at first invocation, not at load time.
    pub script: String,

    /// Kill the script and record a timeout once this much time has elapsed
    #[serde(default, with = "opt_duration")]
    pub timeout: Option<Duration>,
}

/// Whether a job's scanner exhausts the root once or re-polls indefinitely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Once,
    Watch,
}

impl ScanSettings {
    /// Resolves the scan mode. An explicit `mode` wins; otherwise an
    /// interrupting job watches until its first match and every other job
    /// scans once.
    pub fn effective_mode(&self) -> ScanMode {
        self.mode.unwrap_or(if self.interupt_when_matched {
            ScanMode::Watch
        } else {
            ScanMode::Once
        })
    }
}

/// A validated job: its ordinal identity, compiled matcher and raw settings
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub id: JobId,
    pub matcher: PatternMatcher,
    pub settings: JobSettings,
}

impl Settings {
    /// Loads configuration from the default location
    pub fn load() -> EngineResult<Self> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file
    pub fn load_from(config_path: Option<&Path>) -> EngineResult<Self> {
        let mut builder = ConfigBuilder::builder();

        let config_files = [
            // Global config
            dirs::home_dir().map(|p| p.join(".baraddur/config.yaml")),
            // Custom config
            config_path.map(PathBuf::from),
        ];

        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Pre-start validation pass.
    ///
    /// Compiles every job's regex and checks every script, collecting all
    /// malformed jobs into a single error so the operator sees the full list
    /// instead of fixing one field per run. No scanner or worker starts if
    /// this fails.
    pub fn validate(&self) -> EngineResult<Vec<JobPlan>> {
        let mut issues = Vec::new();
        let mut plans = Vec::new();

        for (index, job) in self.jobs_settings.iter().enumerate() {
            if job.work.script.trim().is_empty() {
                issues.push(format!("job {index}: script must not be empty"));
            }
            match PatternMatcher::new(&job.scan.regex) {
                Ok(matcher) => plans.push(JobPlan {
                    id: JobId(index),
                    matcher,
                    settings: job.clone(),
                }),
                Err(e) => issues.push(format!("job {index}: {e}")),
            }
        }

        if issues.is_empty() {
            Ok(plans)
        } else {
            Err(EngineError::config_invalid(issues))
        }
    }
}

/// Serde adapter for optional humantime durations ("30s", "500ms")
pub(crate) mod opt_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
