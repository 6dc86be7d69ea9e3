pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod matcher;
pub mod pool;

mod scanner;
mod supervisor;
mod worker;

pub use config::{JobSettings, ScanMode, ScanSettings, Settings, WorkSettings};
pub use engine::{Engine, EngineOptions, JobStatus};
pub use errors::{EngineError, EngineResult};
pub use events::{
    EngineEvent, ExecutionOutcome, ExecutionResult, JobId, JobState, MatchEvent, ScanWarning,
};
