//! Sequential simulation runs: one fresh working directory per configuration,
//! a provenance record per run, and verified relocation to a park root.

pub mod archive;
pub mod batch;
pub mod context;
pub mod error;
pub mod expand;
pub mod orchestrate;
pub mod process;
pub mod record;
pub mod settings;
pub mod shield;

/// Prefix for every user-facing message.
pub const PROGRAM: &str = "go-sim";

pub use archive::{ArchiveOutcome, Archiver};
pub use batch::{run_batch, BatchEvent, BatchPlan, BatchReport, ExpandFailure, RunReport};
pub use context::{ExecutionContext, Identity};
pub use error::{error_chain, ArchiveError, RunError, SetupError};
pub use expand::{ConfigExpander, ExpandError, RepeatExpander, ScriptExpander};
pub use orchestrate::{
    check_executable, is_executable, CompletedRun, DetachedRun, Orchestrator, RunPhase, RunSpec,
};
pub use process::{ExitOutcome, ProcessRunner};
pub use record::{RunRecord, RunRecorder};
pub use settings::RunnerSettings;
pub use shield::install_signal_shield;
