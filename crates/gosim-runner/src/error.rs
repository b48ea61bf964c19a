use crate::expand::ExpandError;
use crate::orchestrate::RunPhase;
use gosim_core::AllocError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Problems with the invocation itself. These stop the whole batch.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("executable `{}` not found", .0.display())]
    MissingExecutable(PathBuf),
    #[error("`{}` is not executable", .0.display())]
    NotExecutable(PathBuf),
    #[error("directory `{}` does not exist", .0.display())]
    MissingBaseDir(PathBuf),
    #[error("file `{}` does not exist", .0.display())]
    MissingConfig(PathBuf),
    #[error("`{}` is not a directory", .0.display())]
    InvalidPark(PathBuf),
    #[error("no configuration file was specified")]
    NoInputs,
    #[error("cannot load settings from `{}`: {reason}", path.display())]
    Settings { path: PathBuf, reason: String },
}

/// Failure of a single run. The batch reports it and moves on.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("could not generate config files from `{}`", input.display())]
    Expand {
        input: PathBuf,
        #[source]
        source: ExpandError,
    },
    #[error("could not allocate a working directory for `{}`", config.display())]
    Allocate {
        config: PathBuf,
        #[source]
        source: AllocError,
    },
    #[error("could not stage `{}` into {}", config.display(), working_dir.display())]
    Stage {
        config: PathBuf,
        working_dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not launch `{}` in {}", executable.display(), working_dir.display())]
    Launch {
        executable: PathBuf,
        working_dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RunError {
    pub fn phase(&self) -> RunPhase {
        match self {
            RunError::Expand { .. } | RunError::Allocate { .. } => RunPhase::Allocating,
            RunError::Stage { .. } => RunPhase::ConfiguringInputs,
            RunError::Launch { .. } => RunPhase::Executing,
        }
    }

    /// The directory that was created before the failure, if any.
    pub fn working_dir(&self) -> Option<&Path> {
        match self {
            RunError::Stage { working_dir, .. } | RunError::Launch { working_dir, .. } => {
                Some(working_dir)
            }
            RunError::Expand { .. } | RunError::Allocate { .. } => None,
        }
    }
}

/// I/O failure while relocating a run. The original directory is only gone
/// if the failure is `Remove`, which happens after a verified copy.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot copy {} to {}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot compare {} with {}", from.display(), to.display())]
    Verify {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot remove {} after parking", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Renders an error with its whole `source()` chain on one line.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
