use crate::error::ArchiveError;
use crate::orchestrate::absolute;
use crate::record::RunRecorder;
use gosim_core::{allocate_numbered, compare_trees, copy_recursive, TreeDiff};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What happened to a run directory handed to [`Archiver::archive`].
/// Every variant except `Parked` leaves the original in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Parked { path: PathBuf },
    SameLocation { path: PathBuf },
    NoParkingSpace { original: PathBuf, reason: String },
    Mismatch {
        original: PathBuf,
        copy: PathBuf,
        diff: TreeDiff,
    },
}

impl ArchiveOutcome {
    /// Where the run lives now.
    pub fn location(&self) -> &Path {
        match self {
            ArchiveOutcome::Parked { path } | ArchiveOutcome::SameLocation { path } => path,
            ArchiveOutcome::NoParkingSpace { original, .. }
            | ArchiveOutcome::Mismatch { original, .. } => original,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Archiver {
    recorder: RunRecorder,
}

impl Archiver {
    pub fn new(recorder: RunRecorder) -> Self {
        Self { recorder }
    }

    /// Moves `run_dir` under `park_root` by copy, verify, delete.
    pub fn archive(
        &self,
        run_dir: &Path,
        park_root: &Path,
        name_hint: &str,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        let src = absolute(run_dir);
        let park = absolute(park_root);
        if src == park {
            return Ok(ArchiveOutcome::SameLocation { path: src });
        }
        if park.starts_with(&src) {
            return Ok(ArchiveOutcome::NoParkingSpace {
                original: src,
                reason: format!("park root {} lies inside the run", park.display()),
            });
        }
        let dst = match allocate_numbered(&park.join(name_hint), 0) {
            Ok(dst) => dst,
            Err(err) => {
                warn!(run_dir = %src.display(), error = %err, "no parking space");
                return Ok(ArchiveOutcome::NoParkingSpace {
                    original: src,
                    reason: err.to_string(),
                });
            }
        };
        copy_recursive(&src, &dst).map_err(|source| ArchiveError::Copy {
            from: src.clone(),
            to: dst.clone(),
            source,
        })?;
        self.settle(&src, &dst)
    }

    /// Second half of [`Archiver::archive`]: deletes `run_dir` only if `parked`
    /// holds every entry of it with identical content.
    pub fn settle(&self, run_dir: &Path, parked: &Path) -> Result<ArchiveOutcome, ArchiveError> {
        let diff = compare_trees(run_dir, parked).map_err(|source| ArchiveError::Verify {
            from: run_dir.to_path_buf(),
            to: parked.to_path_buf(),
            source,
        })?;
        if !diff.is_equivalent() {
            warn!(
                run_dir = %run_dir.display(),
                copy = %parked.display(),
                missing = diff.left_only.len(),
                differing = diff.diff_files.len(),
                "parked copy differs, keeping original"
            );
            return Ok(ArchiveOutcome::Mismatch {
                original: run_dir.to_path_buf(),
                copy: parked.to_path_buf(),
                diff,
            });
        }
        fs::remove_dir_all(run_dir).map_err(|source| ArchiveError::Remove {
            path: run_dir.to_path_buf(),
            source,
        })?;
        self.recorder.record_parked(parked);
        info!(from = %run_dir.display(), to = %parked.display(), "run parked");
        Ok(ArchiveOutcome::Parked {
            path: parked.to_path_buf(),
        })
    }
}
