//! Collision-free working directory names.
//!
//! Numbered directories follow the `name`, `name0000`, `name0001`, ... convention.
//! When the requested name already ends in a digit a `-` separator is inserted
//! before the suffix, so `run0000` continues as `run0000-0000`.
//!
//! Creation is the probe: `create_dir` either succeeds atomically or reports
//! `AlreadyExists`, in which case the next suffix is tried. Concurrent actors
//! racing for the same name therefore never share a directory.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Number of four-digit suffixes available to `allocate_numbered`.
pub const MAX_SUFFIX: u32 = 10_000;

#[derive(Debug, Error)]
pub enum AllocError {
    #[error(
        "failed to create new run directory from `{}` after {attempts} attempts",
        base.display()
    )]
    Exhausted { base: PathBuf, attempts: u32 },
    #[error("cannot create directory `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Creates `base` if it is free, otherwise the first free `base` + `NNNN`
/// with `NNNN >= start`.
pub fn allocate_numbered(base: &Path, start: u32) -> Result<PathBuf, AllocError> {
    let base: PathBuf = base.components().collect();
    if try_create(&base)? {
        debug!(dir = %base.display(), "allocated run directory");
        return Ok(base);
    }
    let stem = numbered_stem(&base);
    let mut attempts = 0;
    for n in start..MAX_SUFFIX {
        attempts += 1;
        let candidate = with_suffix(&stem, n);
        if try_create(&candidate)? {
            debug!(dir = %candidate.display(), attempts, "allocated run directory");
            return Ok(candidate);
        }
    }
    Err(AllocError::Exhausted { base, attempts })
}

/// Creates a uniquely named directory under the first usable scratch root,
/// falling back to `fallback` when none of them accepts it.
pub fn allocate_scratch(
    prefix: &str,
    roots: &[PathBuf],
    fallback: &Path,
) -> Result<PathBuf, AllocError> {
    for root in roots {
        match tempfile::Builder::new().prefix(prefix).tempdir_in(root) {
            Ok(dir) => {
                let path = dir.keep();
                debug!(dir = %path.display(), "allocated scratch directory");
                return Ok(path);
            }
            Err(err) => {
                debug!(root = %root.display(), error = %err, "scratch root unavailable");
            }
        }
    }
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(fallback)
        .map(|dir| dir.keep())
        .map_err(|source| AllocError::Io {
            path: fallback.to_path_buf(),
            source,
        })
}

fn try_create(path: &Path) -> Result<bool, AllocError> {
    match fs::create_dir(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(source) => Err(AllocError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn numbered_stem(base: &Path) -> OsString {
    let mut stem = base.as_os_str().to_os_string();
    let ends_with_digit = base
        .as_os_str()
        .to_string_lossy()
        .chars()
        .last()
        .is_some_and(|c| c.is_ascii_digit());
    if ends_with_digit {
        stem.push("-");
    }
    stem
}

fn with_suffix(stem: &OsString, n: u32) -> PathBuf {
    let mut name = stem.clone();
    name.push(format!("{:04}", n));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry_count(dir: &Path) -> usize {
        fs::read_dir(dir).expect("read_dir").count()
    }

    #[test]
    fn free_base_is_used_verbatim() {
        let root = tempdir().expect("tempdir");
        let dir = allocate_numbered(&root.path().join("run"), 0).expect("allocate");
        assert_eq!(dir, root.path().join("run"));
        assert!(dir.is_dir());
    }

    #[test]
    fn repeated_allocation_yields_increasing_suffixes() {
        let root = tempdir().expect("tempdir");
        let base = root.path().join("run");
        let dirs: Vec<PathBuf> = (0..4)
            .map(|_| allocate_numbered(&base, 0).expect("allocate"))
            .collect();
        assert_eq!(
            dirs,
            vec![
                root.path().join("run"),
                root.path().join("run0000"),
                root.path().join("run0001"),
                root.path().join("run0002"),
            ]
        );
        assert!(dirs.iter().all(|d| d.is_dir()));
    }

    #[test]
    fn trailing_digit_gets_separator() {
        let root = tempdir().expect("tempdir");
        let base = root.path().join("run0000");
        allocate_numbered(&base, 0).expect("first");
        let second = allocate_numbered(&base, 0).expect("second");
        assert_eq!(second, root.path().join("run0000-0000"));
    }

    #[test]
    fn start_index_skips_lower_suffixes() {
        let root = tempdir().expect("tempdir");
        let base = root.path().join("sweep");
        allocate_numbered(&base, 0).expect("base");
        let next = allocate_numbered(&base, 42).expect("suffixed");
        assert_eq!(next, root.path().join("sweep0042"));
    }

    #[test]
    fn taken_names_are_skipped() {
        let root = tempdir().expect("tempdir");
        let base = root.path().join("run");
        fs::create_dir(&base).expect("base");
        fs::create_dir(root.path().join("run0000")).expect("0000");
        fs::write(root.path().join("run0001"), b"not a dir").expect("file");
        let dir = allocate_numbered(&base, 0).expect("allocate");
        assert_eq!(dir, root.path().join("run0002"));
    }

    #[test]
    fn exhaustion_creates_nothing() {
        let root = tempdir().expect("tempdir");
        let base = root.path().join("job");
        fs::create_dir(&base).expect("base");
        for n in 0..MAX_SUFFIX {
            fs::create_dir(root.path().join(format!("job{:04}", n))).expect("fill");
        }
        let before = entry_count(root.path());
        match allocate_numbered(&base, 0) {
            Err(AllocError::Exhausted { attempts, .. }) => assert_eq!(attempts, MAX_SUFFIX),
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(entry_count(root.path()), before);
    }

    #[test]
    fn missing_parent_is_an_io_error() {
        let root = tempdir().expect("tempdir");
        let base = root.path().join("absent").join("run");
        assert!(matches!(
            allocate_numbered(&base, 0),
            Err(AllocError::Io { .. })
        ));
    }

    #[test]
    fn scratch_falls_back_past_unusable_roots() {
        let root = tempdir().expect("tempdir");
        let roots = vec![
            root.path().join("no-such-scratch"),
            root.path().join("also-missing"),
        ];
        let dir = allocate_scratch("alice-", &roots, root.path()).expect("fallback");
        assert_eq!(dir.parent(), Some(root.path()));
        assert!(dir
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("alice-")));
        assert!(dir.is_dir());
    }

    #[test]
    fn scratch_prefers_first_usable_root() {
        let root = tempdir().expect("tempdir");
        let fast = root.path().join("fast");
        fs::create_dir(&fast).expect("fast root");
        let roots = vec![root.path().join("missing"), fast.clone()];
        let first = allocate_scratch("run-", &roots, root.path()).expect("first");
        let second = allocate_scratch("run-", &roots, root.path()).expect("second");
        assert_eq!(first.parent(), Some(fast.as_path()));
        assert_ne!(first, second);
    }
}
