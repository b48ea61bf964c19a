//! Recursive copy of a run directory.
//!
//! Symbolic links are followed and their targets copied as regular entries.
//! Broken links and special files (fifos, sockets, devices) are skipped. The
//! verifier in [`crate::verify`] applies the same policy, so a skipped entry is
//! never reported as missing.

use crate::ensure_dir;
use std::fs::{self, FileTimes};
use std::io;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Copies `src` to `dst`. Files are copied with permissions and timestamps;
/// directories are merged into `dst`, which may already exist.
pub fn copy_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::metadata(src)?;
    if meta.is_file() {
        return copy_file(src, dst, &meta);
    }
    if !meta.is_dir() {
        debug!(path = %src.display(), "skipping special file");
        return Ok(());
    }
    ensure_dir(dst)?;
    for entry in WalkDir::new(src)
        .follow_links(true)
        .min_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if is_broken_link(&err) => {
                warn!(error = %err, "skipping broken symbolic link");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            ensure_dir(&target)?;
        } else if file_type.is_file() {
            let meta = entry.metadata()?;
            copy_file(entry.path(), &target, &meta)?;
        } else {
            debug!(path = %entry.path().display(), "skipping special file");
        }
    }
    Ok(())
}

fn copy_file(src: &Path, dst: &Path, meta: &fs::Metadata) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    fs::copy(src, dst)?;
    preserve_times(meta, dst);
    Ok(())
}

fn preserve_times(meta: &fs::Metadata, dst: &Path) {
    let mut times = FileTimes::new();
    if let Ok(modified) = meta.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }
    // The copy may already be read-only; explicit times only need ownership.
    let result = fs::File::open(dst).and_then(|file| file.set_times(times));
    if let Err(err) = result {
        debug!(path = %dst.display(), error = %err, "timestamps not preserved");
    }
}

pub(crate) fn is_broken_link(err: &walkdir::Error) -> bool {
    if err.loop_ancestor().is_some() {
        return false;
    }
    match err.path() {
        Some(path) => {
            fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
                && fs::metadata(path).is_err()
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn populate(root: &Path) {
        fs::create_dir_all(root.join("b").join("deep")).expect("mkdir");
        fs::write(root.join("a.txt"), b"alpha").expect("a");
        fs::write(root.join("b").join("c.txt"), b"gamma").expect("c");
        fs::write(root.join("b").join("deep").join("d.bin"), [0u8, 1, 2, 3]).expect("d");
    }

    #[test]
    fn copies_nested_tree() {
        let tmp = tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        populate(&src);
        copy_recursive(&src, &dst).expect("copy");
        assert_eq!(fs::read(dst.join("a.txt")).expect("a"), b"alpha");
        assert_eq!(fs::read(dst.join("b/c.txt")).expect("c"), b"gamma");
        assert_eq!(fs::read(dst.join("b/deep/d.bin")).expect("d"), [0u8, 1, 2, 3]);
    }

    #[test]
    fn merges_into_existing_destination() {
        let tmp = tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        populate(&src);
        fs::create_dir_all(dst.join("b")).expect("pre-existing");
        fs::write(dst.join("keep.txt"), b"mine").expect("keep");
        copy_recursive(&src, &dst).expect("copy");
        assert!(dst.join("b/c.txt").is_file());
        assert_eq!(fs::read(dst.join("keep.txt")).expect("keep"), b"mine");
    }

    #[test]
    fn single_file_source_preserves_mtime() {
        let tmp = tempdir().expect("tempdir");
        let src = tmp.path().join("config.cym");
        fs::write(&src, b"set simul system").expect("write");
        let old = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        fs::File::options()
            .write(true)
            .open(&src)
            .and_then(|f| f.set_times(FileTimes::new().set_modified(old)))
            .expect("backdate");
        let dst = tmp.path().join("copy").join("config.cym");
        copy_recursive(&src, &dst).expect("copy");
        let modified = fs::metadata(&dst).and_then(|m| m.modified()).expect("mtime");
        assert_eq!(modified, old);
    }

    #[cfg(unix)]
    #[test]
    fn read_only_file_keeps_its_mtime() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        fs::create_dir(&src).expect("src");
        let ro = src.join("ro.txt");
        fs::write(&ro, b"frozen").expect("write");
        let old = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        fs::File::options()
            .write(true)
            .open(&ro)
            .and_then(|f| f.set_times(FileTimes::new().set_modified(old)))
            .expect("backdate");
        fs::set_permissions(&ro, fs::Permissions::from_mode(0o444)).expect("chmod");

        let dst = tmp.path().join("dst");
        copy_recursive(&src, &dst).expect("copy");
        let meta = fs::metadata(dst.join("ro.txt")).expect("meta");
        assert_eq!(meta.permissions().mode() & 0o777, 0o444);
        assert_eq!(meta.modified().expect("mtime"), old);
    }

    #[test]
    fn missing_source_is_an_error() {
        let tmp = tempdir().expect("tempdir");
        assert!(copy_recursive(&tmp.path().join("nope"), &tmp.path().join("dst")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn follows_links_and_skips_broken_ones() {
        use std::os::unix::fs::symlink;
        let tmp = tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        populate(&src);
        symlink(src.join("a.txt"), src.join("alias.txt")).expect("link");
        symlink(tmp.path().join("gone"), src.join("dangling")).expect("dangling");
        let dst = tmp.path().join("dst");
        copy_recursive(&src, &dst).expect("copy");
        let alias = fs::symlink_metadata(dst.join("alias.txt")).expect("alias");
        assert!(alias.file_type().is_file());
        assert!(fs::symlink_metadata(dst.join("dangling")).is_err());
    }
}
