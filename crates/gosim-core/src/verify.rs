//! Copy verification.
//!
//! Only the source side is authoritative: entries that exist solely in the
//! destination are ignored, while a source entry that is missing, of another
//! kind, or has different bytes in the destination makes the trees differ.
//! File contents are compared by size first and then by SHA-256 digest, never
//! by timestamps alone.

use crate::copy::is_broken_link;
use crate::sha256_file;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    /// Source entries absent from the destination, relative to the roots.
    pub left_only: Vec<PathBuf>,
    /// Entries present on both sides whose kind or content differs.
    pub diff_files: Vec<PathBuf>,
}

impl TreeDiff {
    pub fn is_equivalent(&self) -> bool {
        self.left_only.is_empty() && self.diff_files.is_empty()
    }
}

pub fn equivalent(src: &Path, dst: &Path) -> io::Result<bool> {
    Ok(compare_trees(src, dst)?.is_equivalent())
}

pub fn compare_trees(src: &Path, dst: &Path) -> io::Result<TreeDiff> {
    let mut diff = TreeDiff::default();
    let src_meta = fs::metadata(src)?;
    let Some(dst_meta) = metadata_if_present(dst)? else {
        diff.left_only.push(PathBuf::new());
        return Ok(diff);
    };
    if src_meta.is_file() {
        if !dst_meta.is_file() || files_differ(src, dst, &src_meta, &dst_meta)? {
            diff.diff_files.push(PathBuf::new());
        }
        return Ok(diff);
    }
    if !src_meta.is_dir() {
        return Ok(diff);
    }
    if !dst_meta.is_dir() {
        diff.diff_files.push(PathBuf::new());
        return Ok(diff);
    }

    let mut walker = WalkDir::new(src)
        .follow_links(true)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if is_broken_link(&err) => continue,
            Err(err) => return Err(err.into()),
        };
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let file_type = entry.file_type();
        if !file_type.is_dir() && !file_type.is_file() {
            continue;
        }
        let target = dst.join(rel);
        let Some(target_meta) = metadata_if_present(&target)? else {
            diff.left_only.push(rel.to_path_buf());
            if file_type.is_dir() {
                walker.skip_current_dir();
            }
            continue;
        };
        if file_type.is_dir() {
            if !target_meta.is_dir() {
                diff.diff_files.push(rel.to_path_buf());
                walker.skip_current_dir();
            }
            continue;
        }
        let src_meta = entry.metadata()?;
        if !target_meta.is_file() || files_differ(entry.path(), &target, &src_meta, &target_meta)? {
            diff.diff_files.push(rel.to_path_buf());
        }
    }
    Ok(diff)
}

fn metadata_if_present(path: &Path) -> io::Result<Option<fs::Metadata>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn files_differ(
    a: &Path,
    b: &Path,
    a_meta: &fs::Metadata,
    b_meta: &fs::Metadata,
) -> io::Result<bool> {
    if a_meta.len() != b_meta.len() {
        return Ok(true);
    }
    Ok(sha256_file(a)? != sha256_file(b)?)
}
