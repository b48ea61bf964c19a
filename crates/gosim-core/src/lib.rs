use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;

pub mod alloc;
pub mod copy;
pub mod verify;

pub use alloc::{allocate_numbered, allocate_scratch, AllocError, MAX_SUFFIX};
pub use copy::copy_recursive;
pub use verify::{compare_trees, equivalent, TreeDiff};

pub fn ensure_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Streams the file through SHA-256 and returns the lowercase hex digest.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sha256_file_hex_digest() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("blob.bin");
        fs::write(&path, b"abc").expect("write");
        assert_eq!(
            sha256_file(&path).expect("digest"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn ensure_dir_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested).expect("first");
        ensure_dir(&nested).expect("second");
        assert!(nested.is_dir());
    }
}
