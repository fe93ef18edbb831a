//! Destination preflight: path containment, free space and preallocation.
//!
//! Nothing is created on disk until the destination is known to stay inside
//! its base directory and the base directory's volume has room for it.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::utils::{available_space, canonicalize_existing_prefix, clean_absolute};

/// Resolve `dest` and check that it lies inside `base`.
///
/// Both paths are made absolute and lexically cleaned, then the longest
/// existing prefix of each is canonicalised so a symlinked directory cannot
/// point the destination elsewhere. Both views must be contained.
///
/// Returns the cleaned absolute destination path.
pub fn resolve_destination(dest: &Path, base: &Path) -> Result<PathBuf> {
    let clean_dest = clean_absolute(dest)?;
    let clean_base = clean_absolute(base)?;

    if !clean_dest.starts_with(&clean_base) {
        return Err(Error::PathEscape {
            path: clean_dest,
            base: clean_base,
        });
    }

    let real_dest = canonicalize_existing_prefix(&clean_dest)?;
    let real_base = canonicalize_existing_prefix(&clean_base)?;
    if !real_dest.starts_with(&real_base) {
        return Err(Error::PathEscape {
            path: real_dest,
            base: real_base,
        });
    }

    Ok(clean_dest)
}

/// Fail with [`Error::InsufficientSpace`] unless `available >= required`.
pub fn check_free_space(required: u64, available: u64) -> Result<()> {
    if available < required {
        return Err(Error::InsufficientSpace {
            required,
            available,
        });
    }
    Ok(())
}

/// Query free space on the volume holding `base` and compare it against `required`.
///
/// The check is advisory: other writers on the same volume can still use the
/// space up before the transfer finishes.
pub fn ensure_free_space(base: &Path, required: u64) -> Result<u64> {
    let available = available_space(base)?;
    check_free_space(required, available)?;
    Ok(available)
}

/// Validate `dest` against `base`, check free space and create the file at
/// exactly `required_size` bytes.
///
/// An existing file is truncated and re-extended, so running this twice
/// leaves a file of `required_size` bytes, never more. Missing directories
/// between `base` and the file are created.
pub fn prepare_destination(dest: &Path, base: &Path, required_size: u64) -> Result<File> {
    let resolved = resolve_destination(dest, base)?;
    let clean_base = clean_absolute(base)?;

    ensure_free_space(&clean_base, required_size)?;

    if let Some(parent) = resolved.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::WriteFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&resolved)
        .map_err(|e| Error::WriteFailed {
            path: resolved.clone(),
            source: e,
        })?;

    file.set_len(required_size).map_err(|e| Error::WriteFailed {
        path: resolved.clone(),
        source: e,
    })?;

    tracing::debug!(
        path = %resolved.display(),
        size = required_size,
        "Preallocated destination file"
    );

    Ok(file)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn prepare_creates_file_of_exact_size() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("video.bin");

        let file = prepare_destination(&dest, temp_dir.path(), 4096).unwrap();
        assert_eq!(file.metadata().unwrap().len(), 4096);
        assert_eq!(fs::metadata(&dest).unwrap().len(), 4096);
    }

    #[test]
    fn prepare_is_idempotent_on_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("video.bin");
        fs::write(&dest, vec![0xFFu8; 4096]).unwrap();

        drop(prepare_destination(&dest, temp_dir.path(), 4096).unwrap());
        drop(prepare_destination(&dest, temp_dir.path(), 4096).unwrap());

        let contents = fs::read(&dest).unwrap();
        assert_eq!(contents.len(), 4096);
        assert!(contents.iter().all(|b| *b == 0), "old content must be truncated");
    }

    #[test]
    fn prepare_shrinks_longer_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("video.bin");
        fs::write(&dest, vec![1u8; 10_000]).unwrap();

        drop(prepare_destination(&dest, temp_dir.path(), 100).unwrap());
        assert_eq!(fs::metadata(&dest).unwrap().len(), 100);
    }

    #[test]
    fn prepare_creates_missing_subdirectories() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("a").join("b").join("c.bin");

        drop(prepare_destination(&dest, temp_dir.path(), 10).unwrap());
        assert_eq!(fs::metadata(&dest).unwrap().len(), 10);
    }

    #[test]
    fn traversal_is_rejected_for_every_base_layout() {
        let temp_dir = TempDir::new().unwrap();
        let bases = [
            temp_dir.path().to_path_buf(),
            temp_dir.path().join("downloads"),
            temp_dir.path().join("deep").join("nested").join("base"),
        ];

        for base in &bases {
            fs::create_dir_all(base).unwrap();
            let escapes = [
                base.join("..").join("escaped.bin"),
                base.join("sub").join("..").join("..").join("escaped.bin"),
                base.join("..").join(base.file_name().unwrap()).join("..").join("x.bin"),
            ];
            for dest in &escapes {
                let result = prepare_destination(dest, base, 10);
                assert!(
                    matches!(result, Err(Error::PathEscape { .. })),
                    "{} should escape {}",
                    dest.display(),
                    base.display()
                );
            }

            let parent = base.parent().unwrap();
            assert!(!parent.join("escaped.bin").exists());
            assert!(!parent.join("x.bin").exists());
        }
    }

    #[test]
    fn sibling_with_common_prefix_is_not_inside() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("dl");
        fs::create_dir_all(&base).unwrap();
        let dest = temp_dir.path().join("dl-evil").join("f.bin");

        assert!(matches!(
            resolve_destination(&dest, &base),
            Err(Error::PathEscape { .. })
        ));
    }

    #[test]
    fn dot_segments_that_stay_inside_are_accepted() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("a").join("..").join(".").join("ok.bin");

        let resolved = resolve_destination(&dest, temp_dir.path()).unwrap();
        assert_eq!(resolved, clean_absolute(&temp_dir.path().join("ok.bin")).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_pointing_outside_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("base");
        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(&base).unwrap();
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, base.join("link")).unwrap();

        let result = prepare_destination(&base.join("link").join("f.bin"), &base, 10);
        assert!(matches!(result, Err(Error::PathEscape { .. })));
        assert!(!outside.join("f.bin").exists());
    }

    #[test]
    fn free_space_equal_to_required_succeeds() {
        assert!(check_free_space(1_000, 1_000).is_ok());
    }

    #[test]
    fn free_space_one_byte_short_fails() {
        match check_free_space(1_000, 999) {
            Err(Error::InsufficientSpace {
                required,
                available,
            }) => {
                assert_eq!(required, 1_000);
                assert_eq!(available, 999);
            }
            other => panic!("Expected InsufficientSpace error, got {:?}", other),
        }
    }

    #[test]
    fn prepare_fails_when_volume_is_too_small() {
        let temp_dir = TempDir::new().unwrap();
        let available = available_space(temp_dir.path()).unwrap();
        let dest = temp_dir.path().join("huge.bin");

        let result = prepare_destination(&dest, temp_dir.path(), available.saturating_add(1 << 40));
        assert!(matches!(result, Err(Error::InsufficientSpace { .. })));
        assert!(!dest.exists(), "no file may be created when space is short");
    }

    #[test]
    fn missing_base_is_a_disk_space_check_failure() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("missing");
        let result = prepare_destination(&base.join("f.bin"), &base, 1);
        assert!(matches!(result, Err(Error::DiskSpaceCheckFailed(_))));
    }
}
