//! Utility functions for file operations and path manipulation

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Make `path` absolute (against the current directory) and fold `.` and `..`
/// components lexically, without touching the filesystem.
///
/// `..` at the root stays at the root, mirroring how the OS resolves it.
///
/// # Examples
///
/// ```
/// use range_dl::utils::clean_absolute;
/// use std::path::{Path, PathBuf};
///
/// # #[cfg(unix)]
/// assert_eq!(
///     clean_absolute(Path::new("/srv/dl/./a/../b.bin")).unwrap(),
///     PathBuf::from("/srv/dl/b.bin")
/// );
/// ```
pub fn clean_absolute(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => cleaned.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // pop() refuses to remove the root, so ".." at the root is a no-op
                cleaned.pop();
            }
            Component::Normal(name) => cleaned.push(name),
        }
    }
    Ok(cleaned)
}

/// Resolve symlinks in the longest existing prefix of a cleaned absolute path.
///
/// The non-existent tail is appended unchanged, so this works for files that
/// are about to be created.
pub fn canonicalize_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }

    let mut resolved = if existing.exists() {
        existing.canonicalize()?
    } else {
        existing
    };
    for name in tail.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Cross-platform positional file write.
///
/// Writes `buf` to `file` at the given byte `offset`, equivalent to Unix `pwrite`.
#[cfg(unix)]
pub fn write_all_at(file: &std::fs::File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

/// Cross-platform positional file write.
///
/// Writes `buf` to `file` at the given byte `offset`, equivalent to Unix `pwrite`.
#[cfg(windows)]
pub fn write_all_at(file: &std::fs::File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut written = 0;
    while written < buf.len() {
        let n = file.seek_write(&buf[written..], offset + written as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "failed to write whole buffer",
            ));
        }
        written += n;
    }
    Ok(())
}

/// Cross-platform positional file write.
///
/// Writes `buf` to `file` at the given byte `offset`, equivalent to Unix `pwrite`.
#[cfg(not(any(unix, windows)))]
pub fn write_all_at(_file: &std::fs::File, _buf: &[u8], _offset: u64) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "positional writes not supported on this platform",
    ))
}

/// Free bytes this process may use on the volume holding `path`
///
/// Backed by `statvfs` on Unix and `GetDiskFreeSpaceExW` on Windows.
///
/// # Errors
/// [`Error::DiskSpaceCheckFailed`] when the volume cannot be queried, for
/// example because `path` does not exist yet.
pub fn available_space(path: &Path) -> Result<u64> {
    volume_free_bytes(path).map_err(|e| {
        Error::DiskSpaceCheckFailed(format!(
            "Failed to check disk space for '{}': {}",
            path.display(),
            e
        ))
    })
}

#[cfg(unix)]
fn volume_free_bytes(path: &Path) -> std::io::Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let mut stat = MaybeUninit::<libc::statvfs>::zeroed();
    // SAFETY: c_path is NUL-terminated and stat points at writable storage,
    // which is only read after statvfs reports success
    let stat = unsafe {
        if libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        stat.assume_init()
    };

    // Blocks available to unprivileged users, in fragment-size units
    #[allow(clippy::unnecessary_cast)]
    Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

#[cfg(windows)]
fn volume_free_bytes(path: &Path) -> std::io::Result<u64> {
    use std::os::windows::ffi::OsStrExt;
    use winapi::um::fileapi::GetDiskFreeSpaceExW;

    let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
    let mut available: u64 = 0;

    // SAFETY: wide is NUL-terminated, available is a valid u64 and the
    // totals we do not need may be null
    let ok = unsafe {
        GetDiskFreeSpaceExW(
            wide.as_ptr(),
            &mut available as *mut u64 as *mut _,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    if ok == 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(available)
}

#[cfg(not(any(unix, windows)))]
fn volume_free_bytes(_path: &Path) -> std::io::Result<u64> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "disk space checks are not supported on this platform",
    ))
}

/// Render a byte count the way progress summaries show it (KiB/MiB/GiB, two decimals)
pub fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;

    let bytes = bytes as f64;
    if bytes > GIB {
        format!("{:.2} GiB", bytes / GIB)
    } else if bytes > MIB {
        format!("{:.2} MiB", bytes / MIB)
    } else {
        format!("{:.2} KiB", bytes / KIB)
    }
}
