//! Temp-file-then-rename writes
//!
//! A reader of `path` sees either the previous complete file or the new
//! complete file, never a prefix of the new one.

use std::ffi::OsStr;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Suffix carried by in-flight temporary files
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Writes `bytes` to `path` atomically
///
/// The data goes to a uniquely named sibling file, is flushed to disk, then
/// renamed over `path`. Parent directories are created as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(PARTIAL_SUFFIX)
        .tempfile_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    sync_dir(parent);
    Ok(())
}

/// Removes temporary files a crashed writer left behind in `dir`
///
/// Returns the number of files removed. A missing directory counts as clean.
pub fn sweep_partials(dir: &Path) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        let is_partial = path
            .file_name()
            .and_then(OsStr::to_str)
            .map_or(false, |name| {
                name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
            });

        if is_partial && path.is_file() {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }

    Ok(removed)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    // The rename is durable only once the directory entry is flushed.
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
