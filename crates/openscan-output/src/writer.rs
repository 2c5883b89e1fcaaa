//! Temp-name-then-rename file writes.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::Builder;

/// Write `bytes` to `folder/filename` atomically.
///
/// The payload goes to a hidden temporary file in the same folder, is synced,
/// then linked under its final name. Readers see either the complete file or
/// nothing. An existing file is never replaced: that case fails with
/// [`io::ErrorKind::AlreadyExists`].
pub fn write_atomic(folder: &Path, filename: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    write_atomic_with(folder, filename, |file| file.write_all(bytes))
}

/// Like [`write_atomic`] with a caller-supplied fill step.
///
/// If `fill` fails the temporary file is removed and no file appears under
/// `filename`.
pub fn write_atomic_with<F>(folder: &Path, filename: &str, fill: F) -> io::Result<PathBuf>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let mut temp = Builder::new()
        .prefix(".openscan-")
        .suffix(".part")
        .tempfile_in(folder)?;
    fill(temp.as_file_mut())?;
    temp.as_file_mut().flush()?;
    temp.as_file().sync_all()?;

    let target = folder.join(filename);
    temp.persist_noclobber(&target).map_err(|e| e.error)?;
    Ok(target)
}
