//! File handling for the datastore.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use same_file::Handle;

use crate::error::Result;

/// How often to retry when the file is replaced while we wait for its lock.
const LOCK_ATTEMPTS: u8 = 10;

/// Create a new file, failing if it already exists.
pub fn create_new_file(path: &Path) -> Result<File> {
    File::create_new(path).map_err(|err| format!("cannot create {}: {err}", path.display()).into())
}

/// Open a file and hold an exclusive lock on it.
///
/// Writers replace the file by renaming a new one over it. A lock obtained
/// on a file that has since been replaced protects nothing, so the locked
/// file is compared with whatever the path points to now.
pub fn file_with_write_lock(path: &Path) -> Result<File> {
    let fail = |what: &str, err: std::io::Error| format!("{what} {}: {err}", path.display());

    for _ in 0..LOCK_ATTEMPTS {
        let file = File::open(path).map_err(|e| fail("cannot open", e))?;
        file.lock_exclusive().map_err(|e| fail("cannot lock", e))?;

        let locked = file
            .try_clone()
            .and_then(Handle::from_file)
            .map_err(|e| fail("cannot inspect locked", e))?;
        let current = Handle::from_path(path).map_err(|e| fail("cannot inspect", e))?;
        if locked == current {
            return Ok(file);
        }
    }
    Err(format!("gave up locking {} after {LOCK_ATTEMPTS} attempts", path.display()).into())
}

/// Replace the content of a file atomically.
///
/// The content goes to `<path>.new` first, which is synced and then
/// renamed over `path`.
pub fn write_to_new_and_rename(content: &str, path: &Path) -> Result<()> {
    let mut tmp = PathBuf::from(path);
    tmp.as_mut_os_string().push(".new");

    let mut file =
        File::create(&tmp).map_err(|e| format!("cannot create {}: {e}", tmp.display()))?;
    file.write_all(content.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| format!("cannot write {}: {e}", tmp.display()))?;
    fs::rename(&tmp, path).map_err(|e| {
        format!("cannot move {} to {}: {e}", tmp.display(), path.display())
    })?;
    Ok(())
}
