/// Copy-before-move backups and their restoration.
///
/// A backup sits next to its source as `<original path>.bak`, so it stays in
/// the scanned directory after the original has been moved away.
use crate::error::{FileError, FileResult};
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Suffix appended to backed-up files.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Writes and restores `.bak` copies.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackupManager;

impl BackupManager {
    /// Returns the backup path for `path`: the same path with `.bak` appended.
    ///
    /// Example: `ACC134.23.pdf` becomes `ACC134.23.pdf.bak`
    pub fn backup_path(path: &Path) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(BACKUP_SUFFIX);
        PathBuf::from(name)
    }

    /// Returns true if the file name carries the backup suffix.
    pub fn is_backup(path: &Path) -> bool {
        path.file_name()
            .map(|n| n.to_string_lossy().ends_with(BACKUP_SUFFIX))
            .unwrap_or(false)
    }

    /// Copies `path` to its backup location and returns the backup path.
    ///
    /// Content, permissions and modification time are preserved. An existing
    /// backup at that location is replaced.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use casesort::backup::BackupManager;
    /// use std::path::Path;
    ///
    /// let backup = BackupManager.backup(Path::new("/cases/ACC134.23.pdf"))?;
    /// assert_eq!(backup, Path::new("/cases/ACC134.23.pdf.bak"));
    /// # Ok::<(), casesort::FileError>(())
    /// ```
    pub fn backup(&self, path: &Path) -> FileResult<PathBuf> {
        let backup_path = Self::backup_path(path);
        copy_preserving_mtime(path, &backup_path)?;
        info!(source = %path.display(), backup = %backup_path.display(), "created backup");
        Ok(backup_path)
    }

    /// Copies a backup back over its original path and returns that path.
    ///
    /// The backup itself is left in place.
    pub fn restore(&self, backup_path: &Path) -> FileResult<PathBuf> {
        let original = backup_path
            .to_str()
            .and_then(|s| s.strip_suffix(BACKUP_SUFFIX))
            .filter(|s| !s.is_empty() && !s.ends_with(['/', '\\']))
            .map(PathBuf::from)
            .ok_or_else(|| FileError::NotABackup(backup_path.to_path_buf()))?;

        copy_preserving_mtime(backup_path, &original)?;
        info!(backup = %backup_path.display(), restored = %original.display(), "restored backup");
        Ok(original)
    }
}

/// Copies a file, then stamps the copy with the source's modification time.
fn copy_preserving_mtime(from: &Path, to: &Path) -> FileResult<()> {
    fs::copy(from, to).map_err(|e| FileError::io("copy", from, e))?;

    let modified = fs::metadata(from)
        .and_then(|m| m.modified())
        .map_err(|e| FileError::io("read metadata of", from, e))?;
    File::options()
        .write(true)
        .open(to)
        .and_then(|f| f.set_modified(modified))
        .map_err(|e| FileError::io("set modification time of", to, e))?;
    debug!(from = %from.display(), to = %to.display(), "copied with metadata");
    Ok(())
}
