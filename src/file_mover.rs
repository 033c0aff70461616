/// Filesystem moves for organized files.
///
/// Creates destination directories on demand and moves files into them,
/// refusing to replace an existing file unless told to.
use crate::error::{FileError, FileResult};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

/// What to do when the destination of a move already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Leave both files alone and report `DestinationExists`.
    #[default]
    Fail,
    /// Replace the existing destination.
    Overwrite,
}

/// Moves files into place.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileMover {
    conflict_policy: ConflictPolicy,
}

impl FileMover {
    pub fn new(conflict_policy: ConflictPolicy) -> Self {
        Self { conflict_policy }
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.conflict_policy
    }

    /// Creates `path` and any missing ancestors. Succeeds if it already exists.
    pub fn ensure_directory(&self, path: &Path) -> FileResult<()> {
        fs::create_dir_all(path).map_err(|e| FileError::io("create directory", path, e))
    }

    /// Moves `source` to `destination`.
    ///
    /// Uses a rename, falling back to copy and remove when the two paths are
    /// on different filesystems.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use casesort::file_mover::FileMover;
    /// use std::path::Path;
    ///
    /// let mover = FileMover::default();
    /// mover.ensure_directory(Path::new("/cases/ACC134.2023"))?;
    /// mover.move_file(
    ///     Path::new("/cases/ACC134.23.pdf"),
    ///     Path::new("/cases/ACC134.2023/ACC134.23.pdf"),
    /// )?;
    /// # Ok::<(), casesort::FileError>(())
    /// ```
    pub fn move_file(&self, source: &Path, destination: &Path) -> FileResult<()> {
        if self.conflict_policy == ConflictPolicy::Fail && destination.exists() {
            return Err(FileError::DestinationExists(destination.to_path_buf()));
        }

        match fs::rename(source, destination) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::CrossesDevices => {
                debug!(source = %source.display(), "rename crosses devices, copying instead");
                fs::copy(source, destination).map_err(|e| FileError::io("copy", source, e))?;
                fs::remove_file(source).map_err(|e| FileError::io("remove", source, e))?;
            }
            Err(e) => return Err(FileError::io("move", source, e)),
        }
        debug!(source = %source.display(), destination = %destination.display(), "moved file");
        Ok(())
    }
}
