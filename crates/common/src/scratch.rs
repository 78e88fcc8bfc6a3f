//! Job-owned scratch storage seam.

use std::path::{Path, PathBuf};

use crate::error::ReelResult;

/// Storage owned by exactly one job.
///
/// Components that write transient files (fetched assets, overlay text,
/// encoded output) go through this trait so every file is recorded before
/// its first byte is written and is removed with the job.
pub trait ScratchArea: Send + Sync {
    /// Reserve a path for a new file and record it as owned by the job.
    fn register(&self, file_name: &str) -> ReelResult<PathBuf>;

    /// Delete a registered file and forget it.
    fn discard(&self, path: &Path);
}
